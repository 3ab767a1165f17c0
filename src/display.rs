use owo_colors::{OwoColorize, Stream, Style};

use crate::aggregate::{Averages, AttributeMap, BenchmarkResultSet, LeafValue, Statistic};
use crate::types::CanonicalResult;

/// Decimal places numbers are rounded to when printed.
pub const PRINTING_PRECISION: i32 = 3;

/// Series longer than this are elided in the middle.
const SERIES_THRESHOLD: usize = 15;
const SERIES_EDGE_ITEMS: usize = 3;

const INDENT: usize = 4;

/// Human-readable label and unit for a key path segment.
fn readable_key(key: &str) -> (String, Option<&'static str>) {
    let (label, unit) = match key {
        "process" => ("process", None),
        "execution_time" => ("runtime", Some("second(s)")),
        "exit_code" => ("exit code", None),
        "skip_benchmarking" => ("skipped benchmarking", None),
        "cpu" => ("CPU", Some("seconds")),
        "memory" => ("memory", Some("bytes")),
        "max" => ("maximum", None),
        "max_perprocess" => ("maximum per process", None),
        "disk" => ("disk", Some("bytes")),
        "read_bytes" => ("read", None),
        "write_bytes" => ("write", None),
        "total_bytes" => ("total", None),
        "time_series" => ("time series", None),
        "sample_milliseconds" => ("sampling milliseconds", None),
        "cpu_percentages" => ("CPU (percentages)", None),
        "memory_bytes" => ("memory (bytes)", None),
        other => return (capitalize(&other.replace('_', " ")), None),
    };
    (capitalize(label), unit)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn format_number(value: f64) -> String {
    let scale = 10f64.powi(PRINTING_PRECISION);
    format!("{}", (value * scale).round() / scale)
}

/// `[a, b, c, ..., x, y, z]` for long series.
pub fn format_series(values: &[f64]) -> String {
    let render = |vs: &[f64]| vs.iter().map(|&v| format_number(v)).collect::<Vec<_>>().join(", ");
    if values.len() > SERIES_THRESHOLD {
        format!(
            "[{}, ..., {}]",
            render(&values[..SERIES_EDGE_ITEMS]),
            render(&values[values.len() - SERIES_EDGE_ITEMS..])
        )
    } else {
        format!("[{}]", render(values))
    }
}

pub fn format_leaf_value(value: &LeafValue) -> String {
    match value {
        LeafValue::Integer(i) => i.to_string(),
        LeafValue::Float(f) => format_number(*f),
        LeafValue::Text(s) => format!("{:?}", s),
        LeafValue::Flag(b) => b.to_string(),
        LeafValue::Absent => "None".to_string(),
        LeafValue::Series(s) => format_series(s),
    }
}

pub fn format_statistic(stat: Option<&Statistic>) -> String {
    match stat {
        Some(s) => format!(
            "(mean: {}, SD: {}, min: {}, max: {})",
            format_number(s.mean),
            format_number(s.stdev),
            format_number(s.min),
            format_number(s.max)
        ),
        None => "None".to_string(),
    }
}

// Style constants
fn style_title() -> Style {
    Style::new().green().bold()
}

fn style_iteration_title() -> Style {
    Style::new().magenta().bold()
}

fn format_title(title: &str, style: Style, indent: usize) -> String {
    let text = format!("{}====> {} <====", " ".repeat(indent), title);
    format!(
        "{}\n\n",
        text.if_supports_color(Stream::Stdout, |s| s.style(style))
    )
}

/// Renders `(dotted path, rendered value)` pairs as an indented tree: one
/// yellow heading per group, one cyan label per leaf.
fn format_tree<'a>(entries: impl IntoIterator<Item = (&'a str, String)>, indent: usize) -> String {
    let mut out = String::new();
    let mut current_group: Option<&str> = None;
    let pad = " ".repeat(indent);
    let leaf_pad = " ".repeat(indent + INDENT);

    for (path, value) in entries {
        let (group, key) = path.split_once('.').unwrap_or(("", path));

        if current_group != Some(group) {
            if current_group.is_some() {
                out.push('\n');
            }
            current_group = Some(group);
            let (label, unit) = readable_key(group);
            let heading = match unit {
                Some(unit) => format!("{} ({})", label, unit),
                None => label,
            };
            out.push_str(&format!(
                "{}{}:\n",
                pad,
                heading.if_supports_color(Stream::Stdout, |s| s.yellow())
            ));
        }

        let (label, unit) = readable_key(key);
        let unit = match (group, unit) {
            ("process", Some(unit)) => format!(" {}", unit),
            _ => String::new(),
        };
        out.push_str(&format!(
            "{}{}: {}{}\n",
            leaf_pad,
            label.if_supports_color(Stream::Stdout, |s| s.cyan()),
            value,
            unit
        ));
    }

    out.push('\n');
    out
}

pub fn format_result(result: &CanonicalResult, title: &str) -> String {
    format_iteration(result, title, style_title(), 0)
}

fn format_iteration(result: &CanonicalResult, title: &str, style: Style, indent: usize) -> String {
    let leaves = result.leaves();
    let mut out = format_title(title, style, indent);
    out.push_str(&format_tree(
        leaves.iter().map(|l| (l.path, format_leaf_value(&l.value))),
        indent,
    ));
    out
}

pub fn format_all_iterations(results: &BenchmarkResultSet) -> String {
    let mut out = format_title("All Iterations", style_title(), 0);
    for (i, result) in results.iterations().iter().enumerate() {
        out.push_str(&format_iteration(
            result,
            &format!("Iteration #{}", i + 1),
            style_iteration_title(),
            INDENT,
        ));
    }
    out
}

pub fn format_statistics(stats: &AttributeMap<Option<Statistic>>) -> String {
    let mut out = format_title("Statistics", style_title(), 0);
    out.push_str(&format_tree(
        stats.iter().map(|(path, stat)| (path, format_statistic(stat.as_ref()))),
        0,
    ));
    out
}

pub fn format_averages(averages: &Averages) -> String {
    let mut out = format_title("Averages", style_title(), 0);
    let ts = &averages.time_series;
    let series = [
        ("time_series.sample_milliseconds", format_series(&ts.sample_milliseconds)),
        ("time_series.cpu_percentages", format_series(&ts.cpu_percentages)),
        ("time_series.memory_bytes", format_series(&ts.memory_bytes)),
    ];
    let scalars = averages.values.iter().map(|(path, mean)| {
        (path, mean.map_or_else(|| "None".to_string(), format_number))
    });
    out.push_str(&format_tree(scalars.chain(series), 0));
    out
}

pub fn format_values(values: &AttributeMap<Vec<LeafValue>>) -> String {
    let mut out = format_title("Values", style_title(), 0);
    out.push_str(&format_tree(
        values.iter().map(|(path, values)| {
            let rendered: Vec<String> = values.iter().map(format_leaf_value).collect();
            (path, format!("[{}]", rendered.join(", ")))
        }),
        0,
    ));
    out
}

/// Every iteration as pretty-printed JSON.
pub fn format_json(results: &BenchmarkResultSet) -> String {
    serde_json::to_string_pretty(results).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CpuResult, DiskResult, MemoryResult, ProcessResult, Sample, TimeSeries};

    fn result(execution_time: f64) -> CanonicalResult {
        CanonicalResult {
            process: ProcessResult {
                stdout: "hi\n".into(),
                stderr: String::new(),
                execution_time,
                exit_code: 0,
                skip_benchmarking: false,
            },
            cpu: CpuResult {
                user_time: 0.1234,
                system_time: 0.0,
                total_time: 0.1234,
            },
            memory: MemoryResult {
                max: 4096,
                max_perprocess: 2048,
            },
            disk: DiskResult::default(),
            time_series: TimeSeries::from_samples((0..20).map(|i| Sample {
                elapsed_ms: i,
                cpu_percent: i as f64,
                memory_bytes: 100,
            })),
        }
    }

    // --- number and series formatting ---

    #[test]
    fn numbers_round_to_three_places() {
        assert_eq!(format_number(0.2004), "0.2");
        assert_eq!(format_number(62.5), "62.5");
        assert_eq!(format_number(1.23456), "1.235");
        assert_eq!(format_number(2.0), "2");
    }

    #[test]
    fn short_series_printed_whole() {
        assert_eq!(format_series(&[1.0, 2.5]), "[1, 2.5]");
        assert_eq!(format_series(&[]), "[]");
    }

    #[test]
    fn long_series_elided() {
        let values: Vec<f64> = (0..20).map(f64::from).collect();
        assert_eq!(format_series(&values), "[0, 1, 2, ..., 17, 18, 19]");
    }

    #[test]
    fn leaf_values_render_by_kind() {
        assert_eq!(format_leaf_value(&LeafValue::Text("a\nb".into())), "\"a\\nb\"");
        assert_eq!(format_leaf_value(&LeafValue::Absent), "None");
        assert_eq!(format_leaf_value(&LeafValue::Integer(-9)), "-9");
        assert_eq!(format_leaf_value(&LeafValue::Flag(true)), "true");
    }

    #[test]
    fn readable_keys_have_labels_and_units() {
        assert_eq!(readable_key("execution_time"), ("Runtime".into(), Some("second(s)")));
        assert_eq!(readable_key("cpu"), ("CPU".into(), Some("seconds")));
        assert_eq!(readable_key("read_chars"), ("Read chars".into(), None));
    }

    // --- section formatting ---

    #[test]
    fn result_lists_groups_and_leaves() {
        let out = format_result(&result(0.2), "First Iteration");
        assert!(out.starts_with("====> First Iteration <===="));
        assert!(out.contains("Process:\n"));
        assert!(out.contains("    Runtime: 0.2 second(s)\n"));
        assert!(out.contains("    Stdout: \"hi\\n\"\n"));
        assert!(out.contains("CPU (seconds):\n    User time: 0.123\n"));
        assert!(out.contains("Memory (bytes):\n    Maximum: 4096\n    Maximum per process: 2048\n"));
        assert!(out.contains("    Read count: None\n"));
        assert!(out.contains("Time series:\n    Sampling milliseconds: [0, 1, 2, ..., 17, 18, 19]\n"));
    }

    #[test]
    fn statistics_section() {
        let set = BenchmarkResultSet::new(vec![result(1.0), result(3.0)]);
        let out = format_statistics(&set.get_statistics());
        assert!(out.starts_with("====> Statistics <===="));
        assert!(out.contains("Runtime: (mean: 2, SD: 1, min: 1, max: 3) second(s)"));
        assert!(out.contains("Stdout: None"));
    }

    #[test]
    fn averages_section_includes_series() {
        let set = BenchmarkResultSet::new(vec![result(1.0), result(2.0)]);
        let out = format_averages(&set.get_averages().unwrap());
        assert!(out.contains("Runtime: 1.5 second(s)"));
        assert!(out.contains("Time series:\n    Sampling milliseconds: ["));
    }

    #[test]
    fn values_section_lists_every_iteration() {
        let set = BenchmarkResultSet::new(vec![result(1.0), result(2.0)]);
        let out = format_values(&set.get_values_per_attribute());
        assert!(out.contains("Runtime: [1, 2] second(s)"));
    }

    #[test]
    fn all_iterations_are_numbered_and_indented() {
        let set = BenchmarkResultSet::new(vec![result(1.0), result(2.0)]);
        let out = format_all_iterations(&set);
        assert!(out.contains("    ====> Iteration #1 <===="));
        assert!(out.contains("    ====> Iteration #2 <===="));
        assert!(out.contains("        Runtime: 2 second(s)"));
    }

    // --- format_json ---

    #[test]
    fn json_is_an_array_of_iterations() {
        let set = BenchmarkResultSet::new(vec![result(1.0)]);
        let json: serde_json::Value = serde_json::from_str(&format_json(&set)).unwrap();
        let first = &json[0];
        assert_eq!(first["process"]["exit_code"], 0);
        assert_eq!(first["memory"]["max"], 4096);
        assert_eq!(first["time_series"]["sample_milliseconds"].as_array().unwrap().len(), 20);
        assert!(first["disk"].get("read_count").is_none());
    }
}

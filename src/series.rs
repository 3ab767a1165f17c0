use serde::Serialize;

use crate::types::TimeSeries;

/// A time series merged from several iterations. Points are not necessarily
/// evenly spaced: windows no iteration sampled in are left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AveragedSeries {
    pub sample_milliseconds: Vec<f64>,
    pub cpu_percentages: Vec<f64>,
    pub memory_bytes: Vec<f64>,
}

impl AveragedSeries {
    pub fn len(&self) -> usize {
        self.sample_milliseconds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_milliseconds.is_empty()
    }
}

/// Running sums for one window.
#[derive(Default)]
struct Window {
    count: usize,
    elapsed: f64,
    cpu: f64,
    memory: f64,
}

/// Merges independently sampled series into one by bucketing samples into
/// consecutive windows of the estimated average sampling interval and
/// averaging every sample that falls into a window, across all iterations.
///
/// The interval is the mean per-iteration time range over the mean
/// per-iteration sample count. Windows start at the earliest timestamp of any
/// iteration; the last one is widened to reach the latest.
pub fn average_time_series(series: &[&TimeSeries]) -> AveragedSeries {
    let series: Vec<&TimeSeries> = series.iter().copied().filter(|s| !s.is_empty()).collect();
    let mut out = AveragedSeries::default();
    if series.is_empty() {
        return out;
    }

    let n = series.len() as f64;
    let mean_range = series.iter().map(|s| last(s) - first(s)).sum::<f64>() / n;
    let mean_count = series.iter().map(|s| s.len() as f64).sum::<f64>() / n;
    let delta = mean_range / mean_count;

    let global_min = series.iter().map(|s| first(s)).fold(f64::INFINITY, f64::min);
    let global_max = series.iter().map(|s| last(s)).fold(f64::NEG_INFINITY, f64::max);

    let windows = if delta > 0.0 && delta.is_finite() {
        ((global_max - global_min) / delta).floor().max(1.0) as usize
    } else {
        1
    };

    let mut cursors = vec![0usize; series.len()];
    for k in 1..=windows {
        let upper = if k == windows {
            global_max
        } else {
            global_min + k as f64 * delta
        };

        let mut window = Window::default();
        for (s, cursor) in series.iter().zip(cursors.iter_mut()) {
            let ms = s.sample_milliseconds();
            while *cursor < s.len() && ms[*cursor] as f64 <= upper {
                window.count += 1;
                window.elapsed += ms[*cursor] as f64;
                window.cpu += s.cpu_percentages()[*cursor];
                window.memory += s.memory_bytes()[*cursor] as f64;
                *cursor += 1;
            }
        }

        if window.count == 0 {
            continue;
        }
        let count = window.count as f64;
        out.sample_milliseconds.push(window.elapsed / count);
        out.cpu_percentages.push(window.cpu / count);
        out.memory_bytes.push(window.memory / count);
    }

    out
}

fn first(s: &TimeSeries) -> f64 {
    s.sample_milliseconds()[0] as f64
}

fn last(s: &TimeSeries) -> f64 {
    s.sample_milliseconds()[s.len() - 1] as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;

    fn series(points: &[(u64, f64, u64)]) -> TimeSeries {
        TimeSeries::from_samples(points.iter().map(|&(elapsed_ms, cpu_percent, memory_bytes)| {
            Sample {
                elapsed_ms,
                cpu_percent,
                memory_bytes,
            }
        }))
    }

    /// `count` samples spread evenly over `[start, end]`, with a little jitter.
    fn regular(count: u64, start: u64, end: u64, memory: u64) -> TimeSeries {
        let step = (end - start) as f64 / (count - 1) as f64;
        let points: Vec<(u64, f64, u64)> = (0..count)
            .map(|i| {
                let jitter = if i % 3 == 1 && i + 1 < count { 1 } else { 0 };
                let t = start + (i as f64 * step).round() as u64 + jitter;
                (t, (i % 100) as f64, memory + i)
            })
            .collect();
        series(&points)
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(average_time_series(&[]).is_empty());
        let empty = TimeSeries::new();
        assert!(average_time_series(&[&empty, &empty]).is_empty());
    }

    #[test]
    fn single_point_series() {
        let one = series(&[(7, 50.0, 1024)]);
        let avg = average_time_series(&[&one]);
        assert_eq!(avg.sample_milliseconds, vec![7.0]);
        assert_eq!(avg.cpu_percentages, vec![50.0]);
        assert_eq!(avg.memory_bytes, vec![1024.0]);
    }

    #[test]
    fn identical_iterations_average_to_themselves_in_each_window() {
        let a = series(&[(0, 10.0, 100), (10, 20.0, 200), (20, 30.0, 300), (30, 40.0, 400)]);
        let avg = average_time_series(&[&a, &a]);
        // range 30 over 4 samples: four windows of 7.5ms.
        assert_eq!(avg.sample_milliseconds, vec![0.0, 10.0, 20.0, 30.0]);
        assert_eq!(avg.cpu_percentages, vec![10.0, 20.0, 30.0, 40.0]);
        assert_eq!(avg.memory_bytes, vec![100.0, 200.0, 300.0, 400.0]);
    }

    #[test]
    fn windows_average_across_iterations() {
        let a = series(&[(0, 0.0, 0), (10, 100.0, 1000)]);
        let b = series(&[(2, 50.0, 500), (12, 50.0, 500)]);
        let avg = average_time_series(&[&a, &b]);
        // delta = 10 / 2 = 5 over [0, 12]: windows (.., 5], (5, 12].
        assert_eq!(avg.sample_milliseconds, vec![1.0, 11.0]);
        assert_eq!(avg.cpu_percentages, vec![25.0, 75.0]);
        assert_eq!(avg.memory_bytes, vec![250.0, 750.0]);
    }

    #[test]
    fn empty_windows_are_skipped() {
        let a = series(&[(0, 1.0, 1), (1, 1.0, 1), (2, 1.0, 1), (100, 9.0, 9)]);
        let avg = average_time_series(&[&a]);
        assert_eq!(avg.len(), 2);
        assert_eq!(avg.sample_milliseconds[1], 100.0);
    }

    #[test]
    fn zero_range_collapses_to_one_point() {
        let a = series(&[(5, 10.0, 10), (5, 30.0, 30)]);
        let avg = average_time_series(&[&a]);
        assert_eq!(avg.sample_milliseconds, vec![5.0]);
        assert_eq!(avg.cpu_percentages, vec![20.0]);
    }

    #[test]
    fn differing_lengths_stay_bounded_and_increasing() {
        let a = regular(50, 0, 1000, 10_000);
        let b = regular(60, 3, 1150, 20_000);
        let c = regular(45, 1, 900, 30_000);
        let all = [&a, &b, &c];
        let avg = average_time_series(&all);

        let global_min = 0.0;
        let global_max = 1150.0;
        let mean_range = (1000.0 + 1147.0 + 899.0) / 3.0;
        let mean_count = (50.0 + 60.0 + 45.0) / 3.0;
        let delta = mean_range / mean_count;

        assert!(!avg.is_empty());
        assert!(avg.len() as f64 <= (global_max - global_min) / delta);
        assert!(avg.sample_milliseconds.windows(2).all(|w| w[0] < w[1]));
        assert!(avg
            .sample_milliseconds
            .iter()
            .all(|&t| (global_min..=global_max).contains(&t)));
        assert_eq!(avg.len(), avg.cpu_percentages.len());
        assert_eq!(avg.len(), avg.memory_bytes.len());
    }
}

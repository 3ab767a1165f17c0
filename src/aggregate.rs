use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::series::{AveragedSeries, average_time_series};
use crate::types::CanonicalResult;

/// How a leaf of the canonical schema is summarized across iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Numeric scalar: statistics and mean.
    Statistics,
    /// Part of the time series: flattened for statistics, resampled for averages.
    Series,
    /// Not summarized.
    Opaque,
}

/// The value of one leaf in one iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LeafValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Flag(bool),
    /// Unsupported on this platform.
    Absent,
    Series(Vec<f64>),
}

impl LeafValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LeafValue::Integer(i) => Some(*i as f64),
            LeafValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// Dotted key path, e.g. `cpu.user_time`.
    pub path: &'static str,
    pub aggregation: Aggregation,
    pub value: LeafValue,
}

fn stat(path: &'static str, value: LeafValue) -> Leaf {
    Leaf {
        path,
        aggregation: Aggregation::Statistics,
        value,
    }
}

fn opaque(path: &'static str, value: LeafValue) -> Leaf {
    Leaf {
        path,
        aggregation: Aggregation::Opaque,
        value,
    }
}

fn series(path: &'static str, values: Vec<f64>) -> Leaf {
    Leaf {
        path,
        aggregation: Aggregation::Series,
        value: LeafValue::Series(values),
    }
}

fn int(v: u64) -> LeafValue {
    LeafValue::Integer(v as i64)
}

fn opt_int(v: Option<u64>) -> LeafValue {
    v.map_or(LeafValue::Absent, int)
}

impl CanonicalResult {
    /// Every leaf of the result, in schema order. Every iteration yields the
    /// same paths in the same order; unsupported fields are `Absent`.
    pub fn leaves(&self) -> Vec<Leaf> {
        let p = &self.process;
        let d = &self.disk;
        let ts = &self.time_series;
        vec![
            opaque("process.stdout", LeafValue::Text(p.stdout.clone())),
            opaque("process.stderr", LeafValue::Text(p.stderr.clone())),
            stat("process.execution_time", LeafValue::Float(p.execution_time)),
            stat("process.exit_code", LeafValue::Integer(i64::from(p.exit_code))),
            opaque("process.skip_benchmarking", LeafValue::Flag(p.skip_benchmarking)),
            stat("cpu.user_time", LeafValue::Float(self.cpu.user_time)),
            stat("cpu.system_time", LeafValue::Float(self.cpu.system_time)),
            stat("cpu.total_time", LeafValue::Float(self.cpu.total_time)),
            stat("memory.max", int(self.memory.max)),
            stat("memory.max_perprocess", int(self.memory.max_perprocess)),
            stat("disk.read_bytes", int(d.read_bytes)),
            stat("disk.write_bytes", int(d.write_bytes)),
            stat("disk.total_bytes", int(d.total_bytes)),
            stat("disk.read_count", opt_int(d.read_count)),
            stat("disk.write_count", opt_int(d.write_count)),
            stat("disk.total_count", opt_int(d.total_count)),
            stat("disk.read_chars", opt_int(d.read_chars)),
            stat("disk.write_chars", opt_int(d.write_chars)),
            stat("disk.total_chars", opt_int(d.total_chars)),
            stat("disk.file_system_inputs", opt_int(d.file_system_inputs)),
            stat("disk.file_system_outputs", opt_int(d.file_system_outputs)),
            series(
                "time_series.sample_milliseconds",
                ts.sample_milliseconds().iter().map(|&v| v as f64).collect(),
            ),
            series("time_series.cpu_percentages", ts.cpu_percentages().to_vec()),
            series(
                "time_series.memory_bytes",
                ts.memory_bytes().iter().map(|&v| v as f64).collect(),
            ),
        ]
    }
}

/// Summary of one attribute over all iterations. `stdev` is the population
/// standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Statistic {
    pub mean: f64,
    pub stdev: f64,
    pub min: f64,
    pub max: f64,
}

impl Statistic {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if min == max {
            return Some(Statistic {
                mean: min,
                stdev: 0.0,
                min,
                max,
            });
        }

        let n = values.len() as f64;
        let mean = (values.iter().sum::<f64>() / n).clamp(min, max);
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Statistic {
            mean,
            stdev: variance.sqrt(),
            min,
            max,
        })
    }
}

/// Values keyed by dotted attribute path, in schema order. Serializes as
/// nested objects (`{"cpu": {"user_time": ...}}`).
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMap<T> {
    entries: Vec<(&'static str, T)>,
}

impl<T> AttributeMap<T> {
    pub fn get(&self, path: &str) -> Option<&T> {
        self.entries.iter().find(|(p, _)| *p == path).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &T)> {
        self.entries.iter().map(|(p, v)| (*p, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Serialize> Serialize for AttributeMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        serialize_groups(&mut map, &self.entries)?;
        map.end()
    }
}

struct Group<'a, T>(&'a [(&'static str, T)]);

impl<T: Serialize> Serialize for Group<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (path, value) in self.0 {
            let key = path.split_once('.').map_or(*path, |(_, rest)| rest);
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Entries sharing a first path segment are contiguous in schema order.
fn serialize_groups<M: SerializeMap, T: Serialize>(
    map: &mut M,
    entries: &[(&'static str, T)],
) -> Result<(), M::Error> {
    let mut rest = entries;
    while let Some((first, _)) = rest.first() {
        let group = group_of(first);
        let len = rest.iter().take_while(|(p, _)| group_of(p) == group).count();
        map.serialize_entry(group, &Group(&rest[..len]))?;
        rest = &rest[len..];
    }
    Ok(())
}

fn group_of(path: &str) -> &str {
    path.split_once('.').map_or(path, |(group, _)| group)
}

/// Scalar means plus the resampled time series.
#[derive(Debug, Clone, PartialEq)]
pub struct Averages {
    /// Mean per numeric attribute; `None` for text, flags and fields absent
    /// in any iteration.
    pub values: AttributeMap<Option<f64>>,
    pub time_series: AveragedSeries,
}

impl Serialize for Averages {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        serialize_groups(&mut map, &self.values.entries)?;
        map.serialize_entry("time_series", &self.time_series)?;
        map.end()
    }
}

/// Every iteration of one benchmark, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BenchmarkResultSet {
    iterations: Vec<CanonicalResult>,
}

impl BenchmarkResultSet {
    pub fn new(iterations: Vec<CanonicalResult>) -> Self {
        Self { iterations }
    }

    pub fn push(&mut self, result: CanonicalResult) {
        self.iterations.push(result);
    }

    pub fn iterations(&self) -> &[CanonicalResult] {
        &self.iterations
    }

    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    pub fn get_first_iteration(&self) -> Option<&CanonicalResult> {
        self.iterations.first()
    }

    /// Leaves of every iteration, transposed: one list per path.
    fn columns(&self) -> Vec<(&'static str, Aggregation, Vec<LeafValue>)> {
        let mut columns: Vec<(&'static str, Aggregation, Vec<LeafValue>)> = Vec::new();
        for (i, result) in self.iterations.iter().enumerate() {
            for (j, leaf) in result.leaves().into_iter().enumerate() {
                if i == 0 {
                    columns.push((leaf.path, leaf.aggregation, Vec::with_capacity(self.len())));
                }
                columns[j].2.push(leaf.value);
            }
        }
        columns
    }

    /// Raw values of every attribute across iterations.
    pub fn get_values_per_attribute(&self) -> AttributeMap<Vec<LeafValue>> {
        AttributeMap {
            entries: self
                .columns()
                .into_iter()
                .map(|(path, _, values)| (path, values))
                .collect(),
        }
    }

    /// `{mean, stdev, min, max}` per numeric attribute. Time-series values are
    /// pooled across iterations. Text, flags, and attributes absent in any
    /// iteration have no statistics.
    pub fn get_statistics(&self) -> AttributeMap<Option<Statistic>> {
        let entries = self
            .columns()
            .into_iter()
            .map(|(path, aggregation, values)| {
                let stat = match aggregation {
                    Aggregation::Opaque => None,
                    Aggregation::Statistics => {
                        numeric(&values).and_then(|v| Statistic::from_values(&v))
                    }
                    Aggregation::Series => {
                        let pooled: Vec<f64> = values
                            .iter()
                            .flat_map(|v| match v {
                                LeafValue::Series(s) => s.as_slice(),
                                _ => &[],
                            })
                            .copied()
                            .collect();
                        Statistic::from_values(&pooled)
                    }
                };
                (path, stat)
            })
            .collect();
        AttributeMap { entries }
    }

    /// Mean of every numeric attribute and the averaged time series, or
    /// `None` for an empty set.
    pub fn get_averages(&self) -> Option<Averages> {
        if self.is_empty() {
            return None;
        }

        let values = self
            .columns()
            .into_iter()
            .filter(|(_, aggregation, _)| *aggregation != Aggregation::Series)
            .map(|(path, aggregation, values)| {
                let mean = match aggregation {
                    Aggregation::Statistics => numeric(&values)
                        .map(|v| v.iter().sum::<f64>() / v.len() as f64),
                    _ => None,
                };
                (path, mean)
            })
            .collect();

        let series: Vec<_> = self.iterations.iter().map(|r| &r.time_series).collect();
        Some(Averages {
            values: AttributeMap { entries: values },
            time_series: average_time_series(&series),
        })
    }
}

/// All values as numbers, or `None` if any is not numeric.
fn numeric(values: &[LeafValue]) -> Option<Vec<f64>> {
    values.iter().map(LeafValue::as_f64).collect()
}

impl Extend<CanonicalResult> for BenchmarkResultSet {
    fn extend<I: IntoIterator<Item = CanonicalResult>>(&mut self, iter: I) {
        self.iterations.extend(iter);
    }
}

impl FromIterator<CanonicalResult> for BenchmarkResultSet {
    fn from_iter<I: IntoIterator<Item = CanonicalResult>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for BenchmarkResultSet {
    type Item = CanonicalResult;
    type IntoIter = std::vec::IntoIter<CanonicalResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.iterations.into_iter()
    }
}

use serde::Serialize;

/// One time-series observation taken by the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub elapsed_ms: u64,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

/// Cumulative CPU times in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuTimes {
    pub user: f64,
    pub system: f64,
}

impl CpuTimes {
    pub fn total(&self) -> f64 {
        self.user + self.system
    }
}

impl std::ops::Add for CpuTimes {
    type Output = CpuTimes;

    fn add(self, rhs: CpuTimes) -> CpuTimes {
        CpuTimes {
            user: self.user + rhs.user,
            system: self.system + rhs.system,
        }
    }
}

/// Cumulative disk I/O counters. Optional fields are `None` on platforms
/// that do not expose them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DiskCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_count: Option<u64>,
    pub write_count: Option<u64>,
    pub read_chars: Option<u64>,
    pub write_chars: Option<u64>,
}

/// The platform-independent result of one benchmark iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalResult {
    pub process: ProcessResult,
    pub cpu: CpuResult,
    pub memory: MemoryResult,
    pub disk: DiskResult,
    pub time_series: TimeSeries,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessResult {
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock seconds.
    pub execution_time: f64,
    pub exit_code: i32,
    /// Set when the command exited before the monitors could attach.
    pub skip_benchmarking: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuResult {
    pub user_time: f64,
    pub system_time: f64,
    pub total_time: f64,
}

/// Peak resident memory in bytes.
///
/// `max` covers the target plus all of its descendants, `max_perprocess` the
/// largest single process. The two come from different sources on some
/// platforms and are not guaranteed to satisfy `max >= max_perprocess`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryResult {
    pub max: u64,
    pub max_perprocess: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DiskResult {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_chars: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_chars: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chars: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_system_inputs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_system_outputs: Option<u64>,
}

/// Three parallel arrays that always have the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeSeries {
    sample_milliseconds: Vec<u64>,
    cpu_percentages: Vec<f64>,
    memory_bytes: Vec<u64>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a series from samples, sorting them by elapsed time.
    pub fn from_samples(samples: impl IntoIterator<Item = Sample>) -> Self {
        let mut samples: Vec<Sample> = samples.into_iter().collect();
        samples.sort_by_key(|s| s.elapsed_ms);
        let mut series = TimeSeries::new();
        for sample in samples {
            series.push(sample);
        }
        series
    }

    /// Appends a sample. Samples older than the last one are clamped forward so
    /// `sample_milliseconds` stays non-decreasing.
    pub fn push(&mut self, sample: Sample) {
        let elapsed = self
            .sample_milliseconds
            .last()
            .map_or(sample.elapsed_ms, |&last| last.max(sample.elapsed_ms));
        self.sample_milliseconds.push(elapsed);
        self.cpu_percentages.push(sample.cpu_percent);
        self.memory_bytes.push(sample.memory_bytes);
    }

    pub fn len(&self) -> usize {
        self.sample_milliseconds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_milliseconds.is_empty()
    }

    pub fn sample_milliseconds(&self) -> &[u64] {
        &self.sample_milliseconds
    }

    pub fn cpu_percentages(&self) -> &[f64] {
        &self.cpu_percentages
    }

    pub fn memory_bytes(&self) -> &[u64] {
        &self.memory_bytes
    }

    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.len()).map(|i| Sample {
            elapsed_ms: self.sample_milliseconds[i],
            cpu_percent: self.cpu_percentages[i],
            memory_bytes: self.memory_bytes[i],
        })
    }
}

/// Wraps a string in single quotes, escaping internal single quotes as `'\''`.
pub fn shell_escape_single_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

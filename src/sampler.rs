use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::platform::{AccessPolicy, ProbeError};
use crate::process::{Detail, ProcessKey, ProcessTable, Snapshot};
use crate::state::RunState;
use crate::types::{Sample, TimeSeries};

/// What the sampler hands back when the target exits.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SamplerOutput {
    pub time_series: TimeSeries,
    /// Peak resident memory of the target and all descendants together.
    pub memory_max: u64,
    /// Peak resident memory of any single process in the tree.
    pub memory_perprocess_max: u64,
}

/// Trailing span utilization is measured over. Accumulated CPU time only
/// advances in scheduler ticks, so shorter spans quantize badly.
pub const CPU_WINDOW: Duration = Duration::from_millis(50);

/// Turns accumulated CPU time into utilization, per process identity.
///
/// The first observation of a process is its baseline. Later ones report the
/// CPU time used since the oldest observation still inside the window,
/// divided by the wall time between the two.
#[derive(Debug)]
pub struct CpuMeter {
    window: Duration,
    history: HashMap<ProcessKey, VecDeque<(Instant, u64)>>,
}

impl Default for CpuMeter {
    fn default() -> Self {
        Self::new(CPU_WINDOW)
    }
}

impl CpuMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            history: HashMap::new(),
        }
    }

    /// Records `cpu_time_ms` for `key` at `now`. Returns `None` the first time
    /// `key` is seen.
    pub fn observe(&mut self, key: ProcessKey, cpu_time_ms: u64, now: Instant) -> Option<f64> {
        let points = self.history.entry(key).or_default();
        let baseline = points.is_empty();
        points.push_back((now, cpu_time_ms));
        if baseline {
            return None;
        }

        while points.len() > 2 && now.saturating_duration_since(points[1].0) >= self.window {
            points.pop_front();
        }

        let (since, base) = points[0];
        let elapsed = now.saturating_duration_since(since).as_secs_f64();
        if elapsed <= 0.0 {
            return Some(0.0);
        }
        let used = cpu_time_ms.saturating_sub(base) as f64 / 1000.0;
        Some(used / elapsed * 100.0)
    }

    pub fn has_seen(&self, key: &ProcessKey) -> bool {
        self.history.contains_key(key)
    }
}

/// Usage of a process tree at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeUsage {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_perprocess_max: u64,
}

/// Sums the target's usage with that of its descendants.
///
/// Every process contributes no utilization on its first observation: that
/// one is the baseline its CPU delta is measured against.
pub fn sample_tree(
    snapshot: &Snapshot,
    pid: u32,
    meter: &mut CpuMeter,
    now: Instant,
) -> Result<TreeUsage, ProbeError> {
    let target = snapshot.get(pid).ok_or(ProbeError::NoSuchProcess)?;

    let mut usage = TreeUsage {
        cpu_percent: meter
            .observe(target.key(), target.cpu_time_ms, now)
            .unwrap_or(0.0),
        memory_bytes: target.memory_bytes,
        memory_perprocess_max: target.memory_bytes,
    };

    for child in snapshot.descendants(pid) {
        usage.memory_bytes += child.memory_bytes;
        usage.memory_perprocess_max = usage.memory_perprocess_max.max(child.memory_bytes);
        if let Some(percent) = meter.observe(child.key(), child.cpu_time_ms, now) {
            usage.cpu_percent += percent;
        }
    }

    Ok(usage)
}

/// Samples CPU utilization and tree memory of the target until it exits.
pub struct Sampler {
    interval: Option<Duration>,
}

impl Sampler {
    pub fn new(interval: Option<Duration>) -> Self {
        Self { interval }
    }

    /// Blocks until the target is published, then samples it. Returns an
    /// empty output if benchmarking was skipped.
    pub fn run(&self, state: &RunState) -> Result<SamplerOutput> {
        let mut output = SamplerOutput::default();
        let Some(target) = state.wait_for_target() else {
            return Ok(output);
        };

        let mut table = ProcessTable::new(Detail::Usage);
        let mut policy = AccessPolicy::new(target.pid);
        let mut meter = CpuMeter::default();

        loop {
            let snapshot = table.snapshot();
            let now = Instant::now();
            if !snapshot.is_running(target.pid) {
                break;
            }

            let elapsed_ms = now.saturating_duration_since(target.started).as_millis() as u64;
            match sample_tree(&snapshot, target.pid, &mut meter, now) {
                Ok(usage) => {
                    policy.record_success();
                    output.time_series.push(Sample {
                        elapsed_ms,
                        cpu_percent: usage.cpu_percent,
                        memory_bytes: usage.memory_bytes,
                    });
                    output.memory_max = output.memory_max.max(usage.memory_bytes);
                    output.memory_perprocess_max =
                        output.memory_perprocess_max.max(usage.memory_perprocess_max);
                }
                Err(err) => {
                    if policy.absorb(err)? == ControlFlow::Break(()) {
                        break;
                    }
                }
            }

            if let Some(interval) = self.interval {
                std::thread::sleep(interval);
            }
        }

        debug!(
            "sampler finished for pid {}: {} samples, peak memory {} bytes",
            target.pid,
            output.time_series.len(),
            output.memory_max
        );
        Ok(output)
    }
}

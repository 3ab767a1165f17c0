use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::platform::{AccessPolicy, ResourceReader};
use crate::process::ProcessKey;
use crate::state::RunState;
use crate::types::{CpuTimes, DiskCounters};

/// Last successful reads before the target exited.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FixedMetrics {
    /// Target CPU times; includes reaped children where the platform does.
    pub cpu: Option<CpuTimes>,
    /// Separately accumulated descendant CPU times, on platforms whose
    /// `cpu` excludes children. Zero elsewhere.
    pub children_cpu: CpuTimes,
    pub disk: Option<DiskCounters>,
}

/// Running totals of each observed descendant's CPU time, keyed by process
/// identity so a descendant that exits keeps its last reading.
#[derive(Debug, Default)]
pub struct ChildCpuLedger {
    latest: HashMap<ProcessKey, CpuTimes>,
}

impl ChildCpuLedger {
    pub fn record(&mut self, key: ProcessKey, times: CpuTimes) {
        self.latest.insert(key, times);
    }

    pub fn total(&self) -> CpuTimes {
        self.latest
            .values()
            .fold(CpuTimes::default(), |acc, &times| acc + times)
    }
}

/// Snapshots cumulative CPU time and disk counters while the target runs.
///
/// Runs apart from the sampler because these reads are heavier and would
/// slow its cadence.
pub struct FixedMetricCollector {
    reader: Box<dyn ResourceReader>,
    interval: Option<Duration>,
}

impl FixedMetricCollector {
    pub fn new(reader: Box<dyn ResourceReader>, interval: Option<Duration>) -> Self {
        Self { reader, interval }
    }

    pub fn run(mut self, state: &RunState) -> Result<FixedMetrics> {
        let mut metrics = FixedMetrics::default();
        let Some(target) = state.wait_for_target() else {
            return Ok(metrics);
        };

        let mut policy = AccessPolicy::new(target.pid);
        let mut children = ChildCpuLedger::default();
        let track_children = !self.reader.includes_child_cpu_times();

        loop {
            self.reader.refresh();
            if !self.reader.is_running(target.pid) {
                break;
            }

            let read = self
                .reader
                .cpu_times(target.pid)
                .and_then(|cpu| Ok((cpu, self.reader.disk_io(target.pid)?)));

            match read {
                Ok((cpu, disk)) => {
                    policy.record_success();
                    metrics.cpu = Some(cpu);
                    metrics.disk = Some(disk);
                }
                Err(err) => {
                    if policy.absorb(err)? == ControlFlow::Break(()) {
                        break;
                    }
                    continue;
                }
            }

            if track_children {
                for (key, times) in self.reader.descendant_cpu_times(target.pid) {
                    children.record(key, times);
                }
            }

            if let Some(interval) = self.interval {
                std::thread::sleep(interval);
            }
        }

        metrics.children_cpu = children.total();
        debug!(
            "collector finished for pid {}: cpu={:?}, disk={:?}",
            target.pid, metrics.cpu, metrics.disk
        );
        Ok(metrics)
    }
}

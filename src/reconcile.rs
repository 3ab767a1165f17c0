use serde::Serialize;

use crate::accounting::AccountingReport;
use crate::collector::FixedMetrics;
use crate::sampler::SamplerOutput;
use crate::types::{
    CanonicalResult, CpuResult, CpuTimes, DiskCounters, DiskResult, MemoryResult, ProcessResult,
    TimeSeries,
};

/// Everything one iteration observed, before reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawIteration {
    pub stdout: String,
    pub stderr: String,
    /// Exit code as seen by waiting on the launched process. When the
    /// accounting utility wraps the target this is the utility's own code.
    pub exit_code: i32,
    /// Seconds between spawn and exit, as seen by the launcher.
    pub execution_time: f64,
    /// The target exited before it could be resolved.
    pub skip_benchmarking: bool,
    pub sampler: SamplerOutput,
    pub fixed: FixedMetrics,
    pub accounting: Option<AccountingReport>,
}

/// Folds one iteration's sources into the canonical schema.
///
/// Exit code, wall time and per-process peak memory prefer the accounting
/// report; aggregate peak memory always comes from the sampler; CPU times
/// come from the collector, plus its separately accumulated child totals.
pub fn reconcile(raw: RawIteration) -> CanonicalResult {
    let (execution_time, exit_code) = match &raw.accounting {
        Some(report) => (report.wall_clock_time, report.exit_code),
        None => (raw.execution_time, raw.exit_code),
    };

    let process = ProcessResult {
        stdout: raw.stdout,
        stderr: raw.stderr,
        execution_time,
        exit_code,
        skip_benchmarking: raw.skip_benchmarking,
    };

    if raw.skip_benchmarking {
        return CanonicalResult {
            process,
            cpu: CpuResult::default(),
            memory: MemoryResult::default(),
            disk: zeroed_disk(raw.accounting.is_some()),
            time_series: TimeSeries::new(),
        };
    }

    let cpu = cpu_result(raw.fixed.cpu.unwrap_or_default() + raw.fixed.children_cpu);

    let memory = MemoryResult {
        max: raw.sampler.memory_max,
        max_perprocess: raw
            .accounting
            .as_ref()
            .map_or(raw.sampler.memory_perprocess_max, |r| r.max_resident_set_bytes),
    };

    let mut disk = disk_result(raw.fixed.disk.unwrap_or_default());
    if let Some(report) = &raw.accounting {
        disk.file_system_inputs = Some(report.file_system_inputs_bytes);
        disk.file_system_outputs = Some(report.file_system_outputs_bytes);
    }

    CanonicalResult {
        process,
        cpu,
        memory,
        disk,
        time_series: raw.sampler.time_series,
    }
}

fn cpu_result(times: CpuTimes) -> CpuResult {
    CpuResult {
        user_time: times.user,
        system_time: times.system,
        total_time: times.total(),
    }
}

fn disk_result(counters: DiskCounters) -> DiskResult {
    DiskResult {
        read_bytes: counters.read_bytes,
        write_bytes: counters.write_bytes,
        total_bytes: counters.read_bytes + counters.write_bytes,
        read_count: counters.read_count,
        write_count: counters.write_count,
        total_count: counters.read_count.zip(counters.write_count).map(|(r, w)| r + w),
        read_chars: counters.read_chars,
        write_chars: counters.write_chars,
        total_chars: counters.read_chars.zip(counters.write_chars).map(|(r, w)| r + w),
        file_system_inputs: None,
        file_system_outputs: None,
    }
}

/// Usage of a skipped iteration. Fields the platform would have reported are
/// present as zero so the iteration keeps the same shape as its siblings.
fn zeroed_disk(has_report: bool) -> DiskResult {
    let platform_field = cfg!(target_os = "linux").then_some(0);
    let report_field = has_report.then_some(0);
    DiskResult {
        read_count: platform_field,
        write_count: platform_field,
        total_count: platform_field,
        read_chars: platform_field,
        write_chars: platform_field,
        total_chars: platform_field,
        file_system_inputs: report_field,
        file_system_outputs: report_field,
        ..DiskResult::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;

    fn report(exit_code: i32, wall: &str, maxrss: u64) -> AccountingReport {
        let text = format!(
            "\tUser time (seconds): 1.00\n\
             \tSystem time (seconds): 0.50\n\
             \tPercent of CPU this job got: 75%\n\
             \tElapsed (wall clock) time (h:mm:ss or m:ss): {wall}\n\
             \tMaximum resident set size (kbytes): {maxrss}\n\
             \tFile system inputs: 8\n\
             \tFile system outputs: 16\n\
             \tExit status: {exit_code}\n"
        );
        AccountingReport::parse(&text).unwrap()
    }

    fn raw() -> RawIteration {
        RawIteration {
            stdout: "out".into(),
            stderr: "err".into(),
            exit_code: 0,
            execution_time: 2.25,
            skip_benchmarking: false,
            sampler: SamplerOutput {
                time_series: TimeSeries::from_samples([
                    Sample {
                        elapsed_ms: 0,
                        cpu_percent: 10.0,
                        memory_bytes: 100,
                    },
                    Sample {
                        elapsed_ms: 5,
                        cpu_percent: 90.0,
                        memory_bytes: 300,
                    },
                ]),
                memory_max: 300,
                memory_perprocess_max: 200,
            },
            fixed: FixedMetrics {
                cpu: Some(CpuTimes {
                    user: 1.5,
                    system: 0.5,
                }),
                children_cpu: CpuTimes::default(),
                disk: Some(DiskCounters {
                    read_bytes: 10,
                    write_bytes: 20,
                    read_count: Some(1),
                    write_count: Some(2),
                    read_chars: None,
                    write_chars: None,
                }),
            },
            accounting: None,
        }
    }

    #[test]
    fn direct_observation_without_report() {
        let result = reconcile(raw());
        assert_eq!(result.process.exit_code, 0);
        assert_eq!(result.process.execution_time, 2.25);
        assert_eq!(result.process.stdout, "out");
        assert_eq!(result.memory.max, 300);
        assert_eq!(result.memory.max_perprocess, 200);
        assert_eq!(result.cpu.total_time, 2.0);
        assert_eq!(result.time_series.len(), 2);
    }

    #[test]
    fn report_takes_precedence_for_exit_time_and_perprocess_memory() {
        let mut raw = raw();
        raw.exit_code = 1;
        raw.accounting = Some(report(3, "0:01.50", 4));
        let result = reconcile(raw);

        assert_eq!(result.process.exit_code, 3);
        assert_eq!(result.process.execution_time, 1.5);
        assert_eq!(result.memory.max_perprocess, 4096);
        assert_eq!(result.memory.max, 300);
        assert_eq!(result.disk.file_system_inputs, Some(8 * 512));
        assert_eq!(result.disk.file_system_outputs, Some(16 * 512));
    }

    #[test]
    fn collector_child_times_are_added() {
        let mut raw = raw();
        raw.fixed.children_cpu = CpuTimes {
            user: 0.25,
            system: 0.25,
        };
        let result = reconcile(raw);
        assert_eq!(result.cpu.user_time, 1.75);
        assert_eq!(result.cpu.system_time, 0.75);
        assert_eq!(result.cpu.total_time, 2.5);
    }

    #[test]
    fn disk_totals_only_when_both_sides_known() {
        let result = reconcile(raw());
        assert_eq!(result.disk.total_bytes, 30);
        assert_eq!(result.disk.total_count, Some(3));
        assert_eq!(result.disk.total_chars, None);
        assert_eq!(result.disk.file_system_inputs, None);
    }

    #[test]
    fn skipped_iteration_keeps_exit_code_and_zeroes_usage() {
        let mut raw = raw();
        raw.skip_benchmarking = true;
        raw.accounting = Some(report(7, "0:00.01", 900));
        let result = reconcile(raw);

        assert!(result.process.skip_benchmarking);
        assert_eq!(result.process.exit_code, 7);
        assert_eq!(result.process.stdout, "out");
        assert_eq!(result.cpu, CpuResult::default());
        assert_eq!(result.memory, MemoryResult::default());
        assert_eq!(result.disk.read_bytes, 0);
        assert_eq!(result.disk.file_system_inputs, Some(0));
        assert!(result.time_series.is_empty());
    }
}

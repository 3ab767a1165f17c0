use std::iter::FusedIterator;
use std::thread::{self, ScopedJoinHandle};

use anyhow::Result;
use tracing::{debug, info};

use crate::accounting::AccountingReport;
use crate::aggregate::BenchmarkResultSet;
use crate::collector::FixedMetricCollector;
use crate::config::Settings;
use crate::errors::CmdprobeError;
use crate::launch::{Finished, launch, locate_program, split_command};
use crate::platform::Platform;
use crate::reconcile::{RawIteration, reconcile};
use crate::sampler::Sampler;
use crate::state::RunState;
use crate::types::CanonicalResult;

/// Benchmarks commands with one set of settings on one detected platform.
#[derive(Debug, Clone)]
pub struct Benchmark {
    settings: Settings,
    platform: Platform,
}

impl Default for Benchmark {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Benchmark {
    pub fn new(settings: Settings) -> Self {
        let platform = Platform::detect(&settings);
        Self { settings, platform }
    }

    pub fn with_platform(settings: Settings, platform: Platform) -> Self {
        Self { settings, platform }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Runs `command` `iterations` times and collects every result.
    pub fn run(&self, command: &str, iterations: usize) -> Result<BenchmarkResultSet> {
        self.iter(command, iterations)?.collect()
    }

    /// Like [`Benchmark::run`], but yields each result as its iteration
    /// completes. The first error ends the iteration.
    ///
    /// The command is parsed and located up front, so launch errors surface
    /// here rather than from the first `next()`.
    pub fn iter(&self, command: &str, iterations: usize) -> Result<Iterations> {
        if iterations < 1 {
            return Err(CmdprobeError::InvalidIterations { iterations }.into());
        }
        let argv = prepare(command)?;
        Ok(Iterations {
            bench: self.clone(),
            argv,
            remaining: iterations,
            completed: 0,
        })
    }

    /// Runs `command` once and returns what each source observed, unreconciled.
    pub fn run_raw(&self, command: &str) -> Result<RawIteration> {
        let argv = prepare(command)?;
        self.run_iteration(&argv)
    }

    fn run_iteration(&self, argv: &[String]) -> Result<RawIteration> {
        let state = RunState::new();
        let interval = self.settings.sampling_interval();
        let reader = self.platform.reader();

        let (outcome, sampler, collector) = thread::scope(|scope| {
            let sampler = scope.spawn(|| Sampler::new(interval).run(&state));
            let collector =
                scope.spawn(|| FixedMetricCollector::new(reader, interval).run(&state));

            let outcome = self.launch_and_wait(argv, &state);
            // Releases workers still waiting when launch or resolution failed.
            state.skip_benchmarking();

            (
                outcome,
                join(sampler, "sampler"),
                join(collector, "collector"),
            )
        });

        let (finished, skip_benchmarking) = outcome?;
        let sampler = sampler?;
        let fixed = collector?;

        let accounting = finished
            .report
            .as_ref()
            .map(|report| AccountingReport::read(report.path()))
            .transpose()?;

        Ok(RawIteration {
            stdout: finished.stdout,
            stderr: finished.stderr,
            exit_code: finished.exit_code,
            execution_time: finished.execution_time,
            skip_benchmarking,
            sampler,
            fixed,
            accounting,
        })
    }

    fn launch_and_wait(&self, argv: &[String], state: &RunState) -> Result<(Finished, bool)> {
        let mut launched = launch(argv, self.platform.accounting_utility())?;

        let resolved = match launched.resolve_target(self.settings.resolve_poll_interval()) {
            Ok(resolved) => resolved,
            Err(err) => {
                launched.abort();
                return Err(err);
            }
        };

        let skipped = match resolved {
            Some(target) => {
                debug!("monitoring pid {}", target.pid);
                state.publish_target(target);
                false
            }
            None => {
                state.skip_benchmarking();
                true
            }
        };

        Ok((launched.finish()?, skipped))
    }
}

fn join<T>(handle: ScopedJoinHandle<'_, Result<T>>, worker: &'static str) -> Result<T> {
    handle
        .join()
        .map_err(|_| CmdprobeError::WorkerPanicked { worker })?
}

/// Tokenizes `command` and resolves its program to a path.
fn prepare(command: &str) -> Result<Vec<String>> {
    let mut argv = split_command(command)?;
    let program = locate_program(&argv[0])?;
    argv[0] = program.to_string_lossy().into_owned();
    Ok(argv)
}

/// Results of a running benchmark, one per completed iteration.
pub struct Iterations {
    bench: Benchmark,
    argv: Vec<String>,
    remaining: usize,
    completed: usize,
}

impl Iterator for Iterations {
    type Item = Result<CanonicalResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        match self.bench.run_iteration(&self.argv) {
            Ok(raw) => {
                let result = reconcile(raw);
                self.completed += 1;
                info!(
                    "iteration {} finished: exit code {}, {:.3}s",
                    self.completed, result.process.exit_code, result.process.execution_time
                );
                Some(Ok(result))
            }
            Err(err) => {
                self.remaining = 0;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl FusedIterator for Iterations {}

/// Runs `command` `iterations` times with default settings.
pub fn benchmark_command(command: &str, iterations: usize) -> Result<BenchmarkResultSet> {
    Benchmark::default().run(command, iterations)
}

/// Streaming form of [`benchmark_command`].
pub fn benchmark_command_iter(command: &str, iterations: usize) -> Result<Iterations> {
    Benchmark::default().iter(command, iterations)
}

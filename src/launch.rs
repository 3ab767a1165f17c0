use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::errors::CmdprobeError;
use crate::platform::AccountingUtility;
use crate::process::{Detail, ProcessTable};
use crate::state::Target;

/// Splits a command line into arguments using POSIX shell quoting rules.
///
/// Single quotes are literal; inside double quotes a backslash escapes only
/// `"`, `\`, `$` and `` ` ``; outside quotes a backslash escapes any character.
/// No expansion of any kind is performed.
pub fn split_command(command: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    let unterminated = || CmdprobeError::UnterminatedQuote {
        command: command.to_string(),
    };

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(unterminated().into()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some('\n') => {}
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(unterminated().into()),
                        },
                        Some(c) => current.push(c),
                        None => return Err(unterminated().into()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some('\n') => {}
                    Some(c) => current.push(c),
                    None => current.push('\\'),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        args.push(current);
    }
    if args.is_empty() {
        return Err(CmdprobeError::EmptyCommand.into());
    }
    Ok(args)
}

/// Resolves `program` the way `execvp` would: names containing a `/` are used
/// as given, anything else is searched for in `PATH`.
pub fn locate_program(program: &str) -> Result<PathBuf> {
    let not_found = || CmdprobeError::CommandNotFound {
        program: program.to_string(),
    };

    if program.contains('/') {
        let path = PathBuf::from(program);
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(not_found().into())
        };
    }

    let path_var = std::env::var_os("PATH").ok_or_else(not_found)?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| not_found().into())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// A started command whose output is being drained in the background.
pub struct Launched {
    child: Child,
    started: Instant,
    report: Option<NamedTempFile>,
    stdout: JoinHandle<std::io::Result<Vec<u8>>>,
    stderr: JoinHandle<std::io::Result<Vec<u8>>>,
}

/// How a launched command ended.
#[derive(Debug)]
pub struct Finished {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Seconds from spawn to exit.
    pub execution_time: f64,
    /// The accounting utility's report file, if the command was wrapped.
    pub report: Option<NamedTempFile>,
}

/// Starts `argv`, wrapped by `accounting` when given. `argv[0]` must already
/// be resolved.
pub fn launch(argv: &[String], accounting: Option<&AccountingUtility>) -> Result<Launched> {
    let program = argv.first().ok_or(CmdprobeError::EmptyCommand)?;
    let launch_failed = |source| CmdprobeError::LaunchFailed {
        program: program.clone(),
        source,
    };

    let (mut command, report) = match accounting {
        Some(utility) => {
            let report = NamedTempFile::new().map_err(launch_failed)?;
            let mut command = Command::new(utility.path());
            command.args(utility.wrap_args(report.path(), argv));
            (command, Some(report))
        }
        None => {
            let mut command = Command::new(program);
            command.args(&argv[1..]);
            (command, None)
        }
    };

    let started = Instant::now();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(launch_failed)?;
    debug!("launched {:?} as pid {}", argv, child.id());

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    Ok(Launched {
        child,
        started,
        report,
        stdout,
        stderr,
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(handle: JoinHandle<std::io::Result<Vec<u8>>>, stream: &'static str) -> Result<String> {
    let bytes = handle
        .join()
        .map_err(|_| CmdprobeError::WorkerPanicked { worker: stream })?
        .map_err(|source| CmdprobeError::OutputReadError { stream, source })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

impl Launched {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn is_wrapped(&self) -> bool {
        self.report.is_some()
    }

    /// Finds the process to measure.
    ///
    /// Unwrapped, that is the launched process itself. Wrapped, it is the
    /// wrapper's first child, polled for every `poll` until it appears. `None`
    /// means the wrapper exited before a child was seen.
    pub fn resolve_target(&mut self, poll: Duration) -> Result<Option<Target>> {
        if !self.is_wrapped() {
            return Ok(Some(Target {
                pid: self.child.id(),
                started: self.started,
            }));
        }

        let wrapper = self.child.id();
        let mut table = ProcessTable::new(Detail::Topology);
        loop {
            if self.child.try_wait()?.is_some() {
                warn!("pid {} exited before its child could be resolved", wrapper);
                return Ok(None);
            }

            let snapshot = table.snapshot();
            if let Some(child) = snapshot.children(wrapper).first() {
                debug!("resolved target pid {} under wrapper {}", child.pid, wrapper);
                return Ok(Some(Target {
                    pid: child.pid,
                    started: self.started,
                }));
            }

            thread::sleep(poll);
        }
    }

    /// Kills the launched process and reaps it. Used when the iteration
    /// cannot go on.
    pub fn abort(mut self) {
        if let Err(err) = self.child.kill() {
            debug!("kill pid {}: {}", self.child.id(), err);
        }
        if let Err(err) = self.child.wait() {
            warn!("could not reap pid {}: {}", self.child.id(), err);
        }
    }

    /// Waits for the command to exit and collects its output.
    pub fn finish(mut self) -> Result<Finished> {
        let status = self.child.wait()?;
        let execution_time = self.started.elapsed().as_secs_f64();

        let stdout = collect(self.stdout, "stdout")?;
        let stderr = collect(self.stderr, "stderr")?;

        Ok(Finished {
            stdout,
            stderr,
            exit_code: exit_code(status),
            execution_time,
            report: self.report,
        })
    }
}

/// The exit code, or the negated signal number for a signalled process.
#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

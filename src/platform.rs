use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Result;
use tracing::debug;

use crate::config::Settings;
use crate::errors::CmdprobeError;
use crate::process::{Detail, ProcessKey, ProcessTable, Snapshot};
use crate::types::{CpuTimes, DiskCounters};

/// Why a single per-process query failed.
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("access denied")]
    AccessDenied,

    #[error("no such process")]
    NoSuchProcess,

    #[error(transparent)]
    Io(io::Error),
}

impl ProbeError {
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ProbeError::NoSuchProcess,
            io::ErrorKind::PermissionDenied => ProbeError::AccessDenied,
            _ if is_esrch(&err) => ProbeError::NoSuchProcess,
            _ => ProbeError::Io(err),
        }
    }
}

#[cfg(unix)]
fn is_esrch(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn is_esrch(_err: &io::Error) -> bool {
    false
}

/// Decides what a failed query means for a monitoring loop.
///
/// Access denied after at least one successful query is the target exiting
/// under us; access denied before any success means we lack the privileges to
/// measure at all. A vanished process is a benign race: the liveness check,
/// not this policy, ends the loop.
#[derive(Debug)]
pub struct AccessPolicy {
    pid: u32,
    granted: bool,
}

impl AccessPolicy {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            granted: false,
        }
    }

    pub fn record_success(&mut self) {
        self.granted = true;
    }

    pub fn absorb(&mut self, err: ProbeError) -> Result<ControlFlow<()>> {
        match err {
            ProbeError::AccessDenied if self.granted => Ok(ControlFlow::Break(())),
            ProbeError::AccessDenied => Err(CmdprobeError::PermissionDenied { pid: self.pid }.into()),
            ProbeError::NoSuchProcess => Ok(ControlFlow::Continue(())),
            ProbeError::Io(e) => Err(e.into()),
        }
    }
}

/// Per-platform access to cumulative CPU time and disk counters.
pub trait ResourceReader: Send {
    /// Called once per collector loop iteration before any query.
    fn refresh(&mut self) {}

    fn is_running(&mut self, pid: u32) -> bool;

    fn cpu_times(&mut self, pid: u32) -> Result<CpuTimes, ProbeError>;

    fn disk_io(&mut self, pid: u32) -> Result<DiskCounters, ProbeError>;

    /// Whether `cpu_times` already counts the target's children.
    fn includes_child_cpu_times(&self) -> bool;

    /// CPU times of every live descendant, for platforms that do not fold
    /// children into the parent.
    fn descendant_cpu_times(&mut self, _pid: u32) -> Vec<(ProcessKey, CpuTimes)> {
        Vec::new()
    }
}

/// Reads `/proc/<pid>/stat` and `/proc/<pid>/io`.
///
/// The stat file's `cutime`/`cstime` cover every child the target has reaped,
/// so child CPU time comes for free.
pub struct ProcfsReader {
    root: PathBuf,
    ticks_per_second: f64,
}

impl Default for ProcfsReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsReader {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ticks_per_second: clock_ticks_per_second(),
        }
    }

    fn read(&self, pid: u32, file: &str) -> Result<String, ProbeError> {
        std::fs::read_to_string(self.root.join(pid.to_string()).join(file)).map_err(ProbeError::from_io)
    }
}

impl ResourceReader for ProcfsReader {
    fn is_running(&mut self, pid: u32) -> bool {
        match self.read(pid, "stat") {
            Ok(text) => parse_proc_stat(&text, self.ticks_per_second)
                .is_ok_and(|stat| !matches!(stat.state, 'Z' | 'X' | 'x')),
            Err(_) => false,
        }
    }

    fn cpu_times(&mut self, pid: u32) -> Result<CpuTimes, ProbeError> {
        let text = self.read(pid, "stat")?;
        let stat = parse_proc_stat(&text, self.ticks_per_second)?;
        Ok(stat.own + stat.children)
    }

    fn disk_io(&mut self, pid: u32) -> Result<DiskCounters, ProbeError> {
        let text = self.read(pid, "io")?;
        parse_proc_io(&text)
    }

    fn includes_child_cpu_times(&self) -> bool {
        true
    }
}

#[cfg(unix)]
fn clock_ticks_per_second() -> f64 {
    // SAFETY: sysconf has no preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as f64 } else { 100.0 }
}

#[cfg(not(unix))]
fn clock_ticks_per_second() -> f64 {
    100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcStat {
    pub state: char,
    pub own: CpuTimes,
    pub children: CpuTimes,
}

/// Parses `/proc/<pid>/stat`. The command name may contain spaces and
/// parentheses, so fields are counted from the last `)`.
pub fn parse_proc_stat(text: &str, ticks_per_second: f64) -> Result<ProcStat, ProbeError> {
    let invalid = || {
        ProbeError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed stat line: {}", text.trim()),
        ))
    };

    let rest = text.rfind(')').map(|i| &text[i + 1..]).ok_or_else(invalid)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() < 15 {
        return Err(invalid());
    }

    let state = fields[0].chars().next().ok_or_else(invalid)?;
    let ticks = |i: usize| -> Result<f64, ProbeError> {
        let value: i64 = fields[i].parse().map_err(|_| invalid())?;
        Ok(value.max(0) as f64 / ticks_per_second)
    };

    Ok(ProcStat {
        state,
        own: CpuTimes {
            user: ticks(11)?,
            system: ticks(12)?,
        },
        children: CpuTimes {
            user: ticks(13)?,
            system: ticks(14)?,
        },
    })
}

/// Parses `/proc/<pid>/io`.
pub fn parse_proc_io(text: &str) -> Result<DiskCounters, ProbeError> {
    let mut rchar = None;
    let mut wchar = None;
    let mut syscr = None;
    let mut syscw = None;
    let mut read_bytes = None;
    let mut write_bytes = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<u64>() else {
            continue;
        };
        match key.trim() {
            "rchar" => rchar = Some(value),
            "wchar" => wchar = Some(value),
            "syscr" => syscr = Some(value),
            "syscw" => syscw = Some(value),
            "read_bytes" => read_bytes = Some(value),
            "write_bytes" => write_bytes = Some(value),
            _ => {}
        }
    }

    let (Some(read_bytes), Some(write_bytes)) = (read_bytes, write_bytes) else {
        return Err(ProbeError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            "io file lacks read_bytes/write_bytes",
        )));
    };

    Ok(DiskCounters {
        read_bytes,
        write_bytes,
        read_count: syscr,
        write_count: syscw,
        read_chars: rchar,
        write_chars: wchar,
    })
}

/// Reads through the portable process table. CPU time is not split into
/// user and system, so all of it is reported as user time, and children are
/// not included.
pub struct PortableReader {
    table: ProcessTable,
    snapshot: Snapshot,
}

impl Default for PortableReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PortableReader {
    pub fn new() -> Self {
        Self {
            table: ProcessTable::new(Detail::UsageAndDisk),
            snapshot: Snapshot::default(),
        }
    }
}

impl ResourceReader for PortableReader {
    fn refresh(&mut self) {
        self.snapshot = self.table.snapshot();
    }

    fn is_running(&mut self, pid: u32) -> bool {
        self.snapshot.is_running(pid)
    }

    fn cpu_times(&mut self, pid: u32) -> Result<CpuTimes, ProbeError> {
        let process = self.snapshot.get(pid).ok_or(ProbeError::NoSuchProcess)?;
        Ok(CpuTimes {
            user: process.cpu_time_ms as f64 / 1000.0,
            system: 0.0,
        })
    }

    fn disk_io(&mut self, pid: u32) -> Result<DiskCounters, ProbeError> {
        let process = self.snapshot.get(pid).ok_or(ProbeError::NoSuchProcess)?;
        Ok(DiskCounters {
            read_bytes: process.disk_read_bytes,
            write_bytes: process.disk_write_bytes,
            ..Default::default()
        })
    }

    fn includes_child_cpu_times(&self) -> bool {
        false
    }

    fn descendant_cpu_times(&mut self, pid: u32) -> Vec<(ProcessKey, CpuTimes)> {
        self.snapshot
            .descendants(pid)
            .into_iter()
            .map(|p| {
                (
                    p.key(),
                    CpuTimes {
                        user: p.cpu_time_ms as f64 / 1000.0,
                        system: 0.0,
                    },
                )
            })
            .collect()
    }
}

/// An external program that measures a child for its entire lifetime
/// (GNU `time -v`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingUtility {
    path: PathBuf,
}

impl AccountingUtility {
    /// Returns the utility at `path` if it runs and identifies itself as GNU time.
    pub fn probe(path: &Path) -> Option<Self> {
        if !path.is_file() {
            return None;
        }
        let output = Command::new(path)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .ok()?;
        let banner = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if banner.contains("GNU") {
            Some(Self {
                path: path.to_path_buf(),
            })
        } else {
            debug!("{} is not GNU time, running without it", path.display());
            None
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Arguments that make the utility run `argv` and write its report to `report`.
    pub fn wrap_args(&self, report: &Path, argv: &[String]) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            report.to_string_lossy().into_owned(),
            "-v".to_string(),
        ];
        args.extend(argv.iter().cloned());
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderKind {
    Procfs,
    Portable,
}

/// The platform capabilities, chosen once per benchmark.
#[derive(Debug, Clone)]
pub struct Platform {
    reader: ReaderKind,
    accounting: Option<AccountingUtility>,
}

impl Platform {
    pub fn detect(settings: &Settings) -> Self {
        let reader = if cfg!(target_os = "linux") {
            ReaderKind::Procfs
        } else {
            ReaderKind::Portable
        };
        let accounting = if cfg!(target_os = "linux") && settings.use_accounting_utility {
            AccountingUtility::probe(&settings.accounting_utility_path)
        } else {
            None
        };
        debug!(
            "platform: reader={:?}, accounting utility={:?}",
            reader,
            accounting.as_ref().map(|a| a.path().display().to_string())
        );
        Self { reader, accounting }
    }

    pub fn new(reader: ReaderKind, accounting: Option<AccountingUtility>) -> Self {
        Self { reader, accounting }
    }

    pub fn reader_kind(&self) -> ReaderKind {
        self.reader
    }

    pub fn accounting_utility(&self) -> Option<&AccountingUtility> {
        self.accounting.as_ref()
    }

    pub fn reader(&self) -> Box<dyn ResourceReader> {
        match self.reader {
            ReaderKind::Procfs => Box::new(ProcfsReader::new()),
            ReaderKind::Portable => Box::new(PortableReader::new()),
        }
    }
}

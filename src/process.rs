use std::collections::{HashMap, HashSet, VecDeque};

use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};

/// Identity of a process across samples: a PID alone can be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessKey {
    pub pid: u32,
    pub start_time: u64,
}

/// What one refresh of the process table reports about a single process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent: Option<u32>,
    pub start_time: u64,
    pub memory_bytes: u64,
    /// User plus system time consumed so far.
    pub cpu_time_ms: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub exited: bool,
}

impl ProcessInfo {
    pub fn key(&self) -> ProcessKey {
        ProcessKey {
            pid: self.pid,
            start_time: self.start_time,
        }
    }
}

/// A point-in-time view of every process on the system.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    processes: HashMap<u32, ProcessInfo>,
}

impl Snapshot {
    pub fn from_processes(processes: impl IntoIterator<Item = ProcessInfo>) -> Self {
        Self {
            processes: processes.into_iter().map(|p| (p.pid, p)).collect(),
        }
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessInfo> {
        self.processes.get(&pid)
    }

    /// Present and not a zombie.
    pub fn is_running(&self, pid: u32) -> bool {
        self.get(pid).is_some_and(|p| !p.exited)
    }

    /// Direct children, lowest PID first.
    pub fn children(&self, pid: u32) -> Vec<&ProcessInfo> {
        let mut children: Vec<&ProcessInfo> = self
            .processes
            .values()
            .filter(|p| p.parent == Some(pid) && p.pid != pid)
            .collect();
        children.sort_by_key(|p| p.pid);
        children
    }

    /// All descendants, breadth first. The root itself is not included.
    pub fn descendants(&self, pid: u32) -> Vec<&ProcessInfo> {
        let mut by_parent: HashMap<u32, Vec<&ProcessInfo>> = HashMap::new();
        for process in self.processes.values() {
            if let Some(parent) = process.parent
                && parent != process.pid
            {
                by_parent.entry(parent).or_default().push(process);
            }
        }

        let mut out = Vec::new();
        let mut visited = HashSet::from([pid]);
        let mut queue = VecDeque::from([pid]);
        while let Some(current) = queue.pop_front() {
            let Some(children) = by_parent.get(&current) else {
                continue;
            };
            for &child in children {
                if visited.insert(child.pid) {
                    out.push(child);
                    queue.push_back(child.pid);
                }
            }
        }
        out
    }
}

/// What a table refresh collects for each process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    /// Parent links only; enough to find children.
    Topology,
    /// Accumulated CPU time and resident memory.
    Usage,
    /// Usage plus cumulative disk counters.
    UsageAndDisk,
}

impl Detail {
    fn refresh_kind(self) -> ProcessRefreshKind {
        match self {
            Detail::Topology => ProcessRefreshKind::nothing(),
            Detail::Usage => ProcessRefreshKind::nothing().with_cpu().with_memory(),
            Detail::UsageAndDisk => ProcessRefreshKind::nothing()
                .with_cpu()
                .with_memory()
                .with_disk_usage(),
        }
    }
}

/// The portable introspection API. Each worker keeps its own table so the
/// refresh cost of one does not slow the other.
pub struct ProcessTable {
    system: System,
    detail: Detail,
}

impl ProcessTable {
    pub fn new(detail: Detail) -> Self {
        Self {
            system: System::new(),
            detail,
        }
    }

    pub fn snapshot(&mut self) -> Snapshot {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            self.detail.refresh_kind(),
        );

        let processes = self
            .system
            .processes()
            .values()
            .filter(|p| p.thread_kind().is_none())
            .map(|p| {
                let disk = p.disk_usage();
                ProcessInfo {
                    pid: p.pid().as_u32(),
                    parent: p.parent().map(|pid| pid.as_u32()),
                    start_time: p.start_time(),
                    memory_bytes: p.memory(),
                    cpu_time_ms: p.accumulated_cpu_time(),
                    disk_read_bytes: disk.total_read_bytes,
                    disk_write_bytes: disk.total_written_bytes,
                    exited: matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
                }
            });

        Snapshot::from_processes(processes)
    }
}

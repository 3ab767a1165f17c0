use std::sync::{Condvar, Mutex};
use std::time::Instant;

/// The process under measurement, as published by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub pid: u32,
    /// Execution start; sample timestamps are measured from here.
    pub started: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Publication {
    Pending,
    Resolved(Target),
    Skipped,
}

/// Run state shared by the launcher and the two monitor workers of one
/// iteration.
///
/// The target is written exactly once, by the resolver. Each worker owns its
/// own output and hands it back through its join handle, so this record only
/// carries the publication.
#[derive(Debug)]
pub struct RunState {
    publication: Mutex<Publication>,
    published: Condvar,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            publication: Mutex::new(Publication::Pending),
            published: Condvar::new(),
        }
    }

    /// Publishes the resolved target. Later publications are ignored.
    pub fn publish_target(&self, target: Target) {
        self.publish(Publication::Resolved(target));
    }

    /// Marks the iteration as not benchmarkable; waiting workers return empty-handed.
    pub fn skip_benchmarking(&self) {
        self.publish(Publication::Skipped);
    }

    fn publish(&self, publication: Publication) {
        let mut guard = self
            .publication
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *guard == Publication::Pending {
            *guard = publication;
            self.published.notify_all();
        }
    }

    /// Blocks until the resolver publishes. `None` means benchmarking was skipped.
    pub fn wait_for_target(&self) -> Option<Target> {
        let mut guard = self
            .publication
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            match *guard {
                Publication::Pending => {
                    guard = self
                        .published
                        .wait(guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                Publication::Resolved(target) => return Some(target),
                Publication::Skipped => return None,
            }
        }
    }

    pub fn is_skipped(&self) -> bool {
        let guard = self
            .publication
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard == Publication::Skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn waiting_worker_sees_published_target() {
        let state = Arc::new(RunState::new());
        let worker = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_for_target())
        };

        let target = Target {
            pid: 42,
            started: Instant::now(),
        };
        state.publish_target(target);
        assert_eq!(worker.join().unwrap(), Some(target));
    }

    #[test]
    fn skip_releases_waiting_workers() {
        let state = Arc::new(RunState::new());
        let worker = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_for_target())
        };

        state.skip_benchmarking();
        assert_eq!(worker.join().unwrap(), None);
        assert!(state.is_skipped());
    }

    #[test]
    fn target_is_write_once() {
        let state = RunState::new();
        let first = Target {
            pid: 1,
            started: Instant::now(),
        };
        state.publish_target(first);
        state.publish_target(Target {
            pid: 2,
            started: Instant::now(),
        });
        state.skip_benchmarking();

        assert_eq!(state.wait_for_target(), Some(first));
        assert!(!state.is_skipped());
    }
}

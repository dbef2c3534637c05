//! Named background threads with bounded shutdown

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// A spawned background thread
pub(crate) struct Worker {
    name: String,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn `body` on a thread called `name`
    pub fn spawn(name: String, body: impl FnOnce() + Send + 'static) -> std::io::Result<Self> {
        let handle = thread::Builder::new().name(name.clone()).spawn(body)?;
        debug!("Spawned worker {}", name);
        Ok(Self { name, handle })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `budget` for the thread to exit, checking every `poll`
    ///
    /// A thread still running after the budget is detached and left to exit
    /// on its own; it keeps any OS handle it owns until then. Returns whether
    /// the thread exited.
    pub fn join_within(self, budget: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + budget;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "Worker {} did not stop within {:?}, abandoning it",
                    self.name, budget
                );
                return false;
            }
            thread::sleep(poll);
        }

        if self.handle.join().is_err() {
            error!("Worker {} panicked", self.name);
        }
        true
    }
}

/// Thread name for a session role, e.g. `hid-read-00fa`
pub(crate) fn thread_name(role: &str, product_id: u16) -> String {
    format!("hid-{}-{:04x}", role, product_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_thread_is_named() {
        let worker = Worker::spawn(thread_name("read", 0xfa), || {
            assert_eq!(thread::current().name(), Some("hid-read-00fa"));
        })
        .unwrap();
        assert_eq!(worker.name(), "hid-read-00fa");
        assert!(worker.join_within(Duration::from_secs(5), Duration::from_millis(1)));
    }

    #[test]
    fn test_stuck_worker_is_abandoned() {
        let release = Arc::new(AtomicBool::new(false));
        let worker = {
            let release = release.clone();
            Worker::spawn("stuck".to_string(), move || {
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap()
        };

        let start = Instant::now();
        assert!(!worker.join_within(Duration::from_millis(30), Duration::from_millis(5)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn test_panicking_worker_counts_as_exited() {
        let worker = Worker::spawn("boom".to_string(), || panic!("worker failed")).unwrap();
        assert!(worker.join_within(Duration::from_secs(5), Duration::from_millis(1)));
    }
}

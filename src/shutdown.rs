use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Cancellation flag shared between the Ctrl-C handler and the readers.
///
/// Waiting on it is a timed sleep that ends early once shutdown is
/// requested, so a tailing reader never sleeps through an interrupt.
#[derive(Clone, Default)]
pub struct Shutdown {
    shared: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Shutdown {
        Shutdown::default()
    }

    fn flag(&self) -> MutexGuard<bool> {
        self.shared.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn trigger(&self) {
        *self.flag() = true;
        self.shared.1.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag()
    }

    /// Sleeps for up to `timeout`. Returns `true` when shutdown was
    /// requested before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.flag();
        let (guard, _) = self
            .shared
            .1
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);

        *guard
    }

    /// Routes SIGINT, SIGTERM and SIGHUP to this flag. A second signal
    /// exits at once, which is the only way out of a blocking read on
    /// standard input.
    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let shutdown = self.clone();

        ctrlc::set_handler(move || {
            if shutdown.is_triggered() {
                std::process::exit(130);
            }
            tracing::info!("shutdown requested");
            shutdown.trigger();
        })
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn wait_times_out_without_trigger() {
        let shutdown = Shutdown::new();

        assert!(!shutdown.wait_timeout(Duration::from_millis(10)));
        assert!(!shutdown.is_triggered());
    }

    #[test]
    fn trigger_wakes_a_waiter() {
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();

        let started = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.trigger();
        });

        assert!(shutdown.wait_timeout(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(30));
        handle.join().unwrap();
    }

    #[test]
    fn wait_returns_immediately_once_triggered() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        assert!(shutdown.wait_timeout(Duration::from_secs(30)));
    }
}

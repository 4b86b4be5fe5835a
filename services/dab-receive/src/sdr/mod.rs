//! Sample acquisition and demodulation stages
//!
//! Both stages wrap external processes, the same way the capture side of
//! the rig drives `rtl_sdr`: one process streams raw IQ samples, a second
//! one demodulates them into ensemble records. The stages run on their own
//! threads and hand data forward through bounded channels.

pub mod capture;
pub mod demod;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::task;
use tokio::time;
use tracing::{debug, warn};

pub use capture::{CaptureConfig, SampleCapture};
pub use demod::{DemodConfig, Demodulator};

/// Control handle for one running pipeline stage.
///
/// `stop` is advisory: the stage observes the flag at its next loop
/// iteration. `join` waits for the stage threads with a bounded grace
/// period and abandons any thread that does not finish in time.
pub struct StageHandle {
    name: &'static str,
    running: Arc<AtomicBool>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl StageHandle {
    fn new(name: &'static str, running: Arc<AtomicBool>, threads: Vec<thread::JoinHandle<()>>) -> Self {
        Self {
            name,
            running,
            threads,
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn join(self, grace: Duration) {
        for handle in self.threads {
            let waiter = task::spawn_blocking(move || {
                let _ = handle.join();
            });
            match time::timeout(grace, waiter).await {
                Ok(_) => debug!("{} stage stopped", self.name),
                Err(_) => warn!(
                    "{} stage did not stop within {:?}, abandoning it",
                    self.name, grace
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[tokio::test]
    async fn test_stage_stops_within_one_iteration() {
        let running = Arc::new(AtomicBool::new(true));
        let worker = running.clone();
        let (tick_tx, tick_rx) = bounded::<()>(1);
        let thread = thread::spawn(move || {
            while worker.load(Ordering::SeqCst) {
                let _ = tick_tx.try_send(());
                thread::sleep(Duration::from_millis(10));
            }
        });
        let stage = StageHandle::new("test", running, vec![thread]);

        tick_rx.recv().unwrap();
        assert!(stage.is_running());
        stage.stop();
        assert!(!stage.is_running());
        stage.join(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_join_abandons_a_stuck_stage() {
        let running = Arc::new(AtomicBool::new(true));
        let thread = thread::spawn(|| thread::sleep(Duration::from_secs(5)));
        let stage = StageHandle::new("stuck", running, vec![thread]);

        stage.stop();
        // Must come back after the grace period instead of hanging
        stage.join(Duration::from_millis(50)).await;
    }
}

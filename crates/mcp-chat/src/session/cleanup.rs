use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use tokio::sync::watch;

use crate::tools::Cleanup;

const OPEN: u8 = 0;
const CLAIMED_BY_FINISH: u8 = 1;
const CLAIMED_BY_CANCEL: u8 = 2;

/// What caused a session's resources to be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTrigger {
    Finish,
    Cancel,
}

impl CleanupTrigger {
    fn code(self) -> u8 {
        match self {
            CleanupTrigger::Finish => CLAIMED_BY_FINISH,
            CleanupTrigger::Cancel => CLAIMED_BY_CANCEL,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            CLAIMED_BY_FINISH => Some(CleanupTrigger::Finish),
            CLAIMED_BY_CANCEL => Some(CleanupTrigger::Cancel),
            _ => None,
        }
    }
}

/// Guards a cleanup action so it runs exactly once, whichever of the finish
/// and cancel paths gets there first.
///
/// Claiming is a single compare-exchange on the completion flag; the loser
/// observes the flag already set and does nothing.
#[derive(Debug)]
pub struct CleanupGate {
    state: AtomicU8,
    action: Mutex<Option<Cleanup>>,
    done: watch::Sender<bool>,
}

impl CleanupGate {
    pub fn new(cleanup: Cleanup) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            state: AtomicU8::new(OPEN),
            action: Mutex::new(Some(cleanup)),
            done,
        }
    }

    /// Claim the cleanup for `trigger`. Returns the action only to the first caller.
    pub fn try_claim(&self, trigger: CleanupTrigger) -> Option<Cleanup> {
        self.state
            .compare_exchange(OPEN, trigger.code(), Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        let mut action = self.action.lock().unwrap_or_else(|e| e.into_inner());
        action.take()
    }

    /// Trigger that won the claim, if any.
    pub fn claimed_by(&self) -> Option<CleanupTrigger> {
        CleanupTrigger::from_code(self.state.load(Ordering::Acquire))
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed_by().is_some()
    }

    /// Mark the claimed action as finished running.
    pub fn mark_done(&self) {
        self.done.send_replace(true);
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait until the claimed action has finished running.
    pub async fn wait_done(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|done| *done).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting_gate(counter: &Arc<AtomicUsize>) -> CleanupGate {
        let counter = Arc::clone(counter);
        CleanupGate::new(Cleanup::new(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }

    #[tokio::test]
    async fn test_first_claim_wins() {
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = counting_gate(&counter);

        let cleanup = gate.try_claim(CleanupTrigger::Cancel).unwrap();
        assert!(gate.try_claim(CleanupTrigger::Finish).is_none());
        assert_eq!(gate.claimed_by(), Some(CleanupTrigger::Cancel));

        cleanup.run().await.unwrap();
        gate.mark_done();
        gate.wait_done().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_run_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(counting_gate(&counter));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let gate = Arc::clone(&gate);
            tasks.push(tokio::spawn(async move {
                let trigger = if i % 2 == 0 {
                    CleanupTrigger::Finish
                } else {
                    CleanupTrigger::Cancel
                };
                if let Some(cleanup) = gate.try_claim(trigger) {
                    cleanup.run().await.unwrap();
                    gate.mark_done();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(gate.is_done());
    }
}

//! Cross-phase completion barrier.
//!
//! Each build cycle gets a fresh one-shot signal that starts out pending and
//! is released exactly once, whether the cycle succeeded or failed. A second
//! consumer (a type-check pass, an after-build command) can grab a
//! [`CycleWaiter`] and suspend until the artifact it depends on exists.

use ahash::AHashMap;
use futures::future::join_all;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CycleId(u64);

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Succeeded,
    Failed(String),
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CycleState {
    Pending,
    Released(CycleOutcome),
}

struct CycleSignal {
    id: CycleId,
    rx: watch::Receiver<CycleState>,
}

/// Table of the latest cycle signal per project.
#[derive(Default)]
pub struct CompletionBarrier {
    next_id: AtomicU64,
    cycles: Mutex<AHashMap<PathBuf, CycleSignal>>,
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new cycle for `project`, replacing whatever signal the
    /// previous cycle left behind. Waiters already holding the old signal
    /// still observe the old cycle's outcome.
    pub fn begin(&self, project: &Path) -> CycleGuard {
        let id = CycleId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (tx, rx) = watch::channel(CycleState::Pending);
        self.cycles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(project.to_path_buf(), CycleSignal { id, rx });
        log::trace!("Build cycle {id} started for {}", project.display());
        CycleGuard {
            id,
            project: project.to_path_buf(),
            tx: Some(tx),
        }
    }

    /// Waiter for the latest cycle of `project`, if one was ever started.
    pub fn waiter(&self, project: &Path) -> Option<CycleWaiter> {
        self.cycles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(project)
            .map(|signal| CycleWaiter {
                id: signal.id,
                project: project.to_path_buf(),
                rx: signal.rx.clone(),
            })
    }

    /// Waiters for the latest cycle of every project, ordered by cycle id.
    pub fn waiters(&self) -> Vec<CycleWaiter> {
        let mut waiters: Vec<CycleWaiter> = self
            .cycles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(project, signal)| CycleWaiter {
                id: signal.id,
                project: project.clone(),
                rx: signal.rx.clone(),
            })
            .collect();
        waiters.sort_by_key(|waiter| waiter.id);
        waiters
    }

    /// Suspends until every cycle known right now has been released.
    pub async fn wait_all(&self) -> Vec<(PathBuf, CycleOutcome)> {
        join_all(self.waiters().into_iter().map(|waiter| async move {
            let project = waiter.project.clone();
            (project, waiter.wait().await)
        }))
        .await
    }
}

/// Release handle owned by the cycle that is running.
///
/// Dropping a guard that was never released marks the cycle as failed, so an
/// early return or a panic still unblocks every waiter.
pub struct CycleGuard {
    id: CycleId,
    project: PathBuf,
    tx: Option<watch::Sender<CycleState>>,
}

impl CycleGuard {
    pub fn id(&self) -> CycleId {
        self.id
    }

    pub fn release(mut self, outcome: CycleOutcome) {
        self.send(outcome);
    }

    fn send(&mut self, outcome: CycleOutcome) {
        if let Some(tx) = self.tx.take() {
            log::trace!(
                "Build cycle {} for {} released: {:?}",
                self.id,
                self.project.display(),
                outcome
            );
            // send_replace stores the value even when nobody is subscribed yet.
            tx.send_replace(CycleState::Released(outcome));
        }
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.send(CycleOutcome::Failed(String::from(
            "build cycle ended without reporting an outcome",
        )));
    }
}

#[derive(Clone)]
pub struct CycleWaiter {
    id: CycleId,
    project: PathBuf,
    rx: watch::Receiver<CycleState>,
}

impl CycleWaiter {
    pub fn id(&self) -> CycleId {
        self.id
    }

    /// Outcome if the cycle has already been released.
    pub fn outcome(&self) -> Option<CycleOutcome> {
        match &*self.rx.borrow() {
            CycleState::Pending => None,
            CycleState::Released(outcome) => Some(outcome.clone()),
        }
    }

    pub async fn wait(mut self) -> CycleOutcome {
        let released = self
            .rx
            .wait_for(|state| matches!(state, CycleState::Released(_)))
            .await
            .map(|state| state.clone());
        match released {
            Ok(CycleState::Released(outcome)) => outcome,
            _ => CycleOutcome::Failed(String::from("build cycle was abandoned")),
        }
    }
}

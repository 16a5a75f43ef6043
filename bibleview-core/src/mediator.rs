//! Fan-out of "before page change" / "after page change" notifications.
//!
//! One mediator is created per session and handed to every page controller
//! and observer that needs it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangePhase {
    Before,
    After,
}

pub trait PageChangeObserver: Send + Sync {
    fn on_page_change(&self, phase: ChangePhase) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Default)]
pub struct ChangeMediator {
    subscribers: Mutex<Vec<(SubscriptionId, Arc<dyn PageChangeObserver>)>>,
    suppressed: AtomicUsize,
}

impl ChangeMediator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn PageChangeObserver>) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscribers.lock().push((id, observer));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn notify_before(&self) {
        self.dispatch(ChangePhase::Before);
    }

    pub fn notify_after(&self) {
        self.dispatch(ChangePhase::After);
    }

    /// Silences both phases until the returned guard is dropped. Guards nest.
    pub fn suppress(&self) -> SuppressGuard<'_> {
        self.suppressed.fetch_add(1, Ordering::SeqCst);
        SuppressGuard { mediator: self }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst) > 0
    }

    fn dispatch(&self, phase: ChangePhase) {
        if self.is_suppressed() {
            debug!(?phase, "page change notification suppressed");
            return;
        }

        // Observers may subscribe or unsubscribe while being notified.
        let snapshot: Vec<_> = self.subscribers.lock().clone();
        for (id, observer) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_page_change(phase))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(subscription = %id, ?phase, error = %err, "page change observer failed");
                }
                Err(_) => {
                    warn!(subscription = %id, ?phase, "page change observer panicked");
                }
            }
        }
    }
}

pub struct SuppressGuard<'a> {
    mediator: &'a ChangeMediator,
}

impl Drop for SuppressGuard<'_> {
    fn drop(&mut self) {
        self.mediator.suppressed.fetch_sub(1, Ordering::SeqCst);
    }
}

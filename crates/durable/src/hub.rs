//! In-process wake-ups for waiters on signals, events and completions.
//!
//! The journal is the source of truth; the hub only shortens the time a
//! waiter sleeps before re-checking it. A waiter that misses a notification
//! (for example because the writer lives in another process) still observes
//! the change on its next poll.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common::WorkflowId;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::Result;

/// What a waiter is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum WaitKey {
    Signal(WorkflowId, String),
    Event(WorkflowId, String),
    Completion(WorkflowId),
}

impl WaitKey {
    fn workflow_id(&self) -> &WorkflowId {
        match self {
            WaitKey::Signal(id, _) | WaitKey::Event(id, _) | WaitKey::Completion(id) => id,
        }
    }
}

#[derive(Default)]
pub(crate) struct NotifyHub {
    waiters: Mutex<HashMap<WaitKey, Arc<Notify>>>,
}

/// One waiter's hold on a hub entry. Dropping the last hold removes the
/// entry, so waits that time out leave nothing behind.
struct Registration<'a> {
    hub: &'a NotifyHub,
    key: &'a WaitKey,
    notify: Arc<Notify>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut waiters = self.hub.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        // The map holds one reference and this registration the other.
        let last = waiters
            .get(self.key)
            .is_some_and(|n| Arc::ptr_eq(n, &self.notify) && Arc::strong_count(n) == 2);
        if last {
            waiters.remove(self.key);
        }
    }
}

impl NotifyHub {
    fn register<'a>(&'a self, key: &'a WaitKey) -> Registration<'a> {
        let notify = self
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        Registration {
            hub: self,
            key,
            notify,
        }
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Wakes every waiter on `key`.
    pub(crate) fn notify(&self, key: &WaitKey) {
        let notify = self
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    /// Wakes every waiter of one workflow, whatever it waits for.
    pub(crate) fn notify_workflow(&self, id: &WorkflowId) {
        let woken: Vec<Arc<Notify>> = {
            let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            let keys: Vec<WaitKey> = waiters
                .keys()
                .filter(|k| k.workflow_id() == id)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| waiters.remove(k)).collect()
        };
        for notify in woken {
            notify.notify_waiters();
        }
    }

    /// Runs `check` until it yields a value or the deadline passes.
    ///
    /// Between checks the caller is suspended until a notification for `key`
    /// arrives or `poll` elapses. Returns `Ok(None)` on deadline. A deadline
    /// of `None` waits forever.
    pub(crate) async fn wait_until<T, F, Fut>(
        &self,
        key: &WaitKey,
        deadline: Option<Instant>,
        poll: Duration,
        mut check: F,
    ) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        loop {
            let registration = self.register(key);
            let notified = registration.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a write between the check and the
            // sleep is not lost.
            notified.as_mut().enable();

            if let Some(value) = check().await? {
                return Ok(Some(value));
            }

            let now = Instant::now();
            let wake_at = match deadline {
                Some(deadline) if now >= deadline => return Ok(None),
                Some(deadline) => deadline.min(now + poll),
                None => now + poll,
            };
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }
}

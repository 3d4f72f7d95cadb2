//! In-flight runs, keyed by assistant message id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TendrilError};

/// Requests cancellation of one run.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Diagnostic view of a registered run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRun {
    pub message_id: String,
    pub chat_id: String,
    /// Id reported by the upstream agent, once known.
    pub run_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    handle: CancelHandle,
    chat_id: String,
    run_id: Option<String>,
    started_at: DateTime<Utc>,
}

/// Shared map of active runs.
///
/// Every operation takes the one lock for a single map access and never
/// holds it across I/O or an `.await`.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<String, Entry>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails with [`TendrilError::DuplicateRun`] if `message_id` already has
    /// an active run.
    pub fn register(
        &self,
        message_id: impl Into<String>,
        chat_id: impl Into<String>,
        handle: CancelHandle,
    ) -> Result<()> {
        let message_id = message_id.into();
        let mut runs = self.lock();
        if runs.contains_key(&message_id) {
            return Err(TendrilError::DuplicateRun(message_id));
        }
        runs.insert(
            message_id,
            Entry {
                handle,
                chat_id: chat_id.into(),
                run_id: None,
                started_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Request cancellation. Returns `false` if no run is registered.
    ///
    /// The entry stays in place; the run removes it when it finishes.
    pub fn cancel(&self, message_id: &str) -> bool {
        let handle = self.lock().get(message_id).map(|entry| entry.handle.clone());
        match handle {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every run belonging to `chat_id`; returns how many were asked.
    pub fn cancel_chat(&self, chat_id: &str) -> usize {
        let handles: Vec<CancelHandle> = self
            .lock()
            .values()
            .filter(|entry| entry.chat_id == chat_id)
            .map(|entry| entry.handle.clone())
            .collect();
        for handle in &handles {
            handle.cancel();
        }
        handles.len()
    }

    /// Idempotent.
    pub fn remove(&self, message_id: &str) -> bool {
        self.lock().remove(message_id).is_some()
    }

    pub fn set_run_id(&self, message_id: &str, run_id: impl Into<String>) {
        if let Some(entry) = self.lock().get_mut(message_id) {
            entry.run_id = Some(run_id.into());
        }
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.lock().contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, message_id: &str) -> Option<ActiveRun> {
        self.lock().get(message_id).map(|entry| view(message_id, entry))
    }

    pub fn active_runs(&self) -> Vec<ActiveRun> {
        let mut runs: Vec<ActiveRun> = self
            .lock()
            .iter()
            .map(|(id, entry)| view(id, entry))
            .collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        runs
    }

    pub fn runs_for_chat(&self, chat_id: &str) -> Vec<ActiveRun> {
        self.active_runs()
            .into_iter()
            .filter(|run| run.chat_id == chat_id)
            .collect()
    }
}

fn view(message_id: &str, entry: &Entry) -> ActiveRun {
    ActiveRun {
        message_id: message_id.to_string(),
        chat_id: entry.chat_id.clone(),
        run_id: entry.run_id.clone(),
        started_at: entry.started_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = RunRegistry::new();
        registry.register("m1", "c1", CancelHandle::new()).unwrap();
        let err = registry
            .register("m1", "c1", CancelHandle::new())
            .unwrap_err();
        assert!(matches!(err, TendrilError::DuplicateRun(id) if id == "m1"));
    }

    #[test]
    fn cancel_fires_the_handle_but_keeps_the_entry() {
        let registry = RunRegistry::new();
        let handle = CancelHandle::new();
        registry.register("m1", "c1", handle.clone()).unwrap();

        assert!(registry.cancel("m1"));
        assert!(handle.is_cancelled());
        assert!(registry.contains("m1"));

        assert!(registry.remove("m1"));
        assert!(!registry.remove("m1"));
        assert!(!registry.cancel("m1"));
    }

    #[test]
    fn run_ids_are_recorded() {
        let registry = RunRegistry::new();
        registry.register("m1", "c1", CancelHandle::new()).unwrap();
        registry.set_run_id("m1", "run-42");
        assert_eq!(registry.get("m1").unwrap().run_id.as_deref(), Some("run-42"));
    }

    #[test]
    fn cancel_chat_only_touches_that_chat() {
        let registry = RunRegistry::new();
        let a = CancelHandle::new();
        let b = CancelHandle::new();
        registry.register("m1", "c1", a.clone()).unwrap();
        registry.register("m2", "c2", b.clone()).unwrap();

        assert_eq!(registry.cancel_chat("c1"), 1);
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert_eq!(registry.runs_for_chat("c2").len(), 1);
    }
}

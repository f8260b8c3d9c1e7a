//! Read-through cache of the gate's inputs.
//!
//! Registry operations never wait on the stores: they read whatever is
//! cached here. Refreshes run with a timeout and keep the last-known value
//! when the store is slow or down.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

use crate::curriculum::Curriculum;
use crate::gate::{self, ClassUnlockSet, GatePosition, LearnerProgress};
use crate::store::{ProgressStore, UnlockStore};

#[derive(Debug, Default)]
pub struct GateCache {
    progress: DashMap<String, LearnerProgress>,
    unlocks: DashMap<String, ClassUnlockSet>,
    /// Live sockets per learner, counted from before their prefetch.
    holders: DashMap<String, usize>,
}

impl GateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-known progress, or a fresh learner's empty progress.
    pub fn progress(&self, learner_id: &str) -> LearnerProgress {
        self.progress
            .get(learner_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Last-known overrides for a class. Learners without a class have none.
    pub fn unlocks(&self, class_id: Option<&str>) -> ClassUnlockSet {
        class_id
            .and_then(|id| self.unlocks.get(id).map(|entry| entry.value().clone()))
            .unwrap_or_default()
    }

    pub fn put_progress(&self, learner_id: &str, progress: LearnerProgress) {
        self.progress.insert(learner_id.to_string(), progress);
    }

    pub fn put_unlocks(&self, class_id: &str, unlocks: ClassUnlockSet) {
        self.unlocks.insert(class_id.to_string(), unlocks);
    }

    /// Count a connection that is about to load this learner's progress.
    pub fn retain_learner(&self, learner_id: &str) {
        *self.holders.entry(learner_id.to_string()).or_insert(0) += 1;
    }

    /// Release a connection's hold. The last release drops the learner's
    /// cached progress. The eviction happens while the holder entry is
    /// locked, so a concurrent retain waits and its prefetch lands after it.
    pub fn release_learner(&self, learner_id: &str) {
        if let Entry::Occupied(mut entry) = self.holders.entry(learner_id.to_string()) {
            *entry.get_mut() = entry.get().saturating_sub(1);
            if *entry.get() == 0 {
                self.progress.remove(learner_id);
                entry.remove();
            }
        }
    }

    /// Gate position computed from cached inputs only.
    pub fn position(
        &self,
        curriculum: &Curriculum,
        learner_id: &str,
        class_id: Option<&str>,
    ) -> GatePosition {
        gate::gate(
            curriculum.shifts(),
            &self.unlocks(class_id),
            &self.progress(learner_id),
        )
    }

    /// Reload a learner's progress. Returns the value now cached and whether
    /// it differs from what was cached before.
    pub async fn refresh_progress(
        &self,
        store: &dyn ProgressStore,
        learner_id: &str,
        timeout: Duration,
    ) -> (LearnerProgress, bool) {
        let before = self.progress.get(learner_id).map(|e| e.value().clone());
        match tokio::time::timeout(timeout, store.learner_progress(learner_id)).await {
            Ok(Ok(fresh)) => {
                let changed = before.as_ref() != Some(&fresh);
                self.put_progress(learner_id, fresh.clone());
                (fresh, changed)
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    learner_id = %learner_id,
                    error = %e,
                    "Progress refresh failed, serving cached progress (degraded)"
                );
                (before.unwrap_or_default(), false)
            }
            Err(_) => {
                tracing::warn!(
                    learner_id = %learner_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Progress refresh timed out, serving cached progress (degraded)"
                );
                (before.unwrap_or_default(), false)
            }
        }
    }

    /// Reload a class's unlock set, same semantics as [`Self::refresh_progress`].
    pub async fn refresh_unlocks(
        &self,
        store: &dyn UnlockStore,
        class_id: &str,
        timeout: Duration,
    ) -> (ClassUnlockSet, bool) {
        let before = self.unlocks.get(class_id).map(|e| e.value().clone());
        match tokio::time::timeout(timeout, store.class_unlocks(class_id)).await {
            Ok(Ok(fresh)) => {
                let changed = before.as_ref() != Some(&fresh);
                self.put_unlocks(class_id, fresh.clone());
                (fresh, changed)
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    class_id = %class_id,
                    error = %e,
                    "Unlock refresh failed, serving cached unlocks (degraded)"
                );
                (before.unwrap_or_default(), false)
            }
            Err(_) => {
                tracing::warn!(
                    class_id = %class_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Unlock refresh timed out, serving cached unlocks (degraded)"
                );
                (before.unwrap_or_default(), false)
            }
        }
    }
}

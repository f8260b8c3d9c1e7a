//! Durable progress and unlock state.
//!
//! The service only ever reads these through [`cache::GateCache`]; the
//! traits are the seam to whichever backend owns the data.

pub mod cache;
pub mod sqlite;

use async_trait::async_trait;

use crate::gate::{ClassUnlockSet, LearnerProgress};

pub use cache::GateCache;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Lock,
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("unknown shift {0}")]
    UnknownShift(String),
    #[error("unknown step {step_id} in shift {shift_id}")]
    UnknownStep { shift_id: String, step_id: String },
    #[error("shift {shift_id} was already earned by {learners} learner(s) and cannot be locked")]
    Conflict { shift_id: String, learners: usize },
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn learner_progress(&self, learner_id: &str) -> Result<LearnerProgress, StoreError>;

    async fn record_step_complete(
        &self,
        learner_id: &str,
        shift_id: &str,
        step_id: &str,
    ) -> Result<(), StoreError>;

    async fn record_shift_clocked_out(&self, learner_id: &str, shift_id: &str)
        -> Result<(), StoreError>;
}

#[async_trait]
pub trait UnlockStore: Send + Sync {
    async fn class_unlocks(&self, class_id: &str) -> Result<ClassUnlockSet, StoreError>;

    /// Open a shift for a class ahead of sequential completion.
    async fn unlock_week(&self, class_id: &str, shift_id: &str) -> Result<(), StoreError>;

    /// Remove a class override. Rejected with [`StoreError::Conflict`] when any
    /// enrolled learner has already earned the shift sequentially.
    async fn lock_week(&self, class_id: &str, shift_id: &str) -> Result<(), StoreError>;

    /// Remember that a learner belongs to a class, for conflict checks.
    async fn enroll_learner(&self, class_id: &str, learner_id: &str) -> Result<(), StoreError>;
}

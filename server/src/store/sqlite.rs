use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

use crate::curriculum::Curriculum;
use crate::db::DbPool;
use crate::gate::{self, ClassUnlockSet, LearnerProgress};
use crate::store::{ProgressStore, StoreError, UnlockStore};

/// Progress and unlock store over the local SQLite database.
/// Each call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
    curriculum: Arc<Curriculum>,
}

impl SqliteStore {
    pub fn new(db: DbPool, curriculum: Arc<Curriculum>) -> Self {
        Self { db, curriculum }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &Curriculum) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        let curriculum = self.curriculum.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            f(&conn, &curriculum)
        })
        .await?
    }
}

fn read_progress(conn: &Connection, learner_id: &str) -> Result<LearnerProgress, StoreError> {
    let mut progress = LearnerProgress::default();

    let mut stmt = conn.prepare("SELECT shift_id FROM shift_completions WHERE learner_id = ?1")?;
    for shift_id in stmt.query_map([learner_id], |row| row.get::<_, String>(0))? {
        progress.mark_shift_complete(&shift_id?);
    }

    let mut stmt =
        conn.prepare("SELECT shift_id, step_id FROM step_completions WHERE learner_id = ?1")?;
    let rows = stmt.query_map([learner_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (shift_id, step_id) = row?;
        progress.mark_step_complete(&shift_id, &step_id);
    }

    Ok(progress)
}

#[async_trait]
impl ProgressStore for SqliteStore {
    async fn learner_progress(&self, learner_id: &str) -> Result<LearnerProgress, StoreError> {
        let learner_id = learner_id.to_string();
        self.with_conn(move |conn, _| read_progress(conn, &learner_id))
            .await
    }

    async fn record_step_complete(
        &self,
        learner_id: &str,
        shift_id: &str,
        step_id: &str,
    ) -> Result<(), StoreError> {
        let (learner_id, shift_id, step_id) =
            (learner_id.to_string(), shift_id.to_string(), step_id.to_string());
        self.with_conn(move |conn, curriculum| {
            let shift = curriculum
                .by_id(&shift_id)
                .ok_or_else(|| StoreError::UnknownShift(shift_id.clone()))?;
            if !shift.contains_step(&step_id) {
                return Err(StoreError::UnknownStep { shift_id, step_id });
            }
            conn.execute(
                "INSERT OR IGNORE INTO step_completions (learner_id, shift_id, step_id, completed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![learner_id, shift_id, step_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_shift_clocked_out(
        &self,
        learner_id: &str,
        shift_id: &str,
    ) -> Result<(), StoreError> {
        let (learner_id, shift_id) = (learner_id.to_string(), shift_id.to_string());
        self.with_conn(move |conn, curriculum| {
            if curriculum.by_id(&shift_id).is_none() {
                return Err(StoreError::UnknownShift(shift_id));
            }
            conn.execute(
                "INSERT OR IGNORE INTO shift_completions (learner_id, shift_id, completed_at)
                 VALUES (?1, ?2, ?3)",
                params![learner_id, shift_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl UnlockStore for SqliteStore {
    async fn class_unlocks(&self, class_id: &str) -> Result<ClassUnlockSet, StoreError> {
        let class_id = class_id.to_string();
        self.with_conn(move |conn, _| {
            let mut stmt = conn.prepare("SELECT shift_id FROM class_unlocks WHERE class_id = ?1")?;
            let unlocks = stmt
                .query_map([&class_id], |row| row.get::<_, String>(0))?
                .collect::<Result<ClassUnlockSet, _>>()?;
            Ok(unlocks)
        })
        .await
    }

    async fn unlock_week(&self, class_id: &str, shift_id: &str) -> Result<(), StoreError> {
        let (class_id, shift_id) = (class_id.to_string(), shift_id.to_string());
        self.with_conn(move |conn, curriculum| {
            if curriculum.by_id(&shift_id).is_none() {
                return Err(StoreError::UnknownShift(shift_id));
            }
            conn.execute(
                "INSERT OR IGNORE INTO class_unlocks (class_id, shift_id, unlocked_at) VALUES (?1, ?2, ?3)",
                params![class_id, shift_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn lock_week(&self, class_id: &str, shift_id: &str) -> Result<(), StoreError> {
        let (class_id, shift_id) = (class_id.to_string(), shift_id.to_string());
        self.with_conn(move |conn, curriculum| {
            if curriculum.by_id(&shift_id).is_none() {
                return Err(StoreError::UnknownShift(shift_id));
            }

            let mut stmt =
                conn.prepare("SELECT learner_id FROM class_enrollments WHERE class_id = ?1")?;
            let learners: Vec<String> = stmt
                .query_map([&class_id], |row| row.get(0))?
                .collect::<Result<_, _>>()?;

            let mut earned = 0;
            for learner_id in &learners {
                let progress = read_progress(conn, learner_id)?;
                if gate::sequentially_earned(curriculum.shifts(), &progress, &shift_id) {
                    earned += 1;
                }
            }
            if earned > 0 {
                return Err(StoreError::Conflict {
                    shift_id,
                    learners: earned,
                });
            }

            conn.execute(
                "DELETE FROM class_unlocks WHERE class_id = ?1 AND shift_id = ?2",
                params![class_id, shift_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn enroll_learner(&self, class_id: &str, learner_id: &str) -> Result<(), StoreError> {
        let (class_id, learner_id) = (class_id.to_string(), learner_id.to_string());
        self.with_conn(move |conn, _| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT enrolled_at FROM class_enrollments WHERE class_id = ?1 AND learner_id = ?2",
                    params![class_id, learner_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_none() {
                conn.execute(
                    "INSERT INTO class_enrollments (class_id, learner_id, enrolled_at) VALUES (?1, ?2, ?3)",
                    params![class_id, learner_id, Utc::now().to_rfc3339()],
                )?;
                tracing::debug!(class_id = %class_id, learner_id = %learner_id, "Learner enrolled");
            }
            Ok(())
        })
        .await
    }
}

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::curriculum::Curriculum;
use crate::presence::PresenceRegistry;
use crate::store::{GateCache, ProgressStore, UnlockStore};

/// Timeouts and intervals that shape connection and refresh behavior.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// Upper bound on any single store call made on behalf of a connection
    pub store_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub unlock_poll: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(750),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            unlock_poll: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for Timings {
    fn from(config: &Config) -> Self {
        Self {
            store_timeout: Duration::from_millis(config.store_timeout_ms),
            // tokio intervals panic on a zero period
            ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(config.pong_timeout_secs),
            unlock_poll: Duration::from_secs(config.unlock_poll_secs.max(1)),
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// JWT verification secret shared with the auth service
    pub jwt_secret: Vec<u8>,
    /// Shifts and steps, immutable for the life of the process
    pub curriculum: Arc<Curriculum>,
    /// Live connections and rooms
    pub presence: Arc<PresenceRegistry>,
    /// Last-known gate inputs
    pub gate_cache: Arc<GateCache>,
    pub progress_store: Arc<dyn ProgressStore>,
    pub unlock_store: Arc<dyn UnlockStore>,
    pub timings: Timings,
}

impl AppState {
    pub fn new(
        jwt_secret: Vec<u8>,
        curriculum: Arc<Curriculum>,
        progress_store: Arc<dyn ProgressStore>,
        unlock_store: Arc<dyn UnlockStore>,
        timings: Timings,
    ) -> Self {
        Self {
            jwt_secret,
            curriculum,
            presence: Arc::new(PresenceRegistry::new()),
            gate_cache: Arc::new(GateCache::new()),
            progress_store,
            unlock_store,
            timings,
        }
    }
}

#[cfg(test)]
impl AppState {
    /// State over a seeded in-memory database.
    pub(crate) fn for_tests() -> Self {
        let db = crate::db::init_memory_db().unwrap();
        crate::curriculum::seed::seed_starter_curriculum(&db).unwrap();
        let curriculum = Arc::new(crate::curriculum::load(&db).unwrap());
        let store = Arc::new(crate::store::SqliteStore::new(db, curriculum.clone()));
        Self::new(
            vec![7u8; 32],
            curriculum,
            store.clone(),
            store,
            Timings::default(),
        )
    }
}

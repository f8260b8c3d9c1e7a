use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking: no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: curriculum reference data

CREATE TABLE shifts (
    id TEXT PRIMARY KEY,
    ordinal INTEGER NOT NULL UNIQUE CHECK (ordinal >= 1),
    created_at TEXT NOT NULL
);

CREATE TABLE shift_steps (
    shift_id TEXT NOT NULL,
    step_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (shift_id, step_id),
    FOREIGN KEY (shift_id) REFERENCES shifts(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX idx_shift_steps_position ON shift_steps(shift_id, position);
",
        ),
        M::up(
            "-- Migration 2: learner progress and class overrides

CREATE TABLE shift_completions (
    learner_id TEXT NOT NULL,
    shift_id TEXT NOT NULL,
    completed_at TEXT NOT NULL,
    PRIMARY KEY (learner_id, shift_id),
    FOREIGN KEY (shift_id) REFERENCES shifts(id) ON DELETE CASCADE
);

CREATE TABLE step_completions (
    learner_id TEXT NOT NULL,
    shift_id TEXT NOT NULL,
    step_id TEXT NOT NULL,
    completed_at TEXT NOT NULL,
    PRIMARY KEY (learner_id, shift_id, step_id),
    FOREIGN KEY (shift_id, step_id) REFERENCES shift_steps(shift_id, step_id) ON DELETE CASCADE
);

CREATE TABLE class_unlocks (
    class_id TEXT NOT NULL,
    shift_id TEXT NOT NULL,
    unlocked_at TEXT NOT NULL,
    PRIMARY KEY (class_id, shift_id),
    FOREIGN KEY (shift_id) REFERENCES shifts(id) ON DELETE CASCADE
);

CREATE TABLE class_enrollments (
    class_id TEXT NOT NULL,
    learner_id TEXT NOT NULL,
    enrolled_at TEXT NOT NULL,
    PRIMARY KEY (class_id, learner_id)
);

CREATE INDEX idx_class_enrollments_learner ON class_enrollments(learner_id);
",
        ),
    ])
}

use chrono::Utc;

use crate::db::DbPool;

/// Steps every starter shift walks through, in order.
pub const STARTER_STEPS: [&str; 6] = [
    "briefing",
    "grammar",
    "listening",
    "recording",
    "write-up",
    "clock-out",
];

pub const STARTER_SHIFT_COUNT: u32 = 4;

/// Gap between stored step positions so steps can be inserted without renumbering.
const POSITION_GAP: i64 = 1000;

/// Seed the starter curriculum (week-1 .. week-4).
/// Only seeds if no shifts exist yet (idempotent guard).
pub fn seed_starter_curriculum(db: &DbPool) -> Result<bool, Box<dyn std::error::Error>> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;

    let count: i64 = conn.query_row("SELECT COUNT(*) FROM shifts", [], |row| row.get(0))?;
    if count > 0 {
        return Ok(false);
    }

    let now = Utc::now().to_rfc3339();
    for ordinal in 1..=STARTER_SHIFT_COUNT {
        let shift_id = format!("week-{}", ordinal);
        conn.execute(
            "INSERT INTO shifts (id, ordinal, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![shift_id, ordinal, now],
        )?;
        for (i, step) in STARTER_STEPS.iter().enumerate() {
            conn.execute(
                "INSERT INTO shift_steps (shift_id, step_id, position) VALUES (?1, ?2, ?3)",
                rusqlite::params![shift_id, step, (i as i64 + 1) * POSITION_GAP],
            )?;
        }
    }

    tracing::info!(shifts = STARTER_SHIFT_COUNT, "Seeded starter curriculum");
    Ok(true)
}

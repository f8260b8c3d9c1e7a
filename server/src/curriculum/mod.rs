//! Shift reference data, loaded once per process.

pub mod seed;

use rusqlite::Connection;

use crate::db::DbPool;
use crate::gate::Shift;

/// Ordered, immutable list of shifts.
#[derive(Debug, Clone, Default)]
pub struct Curriculum {
    shifts: Vec<Shift>,
}

impl Curriculum {
    pub fn new(mut shifts: Vec<Shift>) -> Self {
        shifts.sort_by_key(|s| s.ordinal);
        Self { shifts }
    }

    /// Shifts in ordinal order.
    pub fn shifts(&self) -> &[Shift] {
        &self.shifts
    }

    pub fn by_ordinal(&self, ordinal: u32) -> Option<&Shift> {
        self.shifts.iter().find(|s| s.ordinal == ordinal)
    }

    pub fn by_id(&self, shift_id: &str) -> Option<&Shift> {
        self.shifts.iter().find(|s| s.id == shift_id)
    }

    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty()
    }
}

/// Read every shift and its ordered steps.
pub fn load(db: &DbPool) -> Result<Curriculum, Box<dyn std::error::Error>> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;
    Ok(load_with(&conn)?)
}

fn load_with(conn: &Connection) -> Result<Curriculum, rusqlite::Error> {
    let mut shift_stmt = conn.prepare("SELECT id, ordinal FROM shifts ORDER BY ordinal")?;
    let mut step_stmt =
        conn.prepare("SELECT step_id FROM shift_steps WHERE shift_id = ?1 ORDER BY position")?;

    let heads: Vec<(String, u32)> = shift_stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;

    let mut shifts = Vec::with_capacity(heads.len());
    for (id, ordinal) in heads {
        let step_ids: Vec<String> = step_stmt
            .query_map([&id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        shifts.push(Shift::new(id, ordinal, step_ids));
    }

    Ok(Curriculum::new(shifts))
}

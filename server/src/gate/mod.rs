//! Progression gate: decides which shifts a learner may open and how far
//! into a shift they may navigate.
//!
//! Everything here is pure. The same functions back server-side
//! enforcement (`student:enter-shift`, `student:change-step`) and the
//! `student:gate` / `GET /api/gate` payloads the UI renders its locked
//! affordances from.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A weekly curricular unit with its ordered steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: String,
    pub ordinal: u32,
    pub step_ids: Vec<String>,
}

impl Shift {
    pub fn new(id: impl Into<String>, ordinal: u32, step_ids: Vec<String>) -> Self {
        Self {
            id: id.into(),
            ordinal,
            step_ids,
        }
    }

    /// Position of `step_id` in the declared step order.
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.step_ids.iter().position(|s| s == step_id)
    }

    pub fn contains_step(&self, step_id: &str) -> bool {
        self.step_index(step_id).is_some()
    }
}

/// Shifts a teacher has explicitly opened for a class.
pub type ClassUnlockSet = BTreeSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Complete,
    Incomplete,
}

/// The slice of a learner's progress the gate needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProgress {
    pub completed_shifts: BTreeSet<String>,
    pub step_status: BTreeMap<String, BTreeMap<String, StepStatus>>,
}

impl LearnerProgress {
    pub fn step_complete(&self, shift_id: &str, step_id: &str) -> bool {
        self.step_status
            .get(shift_id)
            .and_then(|steps| steps.get(step_id))
            .is_some_and(|status| *status == StepStatus::Complete)
    }

    pub fn mark_step_complete(&mut self, shift_id: &str, step_id: &str) {
        self.step_status
            .entry(shift_id.to_string())
            .or_default()
            .insert(step_id.to_string(), StepStatus::Complete);
    }

    pub fn mark_shift_complete(&mut self, shift_id: &str) {
        self.completed_shifts.insert(shift_id.to_string());
    }
}

/// Result of evaluating the gate for one learner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatePosition {
    pub current_shift_ordinal: Option<u32>,
    pub navigable_step_index: Option<usize>,
    pub accessible_ordinals: Vec<u32>,
}

/// A zero-step shift counts as complete and never blocks the next one.
fn is_complete(shift: &Shift, progress: &LearnerProgress) -> bool {
    shift.step_ids.is_empty() || progress.completed_shifts.contains(&shift.id)
}

fn ordered(shifts: &[Shift]) -> Vec<&Shift> {
    let mut sorted: Vec<&Shift> = shifts.iter().collect();
    sorted.sort_by_key(|s| s.ordinal);
    sorted
}

/// Whether each shift (in ordinal order) is open through sequential completion alone.
fn sequential_flags(sorted: &[&Shift], progress: &LearnerProgress) -> Vec<bool> {
    (0..sorted.len())
        .map(|i| i == 0 || is_complete(sorted[i - 1], progress))
        .collect()
}

/// True when the learner reached `shift_id` through their own completions,
/// independent of any teacher override.
pub fn sequentially_earned(shifts: &[Shift], progress: &LearnerProgress, shift_id: &str) -> bool {
    let sorted = ordered(shifts);
    let flags = sequential_flags(&sorted, progress);
    sorted
        .iter()
        .zip(flags)
        .any(|(shift, earned)| earned && shift.id == shift_id)
}

/// Ordinals of every shift the learner may open, ascending.
pub fn accessible_ordinals(
    shifts: &[Shift],
    unlocks: &ClassUnlockSet,
    progress: &LearnerProgress,
) -> Vec<u32> {
    let sorted = ordered(shifts);
    let flags = sequential_flags(&sorted, progress);
    sorted
        .iter()
        .zip(flags)
        .filter(|(shift, earned)| *earned || unlocks.contains(&shift.id))
        .map(|(shift, _)| shift.ordinal)
        .collect()
}

pub fn is_accessible(
    shifts: &[Shift],
    unlocks: &ClassUnlockSet,
    progress: &LearnerProgress,
    ordinal: u32,
) -> bool {
    accessible_ordinals(shifts, unlocks, progress).contains(&ordinal)
}

/// Index of the first incomplete step, or the last index when every step is
/// done. `None` for a shift without steps.
pub fn navigable_step_index(shift: &Shift, progress: &LearnerProgress) -> Option<usize> {
    if shift.step_ids.is_empty() {
        return None;
    }
    let first_open = shift
        .step_ids
        .iter()
        .position(|step| !progress.step_complete(&shift.id, step));
    Some(first_open.unwrap_or(shift.step_ids.len() - 1))
}

/// Evaluate the gate.
///
/// The current shift is the lowest-ordinal accessible shift the learner has
/// not completed. When everything accessible is complete the highest
/// accessible shift is returned for replay.
pub fn gate(shifts: &[Shift], unlocks: &ClassUnlockSet, progress: &LearnerProgress) -> GatePosition {
    let sorted = ordered(shifts);
    let flags = sequential_flags(&sorted, progress);

    let accessible: Vec<&Shift> = sorted
        .iter()
        .zip(flags)
        .filter(|(shift, earned)| *earned || unlocks.contains(&shift.id))
        .map(|(shift, _)| *shift)
        .collect();

    let current = accessible
        .iter()
        .find(|shift| !is_complete(shift, progress))
        .or_else(|| accessible.last())
        .copied();

    GatePosition {
        current_shift_ordinal: current.map(|s| s.ordinal),
        navigable_step_index: current.and_then(|s| navigable_step_index(s, progress)),
        accessible_ordinals: accessible.iter().map(|s| s.ordinal).collect(),
    }
}

//! Step flow controller.
//!
//! Computes the next or previous `(step, sub-step)` pair for a session by
//! index arithmetic over the plan's sequence. The controller is pure; the
//! caller stores the resulting position on the session.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::plan::{PlanType, StepPosition};
use crate::session::OnboardingSession;

/// Navigation intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Next,
    Previous,
}

/// Result of a navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Moved to a neighbouring pair. `crossed_step` is set when the move
    /// left one numbered step for another.
    Moved {
        to: StepPosition,
        crossed_step: bool,
    },
    /// `Previous` on the first pair; the position is unchanged.
    Stayed(StepPosition),
    /// `Next` on the last pair.
    Complete,
}

impl Transition {
    /// The position after the transition, or `None` when the session is complete.
    pub fn position(self) -> Option<StepPosition> {
        match self {
            Self::Moved { to, .. } => Some(to),
            Self::Stayed(pos) => Some(pos),
            Self::Complete => None,
        }
    }
}

/// Advance the session one pair in `direction`.
pub fn advance(session: &OnboardingSession, direction: Direction) -> Result<Transition, CoreError> {
    advance_from(session.plan_type, session.current, direction)
}

/// Advance from an explicit position within `plan`.
pub fn advance_from(
    plan: PlanType,
    current: StepPosition,
    direction: Direction,
) -> Result<Transition, CoreError> {
    let sequence = plan.sequence();
    let index = sequence
        .iter()
        .position(|p| *p == current)
        .ok_or_else(|| CoreError::UnknownPosition {
            plan: plan.as_str(),
            position: current.key(),
        })?;

    let transition = match direction {
        Direction::Next => match sequence.get(index + 1) {
            Some(&to) => Transition::Moved {
                to,
                crossed_step: to.step != current.step,
            },
            None => Transition::Complete,
        },
        Direction::Previous => match index.checked_sub(1) {
            Some(prev) => {
                let to = sequence[prev];
                Transition::Moved {
                    to,
                    crossed_step: to.step != current.step,
                }
            }
            None => Transition::Stayed(current),
        },
    };

    Ok(transition)
}

/// Resolve a raw, possibly missing plan type string.
///
/// Plan selection is mandatory before any navigation, so both a missing
/// and an unrecognized value are `InvalidPlanType`.
pub fn require_plan(raw: Option<&str>) -> Result<PlanType, CoreError> {
    match raw {
        Some(s) => s.parse(),
        None => Err(CoreError::InvalidPlanType(String::new())),
    }
}

/// First pair of the plan that has not been completed, or the last pair
/// when everything is done.
pub fn resume_position(plan: PlanType, completed: &BTreeSet<StepPosition>) -> StepPosition {
    plan.sequence()
        .into_iter()
        .find(|p| !completed.contains(p))
        .unwrap_or_else(|| plan.last_position())
}

/// Whether every pair of the plan has been completed.
pub fn is_plan_complete(plan: PlanType, completed: &BTreeSet<StepPosition>) -> bool {
    plan.sequence().iter().all(|p| completed.contains(p))
}

/// Completion summary for progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed * 100) / self.total) as u8
    }
}

/// Count completed pairs that belong to the plan.
pub fn progress(plan: PlanType, completed: &BTreeSet<StepPosition>) -> Progress {
    let sequence = plan.sequence();
    Progress {
        completed: sequence.iter().filter(|p| completed.contains(p)).count(),
        total: sequence.len(),
    }
}

//! Plan types and their step graphs.
//!
//! Each plan is a fixed, ordered list of steps; each step provisions one
//! entity through an ordered list of sub-steps. The graphs are data, and
//! [`crate::flow`] walks them with index arithmetic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Plan type
// ---------------------------------------------------------------------------

/// The subscription tier chosen at the start of onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    #[serde(alias = "company")]
    Organization,
    Complex,
    Clinic,
}

impl PlanType {
    pub const ALL: [PlanType; 3] = [Self::Organization, Self::Complex, Self::Clinic];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Complex => "complex",
            Self::Clinic => "clinic",
        }
    }

    /// The ordered steps of this plan.
    pub fn steps(self) -> &'static [PlanStep] {
        match self {
            Self::Organization => ORGANIZATION_PLAN,
            Self::Complex => COMPLEX_PLAN,
            Self::Clinic => CLINIC_PLAN,
        }
    }

    /// Every `(step, sub-step)` pair of the plan in visiting order.
    pub fn sequence(self) -> Vec<StepPosition> {
        self.steps()
            .iter()
            .flat_map(|s| s.positions())
            .collect()
    }

    pub fn step_count(self) -> u8 {
        self.steps().len() as u8
    }

    /// Look up a step by its 1-based number.
    pub fn step(self, step: u8) -> Option<&'static PlanStep> {
        self.steps().iter().find(|s| s.step == step)
    }

    /// The entity provisioned by `step`, if the step exists.
    pub fn entity_for(self, step: u8) -> Option<EntityKind> {
        self.step(step).map(|s| s.entity)
    }

    /// Step number that provisions `entity`, if the plan includes it.
    pub fn step_of(self, entity: EntityKind) -> Option<u8> {
        self.steps()
            .iter()
            .find(|s| s.entity == entity)
            .map(|s| s.step)
    }

    pub fn contains(self, position: StepPosition) -> bool {
        self.step(position.step)
            .is_some_and(|s| s.sub_steps.contains(&position.sub_step))
    }

    pub fn first_position(self) -> StepPosition {
        let first = &self.steps()[0];
        StepPosition::new(first.step, first.sub_steps[0])
    }

    pub fn last_position(self) -> StepPosition {
        let steps = self.steps();
        let last = &steps[steps.len() - 1];
        StepPosition::new(last.step, last.sub_steps[last.sub_steps.len() - 1])
    }
}

impl FromStr for PlanType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "organization" | "company" => Ok(Self::Organization),
            "complex" => Ok(Self::Complex),
            "clinic" => Ok(Self::Clinic),
            _ => Err(CoreError::InvalidPlanType(s.to_string())),
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Entity kind
// ---------------------------------------------------------------------------

/// The three nested organizational entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Organization,
    Complex,
    Clinic,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Complex => "complex",
            Self::Clinic => "clinic",
        }
    }

    /// Whether the entity keeps its own weekly operating hours.
    pub fn has_working_hours(self) -> bool {
        matches!(self, Self::Complex | Self::Clinic)
    }

    /// Possible parents, nearest first.
    pub fn parents(self) -> &'static [EntityKind] {
        match self {
            Self::Organization => &[],
            Self::Complex => &[Self::Organization],
            Self::Clinic => &[Self::Complex, Self::Organization],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Sub-steps
// ---------------------------------------------------------------------------

/// One form section within a numbered step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubStep {
    Overview,
    Contact,
    Legal,
    Services,
    Schedule,
}

impl SubStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overview => "overview",
            Self::Contact => "contact",
            Self::Legal => "legal",
            Self::Services => "services",
            Self::Schedule => "schedule",
        }
    }

    /// Human-readable label for the sub-step.
    pub fn label(self) -> &'static str {
        match self {
            Self::Overview => "Overview",
            Self::Contact => "Contact Details",
            Self::Legal => "Legal Information",
            Self::Services => "Services",
            Self::Schedule => "Working Hours",
        }
    }
}

impl FromStr for SubStep {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overview" => Ok(Self::Overview),
            "contact" => Ok(Self::Contact),
            "legal" => Ok(Self::Legal),
            "services" => Ok(Self::Services),
            "schedule" => Ok(Self::Schedule),
            _ => Err(CoreError::Validation(format!(
                "Invalid sub-step '{s}'. Must be one of: overview, contact, legal, services, schedule"
            ))),
        }
    }
}

impl fmt::Display for SubStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// A `(step, sub-step)` pair. Its string form `"{step}-{subStep}"` is the
/// key under which the sub-step's payload is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepPosition {
    pub step: u8,
    pub sub_step: SubStep,
}

impl StepPosition {
    pub fn new(step: u8, sub_step: SubStep) -> Self {
        Self { step, sub_step }
    }

    pub fn key(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StepPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.step, self.sub_step)
    }
}

impl FromStr for StepPosition {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (step, sub_step) = s.split_once('-').ok_or_else(|| {
            CoreError::Validation(format!("Invalid step key '{s}'. Expected '{{step}}-{{subStep}}'"))
        })?;
        let step: u8 = step
            .parse()
            .map_err(|_| CoreError::Validation(format!("Invalid step number in key '{s}'")))?;
        if step == 0 {
            return Err(CoreError::Validation(format!(
                "Step numbers start at 1, got key '{s}'"
            )));
        }
        Ok(Self::new(step, sub_step.parse()?))
    }
}

impl TryFrom<String> for StepPosition {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StepPosition> for String {
    fn from(value: StepPosition) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Step graphs
// ---------------------------------------------------------------------------

/// One numbered step of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStep {
    pub step: u8,
    pub entity: EntityKind,
    pub sub_steps: &'static [SubStep],
}

impl PlanStep {
    pub fn positions(&self) -> impl Iterator<Item = StepPosition> + '_ {
        self.sub_steps
            .iter()
            .map(move |sub| StepPosition::new(self.step, *sub))
    }
}

const ORGANIZATION_SUB_STEPS: &[SubStep] = &[SubStep::Overview, SubStep::Contact, SubStep::Legal];

const COMPLEX_SUB_STEPS: &[SubStep] = &[
    SubStep::Overview,
    SubStep::Contact,
    SubStep::Legal,
    SubStep::Schedule,
];

const CLINIC_SUB_STEPS: &[SubStep] = &[
    SubStep::Overview,
    SubStep::Contact,
    SubStep::Services,
    SubStep::Legal,
    SubStep::Schedule,
];

const ORGANIZATION_PLAN: &[PlanStep] = &[
    PlanStep {
        step: 1,
        entity: EntityKind::Organization,
        sub_steps: ORGANIZATION_SUB_STEPS,
    },
    PlanStep {
        step: 2,
        entity: EntityKind::Complex,
        sub_steps: COMPLEX_SUB_STEPS,
    },
    PlanStep {
        step: 3,
        entity: EntityKind::Clinic,
        sub_steps: CLINIC_SUB_STEPS,
    },
];

const COMPLEX_PLAN: &[PlanStep] = &[
    PlanStep {
        step: 1,
        entity: EntityKind::Complex,
        sub_steps: COMPLEX_SUB_STEPS,
    },
    PlanStep {
        step: 2,
        entity: EntityKind::Clinic,
        sub_steps: CLINIC_SUB_STEPS,
    },
];

const CLINIC_PLAN: &[PlanStep] = &[PlanStep {
    step: 1,
    entity: EntityKind::Clinic,
    sub_steps: CLINIC_SUB_STEPS,
}];

//! Wire types for the onboarding backend.

use std::collections::BTreeSet;

use onboard_core::plan::StepPosition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response of `GET /validation/{field-kind}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldCheckResponse {
    pub is_valid: bool,
    #[serde(default)]
    pub is_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response of the section-save and completion endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "default_can_proceed")]
    pub can_proceed: bool,
}

fn default_can_proceed() -> bool {
    true
}

/// Response of `GET /onboarding/progress`, used to resume an interrupted
/// session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressResponse {
    pub plan_type: Option<String>,
    pub current_step: Option<u8>,
    pub current_sub_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub is_complete: bool,
}

impl ProgressResponse {
    /// Completed step keys that parse as positions. Malformed keys are
    /// skipped with a warning.
    pub fn completed_positions(&self) -> BTreeSet<StepPosition> {
        self.completed_steps
            .iter()
            .filter_map(|key| match key.parse::<StepPosition>() {
                Ok(pos) => Some(pos),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Ignoring malformed progress key");
                    None
                }
            })
            .collect()
    }
}

/// One subscription plan offered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub plan_type: String,
    #[serde(default)]
    pub features: Vec<String>,
}

/// The plans endpoint answers either with a bare list or with the
/// `{ "data": [...] }` envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum PlansPayload {
    Enveloped { data: Vec<PlanInfo> },
    Bare(Vec<PlanInfo>),
}

impl PlansPayload {
    pub(crate) fn into_plans(self) -> Vec<PlanInfo> {
        match self {
            Self::Enveloped { data } => data,
            Self::Bare(plans) => plans,
        }
    }
}

use onboard_core::error::CoreError;
use onboard_core::working_hours::HoursReport;

use crate::store::StoreError;

/// Errors surfaced by [`Wizard`](crate::wizard::Wizard) operations.
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    /// Form-local problem; shown inline next to the field.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The backend could not be reached. Retryable; the draft is kept.
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials were rejected. The wizard stops until the user signs in
    /// again.
    #[error("Authentication required: {0}")]
    Auth(String),

    /// Working hours fall outside the parent's hours. Blocks this sub-step.
    #[error("Working hours violate the parent schedule ({} issue(s))", .0.violations.len())]
    Constraint(HoursReport),

    /// The backend refused the data; its message is shown verbatim.
    #[error("{0}")]
    BackendRejection(String),

    #[error("The onboarding session was terminated; sign in again to continue")]
    Terminated,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WizardError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid plan type '{0}'. Must be one of: organization, complex, clinic")]
    InvalidPlanType(String),

    #[error("Position {position} is not part of the {plan} plan")]
    UnknownPosition { plan: &'static str, position: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

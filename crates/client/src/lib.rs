//! REST client for the onboarding backend.
//!
//! [`OnboardingApi`] wraps the validation, section-save, completion,
//! progress and plan endpoints using [`reqwest`]. The engine talks to the
//! backend through the [`OnboardingBackend`] trait so tests can substitute
//! an in-memory fake.

pub mod api;
pub mod backend;
pub mod types;

pub use api::{ClientError, OnboardingApi};
pub use backend::OnboardingBackend;
pub use types::{FieldCheckResponse, PlanInfo, ProgressResponse, SaveResponse};

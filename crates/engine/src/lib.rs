//! Onboarding wizard engine.
//!
//! Drives an [`OnboardingSession`](onboard_core::session::OnboardingSession)
//! through its plan: debounced uniqueness checks, progressive saves,
//! the working-hours constraint gate and client-side persistence. Timing
//! goes through an injectable [`Scheduler`](scheduler::Scheduler) so tests
//! control the clock.

pub mod autosave;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod store;
pub mod uniqueness;
pub mod wizard;

pub use config::{ConfigError, WizardConfig};
pub use error::WizardError;
pub use wizard::{FlushReport, SaveWarning, SubmitReport, Wizard, WizardDeps};

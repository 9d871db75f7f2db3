//! Domain core for the clinic onboarding wizard.
//!
//! Everything in this crate is pure and synchronous: plan step graphs and
//! the transition function, entity drafts and the parent-to-child
//! inheritance mapper, working-hours containment checks, field syntax
//! rules, and the in-memory session model. Network and timing concerns
//! live in `onboard-client` and `onboard-engine`.

pub mod entity;
pub mod error;
pub mod fields;
pub mod flow;
pub mod hashing;
pub mod inheritance;
pub mod plan;
pub mod session;
pub mod working_hours;

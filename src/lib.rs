//! Signup orchestrator — contact verification, account provisioning, and
//! company onboarding.

pub mod accounts;
pub mod api;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod onboarding;
pub mod store;
pub mod verification;

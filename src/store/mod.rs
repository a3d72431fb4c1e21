//! Persistence layer — libSQL-backed storage for verifications, accounts,
//! and onboarding submissions.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{AccountStore, Database, OnboardingStore, VerificationStore};

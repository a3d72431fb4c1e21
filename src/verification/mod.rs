//! Contact verification — one-time codes proving an applicant controls an
//! email address or phone number.

pub mod code;
pub mod engine;
pub mod model;
pub mod routes;

pub use engine::{VerificationEngine, spawn_expiry_sweep};
pub use model::{Applicant, ContactChannel, ContactKind, Verification, VerificationAttempt};
pub use routes::verification_routes;

//! Onboarding — the post-signup workflow that takes a company from payment
//! through brand and campaign registration to an active phone number.
//!
//! Steps advance strictly in order (see [`OnboardingStep`]). Steps that call
//! an external registrar or provisioner store the returned id on the
//! submission; a repeated call returns the stored id.

pub mod model;
pub mod orchestrator;
pub mod routes;
pub mod state;

pub use model::{
    BrandDetails, CampaignDetails, CampaignNumber, StepCorrelator, StepData, StepDataMap,
    Submission,
};
pub use orchestrator::OnboardingOrchestrator;
pub use routes::onboarding_routes;
pub use state::OnboardingStep;

//! Accounts — tenants, identities, profiles, and the provisioner that turns a
//! verified signup into an owner account.

pub mod model;
pub mod provisioner;

pub use model::{Account, AccountRole, Identity, PaymentStatus, Tenant, VerifiedApplicant};
pub use provisioner::AccountProvisioner;

//! Access grants: expiring, permission-scoped URLs for single objects.

pub mod issuer;
pub mod sas;

pub use issuer::{DelegationKeyProvider, GrantIssuer, SigningStrategy};

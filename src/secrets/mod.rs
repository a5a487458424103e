//! # Dynamic Secret Core
//!
//! Building blocks shared by every secret backend:
//!
//! - [`roles`]: typed role registry persisted under `role/<name>`
//! - [`issued`]: the public/internal split of a freshly minted secret
//! - [`lease`]: TTL resolution and renewal bounds
//! - [`revocation`]: revocation state machine and step tracking
//! - [`template`]: SQL template rendering and statement splitting
//! - [`duration`]: duration parsing and canonical formatting
//! - [`types`]: [`SecretString`] for credential material

pub mod duration;
pub mod issued;
pub mod lease;
pub mod revocation;
pub mod roles;
pub mod template;
pub mod types;

pub use issued::IssuedSecret;
pub use lease::{bounded_ttl, extend, resolve_ttl, LeaseConfig, LeaseLimits, LeaseTerms};
pub use revocation::{RevocationState, RevocationSteps};
pub use roles::RoleRegistry;
pub use types::SecretString;

//! Public API: payloads, handlers and the signing service they call.
//!
//! # Endpoints
//! - `POST /v1/validate-jwt` signs the submitted answers and starts onboarding
//! - `POST /v1/verify-signature` checks a signature against a user

pub mod handlers;
pub mod model;
pub mod signing;

pub use signing::{PlaceholderSigner, SignatureService, SigningError};

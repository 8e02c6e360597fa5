//! Signing and verification service.
//!
//! The algorithms are opaque to the rest of the service; handlers only see
//! `SignatureService`. `PlaceholderSigner` is the stand-in used until a real
//! signer is wired in.

use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signer unavailable: {0}")]
    Unavailable(String),

    #[error("onboarding failed: {0}")]
    Onboarding(String),
}

/// Business logic behind the two endpoints.
pub trait SignatureService: Send + Sync + 'static {
    /// Sign the answers given to `questions`.
    fn sign_answers(
        &self,
        questions: &[String],
        answers: &[String],
    ) -> impl Future<Output = Result<String, SigningError>> + Send;

    /// Whether `signature` belongs to `user`.
    fn verify(
        &self,
        user: &str,
        signature: &str,
    ) -> impl Future<Output = Result<bool, SigningError>> + Send;

    /// Post-response onboarding step. Runs detached from the request.
    fn onboard(
        &self,
        signature: String,
    ) -> impl Future<Output = Result<(), SigningError>> + Send + 'static;
}

/// Fixed-output signer.
#[derive(Debug, Clone)]
pub struct PlaceholderSigner {
    signature: String,
}

impl PlaceholderSigner {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
        }
    }
}

impl Default for PlaceholderSigner {
    fn default() -> Self {
        Self::new("test-signature-JonnyBoy")
    }
}

impl SignatureService for PlaceholderSigner {
    async fn sign_answers(
        &self,
        questions: &[String],
        answers: &[String],
    ) -> Result<String, SigningError> {
        tracing::debug!(?questions, ?answers, "Signing answers");
        Ok(self.signature.clone())
    }

    async fn verify(&self, user: &str, signature: &str) -> Result<bool, SigningError> {
        tracing::debug!(user, signature, "Verifying signature");
        Ok(signature.contains(user))
    }

    fn onboard(
        &self,
        signature: String,
    ) -> impl Future<Output = Result<(), SigningError>> + Send + 'static {
        async move {
            tracing::debug!(signature = %signature, "Onboarding user");
            Ok(())
        }
    }
}

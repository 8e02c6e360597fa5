//! Request and response payloads.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A required field was absent or empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing parameter: {0}")]
pub struct MissingParameter(pub &'static str);

/// Body of `POST /v1/validate-jwt`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtValidation {
    pub jwt: String,
    pub questions: Vec<String>,
    pub answers: Vec<String>,
}

impl JwtValidation {
    pub fn validate(&self) -> Result<(), MissingParameter> {
        if self.jwt.is_empty() {
            return Err(MissingParameter("JWT"));
        }
        if self.questions.is_empty() {
            return Err(MissingParameter("Questions"));
        }
        if self.answers.is_empty() {
            return Err(MissingParameter("Answers"));
        }
        Ok(())
    }
}

/// Body of `POST /v1/verify-signature`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SignatureValidation {
    pub user: String,
    pub signature: String,
}

impl SignatureValidation {
    pub fn validate(&self) -> Result<(), MissingParameter> {
        if self.user.is_empty() {
            return Err(MissingParameter("Username"));
        }
        if self.signature.is_empty() {
            return Err(MissingParameter("signature"));
        }
        Ok(())
    }
}

/// Outcome returned in the `data` field of a success envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SigningOutcome {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

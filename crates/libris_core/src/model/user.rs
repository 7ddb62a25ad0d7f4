//! Borrower identity.
//!
//! Authentication lives outside this crate; the core only needs a stable id
//! and the email shown to admins.

use super::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Lowercased, trimmed address.
    pub email: String,
}

impl User {
    /// Creates a user with a generated id and normalized email.
    pub fn new(email: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            id: Uuid::new_v4(),
            email: normalize_email(email)?,
        })
    }
}

/// Trims and lowercases an email, rejecting anything without `local@domain.tld`.
pub fn normalize_email(value: &str) -> Result<String, ValidationError> {
    let normalized = value.trim().to_lowercase();
    if !EMAIL_RE.is_match(&normalized) {
        return Err(ValidationError::InvalidEmail(value.trim().to_string()));
    }
    Ok(normalized)
}

//! Caller roles.
//!
//! Reads are open to everyone. Writes require a staff caller, identified by
//! an `Authorization: Bearer <token>` header whose token is listed in
//! `[auth].staff_tokens`.

use crate::config::AuthConfig;
use axum::http::{HeaderMap, header};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Anonymous,
    Staff,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("staff privileges required")]
pub struct AuthorizationError;

#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    staff_tokens: HashSet<String>,
}

impl Authorizer {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            staff_tokens: config
                .staff_tokens
                .iter()
                .map(|t| t.trim().to_string())
                .collect(),
        }
    }

    /// Resolve the caller's role from request headers.
    pub fn role(&self, headers: &HeaderMap) -> Role {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        match token {
            Some(t) if self.staff_tokens.contains(t) => Role::Staff,
            _ => Role::Anonymous,
        }
    }

    pub fn require_staff(&self, headers: &HeaderMap) -> Result<(), AuthorizationError> {
        match self.role(headers) {
            Role::Staff => Ok(()),
            Role::Anonymous => Err(AuthorizationError),
        }
    }
}

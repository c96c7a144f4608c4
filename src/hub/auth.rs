//! Subscriber authentication
//!
//! The hub only needs to know *who* a subscriber is; how tokens are checked sits behind
//! [`TokenValidator`] so an external identity service can replace the static list.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde::Serialize;
use std::collections::HashSet;

use crate::error::HubError;

/// Authenticated subscriber identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject: String,
}

#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Identity, HubError>;
}

/// Accepts a fixed set of tokens from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticTokenValidator {
    tokens: HashSet<String>,
}

impl StaticTokenValidator {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<Identity, HubError> {
        if token.is_empty() {
            return Err(HubError::SubscriberAuth("empty token".to_string()));
        }
        if !self.tokens.contains(token) {
            return Err(HubError::SubscriberAuth("unknown token".to_string()));
        }
        Ok(Identity {
            subject: subject_for(token),
        })
    }
}

/// Short, log-safe subject derived from the token
fn subject_for(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("token:{}…", prefix)
}

/// Bearer token from `?token=` or `Authorization: Bearer`, query first
pub fn extract_bearer(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query_token.filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

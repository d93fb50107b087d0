//! Request authentication: an ordered table of authenticators selected by
//! the shape of the `Authorization` header.

pub mod jwt;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AuthConfig;
use crate::endpoint::{EndpointError, EndpointRequest};
use crate::types::Consumer;

pub use jwt::{generate_jwt, Claims, JwtAuthenticator};

/// Matches requests whose `Authorization` header starts with a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorHint {
    pub header: String,
}

impl AuthenticatorHint {
    pub fn new(header: impl Into<String>) -> Self {
        Self { header: header.into() }
    }

    /// Case-insensitive prefix match.
    pub fn matches(&self, authorization: &str) -> bool {
        authorization.len() >= self.header.len()
            && authorization.as_bytes()[..self.header.len()].eq_ignore_ascii_case(self.header.as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticationFailure {
    pub detail: Option<String>,
    pub challenge: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticationResult {
    Success(Option<Consumer>),
    Failure(AuthenticationFailure),
}

impl AuthenticationResult {
    pub fn failure(detail: impl Into<String>) -> Self {
        AuthenticationResult::Failure(AuthenticationFailure {
            detail: Some(detail.into()),
            challenge: None,
        })
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn authenticate(&self, request: &EndpointRequest) -> AuthenticationResult;

    /// Value for the `WWW-Authenticate` header when this authenticator rejects.
    fn challenge(&self) -> Option<String> {
        None
    }
}

/// Accepts every request without a consumer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuthentication;

#[async_trait]
impl Authenticator for NoAuthentication {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn authenticate(&self, _request: &EndpointRequest) -> AuthenticationResult {
        AuthenticationResult::Success(None)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Unknown authentication handler: {0}")]
    UnknownHandler(String),

    #[error("Invalid authentication hint: {0:?}")]
    InvalidHint(String),
}

struct AuthEntry {
    hints: Vec<AuthenticatorHint>,
    authenticator: Arc<dyn Authenticator>,
}

/// Ordered (hints, authenticator) rows. Rows whose hints match the request
/// are tried first, in order; rows with no hints are catch-alls tried last.
#[derive(Default)]
pub struct AuthenticationTable {
    entries: Vec<AuthEntry>,
}

impl AuthenticationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hinted<I, S>(mut self, hints: I, authenticator: Arc<dyn Authenticator>) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hints = hints
            .into_iter()
            .map(|h| {
                let h = h.into();
                if h.trim().is_empty() {
                    Err(AuthError::InvalidHint(h))
                } else {
                    Ok(AuthenticatorHint::new(h))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.entries.push(AuthEntry { hints, authenticator });
        Ok(self)
    }

    pub fn with_catch_all(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.entries.push(AuthEntry {
            hints: Vec::new(),
            authenticator,
        });
        self
    }

    pub fn from_config(config: &AuthConfig, registry: &AuthenticatorRegistry) -> Result<Self, AuthError> {
        let mut table = Self::new();
        for row in &config.handlers {
            let authenticator = registry
                .get(&row.handler)
                .ok_or_else(|| AuthError::UnknownHandler(row.handler.clone()))?;
            table = if row.hints.is_empty() {
                table.with_catch_all(authenticator)
            } else {
                table.with_hinted(row.hints.clone(), authenticator)?
            };
        }
        Ok(table)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn candidates(&self, authorization: Option<&str>) -> Vec<&Arc<dyn Authenticator>> {
        let hinted = self.entries.iter().filter(|e| {
            !e.hints.is_empty()
                && authorization.is_some_and(|header| e.hints.iter().any(|h| h.matches(header)))
        });
        let catch_all = self.entries.iter().filter(|e| e.hints.is_empty());
        hinted.chain(catch_all).map(|e| &e.authenticator).collect()
    }

    /// Authenticate a request, returning the consumer, if any.
    ///
    /// The first success wins. When every candidate fails, the error carries
    /// the last candidate's detail and challenge.
    pub async fn authenticate(&self, request: &EndpointRequest) -> Result<Option<Consumer>, EndpointError> {
        let candidates = self.candidates(request.authorization());
        if candidates.is_empty() {
            tracing::warn!("No authenticator available for {} {}", request.method(), request.path());
            return Err(EndpointError::Unauthenticated {
                detail: Some("No authenticator found for request".to_string()),
                challenge: None,
            });
        }

        let mut last_failure = None;
        for authenticator in candidates {
            match authenticator.authenticate(request).await {
                AuthenticationResult::Success(consumer) => {
                    tracing::debug!("Request authenticated by {}", authenticator.name());
                    return Ok(consumer);
                }
                AuthenticationResult::Failure(failure) => {
                    tracing::debug!(
                        "Authenticator {} rejected request: {:?}",
                        authenticator.name(),
                        failure.detail
                    );
                    last_failure = Some(AuthenticationFailure {
                        challenge: failure.challenge.or_else(|| authenticator.challenge()),
                        detail: failure.detail,
                    });
                }
            }
        }

        let failure = last_failure.unwrap_or(AuthenticationFailure {
            detail: None,
            challenge: None,
        });
        Err(EndpointError::Unauthenticated {
            detail: failure.detail,
            challenge: failure.challenge,
        })
    }
}

/// Named authenticators that configuration rows refer to.
#[derive(Default, Clone)]
pub struct AuthenticatorRegistry {
    authenticators: HashMap<String, Arc<dyn Authenticator>>,
}

impl AuthenticatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `none` and, given a secret, `jwt`.
    pub fn with_defaults(jwt_secret: &str) -> Self {
        let mut registry = Self::new();
        registry.register("none", Arc::new(NoAuthentication));
        if !jwt_secret.is_empty() {
            registry.register("jwt", Arc::new(JwtAuthenticator::new(jwt_secret)));
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, authenticator: Arc<dyn Authenticator>) {
        self.authenticators.insert(name.into(), authenticator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Authenticator>> {
        self.authenticators.get(name).cloned()
    }
}

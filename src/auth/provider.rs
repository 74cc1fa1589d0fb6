use std::collections::HashMap;

use crate::config::{IdentityConfig, TokenEntry};
use crate::storage::sha256_hex;

use super::Claims;

/// Verifies a bearer token and returns the claims it carries.
pub trait ClaimsProvider: Send + Sync {
    fn verify(&self, token: &str) -> Option<Claims>;
}

/// Fixed token table loaded from configuration. Tokens are kept only as
/// SHA-256 digests.
pub struct StaticTokens {
    tokens: HashMap<String, Claims>,
}

impl StaticTokens {
    #[must_use]
    pub fn new(entries: &[TokenEntry]) -> Self {
        let tokens = entries
            .iter()
            .map(|entry| {
                let claims = Claims {
                    sub: entry.sub.clone(),
                    name: entry.name.clone(),
                    email: entry.email.clone(),
                    institution_id: entry.institution_id.clone(),
                    roles: entry.roles.clone(),
                    scope: entry.scope.clone(),
                };
                (sha256_hex(entry.token.as_bytes()), claims)
            })
            .collect();
        Self { tokens }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl ClaimsProvider for StaticTokens {
    fn verify(&self, token: &str) -> Option<Claims> {
        self.tokens.get(&sha256_hex(token.as_bytes())).cloned()
    }
}

/// Turns bearer tokens into actors.
pub struct Identity {
    provider: Box<dyn ClaimsProvider>,
    consortium_role: String,
}

impl Identity {
    pub fn new(provider: Box<dyn ClaimsProvider>, consortium_role: impl Into<String>) -> Self {
        Self {
            provider,
            consortium_role: consortium_role.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &IdentityConfig) -> Self {
        Self::new(
            Box::new(StaticTokens::new(&config.tokens)),
            config.consortium_role.clone(),
        )
    }

    #[must_use]
    pub fn authenticate(&self, token: &str) -> Option<crate::types::Actor> {
        self.provider
            .verify(token)
            .map(|claims| claims.to_actor(&self.consortium_role))
    }
}

use serde::Deserialize;

use crate::types::Actor;

pub const SCOPE_READ: &str = "assets:read";
pub const SCOPE_WRITE: &str = "assets:write";

/// Verified identity claims as issued by the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub institution_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Space-separated list of granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

impl Claims {
    /// Maps claims onto the actor the access core evaluates. Consortium
    /// membership is the presence of `consortium_role` among the roles.
    #[must_use]
    pub fn to_actor(&self, consortium_role: &str) -> Actor {
        Actor {
            user_id: Some(self.sub.clone()),
            institution: self
                .institution_id
                .as_deref()
                .filter(|i| !i.is_empty())
                .map(str::to_string),
            is_consortium_member: self.roles.iter().any(|r| r == consortium_role),
            scopes: self
                .scope
                .as_deref()
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        }
    }
}

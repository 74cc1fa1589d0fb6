use serde::Deserialize;

pub const DEFAULT_CONSORTIUM_ROLE: &str = "consortium_member";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Role whose presence in a caller's claims makes them a consortium member.
    pub consortium_role: String,
    pub tokens: Vec<TokenEntry>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            consortium_role: DEFAULT_CONSORTIUM_ROLE.to_string(),
            tokens: Vec::new(),
        }
    }
}

/// A bearer token and the identity claims it stands for.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub institution_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Space-separated scopes, e.g. `"assets:read assets:write"`.
    #[serde(default)]
    pub scope: Option<String>,
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tiered access level of an asset, from most restrictive to most open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    Private,
    Group,
    Institution,
    Consortium,
    ApprovalRequired,
    Public,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 6] = [
        AccessLevel::Private,
        AccessLevel::Group,
        AccessLevel::Institution,
        AccessLevel::Consortium,
        AccessLevel::ApprovalRequired,
        AccessLevel::Public,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Institution => "institution",
            Self::Consortium => "consortium",
            Self::ApprovalRequired => "approval_required",
            Self::Public => "public",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| format!("unknown access level: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Delete,
}

impl Action {
    /// Write and delete both modify the asset and are reserved to its owner.
    #[must_use]
    pub const fn mutates(self) -> bool {
        matches!(self, Self::Write | Self::Delete)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }
}

/// Verified identity claims of the party issuing a request.
///
/// A missing `user_id` means the caller is anonymous. Missing fields are the
/// most restrictive value: no institution matches nothing, membership defaults
/// to false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Option<String>,
    pub institution: Option<String>,
    pub is_consortium_member: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Actor {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn user(user_id: impl Into<String>, institution: Option<&str>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            institution: institution.map(str::to_string),
            is_consortium_member: false,
            scopes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_consortium(mut self, member: bool) -> Self {
        self.is_consortium_member = member;
        self
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Authorization attributes of a single asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    pub owner_id: String,
    pub owner_institution: String,
    pub access_level: AccessLevel,
    #[serde(default)]
    pub authorized_users: Vec<String>,
    #[serde(default)]
    pub authorized_institutions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embargo_until: Option<DateTime<Utc>>,
}

impl AccessControl {
    #[must_use]
    pub fn is_embargoed(&self, now: DateTime<Utc>) -> bool {
        self.embargo_until.is_some_and(|until| now < until)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialCode {
    OwnershipRequired,
    Embargoed,
    InsufficientAccess,
}

/// Structured explanation of a denied permission evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub code: DenialCode,
    pub asset_id: String,
    pub action: Action,
    pub access_level: AccessLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_institution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_institution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embargo_until: Option<DateTime<Utc>>,
}

impl Denial {
    #[must_use]
    pub fn message(&self) -> String {
        match self.code {
            DenialCode::OwnershipRequired => {
                "only the asset owner can modify or delete this asset".to_string()
            }
            DenialCode::Embargoed => match &self.embargo_until {
                Some(until) => format!("asset is under embargo until {}", until.to_rfc3339()),
                None => "asset is under embargo".to_string(),
            },
            DenialCode::InsufficientAccess => match self.access_level {
                AccessLevel::Private => "asset is private, only the owner can access it".to_string(),
                AccessLevel::Group => {
                    "access is restricted to authorized users or institutions".to_string()
                }
                AccessLevel::Institution => match &self.required_institution {
                    Some(inst) => format!("access is restricted to members of institution {inst}"),
                    None => "access is restricted to institution members".to_string(),
                },
                AccessLevel::Consortium => {
                    "access is restricted to consortium members".to_string()
                }
                AccessLevel::ApprovalRequired => {
                    "explicit approval from the asset owner is required".to_string()
                }
                AccessLevel::Public => "authentication is required".to_string(),
            },
        }
    }
}

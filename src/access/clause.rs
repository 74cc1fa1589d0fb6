use serde::Serialize;

use crate::types::{AccessControl, AccessLevel, Actor};

/// One way a read of an asset can be granted.
///
/// The per-asset evaluator and the bulk query predicate are both driven by
/// [`GRANT_CLAUSES`], so the two cannot disagree about who may read what.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    Owner,
    Public,
    GroupUser,
    GroupInstitution,
    ApprovalUser,
    Institution,
    Consortium,
}

pub const GRANT_CLAUSES: [Clause; 7] = [
    Clause::Owner,
    Clause::Public,
    Clause::GroupUser,
    Clause::GroupInstitution,
    Clause::ApprovalUser,
    Clause::Institution,
    Clause::Consortium,
];

const AUTHORIZED_USER_SQL: &str =
    "EXISTS (SELECT 1 FROM json_each(assets.authorized_users) WHERE json_each.value = ?)";
const AUTHORIZED_INSTITUTION_SQL: &str =
    "EXISTS (SELECT 1 FROM json_each(assets.authorized_institutions) WHERE json_each.value = ?)";

impl Clause {
    /// The access level this clause applies to. The owner clause applies at
    /// every level.
    #[must_use]
    pub const fn level(self) -> Option<AccessLevel> {
        match self {
            Self::Owner => None,
            Self::Public => Some(AccessLevel::Public),
            Self::GroupUser | Self::GroupInstitution => Some(AccessLevel::Group),
            Self::ApprovalUser => Some(AccessLevel::ApprovalRequired),
            Self::Institution => Some(AccessLevel::Institution),
            Self::Consortium => Some(AccessLevel::Consortium),
        }
    }

    /// Returns true if the actor carries the claim this clause tests.
    /// Anonymous actors admit no clause.
    #[must_use]
    pub fn admits(self, actor: &Actor) -> bool {
        if !actor.is_authenticated() {
            return false;
        }
        match self {
            Self::Owner | Self::Public | Self::GroupUser | Self::ApprovalUser => true,
            Self::GroupInstitution | Self::Institution => actor.institution.is_some(),
            Self::Consortium => actor.is_consortium_member,
        }
    }

    #[must_use]
    pub fn matches(self, acl: &AccessControl, actor: &Actor) -> bool {
        if !self.admits(actor) {
            return false;
        }
        if self.level().is_some_and(|level| level != acl.access_level) {
            return false;
        }

        let user = actor.user_id.as_deref();
        let institution = actor.institution.as_deref();

        match self {
            Self::Owner => user == Some(acl.owner_id.as_str()),
            Self::Public | Self::Consortium => true,
            Self::GroupUser | Self::ApprovalUser => {
                user.is_some_and(|u| acl.authorized_users.iter().any(|a| a == u))
            }
            Self::GroupInstitution => {
                institution.is_some_and(|i| acl.authorized_institutions.iter().any(|a| a == i))
            }
            Self::Institution => institution == Some(acl.owner_institution.as_str()),
        }
    }

    /// Renders this clause as a condition over the `assets` table, appending
    /// bind values to `params` in placeholder order.
    pub(crate) fn sql(self, actor: &Actor, params: &mut Vec<String>) -> String {
        let user = || actor.user_id.clone().unwrap_or_default();
        let institution = || actor.institution.clone().unwrap_or_default();

        let mut parts: Vec<&'static str> = Vec::with_capacity(2);
        if let Some(level) = self.level() {
            params.push(level.as_str().to_string());
            parts.push("assets.access_level = ?");
        }

        match self {
            Self::Owner => {
                params.push(user());
                parts.push("assets.owner_id = ?");
            }
            Self::Public | Self::Consortium => {}
            Self::GroupUser | Self::ApprovalUser => {
                params.push(user());
                parts.push(AUTHORIZED_USER_SQL);
            }
            Self::GroupInstitution => {
                params.push(institution());
                parts.push(AUTHORIZED_INSTITUTION_SQL);
            }
            Self::Institution => {
                params.push(institution());
                parts.push("assets.owner_institution = ?");
            }
        }

        format!("({})", parts.join(" AND "))
    }
}

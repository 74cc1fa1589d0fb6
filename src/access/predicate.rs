use chrono::{DateTime, Utc};

use super::clause::{Clause, GRANT_CLAUSES};
use crate::store::format_datetime;
use crate::types::{AccessControl, Actor};

/// A parameterized SQL condition over the `assets` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFilter {
    pub sql: String,
    pub params: Vec<String>,
}

/// Read filter for bulk queries, built from the same clause table as
/// [`evaluate`](super::evaluate).
///
/// For every asset `a`, `predicate.matches(a)` equals
/// `evaluate(a, actor, Action::Read, now).is_granted()`, and the SQL form
/// selects exactly the rows `matches` accepts.
#[derive(Debug, Clone)]
pub struct AccessPredicate {
    actor: Actor,
    clauses: Vec<Clause>,
    now: DateTime<Utc>,
}

impl AccessPredicate {
    #[must_use]
    pub fn for_actor(actor: &Actor, now: DateTime<Utc>) -> Self {
        let clauses = GRANT_CLAUSES
            .into_iter()
            .filter(|clause| clause.admits(actor))
            .collect();
        Self {
            actor: actor.clone(),
            clauses,
            now,
        }
    }

    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Returns true if no asset can satisfy this predicate.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    #[must_use]
    pub fn matches(&self, acl: &AccessControl) -> bool {
        if !self.clauses.iter().any(|c| c.matches(acl, &self.actor)) {
            return false;
        }
        !acl.is_embargoed(self.now) || Clause::Owner.matches(acl, &self.actor)
    }

    #[must_use]
    pub fn to_sql(&self) -> SqlFilter {
        if self.is_empty() {
            return SqlFilter {
                sql: "0".to_string(),
                params: Vec::new(),
            };
        }

        let mut params = Vec::new();
        let grants: Vec<String> = self
            .clauses
            .iter()
            .map(|clause| clause.sql(&self.actor, &mut params))
            .collect();

        params.push(format_datetime(&self.now));
        let mut embargo =
            "assets.embargo_until IS NULL OR assets.embargo_until <= ?".to_string();
        if self.clauses.contains(&Clause::Owner) {
            embargo.push_str(" OR ");
            embargo.push_str(&Clause::Owner.sql(&self.actor, &mut params));
        }

        SqlFilter {
            sql: format!("(({}) AND ({embargo}))", grants.join(" OR ")),
            params,
        }
    }
}

use chrono::{DateTime, Utc};

use super::clause::{Clause, GRANT_CLAUSES};
use crate::error::{Error, Result};
use crate::types::{AccessControl, AccessLevel, Action, Actor, Denial, DenialCode};

/// Outcome of a permission evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Granted(Clause),
    Denied(Denial),
}

impl Decision {
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }

    /// Converts a denial into [`Error::Forbidden`].
    pub fn into_result(self) -> Result<Clause> {
        match self {
            Self::Granted(clause) => Ok(clause),
            Self::Denied(denial) => Err(Error::Forbidden(denial)),
        }
    }
}

/// Decides whether `actor` may perform `action` on the asset described by
/// `acl`.
///
/// The owner is always granted. Every other actor is refused write and
/// delete, refused reads while an embargo is running, and otherwise granted
/// only if a clause for the asset's access level matches.
#[must_use]
pub fn evaluate(
    asset_id: &str,
    acl: &AccessControl,
    actor: &Actor,
    action: Action,
    now: DateTime<Utc>,
) -> Decision {
    if Clause::Owner.matches(acl, actor) {
        return Decision::Granted(Clause::Owner);
    }

    let deny = |code: DenialCode| {
        Decision::Denied(Denial {
            code,
            asset_id: asset_id.to_string(),
            action,
            access_level: acl.access_level,
            user_institution: actor.institution.clone(),
            required_institution: (code == DenialCode::InsufficientAccess
                && acl.access_level == AccessLevel::Institution)
                .then(|| acl.owner_institution.clone()),
            embargo_until: (code == DenialCode::Embargoed)
                .then_some(acl.embargo_until)
                .flatten(),
        })
    };

    if action.mutates() {
        return deny(DenialCode::OwnershipRequired);
    }

    if acl.is_embargoed(now) {
        return deny(DenialCode::Embargoed);
    }

    GRANT_CLAUSES
        .into_iter()
        .filter(|clause| clause.level() == Some(acl.access_level))
        .find(|clause| clause.matches(acl, actor))
        .map_or_else(|| deny(DenialCode::InsufficientAccess), Decision::Granted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn acl(level: AccessLevel) -> AccessControl {
        AccessControl {
            owner_id: "alice".to_string(),
            owner_institution: "X".to_string(),
            access_level: level,
            authorized_users: Vec::new(),
            authorized_institutions: Vec::new(),
            embargo_until: None,
        }
    }

    fn read(acl: &AccessControl, actor: &Actor) -> Decision {
        evaluate("asset-1", acl, actor, Action::Read, Utc::now())
    }

    fn denial(decision: Decision) -> Denial {
        match decision {
            Decision::Denied(denial) => denial,
            Decision::Granted(clause) => panic!("expected denial, granted by {clause:?}"),
        }
    }

    #[test]
    fn test_owner_passes_every_action() {
        let owner = Actor::user("alice", None);
        let mut acl = acl(AccessLevel::Private);
        acl.embargo_until = Some(Utc::now() + Duration::days(30));

        for action in [Action::Read, Action::Write, Action::Delete] {
            let decision = evaluate("asset-1", &acl, &owner, action, Utc::now());
            assert_eq!(decision, Decision::Granted(Clause::Owner));
        }
    }

    #[test]
    fn test_private_denies_non_owner() {
        let acl = acl(AccessLevel::Private);
        let bob = Actor::user("bob", Some("X")).with_consortium(true);
        let denial = denial(read(&acl, &bob));
        assert_eq!(denial.code, DenialCode::InsufficientAccess);
        assert_eq!(denial.access_level, AccessLevel::Private);
    }

    #[test]
    fn test_mutation_requires_ownership_even_when_public() {
        let acl = acl(AccessLevel::Public);
        let bob = Actor::user("bob", Some("X"));
        for action in [Action::Write, Action::Delete] {
            let denial = denial(evaluate("asset-1", &acl, &bob, action, Utc::now()));
            assert_eq!(denial.code, DenialCode::OwnershipRequired);
            assert_eq!(denial.action, action);
        }
    }

    #[test]
    fn test_institution_scenario() {
        let acl = acl(AccessLevel::Institution);

        let bob = Actor::user("bob", Some("X"));
        assert_eq!(read(&acl, &bob), Decision::Granted(Clause::Institution));

        let carol = Actor::user("carol", Some("Y"));
        let denial = denial(read(&acl, &carol));
        assert_eq!(denial.code, DenialCode::InsufficientAccess);
        assert_eq!(denial.required_institution.as_deref(), Some("X"));
        assert_eq!(denial.user_institution.as_deref(), Some("Y"));
        assert_eq!(denial.asset_id, "asset-1");
    }

    #[test]
    fn test_group_scenario() {
        let mut acl = acl(AccessLevel::Group);
        acl.authorized_users = vec!["u1".to_string()];

        assert_eq!(
            read(&acl, &Actor::user("u1", None)),
            Decision::Granted(Clause::GroupUser)
        );
        assert!(!read(&acl, &Actor::user("u2", None)).is_granted());

        acl.authorized_institutions = vec!["Z".to_string()];
        assert_eq!(
            read(&acl, &Actor::user("u2", Some("Z"))),
            Decision::Granted(Clause::GroupInstitution)
        );
    }

    #[test]
    fn test_approval_required_ignores_institutions() {
        let mut acl = acl(AccessLevel::ApprovalRequired);
        acl.authorized_institutions = vec!["Z".to_string()];
        assert!(!read(&acl, &Actor::user("u2", Some("Z"))).is_granted());

        acl.authorized_users = vec!["u2".to_string()];
        assert_eq!(
            read(&acl, &Actor::user("u2", Some("Z"))),
            Decision::Granted(Clause::ApprovalUser)
        );
    }

    #[test]
    fn test_consortium_requires_membership() {
        let acl = acl(AccessLevel::Consortium);
        assert!(!read(&acl, &Actor::user("bob", Some("Y"))).is_granted());
        assert!(read(&acl, &Actor::user("bob", Some("Y")).with_consortium(true)).is_granted());
    }

    #[test]
    fn test_public_requires_authentication() {
        let acl = acl(AccessLevel::Public);
        assert!(read(&acl, &Actor::user("bob", None)).is_granted());
        assert!(!read(&acl, &Actor::anonymous()).is_granted());
    }

    #[test]
    fn test_embargo_lifts_after_deadline() {
        let now = Utc::now();
        let mut acl = acl(AccessLevel::Public);
        acl.embargo_until = Some(now + Duration::days(1));

        let bob = Actor::user("bob", None);
        let denial = denial(evaluate("asset-1", &acl, &bob, Action::Read, now));
        assert_eq!(denial.code, DenialCode::Embargoed);
        assert_eq!(denial.embargo_until, acl.embargo_until);

        let owner = Actor::user("alice", None);
        assert!(evaluate("asset-1", &acl, &owner, Action::Read, now).is_granted());

        let later = now + Duration::days(1) + Duration::seconds(1);
        assert!(evaluate("asset-1", &acl, &bob, Action::Read, later).is_granted());
    }

    #[test]
    fn test_into_result_carries_denial() {
        let acl = acl(AccessLevel::Private);
        let err = read(&acl, &Actor::user("bob", None)).into_result().unwrap_err();
        match err {
            Error::Forbidden(denial) => assert_eq!(denial.code, DenialCode::InsufficientAccess),
            other => panic!("unexpected error: {other}"),
        }
    }
}

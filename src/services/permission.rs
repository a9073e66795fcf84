//! Role-based permission evaluation.
//!
//! Roles form a total order from `Super Admin` (rank 0) down to
//! `Service Manager` (rank 3). Every privilege check in the API funnels
//! through [`has_permission`], so the ordering lives in exactly one place.
//! Per-operation thresholds are chosen at the call sites and are not
//! uniform across entity types; that table is part of the external
//! contract and must not be "cleaned up".

use crate::error::{AppError, Result};
use crate::models::user::UserRole;

/// Position of a role in the privilege order. Lower is more privileged.
pub fn rank(role: UserRole) -> u8 {
    match role {
        UserRole::SuperAdmin => 0,
        UserRole::Admin2L => 1,
        UserRole::Admin1L => 2,
        UserRole::ServiceManager => 3,
    }
}

/// True when `actor` meets or exceeds the `required` privilege level.
pub fn has_permission(actor: UserRole, required: UserRole) -> bool {
    rank(actor) <= rank(required)
}

/// Parse a role string, falling back to the lowest privilege.
///
/// Unknown spellings must never grant anything beyond what every
/// authenticated user already has, so they collapse to `Service Manager`.
pub fn parse_role(value: &str) -> UserRole {
    match value {
        "Super Admin" => UserRole::SuperAdmin,
        "Admin 2L" => UserRole::Admin2L,
        "Admin 1L" => UserRole::Admin1L,
        "Service Manager" => UserRole::ServiceManager,
        _ => UserRole::ServiceManager,
    }
}

/// Check a threshold and produce the API-level rejection on failure.
pub fn require(actor: UserRole, required: UserRole) -> Result<()> {
    if has_permission(actor, required) {
        Ok(())
    } else {
        Err(AppError::Authorization("Insufficient permissions".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // rank ordering
    // -----------------------------------------------------------------------

    #[test]
    fn test_rank_total_order() {
        assert_eq!(rank(UserRole::SuperAdmin), 0);
        assert_eq!(rank(UserRole::Admin2L), 1);
        assert_eq!(rank(UserRole::Admin1L), 2);
        assert_eq!(rank(UserRole::ServiceManager), 3);
    }

    // -----------------------------------------------------------------------
    // has_permission
    // -----------------------------------------------------------------------

    #[test]
    fn test_has_permission_full_matrix() {
        let roles = [
            UserRole::SuperAdmin,
            UserRole::Admin2L,
            UserRole::Admin1L,
            UserRole::ServiceManager,
        ];
        for actor in roles {
            for required in roles {
                assert_eq!(
                    has_permission(actor, required),
                    rank(actor) <= rank(required),
                    "actor {:?} vs required {:?}",
                    actor,
                    required
                );
            }
        }
    }

    #[test]
    fn test_has_permission_super_admin_passes_everything() {
        assert!(has_permission(UserRole::SuperAdmin, UserRole::SuperAdmin));
        assert!(has_permission(UserRole::SuperAdmin, UserRole::Admin2L));
        assert!(has_permission(UserRole::SuperAdmin, UserRole::ServiceManager));
    }

    #[test]
    fn test_has_permission_service_manager_only_trivial() {
        assert!(!has_permission(UserRole::ServiceManager, UserRole::Admin1L));
        assert!(!has_permission(UserRole::ServiceManager, UserRole::Admin2L));
        assert!(!has_permission(UserRole::ServiceManager, UserRole::SuperAdmin));
        assert!(has_permission(
            UserRole::ServiceManager,
            UserRole::ServiceManager
        ));
    }

    #[test]
    fn test_has_permission_admin_1l_below_admin_2l() {
        assert!(!has_permission(UserRole::Admin1L, UserRole::Admin2L));
        assert!(has_permission(UserRole::Admin2L, UserRole::Admin1L));
    }

    // -----------------------------------------------------------------------
    // parse_role fail-closed behavior
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_role_known_spellings() {
        assert_eq!(parse_role("Super Admin"), UserRole::SuperAdmin);
        assert_eq!(parse_role("Admin 2L"), UserRole::Admin2L);
        assert_eq!(parse_role("Admin 1L"), UserRole::Admin1L);
        assert_eq!(parse_role("Service Manager"), UserRole::ServiceManager);
    }

    #[test]
    fn test_parse_role_unknown_falls_to_lowest() {
        for bogus in ["admin", "SUPERADMIN", "Admin 3L", "", "root"] {
            let role = parse_role(bogus);
            assert_eq!(role, UserRole::ServiceManager);
            assert!(!has_permission(role, UserRole::Admin1L));
        }
    }

    // -----------------------------------------------------------------------
    // require
    // -----------------------------------------------------------------------

    #[test]
    fn test_require_rejects_with_authorization_error() {
        let err = require(UserRole::ServiceManager, UserRole::Admin2L).unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
        assert!(require(UserRole::Admin2L, UserRole::Admin2L).is_ok());
    }
}

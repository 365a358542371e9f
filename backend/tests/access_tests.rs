//! Role-based access control tests
//!
//! - the permission catalogue and the seed migration agree
//! - default roles grant what their jobs need and nothing more
//! - handler permission guards

use std::collections::HashSet;

use lims_backend::error::AppError;
use lims_backend::middleware::AuthUser;
use proptest::prelude::*;
use shared::{all_permissions, default_roles, ADMIN_ROLE, SYSTEM_ROLE_NAMES};
use uuid::Uuid;

const SEED_SQL: &str = include_str!("../migrations/20240101000002_seed_permissions.sql");

/// `resource:action` pairs inserted by the seed migration
fn seeded_permissions() -> HashSet<String> {
    SEED_SQL
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("('"))
        .filter_map(|line| {
            let mut quoted = line.split('\'').skip(1).step_by(2);
            let resource = quoted.next()?;
            let action = quoted.next()?;
            Some(format!("{}:{}", resource, action))
        })
        .collect()
}

fn role(name: &str) -> HashSet<String> {
    default_roles()
        .into_iter()
        .find(|(n, _)| *n == name)
        .map(|(_, perms)| perms.into_iter().collect())
        .unwrap_or_else(|| panic!("no default role {}", name))
}

fn user_with(permissions: &[String]) -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        lab_id: Uuid::new_v4(),
        role_id: Uuid::new_v4(),
        role: "custom".to_string(),
        permissions: permissions.to_vec(),
    }
}

fn permission_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(all_permissions())
}

proptest! {
    /// A user is allowed exactly the permissions of their role
    #[test]
    fn prop_require_matches_grants(
        granted in prop::collection::vec(permission_strategy(), 0..10),
        wanted in permission_strategy(),
    ) {
        let user = user_with(&granted);
        let (resource, action) = wanted.split_once(':').unwrap();
        prop_assert_eq!(user.require(resource, action).is_ok(), granted.contains(&wanted));
    }
}

#[cfg(test)]
mod catalogue_tests {
    use super::*;

    #[test]
    fn test_seed_matches_catalogue() {
        let catalogue: HashSet<String> = all_permissions().into_iter().collect();
        let seeded = seeded_permissions();
        let missing: Vec<_> = catalogue.difference(&seeded).collect();
        let extra: Vec<_> = seeded.difference(&catalogue).collect();
        assert!(missing.is_empty(), "not seeded: {:?}", missing);
        assert!(extra.is_empty(), "seeded but unknown: {:?}", extra);
    }

    #[test]
    fn test_every_system_role_has_defaults() {
        let names: Vec<&str> = default_roles().iter().map(|(n, _)| *n).collect();
        for name in SYSTEM_ROLE_NAMES {
            assert!(names.contains(name), "missing default role {}", name);
        }
    }
}

#[cfg(test)]
mod default_role_tests {
    use super::*;

    #[test]
    fn test_admin_has_everything() {
        let admin = role(ADMIN_ROLE);
        for p in all_permissions() {
            assert!(admin.contains(&p), "admin lacks {}", p);
        }
    }

    #[test]
    fn test_manager_cannot_manage_roles_or_integrations() {
        let manager = role("manager");
        assert!(!manager.iter().any(|p| p.starts_with("role:")));
        assert!(!manager.iter().any(|p| p.starts_with("integration:")));
        assert!(!manager.contains("user:delete"));
        assert!(manager.contains("report:approve"));
    }

    #[test]
    fn test_analyst_enters_results_but_cannot_approve() {
        let analyst = role("analyst");
        assert!(analyst.contains("test_result:edit"));
        assert!(analyst.contains("report:create"));
        assert!(!analyst.contains("report:approve"));
        assert!(!analyst.iter().any(|p| p.starts_with("invoice:")));
    }

    #[test]
    fn test_accountant_can_convert_quotations() {
        let accountant = role("accountant");
        assert!(accountant.contains("quotation:approve"));
        assert!(accountant.contains("contract:create"));
        assert!(accountant.contains("invoice:approve"));
        assert!(!accountant.iter().any(|p| p.starts_with("test_result:")));
    }

    #[test]
    fn test_viewer_is_read_only() {
        let viewer = role("viewer");
        assert!(!viewer.is_empty());
        assert!(viewer.iter().all(|p| p.ends_with(":view")));
    }
}

#[cfg(test)]
mod guard_tests {
    use super::*;

    #[test]
    fn test_missing_permission_is_forbidden() {
        let user = user_with(&["sample:view".to_string()]);
        assert!(user.require("sample", "view").is_ok());
        let err = user.require("sample", "delete").unwrap_err();
        assert!(matches!(err, AppError::InsufficientPermissions));
    }

    #[test]
    fn test_any_permission() {
        let user = user_with(&["invoice:export".to_string()]);
        assert!(user.has_any_permission(&[("invoice", "view"), ("invoice", "export")]));
        assert!(!user.has_any_permission(&[("report", "export")]));
    }
}

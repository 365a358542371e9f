//! Access control models: resources, actions and default lab roles
//!
//! Permissions are strings of the form `resource:action`. The catalogue
//! below must match the rows seeded into the `permissions` table.

use serde::{Deserialize, Serialize};

/// Resources that can be accessed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Lab,
    User,
    Role,
    Customer,
    SampleType,
    Sample,
    TestResult,
    Report,
    ReportTemplate,
    Quotation,
    Contract,
    Invoice,
    AuditLog,
    PortalUser,
    Numbering,
    Integration,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Lab => "lab",
            Resource::User => "user",
            Resource::Role => "role",
            Resource::Customer => "customer",
            Resource::SampleType => "sample_type",
            Resource::Sample => "sample",
            Resource::TestResult => "test_result",
            Resource::Report => "report",
            Resource::ReportTemplate => "report_template",
            Resource::Quotation => "quotation",
            Resource::Contract => "contract",
            Resource::Invoice => "invoice",
            Resource::AuditLog => "audit_log",
            Resource::PortalUser => "portal_user",
            Resource::Numbering => "numbering",
            Resource::Integration => "integration",
        }
    }
}

/// Actions that can be performed on resources
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Approve,
    Export,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Approve => "approve",
            Action::Export => "export",
        }
    }
}

/// Build the permission string for a resource/action pair
pub fn permission(resource: Resource, action: Action) -> String {
    format!("{}:{}", resource.as_str(), action.as_str())
}

use Action::*;

const CRUD: &[Action] = &[View, Create, Edit, Delete];

/// Actions available per resource
pub const PERMISSION_CATALOGUE: &[(Resource, &[Action])] = &[
    (Resource::Lab, &[View, Edit]),
    (Resource::User, CRUD),
    (Resource::Role, CRUD),
    (Resource::Customer, &[View, Create, Edit, Delete, Export]),
    (Resource::SampleType, &[View, Create, Edit, Delete, Export]),
    (Resource::Sample, CRUD),
    (Resource::TestResult, &[View, Create, Edit, Delete, Approve]),
    (Resource::Report, &[View, Create, Edit, Delete, Approve, Export]),
    (Resource::ReportTemplate, CRUD),
    (Resource::Quotation, &[View, Create, Edit, Delete, Approve]),
    (Resource::Contract, CRUD),
    (Resource::Invoice, &[View, Create, Edit, Delete, Approve, Export]),
    (Resource::AuditLog, &[View, Export]),
    (Resource::PortalUser, CRUD),
    (Resource::Numbering, &[View, Edit]),
    (Resource::Integration, &[View, Edit]),
];

/// Every permission string in the catalogue
pub fn all_permissions() -> Vec<String> {
    PERMISSION_CATALOGUE
        .iter()
        .flat_map(|(resource, actions)| actions.iter().map(|a| permission(*resource, *a)))
        .collect()
}

/// Names of roles created with every lab
pub const SYSTEM_ROLE_NAMES: &[&str] = &["admin", "manager", "analyst", "accountant", "viewer"];

/// Role granted to the user who registers a lab
pub const ADMIN_ROLE: &str = "admin";

fn expand(grants: &[(Resource, &[Action])]) -> Vec<String> {
    grants
        .iter()
        .flat_map(|(r, actions)| actions.iter().map(|a| permission(*r, *a)))
        .collect()
}

/// Default roles created for new labs, with their permission strings
pub fn default_roles() -> Vec<(&'static str, Vec<String>)> {
    let all = all_permissions();

    let manager: Vec<String> = all
        .iter()
        .filter(|p| {
            !p.starts_with("role:")
                && p.as_str() != "user:delete"
                && !p.starts_with("integration:")
        })
        .cloned()
        .collect();

    let analyst = [
        (Resource::Customer, &[View][..]),
        (Resource::SampleType, &[View][..]),
        (Resource::Sample, &[View, Create, Edit][..]),
        (Resource::TestResult, &[View, Create, Edit, Delete][..]),
        (Resource::Report, &[View, Create, Edit][..]),
        (Resource::ReportTemplate, &[View][..]),
    ];

    let accountant = [
        (Resource::Customer, &[View, Create, Edit, Export][..]),
        (Resource::SampleType, &[View][..]),
        (Resource::Sample, &[View][..]),
        (Resource::Quotation, &[View, Create, Edit, Delete, Approve][..]),
        (Resource::Contract, CRUD),
        (Resource::Invoice, &[View, Create, Edit, Delete, Approve, Export][..]),
    ];

    let viewer: Vec<String> = all.iter().filter(|p| p.ends_with(":view")).cloned().collect();

    vec![
        ("admin", all),
        ("manager", manager),
        ("analyst", expand(&analyst)),
        ("accountant", expand(&accountant)),
        ("viewer", viewer),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_permission_strings() {
        assert_eq!(permission(Resource::SampleType, Action::Export), "sample_type:export");
        assert_eq!(permission(Resource::Report, Action::Approve), "report:approve");
    }

    #[test]
    fn test_catalogue_has_no_duplicates() {
        let all = all_permissions();
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), unique.len());
    }

    #[test]
    fn test_default_roles_within_catalogue() {
        let all: HashSet<String> = all_permissions().into_iter().collect();
        for (name, perms) in default_roles() {
            assert!(SYSTEM_ROLE_NAMES.contains(&name));
            for p in perms {
                assert!(all.contains(&p), "{} grants unknown permission {}", name, p);
            }
        }
    }

    #[test]
    fn test_viewer_is_read_only() {
        let roles = default_roles();
        let (_, viewer) = roles.iter().find(|(n, _)| *n == "viewer").unwrap();
        assert!(!viewer.is_empty());
        assert!(viewer.iter().all(|p| p.ends_with(":view")));
    }

    #[test]
    fn test_manager_cannot_manage_roles() {
        let roles = default_roles();
        let (_, manager) = roles.iter().find(|(n, _)| *n == "manager").unwrap();
        assert!(!manager.iter().any(|p| p.starts_with("role:")));
        assert!(manager.contains(&"report:approve".to_string()));
    }

    #[test]
    fn test_analyst_cannot_approve_reports() {
        let roles = default_roles();
        let (_, analyst) = roles.iter().find(|(n, _)| *n == "analyst").unwrap();
        assert!(!analyst.contains(&"report:approve".to_string()));
        assert!(analyst.contains(&"test_result:create".to_string()));
    }
}

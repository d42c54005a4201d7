//! Privilege model consulted by authorization checks.

use std::fmt;

use docket_core::namespace::NamespaceString;
use docket_core::Principal;

/// An action a principal may be granted on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Find,
    Insert,
    Update,
    Remove,
    ListCollections,
    ServerStatus,
    ConfigureFailPoint,
    Internal,
}

/// What a privilege applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourcePattern {
    Cluster,
    Database(String),
    ExactNamespace(NamespaceString),
    /// Every database and non-system collection.
    AnyNormalResource,
    AnyResource,
}

impl ResourcePattern {
    /// Whether a grant on `self` covers the `target` resource.
    #[must_use]
    pub fn matches(&self, target: &ResourcePattern) -> bool {
        match (self, target) {
            (Self::AnyResource, _) => true,
            (Self::AnyNormalResource, Self::Database(_)) => true,
            (Self::AnyNormalResource, Self::ExactNamespace(ns)) => !ns.is_system(),
            (Self::Database(db), Self::Database(target_db)) => db == target_db,
            (Self::Database(db), Self::ExactNamespace(ns)) => db == ns.db() && !ns.is_system(),
            (granted, target) => granted == target,
        }
    }
}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => f.write_str("cluster"),
            Self::Database(db) => write!(f, "db {db}"),
            Self::ExactNamespace(ns) => write!(f, "ns {ns}"),
            Self::AnyNormalResource => f.write_str("any normal resource"),
            Self::AnyResource => f.write_str("any resource"),
        }
    }
}

/// Resource pattern for a `db` or `db.coll` string.
#[must_use]
pub fn resource_pattern_for_namespace(ns: &str) -> ResourcePattern {
    let parsed = NamespaceString::parse(ns);
    if parsed.has_collection() {
        ResourcePattern::ExactNamespace(parsed)
    } else {
        ResourcePattern::Database(parsed.db().to_string())
    }
}

/// A set of actions on one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Privilege {
    pub resource: ResourcePattern,
    pub actions: Vec<ActionType>,
}

impl Privilege {
    #[must_use]
    pub fn new(resource: ResourcePattern, actions: &[ActionType]) -> Self {
        Self {
            resource,
            actions: actions.to_vec(),
        }
    }
}

/// Per-client authorization state.
pub trait AuthorizationSession: Send + Sync + fmt::Debug {
    /// Whether access control is enforced at all.
    fn is_auth_enabled(&self) -> bool;

    /// Whether the client has authenticated as some principal.
    fn is_authenticated(&self) -> bool;

    /// Whether every action of every privilege is granted.
    fn is_authorized_for_privileges(&self, privileges: &[Privilege]) -> bool;

    fn is_authorized_for_actions_on_resource(
        &self,
        resource: &ResourcePattern,
        actions: &[ActionType],
    ) -> bool {
        self.is_authorized_for_privileges(&[Privilege::new(resource.clone(), actions)])
    }
}

/// Access control turned off: everything is permitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationDisabled;

impl AuthorizationSession for AuthorizationDisabled {
    fn is_auth_enabled(&self) -> bool {
        false
    }

    fn is_authenticated(&self) -> bool {
        false
    }

    fn is_authorized_for_privileges(&self, _privileges: &[Privilege]) -> bool {
        true
    }
}

/// Access control enforced from the roles of an (optional) principal.
///
/// Roles are either cluster-wide built-ins (`root`, `readAnyDatabase`,
/// `readWriteAnyDatabase`, `clusterMonitor`) or database-scoped as
/// `read@<db>` / `readWrite@<db>`. Unknown roles grant nothing.
#[derive(Debug, Clone, Default)]
pub struct PrincipalAuthorization {
    principal: Option<Principal>,
    grants: Vec<Privilege>,
}

const READ_ACTIONS: &[ActionType] = &[ActionType::Find, ActionType::ListCollections];
const READ_WRITE_ACTIONS: &[ActionType] = &[
    ActionType::Find,
    ActionType::ListCollections,
    ActionType::Insert,
    ActionType::Update,
    ActionType::Remove,
];
const ALL_ACTIONS: &[ActionType] = &[
    ActionType::Find,
    ActionType::Insert,
    ActionType::Update,
    ActionType::Remove,
    ActionType::ListCollections,
    ActionType::ServerStatus,
    ActionType::ConfigureFailPoint,
    ActionType::Internal,
];

impl PrincipalAuthorization {
    #[must_use]
    pub fn new(principal: Option<Principal>) -> Self {
        let grants = principal
            .as_ref()
            .map(|p| p.roles.iter().flat_map(|r| grants_for_role(r)).collect())
            .unwrap_or_default();
        Self { principal, grants }
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }
}

fn grants_for_role(role: &str) -> Vec<Privilege> {
    if let Some((name, db)) = role.split_once('@') {
        let resource = ResourcePattern::Database(db.to_string());
        return match name {
            "read" => vec![Privilege::new(resource, READ_ACTIONS)],
            "readWrite" => vec![Privilege::new(resource, READ_WRITE_ACTIONS)],
            _ => Vec::new(),
        };
    }
    match role {
        "root" => vec![Privilege::new(ResourcePattern::AnyResource, ALL_ACTIONS)],
        "readAnyDatabase" => vec![Privilege::new(ResourcePattern::AnyNormalResource, READ_ACTIONS)],
        "readWriteAnyDatabase" => vec![Privilege::new(
            ResourcePattern::AnyNormalResource,
            READ_WRITE_ACTIONS,
        )],
        "clusterMonitor" => vec![Privilege::new(
            ResourcePattern::Cluster,
            &[ActionType::ServerStatus],
        )],
        _ => Vec::new(),
    }
}

impl AuthorizationSession for PrincipalAuthorization {
    fn is_auth_enabled(&self) -> bool {
        true
    }

    fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    fn is_authorized_for_privileges(&self, privileges: &[Privilege]) -> bool {
        privileges.iter().all(|required| {
            required.actions.iter().all(|action| {
                self.grants
                    .iter()
                    .any(|g| g.resource.matches(&required.resource) && g.actions.contains(action))
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

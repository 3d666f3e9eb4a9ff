use std::{
    collections::{HashMap, HashSet},
    fmt,
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AccessControlError;

/// Organization ID used for checks that must hold regardless of org membership.
pub const GLOBAL_ORG_ID: i64 = 0;

pub const FIXED_ROLE_PREFIX: &str = "fixed:";
pub const MANAGED_ROLE_PREFIX: &str = "managed:";

/// Granted scopes keyed by action, the form evaluators run against.
pub type ScopesByAction = HashMap<String, HashSet<String>>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub action: String,
    pub scope: String,
}

impl Permission {
    pub fn new(action: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            scope: scope.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDto {
    pub version: i64,
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub group: String,
    pub org_id: i64,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub hidden: bool,
}

impl RoleDto {
    pub fn fixed(name: impl Into<String>, version: i64, permissions: Vec<Permission>) -> Self {
        let name = name.into();
        Self {
            version,
            uid: name.replace([':', '.'], "_"),
            name,
            display_name: String::new(),
            description: String::new(),
            group: String::new(),
            org_id: GLOBAL_ORG_ID,
            permissions,
            hidden: false,
        }
    }

    pub fn with_display(
        mut self,
        display_name: impl Into<String>,
        group: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.display_name = display_name.into();
        self.group = group.into();
        self.description = description.into();
        self
    }

    pub fn is_fixed(&self) -> bool {
        self.name.starts_with(FIXED_ROLE_PREFIX)
    }

    pub fn is_managed(&self) -> bool {
        self.name.starts_with(MANAGED_ROLE_PREFIX)
    }
}

/// A fixed role together with the built-in roles it is granted to by default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRegistration {
    pub role: RoleDto,
    pub grants: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrgRole {
    Viewer,
    Editor,
    Admin,
}

impl OrgRole {
    pub fn as_str(self) -> &'static str {
        match self {
            OrgRole::Viewer => "Viewer",
            OrgRole::Editor => "Editor",
            OrgRole::Admin => "Admin",
        }
    }

    /// True when this role carries at least the privileges of `other`.
    pub fn includes(self, other: OrgRole) -> bool {
        self >= other
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgRole {
    type Err = AccessControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Viewer" => Ok(OrgRole::Viewer),
            "Editor" => Ok(OrgRole::Editor),
            "Admin" => Ok(OrgRole::Admin),
            other => Err(AccessControlError::InvalidBuiltInRole(other.to_string())),
        }
    }
}

/// Coarse role a fixed role or a managed grant can be bound to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuiltInRole {
    Viewer,
    Editor,
    Admin,
    #[serde(rename = "Grafana Admin")]
    GrafanaAdmin,
}

impl BuiltInRole {
    pub const ALL: [BuiltInRole; 4] = [
        BuiltInRole::Viewer,
        BuiltInRole::Editor,
        BuiltInRole::Admin,
        BuiltInRole::GrafanaAdmin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuiltInRole::Viewer => "Viewer",
            BuiltInRole::Editor => "Editor",
            BuiltInRole::Admin => "Admin",
            BuiltInRole::GrafanaAdmin => "Grafana Admin",
        }
    }

    pub fn org_role(self) -> Option<OrgRole> {
        match self {
            BuiltInRole::Viewer => Some(OrgRole::Viewer),
            BuiltInRole::Editor => Some(OrgRole::Editor),
            BuiltInRole::Admin => Some(OrgRole::Admin),
            BuiltInRole::GrafanaAdmin => None,
        }
    }
}

impl From<OrgRole> for BuiltInRole {
    fn from(role: OrgRole) -> Self {
        match role {
            OrgRole::Viewer => BuiltInRole::Viewer,
            OrgRole::Editor => BuiltInRole::Editor,
            OrgRole::Admin => BuiltInRole::Admin,
        }
    }
}

impl fmt::Display for BuiltInRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuiltInRole {
    type Err = AccessControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuiltInRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| AccessControlError::InvalidBuiltInRole(s.to_string()))
    }
}

/// The signed-in actor a decision is made for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub login: String,
    pub org_id: i64,
    pub org_name: String,
    pub org_role: Option<OrgRole>,
    pub team_ids: Vec<i64>,
    pub is_grafana_admin: bool,
}

impl Principal {
    pub fn new(user_id: i64, org_id: i64, org_role: OrgRole) -> Self {
        Self {
            user_id,
            org_id,
            org_role: Some(org_role),
            ..Self::default()
        }
    }

    pub fn with_teams(mut self, team_ids: impl IntoIterator<Item = i64>) -> Self {
        self.team_ids = team_ids.into_iter().collect();
        self
    }

    pub fn with_grafana_admin(mut self, is_admin: bool) -> Self {
        self.is_grafana_admin = is_admin;
        self
    }

    pub fn has_role(&self, role: OrgRole) -> bool {
        self.org_role.is_some_and(|own| own.includes(role))
    }

    /// Built-in roles held by the principal, lower org roles included.
    pub fn built_in_roles(&self) -> Vec<BuiltInRole> {
        let mut roles = Vec::new();
        if let Some(org_role) = self.org_role {
            for role in [OrgRole::Viewer, OrgRole::Editor, OrgRole::Admin] {
                if org_role.includes(role) {
                    roles.push(BuiltInRole::from(role));
                }
            }
        }
        if self.is_grafana_admin {
            roles.push(BuiltInRole::GrafanaAdmin);
        }
        roles
    }

    /// Copy stripped of organization context, used by global checks.
    pub fn globalized(&self) -> Self {
        Self {
            org_id: GLOBAL_ORG_ID,
            org_role: None,
            org_name: String::new(),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum Grantee {
    User(i64),
    Team(i64),
    BuiltInRole(BuiltInRole),
}

impl Grantee {
    pub fn kind(&self) -> &'static str {
        match self {
            Grantee::User(_) => "users",
            Grantee::Team(_) => "teams",
            Grantee::BuiltInRole(_) => "builtins",
        }
    }

    /// Name of the managed role holding this grantee's resource grants.
    pub fn managed_role_name(&self) -> String {
        match self {
            Grantee::User(id) => format!("{MANAGED_ROLE_PREFIX}users:{id}:permissions"),
            Grantee::Team(id) => format!("{MANAGED_ROLE_PREFIX}teams:{id}:permissions"),
            Grantee::BuiltInRole(role) => format!(
                "{MANAGED_ROLE_PREFIX}builtins:{}:permissions",
                role.as_str().to_lowercase().replace(' ', "_")
            ),
        }
    }
}

impl fmt::Display for Grantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grantee::User(id) => write!(f, "user:{id}"),
            Grantee::Team(id) => write!(f, "team:{id}"),
            Grantee::BuiltInRole(role) => write!(f, "builtin:{role}"),
        }
    }
}

/// One override grant of a set of actions on a single resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePermission {
    pub id: i64,
    pub org_id: i64,
    pub resource_id: String,
    pub role_name: String,
    pub actions: Vec<String>,
    pub scope: String,
    pub grantee: Grantee,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl ResourcePermission {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetResourcePermissionCommand {
    pub actions: Vec<String>,
    pub resource: String,
    pub resource_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetResourcesPermissionsQuery {
    /// Only report these actions; empty means all.
    pub actions: Vec<String>,
    pub resource: String,
    pub resource_ids: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetUserPermissionsQuery {
    pub org_id: i64,
    pub user_id: i64,
    pub roles: Vec<BuiltInRole>,
    pub team_ids: Vec<i64>,
}

impl From<&Principal> for GetUserPermissionsQuery {
    fn from(principal: &Principal) -> Self {
        Self {
            org_id: principal.org_id,
            user_id: principal.user_id,
            roles: principal.built_in_roles(),
            team_ids: principal.team_ids.clone(),
        }
    }
}

/// Marks every granted action as present, regardless of scope.
pub fn build_permissions_map(permissions: &[Permission]) -> HashMap<String, bool> {
    permissions
        .iter()
        .map(|p| (p.action.clone(), true))
        .collect()
}

pub fn group_scopes_by_action(permissions: &[Permission]) -> ScopesByAction {
    let mut grouped = ScopesByAction::new();
    for p in permissions {
        grouped
            .entry(p.action.clone())
            .or_default()
            .insert(p.scope.clone());
    }
    grouped
}

//! Actions, default fixed roles and resource permission levels shipped with the server.

use std::collections::BTreeMap;

use crate::{
    models::{BuiltInRole, Permission, RoleDto, RoleRegistration},
    resource::{Assignments, ResourceOptions},
    scope::resource_any_scope,
};

pub const ACTION_DASHBOARDS_READ: &str = "dashboards:read";
pub const ACTION_DASHBOARDS_WRITE: &str = "dashboards:write";
pub const ACTION_DASHBOARDS_CREATE: &str = "dashboards:create";
pub const ACTION_DASHBOARDS_DELETE: &str = "dashboards:delete";
pub const ACTION_DASHBOARDS_PERMISSIONS_READ: &str = "dashboards.permissions:read";
pub const ACTION_DASHBOARDS_PERMISSIONS_WRITE: &str = "dashboards.permissions:write";

pub const ACTION_FOLDERS_READ: &str = "folders:read";
pub const ACTION_FOLDERS_WRITE: &str = "folders:write";
pub const ACTION_FOLDERS_CREATE: &str = "folders:create";
pub const ACTION_FOLDERS_DELETE: &str = "folders:delete";
pub const ACTION_FOLDERS_PERMISSIONS_READ: &str = "folders.permissions:read";
pub const ACTION_FOLDERS_PERMISSIONS_WRITE: &str = "folders.permissions:write";

pub const ACTION_TEAMS_READ: &str = "teams:read";
pub const ACTION_TEAMS_WRITE: &str = "teams:write";
pub const ACTION_TEAMS_CREATE: &str = "teams:create";

pub const ACTION_USERS_READ: &str = "users:read";
pub const ACTION_USERS_WRITE: &str = "users:write";
pub const ACTION_USERS_CREATE: &str = "users:create";

pub const ACTION_ROLES_READ: &str = "roles:read";

pub const RESOURCE_DASHBOARDS: &str = "dashboards";
pub const RESOURCE_FOLDERS: &str = "folders";

pub const SCOPE_TEAMS_ALL: &str = "teams:*";
pub const SCOPE_USERS_ALL: &str = "global.users:*";
pub const SCOPE_ROLES_ALL: &str = "roles:*";

fn perms(action_scopes: &[(&str, &str)]) -> Vec<Permission> {
    action_scopes
        .iter()
        .map(|(action, scope)| Permission::new(*action, *scope))
        .collect()
}

fn registration(role: RoleDto, grants: &[BuiltInRole]) -> RoleRegistration {
    RoleRegistration {
        role,
        grants: grants.iter().map(|g| g.as_str().to_string()).collect(),
    }
}

/// Fixed roles every deployment declares at startup.
pub fn default_registrations() -> Vec<RoleRegistration> {
    let dashboards = resource_any_scope(RESOURCE_DASHBOARDS);
    let dashboards = dashboards.as_str();
    let folders = resource_any_scope(RESOURCE_FOLDERS);
    let folders = folders.as_str();

    vec![
        registration(
            RoleDto::fixed(
                "fixed:dashboards:reader",
                1,
                perms(&[(ACTION_DASHBOARDS_READ, dashboards)]),
            )
            .with_display("Dashboard reader", "Dashboards", "Read all dashboards."),
            &[BuiltInRole::Viewer],
        ),
        registration(
            RoleDto::fixed(
                "fixed:dashboards:writer",
                1,
                perms(&[
                    (ACTION_DASHBOARDS_READ, dashboards),
                    (ACTION_DASHBOARDS_WRITE, dashboards),
                    (ACTION_DASHBOARDS_DELETE, dashboards),
                    (ACTION_DASHBOARDS_CREATE, folders),
                ]),
            )
            .with_display(
                "Dashboard writer",
                "Dashboards",
                "Create, edit and delete all dashboards.",
            ),
            &[BuiltInRole::Editor],
        ),
        registration(
            RoleDto::fixed(
                "fixed:dashboards.permissions:writer",
                1,
                perms(&[
                    (ACTION_DASHBOARDS_PERMISSIONS_READ, dashboards),
                    (ACTION_DASHBOARDS_PERMISSIONS_WRITE, dashboards),
                ]),
            )
            .with_display(
                "Dashboard permission writer",
                "Dashboards",
                "Read and change permissions of all dashboards.",
            ),
            &[BuiltInRole::Admin],
        ),
        registration(
            RoleDto::fixed(
                "fixed:folders:reader",
                1,
                perms(&[(ACTION_FOLDERS_READ, folders)]),
            )
            .with_display("Folder reader", "Folders", "Read all folders."),
            &[BuiltInRole::Viewer],
        ),
        registration(
            RoleDto::fixed(
                "fixed:folders:writer",
                1,
                perms(&[
                    (ACTION_FOLDERS_READ, folders),
                    (ACTION_FOLDERS_WRITE, folders),
                    (ACTION_FOLDERS_DELETE, folders),
                    (ACTION_FOLDERS_CREATE, ""),
                    (ACTION_FOLDERS_PERMISSIONS_READ, folders),
                    (ACTION_FOLDERS_PERMISSIONS_WRITE, folders),
                ]),
            )
            .with_display("Folder writer", "Folders", "Create, edit and delete all folders."),
            &[BuiltInRole::Admin],
        ),
        registration(
            RoleDto::fixed(
                "fixed:teams:writer",
                1,
                perms(&[
                    (ACTION_TEAMS_CREATE, ""),
                    (ACTION_TEAMS_READ, SCOPE_TEAMS_ALL),
                    (ACTION_TEAMS_WRITE, SCOPE_TEAMS_ALL),
                ]),
            )
            .with_display("Team writer", "Teams", "Create and manage teams."),
            &[BuiltInRole::Admin],
        ),
        registration(
            RoleDto::fixed(
                "fixed:users:writer",
                1,
                perms(&[
                    (ACTION_USERS_CREATE, ""),
                    (ACTION_USERS_READ, SCOPE_USERS_ALL),
                    (ACTION_USERS_WRITE, SCOPE_USERS_ALL),
                ]),
            )
            .with_display("User writer", "Users", "Create and manage users across organizations."),
            &[BuiltInRole::GrafanaAdmin],
        ),
        registration(
            RoleDto::fixed(
                "fixed:roles:reader",
                1,
                perms(&[(ACTION_ROLES_READ, SCOPE_ROLES_ALL)]),
            )
            .with_display("Role reader", "Roles", "List fixed roles and their grants."),
            &[BuiltInRole::Admin, BuiltInRole::GrafanaAdmin],
        ),
    ]
}

fn levels(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(level, actions)| {
            (
                level.to_string(),
                actions.iter().map(|a| a.to_string()).collect(),
            )
        })
        .collect()
}

pub fn dashboard_resource_options() -> ResourceOptions {
    ResourceOptions {
        resource: RESOURCE_DASHBOARDS.to_string(),
        assignments: Assignments::default(),
        permissions_to_actions: levels(&[
            ("View", &[ACTION_DASHBOARDS_READ]),
            (
                "Edit",
                &[
                    ACTION_DASHBOARDS_READ,
                    ACTION_DASHBOARDS_WRITE,
                    ACTION_DASHBOARDS_DELETE,
                ],
            ),
            (
                "Admin",
                &[
                    ACTION_DASHBOARDS_READ,
                    ACTION_DASHBOARDS_WRITE,
                    ACTION_DASHBOARDS_DELETE,
                    ACTION_DASHBOARDS_PERMISSIONS_READ,
                    ACTION_DASHBOARDS_PERMISSIONS_WRITE,
                ],
            ),
        ]),
    }
}

pub fn folder_resource_options() -> ResourceOptions {
    ResourceOptions {
        resource: RESOURCE_FOLDERS.to_string(),
        assignments: Assignments::default(),
        permissions_to_actions: levels(&[
            ("View", &[ACTION_FOLDERS_READ]),
            (
                "Edit",
                &[
                    ACTION_FOLDERS_READ,
                    ACTION_FOLDERS_WRITE,
                    ACTION_FOLDERS_DELETE,
                    ACTION_DASHBOARDS_CREATE,
                ],
            ),
            (
                "Admin",
                &[
                    ACTION_FOLDERS_READ,
                    ACTION_FOLDERS_WRITE,
                    ACTION_FOLDERS_DELETE,
                    ACTION_DASHBOARDS_CREATE,
                    ACTION_FOLDERS_PERMISSIONS_READ,
                    ACTION_FOLDERS_PERMISSIONS_WRITE,
                ],
            ),
        ]),
    }
}

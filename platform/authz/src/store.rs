//! Storage seams for managed grants, plus an in-memory implementation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::StoreError,
    models::{
        BuiltInRole, GetResourcesPermissionsQuery, GetUserPermissionsQuery, Grantee, Permission,
        ResourcePermission, RoleDto, SetResourcePermissionCommand,
    },
    scope::resource_scope,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Source of managed permissions for a principal.
#[async_trait]
pub trait PermissionsProvider: Send + Sync {
    async fn get_user_permissions(
        &self,
        query: &GetUserPermissionsQuery,
    ) -> StoreResult<Vec<Permission>>;

    async fn get_user_roles(&self, query: &GetUserPermissionsQuery) -> StoreResult<Vec<RoleDto>>;
}

/// Persistence for per-resource grants.
///
/// A set replaces the grantee's actions on the resource as one atomic step;
/// an empty action list removes the grant.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn set_resource_permission(
        &self,
        org_id: i64,
        grantee: &Grantee,
        cmd: SetResourcePermissionCommand,
    ) -> StoreResult<ResourcePermission>;

    async fn get_resources_permissions(
        &self,
        org_id: i64,
        query: &GetResourcesPermissionsQuery,
    ) -> StoreResult<Vec<ResourcePermission>>;

    async fn set_user_resource_permission(
        &self,
        org_id: i64,
        user_id: i64,
        cmd: SetResourcePermissionCommand,
    ) -> StoreResult<ResourcePermission> {
        self.set_resource_permission(org_id, &Grantee::User(user_id), cmd)
            .await
    }

    async fn set_team_resource_permission(
        &self,
        org_id: i64,
        team_id: i64,
        cmd: SetResourcePermissionCommand,
    ) -> StoreResult<ResourcePermission> {
        self.set_resource_permission(org_id, &Grantee::Team(team_id), cmd)
            .await
    }

    async fn set_built_in_resource_permission(
        &self,
        org_id: i64,
        built_in_role: BuiltInRole,
        cmd: SetResourcePermissionCommand,
    ) -> StoreResult<ResourcePermission> {
        self.set_resource_permission(org_id, &Grantee::BuiltInRole(built_in_role), cmd)
            .await
    }
}

/// Grantees a permissions query resolves to.
pub fn query_grantees(query: &GetUserPermissionsQuery) -> HashSet<Grantee> {
    let mut grantees = HashSet::new();
    grantees.insert(Grantee::User(query.user_id));
    grantees.extend(query.team_ids.iter().copied().map(Grantee::Team));
    grantees.extend(query.roles.iter().copied().map(Grantee::BuiltInRole));
    grantees
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    roles: HashMap<(i64, Grantee), ManagedRole>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug)]
struct ManagedRole {
    id: i64,
    uid: String,
    name: String,
    grants: BTreeMap<String, ScopeGrant>,
}

#[derive(Debug)]
struct ScopeGrant {
    resource_id: String,
    actions: BTreeSet<String>,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

impl ManagedRole {
    fn to_dto(&self, org_id: i64) -> RoleDto {
        RoleDto {
            version: 1,
            uid: self.uid.clone(),
            name: self.name.clone(),
            display_name: String::new(),
            description: String::new(),
            group: String::new(),
            org_id,
            permissions: self.permissions().collect(),
            hidden: true,
        }
    }

    fn permissions(&self) -> impl Iterator<Item = Permission> + '_ {
        self.grants.iter().flat_map(|(scope, grant)| {
            grant
                .actions
                .iter()
                .map(move |action| Permission::new(action.clone(), scope.clone()))
        })
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn set_resource_permission(
        &self,
        org_id: i64,
        grantee: &Grantee,
        cmd: SetResourcePermissionCommand,
    ) -> StoreResult<ResourcePermission> {
        let scope = resource_scope(&cmd.resource, &cmd.resource_id);
        let now = Utc::now();
        let mut state = self.state.write().await;

        let key = (org_id, grantee.clone());
        if !state.roles.contains_key(&key) {
            let id = state.next_id();
            state.roles.insert(
                key.clone(),
                ManagedRole {
                    id,
                    uid: Uuid::new_v4().to_string(),
                    name: grantee.managed_role_name(),
                    grants: BTreeMap::new(),
                },
            );
        }
        let Some(role) = state.roles.get_mut(&key) else {
            return Err(StoreError::Unavailable("managed role vanished".into()));
        };

        let actions: BTreeSet<String> = cmd.actions.into_iter().collect();
        let created = role.grants.remove(&scope).map_or(now, |p| p.created);
        let permission = ResourcePermission {
            id: role.id,
            org_id,
            resource_id: cmd.resource_id,
            role_name: role.name.clone(),
            actions: actions.iter().cloned().collect(),
            scope: scope.clone(),
            grantee: grantee.clone(),
            created,
            updated: now,
        };

        if permission.actions.is_empty() {
            if role.grants.is_empty() {
                state.roles.remove(&key);
            }
            return Ok(permission);
        }
        role.grants.insert(
            scope,
            ScopeGrant {
                resource_id: permission.resource_id.clone(),
                actions,
                created,
                updated: now,
            },
        );
        Ok(permission)
    }

    async fn get_resources_permissions(
        &self,
        org_id: i64,
        query: &GetResourcesPermissionsQuery,
    ) -> StoreResult<Vec<ResourcePermission>> {
        let scopes: HashSet<String> = query
            .resource_ids
            .iter()
            .map(|id| resource_scope(&query.resource, id))
            .collect();
        let state = self.state.read().await;
        let mut found = Vec::new();
        for ((role_org, grantee), role) in state.roles.iter() {
            if *role_org != org_id {
                continue;
            }
            for (scope, grant) in role.grants.iter().filter(|(s, _)| scopes.contains(*s)) {
                let actions: Vec<String> = grant
                    .actions
                    .iter()
                    .filter(|a| query.actions.is_empty() || query.actions.contains(*a))
                    .cloned()
                    .collect();
                if actions.is_empty() {
                    continue;
                }
                found.push(ResourcePermission {
                    id: role.id,
                    org_id,
                    resource_id: grant.resource_id.clone(),
                    role_name: role.name.clone(),
                    actions,
                    scope: scope.clone(),
                    grantee: grantee.clone(),
                    created: grant.created,
                    updated: grant.updated,
                });
            }
        }
        found.sort_by(|a, b| a.resource_id.cmp(&b.resource_id).then(a.id.cmp(&b.id)));
        Ok(found)
    }
}

#[async_trait]
impl PermissionsProvider for MemoryStore {
    async fn get_user_permissions(
        &self,
        query: &GetUserPermissionsQuery,
    ) -> StoreResult<Vec<Permission>> {
        let grantees = query_grantees(query);
        let state = self.state.read().await;
        Ok(state
            .roles
            .iter()
            .filter(|((org, grantee), _)| *org == query.org_id && grantees.contains(grantee))
            .flat_map(|(_, role)| role.permissions())
            .collect())
    }

    async fn get_user_roles(&self, query: &GetUserPermissionsQuery) -> StoreResult<Vec<RoleDto>> {
        let grantees = query_grantees(query);
        let state = self.state.read().await;
        let mut roles: Vec<(i64, RoleDto)> = state
            .roles
            .iter()
            .filter(|((org, grantee), _)| *org == query.org_id && grantees.contains(grantee))
            .map(|((org, _), role)| (role.id, role.to_dto(*org)))
            .collect();
        roles.sort_by_key(|(id, _)| *id);
        Ok(roles.into_iter().map(|(_, dto)| dto).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(resource_id: &str, actions: &[&str]) -> SetResourcePermissionCommand {
        SetResourcePermissionCommand {
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resource: "dashboards".into(),
            resource_id: resource_id.into(),
        }
    }

    fn query(ids: &[&str]) -> GetResourcesPermissionsQuery {
        GetResourcesPermissionsQuery {
            resource: "dashboards".into(),
            resource_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn set_replaces_previous_actions() {
        let store = MemoryStore::new();
        store
            .set_user_resource_permission(1, 10, cmd("5", &["dashboards:read", "dashboards:write"]))
            .await
            .unwrap();
        let second = store
            .set_user_resource_permission(1, 10, cmd("5", &["dashboards:read"]))
            .await
            .unwrap();
        assert_eq!(second.actions, vec!["dashboards:read".to_string()]);

        let listed = store.get_resources_permissions(1, &query(&["5"])).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].actions, vec!["dashboards:read".to_string()]);
        assert_eq!(listed[0].id, second.id);
    }

    #[tokio::test]
    async fn empty_actions_remove_the_grant() {
        let store = MemoryStore::new();
        store
            .set_team_resource_permission(1, 3, cmd("5", &["dashboards:read"]))
            .await
            .unwrap();
        let removed = store
            .set_team_resource_permission(1, 3, cmd("5", &[]))
            .await
            .unwrap();
        assert!(removed.is_empty());
        assert!(store.get_resources_permissions(1, &query(&["5"])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn managed_role_goes_with_its_last_grant() {
        let store = MemoryStore::new();
        let q = GetUserPermissionsQuery {
            org_id: 1,
            user_id: 10,
            ..Default::default()
        };
        let first = store
            .set_user_resource_permission(1, 10, cmd("5", &["dashboards:read"]))
            .await
            .unwrap();
        let replaced = store
            .set_user_resource_permission(1, 10, cmd("5", &["dashboards:write"]))
            .await
            .unwrap();
        assert_eq!(first.id, replaced.id);
        store
            .set_user_resource_permission(1, 10, cmd("6", &["dashboards:read"]))
            .await
            .unwrap();

        store
            .set_user_resource_permission(1, 10, cmd("5", &[]))
            .await
            .unwrap();
        let roles = store.get_user_roles(&q).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(
            roles[0].permissions,
            vec![Permission::new("dashboards:read", "dashboards:id:6")]
        );

        store
            .set_user_resource_permission(1, 10, cmd("6", &[]))
            .await
            .unwrap();
        assert!(store.get_user_roles(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn grants_are_isolated_per_org_and_resource() {
        let store = MemoryStore::new();
        store
            .set_built_in_resource_permission(
                1,
                BuiltInRole::Editor,
                cmd("5", &["dashboards:write"]),
            )
            .await
            .unwrap();
        store
            .set_user_resource_permission(2, 10, cmd("5", &["dashboards:read"]))
            .await
            .unwrap();
        store
            .set_user_resource_permission(1, 10, cmd("6", &["dashboards:read"]))
            .await
            .unwrap();

        let org1 = store.get_resources_permissions(1, &query(&["5"])).await.unwrap();
        assert_eq!(org1.len(), 1);
        assert_eq!(org1[0].grantee, Grantee::BuiltInRole(BuiltInRole::Editor));
        assert_eq!(org1[0].scope, "dashboards:id:5");

        let both = store.get_resources_permissions(1, &query(&["5", "6"])).await.unwrap();
        assert_eq!(both.len(), 2);
    }

    #[tokio::test]
    async fn action_filter_narrows_the_listing() {
        let store = MemoryStore::new();
        store
            .set_user_resource_permission(1, 10, cmd("5", &["dashboards:read", "dashboards:write"]))
            .await
            .unwrap();
        let q = GetResourcesPermissionsQuery {
            actions: vec!["dashboards:write".into()],
            ..query(&["5"])
        };
        let listed = store.get_resources_permissions(1, &q).await.unwrap();
        assert_eq!(listed[0].actions, vec!["dashboards:write".to_string()]);
    }

    #[tokio::test]
    async fn user_permissions_union_every_grant_path() {
        let store = MemoryStore::new();
        store
            .set_user_resource_permission(1, 10, cmd("1", &["dashboards:read"]))
            .await
            .unwrap();
        store
            .set_team_resource_permission(1, 7, cmd("2", &["dashboards:write"]))
            .await
            .unwrap();
        store
            .set_built_in_resource_permission(
                1,
                BuiltInRole::Viewer,
                cmd("3", &["dashboards:read"]),
            )
            .await
            .unwrap();
        store
            .set_team_resource_permission(1, 8, cmd("4", &["dashboards:read"]))
            .await
            .unwrap();

        let q = GetUserPermissionsQuery {
            org_id: 1,
            user_id: 10,
            roles: vec![BuiltInRole::Viewer],
            team_ids: vec![7],
        };
        let mut perms = store.get_user_permissions(&q).await.unwrap();
        perms.sort();
        assert_eq!(
            perms,
            vec![
                Permission::new("dashboards:read", "dashboards:id:1"),
                Permission::new("dashboards:read", "dashboards:id:3"),
                Permission::new("dashboards:write", "dashboards:id:2"),
            ]
        );

        let roles = store.get_user_roles(&q).await.unwrap();
        let names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "managed:users:10:permissions",
                "managed:teams:7:permissions",
                "managed:builtins:viewer:permissions",
            ]
        );
    }
}

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entity::{builtin_role, permission, role, team_role, user_role};
use platform_authz::{
    models::MANAGED_ROLE_PREFIX, BuiltInRole, GetResourcesPermissionsQuery,
    GetUserPermissionsQuery, Grantee, Permission, PermissionsProvider, ResourcePermission,
    ResourceStore, RoleDto, SetResourcePermissionCommand, StoreError, StoreResult,
    scope::resource_scope,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::OnConflict,
};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Managed grants persisted through sea-orm.
///
/// Each grantee owns one managed role per org, bound to it through the
/// matching assignment table. A grant on a resource is the set of permission
/// rows of that role sharing the resource's scope.
#[derive(Clone, Debug)]
pub struct SqlStore {
    db: DatabaseConnection,
}

impl SqlStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn backend(what: &'static str) -> impl FnOnce(DbErr) -> StoreError {
    move |err| StoreError::Backend(anyhow::Error::new(err).context(what))
}

const ROLE_LOCK_ATTEMPTS: usize = 3;

/// Creates the managed role when missing and holds its row lock until the
/// transaction ends, so writes for one grantee apply one after another.
///
/// A concurrent removal can delete the role between the insert and the lock;
/// the insert is then retried.
async fn lock_managed_role<C: ConnectionTrait>(
    conn: &C,
    org_id: i64,
    name: &str,
    now: DateTime<Utc>,
) -> Result<role::Model, DbErr> {
    for _ in 0..ROLE_LOCK_ATTEMPTS {
        role::Entity::insert(role::ActiveModel {
            org_id: Set(org_id),
            uid: Set(Uuid::new_v4().to_string()),
            name: Set(name.to_string()),
            version: Set(1),
            created: Set(now),
            updated: Set(now),
            ..Default::default()
        })
        .on_conflict(
            OnConflict::columns([role::Column::OrgId, role::Column::Name])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

        let locked = role::Entity::find()
            .filter(role::Column::OrgId.eq(org_id))
            .filter(role::Column::Name.eq(name))
            .lock_exclusive()
            .one(conn)
            .await?;
        if let Some(found) = locked {
            return Ok(found);
        }
    }
    Err(DbErr::RecordNotFound(format!("managed role {name} in org {org_id}")))
}

/// Drops a managed role with no permission rows left, along with its assignments.
async fn drop_if_empty<C: ConnectionTrait>(conn: &C, managed: &role::Model) -> Result<bool, DbErr> {
    let remaining = permission::Entity::find()
        .filter(permission::Column::RoleId.eq(managed.id))
        .count(conn)
        .await?;
    if remaining > 0 {
        return Ok(false);
    }
    user_role::Entity::delete_many()
        .filter(user_role::Column::RoleId.eq(managed.id))
        .exec(conn)
        .await?;
    team_role::Entity::delete_many()
        .filter(team_role::Column::RoleId.eq(managed.id))
        .exec(conn)
        .await?;
    builtin_role::Entity::delete_many()
        .filter(builtin_role::Column::RoleId.eq(managed.id))
        .exec(conn)
        .await?;
    role::Entity::delete_by_id(managed.id).exec(conn).await?;
    Ok(true)
}

async fn ensure_assignment<C: ConnectionTrait>(
    conn: &C,
    org_id: i64,
    grantee: &Grantee,
    role_id: i64,
    now: DateTime<Utc>,
) -> Result<(), DbErr> {
    match grantee {
        Grantee::User(user_id) => {
            let found = user_role::Entity::find()
                .filter(user_role::Column::OrgId.eq(org_id))
                .filter(user_role::Column::UserId.eq(*user_id))
                .filter(user_role::Column::RoleId.eq(role_id))
                .one(conn)
                .await?;
            if found.is_none() {
                user_role::ActiveModel {
                    org_id: Set(org_id),
                    user_id: Set(*user_id),
                    role_id: Set(role_id),
                    created: Set(now),
                    ..Default::default()
                }
                .insert(conn)
                .await?;
            }
        }
        Grantee::Team(team_id) => {
            let found = team_role::Entity::find()
                .filter(team_role::Column::OrgId.eq(org_id))
                .filter(team_role::Column::TeamId.eq(*team_id))
                .filter(team_role::Column::RoleId.eq(role_id))
                .one(conn)
                .await?;
            if found.is_none() {
                team_role::ActiveModel {
                    org_id: Set(org_id),
                    team_id: Set(*team_id),
                    role_id: Set(role_id),
                    created: Set(now),
                    ..Default::default()
                }
                .insert(conn)
                .await?;
            }
        }
        Grantee::BuiltInRole(built_in) => {
            let found = builtin_role::Entity::find()
                .filter(builtin_role::Column::OrgId.eq(org_id))
                .filter(builtin_role::Column::Role.eq(built_in.as_str()))
                .filter(builtin_role::Column::RoleId.eq(role_id))
                .one(conn)
                .await?;
            if found.is_none() {
                builtin_role::ActiveModel {
                    org_id: Set(org_id),
                    role: Set(built_in.as_str().to_string()),
                    role_id: Set(role_id),
                    created: Set(now),
                    ..Default::default()
                }
                .insert(conn)
                .await?;
            }
        }
    }
    Ok(())
}

/// Managed role ids a principal reaches through itself, its teams and its built-in roles.
async fn reachable_role_ids<C: ConnectionTrait>(
    conn: &C,
    query: &GetUserPermissionsQuery,
) -> Result<BTreeSet<i64>, DbErr> {
    let mut ids: BTreeSet<i64> = user_role::Entity::find()
        .filter(user_role::Column::OrgId.eq(query.org_id))
        .filter(user_role::Column::UserId.eq(query.user_id))
        .all(conn)
        .await?
        .into_iter()
        .map(|row| row.role_id)
        .collect();

    if !query.team_ids.is_empty() {
        let teams = team_role::Entity::find()
            .filter(team_role::Column::OrgId.eq(query.org_id))
            .filter(team_role::Column::TeamId.is_in(query.team_ids.iter().copied()))
            .all(conn)
            .await?;
        ids.extend(teams.into_iter().map(|row| row.role_id));
    }

    if !query.roles.is_empty() {
        let builtins = builtin_role::Entity::find()
            .filter(builtin_role::Column::OrgId.eq(query.org_id))
            .filter(builtin_role::Column::Role.is_in(query.roles.iter().map(|r| r.as_str())))
            .all(conn)
            .await?;
        ids.extend(builtins.into_iter().map(|row| row.role_id));
    }

    Ok(ids)
}

/// Grantee bound to each of the given managed roles.
async fn grantees_of<C: ConnectionTrait>(
    conn: &C,
    role_ids: &[i64],
) -> StoreResult<HashMap<i64, Grantee>> {
    let mut grantees = HashMap::new();
    for row in user_role::Entity::find()
        .filter(user_role::Column::RoleId.is_in(role_ids.iter().copied()))
        .all(conn)
        .await
        .map_err(backend("loading user assignments"))?
    {
        grantees.insert(row.role_id, Grantee::User(row.user_id));
    }
    for row in team_role::Entity::find()
        .filter(team_role::Column::RoleId.is_in(role_ids.iter().copied()))
        .all(conn)
        .await
        .map_err(backend("loading team assignments"))?
    {
        grantees.insert(row.role_id, Grantee::Team(row.team_id));
    }
    for row in builtin_role::Entity::find()
        .filter(builtin_role::Column::RoleId.is_in(role_ids.iter().copied()))
        .all(conn)
        .await
        .map_err(backend("loading built-in role assignments"))?
    {
        let built_in: BuiltInRole = row.role.parse().map_err(|_| {
            StoreError::Backend(anyhow::anyhow!("stored built-in role {:?} is unknown", row.role))
        })?;
        grantees.insert(row.role_id, Grantee::BuiltInRole(built_in));
    }
    Ok(grantees)
}

struct GrantRows {
    actions: BTreeSet<String>,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

#[async_trait]
impl ResourceStore for SqlStore {
    #[instrument(skip(self, cmd), fields(resource = %cmd.resource, resource_id = %cmd.resource_id))]
    async fn set_resource_permission(
        &self,
        org_id: i64,
        grantee: &Grantee,
        cmd: SetResourcePermissionCommand,
    ) -> StoreResult<ResourcePermission> {
        let scope = resource_scope(&cmd.resource, &cmd.resource_id);
        let role_name = grantee.managed_role_name();
        let actions: BTreeSet<String> = cmd.actions.into_iter().collect();
        let now = Utc::now();

        let txn = self.db.begin().await.map_err(backend("opening transaction"))?;

        let managed = lock_managed_role(&txn, org_id, &role_name, now)
            .await
            .map_err(backend("locking managed role"))?;
        ensure_assignment(&txn, org_id, grantee, managed.id, now)
            .await
            .map_err(backend("assigning managed role"))?;

        let previous = permission::Entity::find()
            .filter(permission::Column::RoleId.eq(managed.id))
            .filter(permission::Column::Scope.eq(scope.as_str()))
            .all(&txn)
            .await
            .map_err(backend("loading previous grant"))?;
        let created = previous.iter().map(|p| p.created).min().unwrap_or(now);

        permission::Entity::delete_many()
            .filter(permission::Column::RoleId.eq(managed.id))
            .filter(permission::Column::Scope.eq(scope.as_str()))
            .exec(&txn)
            .await
            .map_err(backend("removing previous grant"))?;

        if actions.is_empty() {
            let dropped = drop_if_empty(&txn, &managed)
                .await
                .map_err(backend("dropping empty managed role"))?;
            if dropped {
                debug!(role = %role_name, "managed role dropped");
            }
        } else {
            permission::Entity::insert_many(actions.iter().map(|action| permission::ActiveModel {
                role_id: Set(managed.id),
                action: Set(action.clone()),
                scope: Set(scope.clone()),
                created: Set(created),
                updated: Set(now),
                ..Default::default()
            }))
            .exec_without_returning(&txn)
            .await
            .map_err(backend("inserting grant"))?;
        }

        txn.commit().await.map_err(backend("committing grant"))?;
        debug!(role = %role_name, actions = actions.len(), "managed grant stored");

        Ok(ResourcePermission {
            id: managed.id,
            org_id,
            resource_id: cmd.resource_id,
            role_name,
            actions: actions.into_iter().collect(),
            scope,
            grantee: grantee.clone(),
            created,
            updated: now,
        })
    }

    #[instrument(skip(self, query), fields(resource = %query.resource))]
    async fn get_resources_permissions(
        &self,
        org_id: i64,
        query: &GetResourcesPermissionsQuery,
    ) -> StoreResult<Vec<ResourcePermission>> {
        if query.resource_ids.is_empty() {
            return Ok(Vec::new());
        }
        let resource_by_scope: HashMap<String, &String> = query
            .resource_ids
            .iter()
            .map(|id| (resource_scope(&query.resource, id), id))
            .collect();

        let roles: HashMap<i64, role::Model> = role::Entity::find()
            .filter(role::Column::OrgId.eq(org_id))
            .filter(role::Column::Name.starts_with(MANAGED_ROLE_PREFIX))
            .all(&self.db)
            .await
            .map_err(backend("loading managed roles"))?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        if roles.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = permission::Entity::find()
            .filter(permission::Column::RoleId.is_in(roles.keys().copied()))
            .filter(permission::Column::Scope.is_in(resource_by_scope.keys().cloned()));
        if !query.actions.is_empty() {
            rows = rows.filter(permission::Column::Action.is_in(query.actions.iter().cloned()));
        }
        let rows = rows
            .order_by_asc(permission::Column::Id)
            .all(&self.db)
            .await
            .map_err(backend("loading grants"))?;

        let mut grants: BTreeMap<(i64, String), GrantRows> = BTreeMap::new();
        for row in rows {
            let grant = grants
                .entry((row.role_id, row.scope.clone()))
                .or_insert_with(|| GrantRows {
                    actions: BTreeSet::new(),
                    created: row.created,
                    updated: row.updated,
                });
            grant.actions.insert(row.action);
            grant.created = grant.created.min(row.created);
            grant.updated = grant.updated.max(row.updated);
        }

        let role_ids: Vec<i64> = grants.keys().map(|(role_id, _)| *role_id).collect();
        let grantees = grantees_of(&self.db, &role_ids).await?;

        let mut found = Vec::with_capacity(grants.len());
        for ((role_id, scope), grant) in grants {
            let (Some(role), Some(grantee), Some(resource_id)) = (
                roles.get(&role_id),
                grantees.get(&role_id),
                resource_by_scope.get(&scope),
            ) else {
                continue;
            };
            found.push(ResourcePermission {
                id: role_id,
                org_id,
                resource_id: (*resource_id).clone(),
                role_name: role.name.clone(),
                actions: grant.actions.into_iter().collect(),
                scope,
                grantee: grantee.clone(),
                created: grant.created,
                updated: grant.updated,
            });
        }
        found.sort_by(|a, b| a.resource_id.cmp(&b.resource_id).then(a.id.cmp(&b.id)));
        Ok(found)
    }
}

#[async_trait]
impl PermissionsProvider for SqlStore {
    #[instrument(skip(self, query), fields(user_id = query.user_id, org_id = query.org_id))]
    async fn get_user_permissions(
        &self,
        query: &GetUserPermissionsQuery,
    ) -> StoreResult<Vec<Permission>> {
        let role_ids = reachable_role_ids(&self.db, query)
            .await
            .map_err(backend("loading role assignments"))?;
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = permission::Entity::find()
            .filter(permission::Column::RoleId.is_in(role_ids))
            .all(&self.db)
            .await
            .map_err(backend("loading permissions"))?;
        Ok(rows
            .into_iter()
            .map(|row| Permission::new(row.action, row.scope))
            .collect())
    }

    #[instrument(skip(self, query), fields(user_id = query.user_id, org_id = query.org_id))]
    async fn get_user_roles(&self, query: &GetUserPermissionsQuery) -> StoreResult<Vec<RoleDto>> {
        let role_ids = reachable_role_ids(&self.db, query)
            .await
            .map_err(backend("loading role assignments"))?;
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let roles = role::Entity::find()
            .filter(role::Column::Id.is_in(role_ids.iter().copied()))
            .order_by_asc(role::Column::Id)
            .all(&self.db)
            .await
            .map_err(backend("loading roles"))?;

        let mut permissions: HashMap<i64, Vec<Permission>> = HashMap::new();
        for row in permission::Entity::find()
            .filter(permission::Column::RoleId.is_in(role_ids))
            .order_by_asc(permission::Column::Id)
            .all(&self.db)
            .await
            .map_err(backend("loading permissions"))?
        {
            permissions
                .entry(row.role_id)
                .or_default()
                .push(Permission::new(row.action, row.scope));
        }

        Ok(roles
            .into_iter()
            .map(|r| RoleDto {
                version: r.version,
                hidden: r.name.starts_with(MANAGED_ROLE_PREFIX),
                permissions: permissions.remove(&r.id).unwrap_or_default(),
                uid: r.uid,
                name: r.name,
                display_name: String::new(),
                description: String::new(),
                group: String::new(),
                org_id: r.org_id,
            })
            .collect())
    }
}

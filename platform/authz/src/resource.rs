use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    context::RequestContext,
    error::{AccessControlError, AuthzResult},
    models::{
        BuiltInRole, GetResourcesPermissionsQuery, Grantee, ResourcePermission,
        SetResourcePermissionCommand,
    },
    scope::{check_scope, resource_scope},
    store::ResourceStore,
};

/// Which grantee kinds may receive grants on a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignments {
    pub users: bool,
    pub teams: bool,
    pub built_in_roles: bool,
}

impl Default for Assignments {
    fn default() -> Self {
        Self {
            users: true,
            teams: true,
            built_in_roles: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResourceOptions {
    /// Resource kind, also the scope prefix (`dashboards`).
    pub resource: String,
    pub assignments: Assignments,
    /// Permission level (`View`, `Edit`, ...) to the actions it grants.
    pub permissions_to_actions: BTreeMap<String, Vec<String>>,
}

/// Confirms a resource ID names something that exists in the org.
#[async_trait]
pub trait ResourceValidator: Send + Sync {
    async fn validate(&self, org_id: i64, resource_id: &str) -> AuthzResult<()>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescription {
    pub resource: String,
    pub assignments: Assignments,
    pub permissions: Vec<String>,
}

/// One grantee's requested level in a batch update. An empty level removes.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionAssignment {
    pub grantee: Grantee,
    pub permission: String,
}

/// Manages override grants for one resource kind.
pub struct ResourceManager {
    options: ResourceOptions,
    levels: BTreeMap<String, BTreeSet<String>>,
    known_actions: BTreeSet<String>,
    store: Arc<dyn ResourceStore>,
    validator: Option<Arc<dyn ResourceValidator>>,
}

impl ResourceManager {
    pub fn new(options: ResourceOptions, store: Arc<dyn ResourceStore>) -> Self {
        let levels: BTreeMap<String, BTreeSet<String>> = options
            .permissions_to_actions
            .iter()
            .map(|(level, actions)| (level.clone(), actions.iter().cloned().collect()))
            .collect();
        let known_actions = levels.values().flatten().cloned().collect();
        Self {
            options,
            levels,
            known_actions,
            store,
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn ResourceValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn resource(&self) -> &str {
        &self.options.resource
    }

    /// Action guarding reads of the resource's grants (`dashboards.permissions:read`).
    pub fn read_action(&self) -> String {
        format!("{}.permissions:read", self.options.resource)
    }

    pub fn write_action(&self) -> String {
        format!("{}.permissions:write", self.options.resource)
    }

    pub fn scope_of(&self, resource_id: &str) -> String {
        resource_scope(&self.options.resource, resource_id)
    }

    pub fn description(&self) -> ResourceDescription {
        ResourceDescription {
            resource: self.options.resource.clone(),
            assignments: self.options.assignments,
            permissions: self.levels.keys().cloned().collect(),
        }
    }

    /// Every active grant on the resource, across grantee kinds.
    #[instrument(
        name = "resource.get_permissions",
        skip(self, ctx),
        fields(resource = %self.options.resource)
    )]
    pub async fn get_permissions(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        resource_id: &str,
    ) -> AuthzResult<Vec<ResourcePermission>> {
        let query = GetResourcesPermissionsQuery {
            actions: self.known_actions.iter().cloned().collect(),
            resource: self.options.resource.clone(),
            resource_ids: vec![resource_id.to_string()],
        };
        ctx.run(async {
            self.store
                .get_resources_permissions(org_id, &query)
                .await
                .map_err(AccessControlError::Lookup)
        })
        .await
    }

    pub async fn set_user_permission(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        user_id: i64,
        resource_id: &str,
        actions: &[String],
    ) -> AuthzResult<ResourcePermission> {
        self.set_permission(ctx, org_id, &Grantee::User(user_id), resource_id, actions)
            .await
    }

    pub async fn set_team_permission(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        team_id: i64,
        resource_id: &str,
        actions: &[String],
    ) -> AuthzResult<ResourcePermission> {
        self.set_permission(ctx, org_id, &Grantee::Team(team_id), resource_id, actions)
            .await
    }

    /// `built_in_role` must be one of `Admin`, `Editor` or `Viewer`.
    pub async fn set_built_in_role_permission(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        built_in_role: &str,
        resource_id: &str,
        actions: &[String],
    ) -> AuthzResult<ResourcePermission> {
        let role = parse_org_built_in_role(built_in_role)?;
        self.set_permission(ctx, org_id, &Grantee::BuiltInRole(role), resource_id, actions)
            .await
    }

    /// Replaces the grantee's actions on the resource. No actions removes the grant.
    #[instrument(
        name = "resource.set_permission",
        skip(self, ctx, grantee, actions),
        fields(resource = %self.options.resource, grantee = %grantee)
    )]
    pub async fn set_permission(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        grantee: &Grantee,
        resource_id: &str,
        actions: &[String],
    ) -> AuthzResult<ResourcePermission> {
        let cmd = self.prepare(ctx, org_id, grantee, resource_id, actions).await?;
        let permission = ctx
            .run(async {
                self.store
                    .set_resource_permission(org_id, grantee, cmd)
                    .await
                    .map_err(AccessControlError::Store)
            })
            .await?;
        info!(
            org_id,
            resource_id,
            actions = permission.actions.len(),
            "resource permission set"
        );
        Ok(permission)
    }

    /// Applies several level changes on one resource after validating all of them.
    pub async fn set_permissions(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        resource_id: &str,
        assignments: &[PermissionAssignment],
    ) -> AuthzResult<Vec<ResourcePermission>> {
        let mut prepared = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            if let Grantee::BuiltInRole(role) = &assignment.grantee {
                parse_org_built_in_role(role.as_str())?;
            }
            let actions = if assignment.permission.is_empty() {
                Vec::new()
            } else {
                self.map_permission(&assignment.permission)?
            };
            let cmd = self
                .prepare(ctx, org_id, &assignment.grantee, resource_id, &actions)
                .await?;
            prepared.push((&assignment.grantee, cmd));
        }

        let mut results = Vec::with_capacity(prepared.len());
        for (grantee, cmd) in prepared {
            let permission = ctx
                .run(async {
                    self.store
                        .set_resource_permission(org_id, grantee, cmd)
                        .await
                        .map_err(AccessControlError::Store)
                })
                .await?;
            results.push(permission);
        }
        Ok(results)
    }

    /// The level whose action bundle equals the grant's actions exactly.
    pub fn map_actions(&self, permission: &ResourcePermission) -> Option<String> {
        let granted: BTreeSet<&String> = permission.actions.iter().collect();
        self.levels
            .iter()
            .find(|(_, actions)| actions.iter().collect::<BTreeSet<_>>() == granted)
            .map(|(level, _)| level.clone())
    }

    pub fn map_permission(&self, level: &str) -> AuthzResult<Vec<String>> {
        self.levels
            .get(level)
            .map(|actions| actions.iter().cloned().collect())
            .ok_or_else(|| AccessControlError::UnknownPermissionLevel(level.to_string()))
    }

    async fn prepare(
        &self,
        ctx: &RequestContext,
        org_id: i64,
        grantee: &Grantee,
        resource_id: &str,
        actions: &[String],
    ) -> AuthzResult<SetResourcePermissionCommand> {
        let assignments = self.options.assignments;
        let enabled = match grantee {
            Grantee::User(_) => assignments.users,
            Grantee::Team(_) => assignments.teams,
            Grantee::BuiltInRole(_) => assignments.built_in_roles,
        };
        if !enabled {
            return Err(AccessControlError::AssignmentDisabled(grantee.kind()));
        }
        if !is_concrete_resource_id(resource_id) {
            return Err(AccessControlError::InvalidResource(resource_id.to_string()));
        }
        if let Some(validator) = &self.validator {
            ctx.run(validator.validate(org_id, resource_id)).await?;
        }
        check_scope(&resource_scope(&self.options.resource, resource_id))?;

        let actions: BTreeSet<String> = actions.iter().cloned().collect();
        if let Some(unknown) = actions.iter().find(|a| !self.known_actions.contains(*a)) {
            return Err(AccessControlError::InvalidAction(unknown.clone()));
        }
        Ok(SetResourcePermissionCommand {
            actions: actions.into_iter().collect(),
            resource: self.options.resource.clone(),
            resource_id: resource_id.to_string(),
        })
    }
}

/// A grant names exactly one resource, so the id may not widen or split its scope.
fn is_concrete_resource_id(resource_id: &str) -> bool {
    !resource_id.trim().is_empty() && !resource_id.contains(['*', '?', ':'])
}

fn parse_org_built_in_role(name: &str) -> AuthzResult<BuiltInRole> {
    match name.parse::<BuiltInRole>()? {
        BuiltInRole::GrafanaAdmin => Err(AccessControlError::InvalidBuiltInRole(name.to_string())),
        role => Ok(role),
    }
}

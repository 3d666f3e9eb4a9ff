use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::{
    context::RequestContext,
    error::{AccessControlError, AuthzResult},
    evaluator::Evaluator,
    models::{GetUserPermissionsQuery, Permission, Principal, RoleDto, RoleRegistration},
    registry::FixedRoleRegistry,
    store::PermissionsProvider,
};

/// Decides whether a principal may act, and reports what it may do.
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Runs `evaluator` against the principal's effective permissions.
    ///
    /// An error means the decision could not be made; callers must deny.
    async fn evaluate(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        evaluator: &Evaluator,
    ) -> AuthzResult<bool>;

    /// Flattened, deduplicated permissions of the principal.
    async fn get_user_permissions(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
    ) -> AuthzResult<Vec<Permission>>;

    /// Fixed roles bound to the principal's built-in roles, then its managed roles.
    async fn get_user_roles(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
    ) -> AuthzResult<Vec<RoleDto>>;

    /// When true callers use their fallback authorization instead.
    fn is_disabled(&self) -> bool;

    fn declare_fixed_roles(&self, registrations: Vec<RoleRegistration>) -> AuthzResult<()>;
}

pub struct AccessControlService {
    enabled: bool,
    registry: Arc<FixedRoleRegistry>,
    provider: Arc<dyn PermissionsProvider>,
}

impl AccessControlService {
    pub fn new(registry: Arc<FixedRoleRegistry>, provider: Arc<dyn PermissionsProvider>) -> Self {
        Self {
            enabled: true,
            registry,
            provider,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<FixedRoleRegistry> {
        &self.registry
    }

    async fn resolve_permissions(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
    ) -> AuthzResult<Vec<Permission>> {
        let builtins = principal.built_in_roles();
        let mut permissions: BTreeSet<Permission> =
            self.registry.permissions_for(&builtins).into_iter().collect();

        let query = GetUserPermissionsQuery::from(principal);
        let managed = ctx
            .run(async {
                self.provider
                    .get_user_permissions(&query)
                    .await
                    .map_err(AccessControlError::Lookup)
            })
            .await?;
        permissions.extend(managed);
        Ok(permissions.into_iter().collect())
    }
}

#[async_trait]
impl AccessControl for AccessControlService {
    #[instrument(
        name = "accesscontrol.evaluate",
        skip_all,
        fields(user_id = principal.user_id, org_id = principal.org_id)
    )]
    async fn evaluate(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        evaluator: &Evaluator,
    ) -> AuthzResult<bool> {
        let permissions = self.resolve_permissions(ctx, principal).await?;
        let allowed = evaluator.evaluate_permissions(&permissions);
        debug!(%evaluator, allowed, "access evaluated");
        Ok(allowed)
    }

    #[instrument(
        name = "accesscontrol.user_permissions",
        skip_all,
        fields(user_id = principal.user_id, org_id = principal.org_id)
    )]
    async fn get_user_permissions(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
    ) -> AuthzResult<Vec<Permission>> {
        self.resolve_permissions(ctx, principal).await
    }

    #[instrument(
        name = "accesscontrol.user_roles",
        skip_all,
        fields(user_id = principal.user_id, org_id = principal.org_id)
    )]
    async fn get_user_roles(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
    ) -> AuthzResult<Vec<RoleDto>> {
        let mut roles = self.registry.roles_for(&principal.built_in_roles());
        let query = GetUserPermissionsQuery::from(principal);
        let managed = ctx
            .run(async {
                self.provider
                    .get_user_roles(&query)
                    .await
                    .map_err(AccessControlError::Lookup)
            })
            .await?;
        roles.extend(managed);
        Ok(roles)
    }

    fn is_disabled(&self) -> bool {
        !self.enabled
    }

    fn declare_fixed_roles(&self, registrations: Vec<RoleRegistration>) -> AuthzResult<()> {
        self.registry.declare(registrations)
    }
}

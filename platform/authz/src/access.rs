//! Caller-side helpers that turn an engine decision into a plain yes/no.
//!
//! Both helpers fail closed: an engine error is logged and denies. When the
//! engine is disabled the caller's fallback predicate decides instead.

use tracing::error;

use crate::{
    context::RequestContext,
    engine::AccessControl,
    evaluator::Evaluator,
    models::{OrgRole, Principal},
};

pub async fn has_access<F>(
    ac: &dyn AccessControl,
    ctx: &RequestContext,
    principal: &Principal,
    fallback: F,
    evaluator: &Evaluator,
) -> bool
where
    F: FnOnce(&Principal) -> bool,
{
    if ac.is_disabled() {
        return fallback(principal);
    }
    decide(ac, ctx, principal, evaluator).await
}

/// Like [`has_access`], but only permissions granted outside any organization count.
pub async fn has_global_access<F>(
    ac: &dyn AccessControl,
    ctx: &RequestContext,
    principal: &Principal,
    fallback: F,
    evaluator: &Evaluator,
) -> bool
where
    F: FnOnce(&Principal) -> bool,
{
    if ac.is_disabled() {
        return fallback(principal);
    }
    decide(ac, ctx, &principal.globalized(), evaluator).await
}

async fn decide(
    ac: &dyn AccessControl,
    ctx: &RequestContext,
    principal: &Principal,
    evaluator: &Evaluator,
) -> bool {
    match ac.evaluate(ctx, principal, evaluator).await {
        Ok(allowed) => allowed,
        Err(err) => {
            error!(
                error = %err,
                user_id = principal.user_id,
                org_id = principal.org_id,
                "error from access control system"
            );
            false
        }
    }
}

pub fn req_grafana_admin(principal: &Principal) -> bool {
    principal.is_grafana_admin
}

pub fn req_org_admin(principal: &Principal) -> bool {
    principal.org_role == Some(OrgRole::Admin)
}

pub fn req_signed_in(principal: &Principal) -> bool {
    principal.user_id > 0
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        error::{AccessControlError, AuthzResult, StoreError},
        models::{GLOBAL_ORG_ID, Permission, RoleDto, RoleRegistration},
    };

    /// Grants everything in org 1, nothing elsewhere; optionally fails.
    struct StubEngine {
        disabled: bool,
        fail: bool,
        seen_global: AtomicBool,
    }

    impl StubEngine {
        fn new(disabled: bool, fail: bool) -> Self {
            Self {
                disabled,
                fail,
                seen_global: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl AccessControl for StubEngine {
        async fn evaluate(
            &self,
            _ctx: &RequestContext,
            principal: &Principal,
            _evaluator: &Evaluator,
        ) -> AuthzResult<bool> {
            if self.fail {
                return Err(AccessControlError::Lookup(StoreError::Unavailable(
                    "down".into(),
                )));
            }
            if principal.org_id == GLOBAL_ORG_ID && principal.org_role.is_none() {
                self.seen_global.store(true, Ordering::SeqCst);
            }
            Ok(principal.org_id == 1)
        }

        async fn get_user_permissions(
            &self,
            _ctx: &RequestContext,
            _principal: &Principal,
        ) -> AuthzResult<Vec<Permission>> {
            Ok(Vec::new())
        }

        async fn get_user_roles(
            &self,
            _ctx: &RequestContext,
            _principal: &Principal,
        ) -> AuthzResult<Vec<RoleDto>> {
            Ok(Vec::new())
        }

        fn is_disabled(&self) -> bool {
            self.disabled
        }

        fn declare_fixed_roles(&self, _registrations: Vec<RoleRegistration>) -> AuthzResult<()> {
            Ok(())
        }
    }

    fn eval() -> Evaluator {
        Evaluator::action("users:read")
    }

    #[tokio::test]
    async fn enabled_engine_decides() {
        let ac = StubEngine::new(false, false);
        let ctx = RequestContext::new();
        let principal = Principal::new(1, 1, OrgRole::Viewer);
        assert!(has_access(&ac, &ctx, &principal, |_| false, &eval()).await);
    }

    #[tokio::test]
    async fn global_access_strips_the_organization() {
        let ac = Arc::new(StubEngine::new(false, false));
        let ctx = RequestContext::new();
        let principal = Principal::new(1, 1, OrgRole::Admin);
        assert!(!has_global_access(ac.as_ref(), &ctx, &principal, |_| true, &eval()).await);
        assert!(ac.seen_global.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn disabled_engine_uses_the_fallback() {
        let ac = StubEngine::new(true, true);
        let ctx = RequestContext::new();
        let admin = Principal::new(1, 1, OrgRole::Admin);
        let viewer = Principal::new(2, 1, OrgRole::Viewer).with_grafana_admin(true);

        assert!(has_access(&ac, &ctx, &admin, req_org_admin, &eval()).await);
        assert!(!has_access(&ac, &ctx, &viewer, req_org_admin, &eval()).await);
        assert!(has_global_access(&ac, &ctx, &viewer, req_grafana_admin, &eval()).await);
        assert!(!has_global_access(&ac, &ctx, &admin, req_grafana_admin, &eval()).await);
    }

    #[tokio::test]
    async fn engine_errors_deny() {
        let ac = StubEngine::new(false, true);
        let ctx = RequestContext::new();
        let principal = Principal::new(1, 1, OrgRole::Admin);
        assert!(!has_access(&ac, &ctx, &principal, |_| true, &eval()).await);
        assert!(!has_global_access(&ac, &ctx, &principal, |_| true, &eval()).await);
    }

    #[test]
    fn signed_in_requires_a_user() {
        assert!(req_signed_in(&Principal::new(3, 1, OrgRole::Viewer)));
        assert!(!req_signed_in(&Principal::default()));
    }
}

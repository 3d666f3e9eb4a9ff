use std::sync::Arc;

use serde::Serialize;

use crate::{
    access::has_access,
    context::RequestContext,
    declarations::{
        ACTION_DASHBOARDS_DELETE, ACTION_DASHBOARDS_PERMISSIONS_READ,
        ACTION_DASHBOARDS_PERMISSIONS_WRITE, ACTION_DASHBOARDS_READ, ACTION_DASHBOARDS_WRITE,
        RESOURCE_DASHBOARDS,
    },
    engine::AccessControl,
    evaluator::Evaluator,
    models::{OrgRole, Principal},
    scope::resource_scope,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardAccess {
    pub can_view: bool,
    pub can_edit: bool,
    pub can_save: bool,
    pub can_admin: bool,
    pub can_delete: bool,
}

/// Answers what a principal may do with a single dashboard.
///
/// While the engine is disabled the org role decides: any role views,
/// editors save and delete, admins manage permissions.
pub struct DashboardGuardian {
    ac: Arc<dyn AccessControl>,
    ctx: RequestContext,
    principal: Principal,
    scope: String,
    viewers_can_edit: bool,
}

impl DashboardGuardian {
    pub fn new(
        ac: Arc<dyn AccessControl>,
        ctx: RequestContext,
        principal: Principal,
        dashboard_id: i64,
    ) -> Self {
        Self {
            ac,
            ctx,
            principal,
            scope: resource_scope(RESOURCE_DASHBOARDS, &dashboard_id.to_string()),
            viewers_can_edit: false,
        }
    }

    /// Lets viewers change a dashboard in the browser without being able to save it.
    pub fn with_viewers_can_edit(mut self, enabled: bool) -> Self {
        self.viewers_can_edit = enabled;
        self
    }

    fn on_dashboard(&self, action: &str) -> Evaluator {
        Evaluator::permission(action, [self.scope.clone()])
    }

    async fn check(&self, evaluator: Evaluator, legacy: OrgRole) -> bool {
        has_access(
            self.ac.as_ref(),
            &self.ctx,
            &self.principal,
            |p| p.has_role(legacy),
            &evaluator,
        )
        .await
    }

    pub async fn can_view(&self) -> bool {
        self.check(self.on_dashboard(ACTION_DASHBOARDS_READ), OrgRole::Viewer)
            .await
    }

    pub async fn can_save(&self) -> bool {
        self.check(self.on_dashboard(ACTION_DASHBOARDS_WRITE), OrgRole::Editor)
            .await
    }

    pub async fn can_edit(&self) -> bool {
        if self.viewers_can_edit {
            return self.can_view().await;
        }
        self.can_save().await
    }

    pub async fn can_delete(&self) -> bool {
        self.check(self.on_dashboard(ACTION_DASHBOARDS_DELETE), OrgRole::Editor)
            .await
    }

    pub async fn can_admin(&self) -> bool {
        let evaluator = Evaluator::all([
            self.on_dashboard(ACTION_DASHBOARDS_PERMISSIONS_READ),
            self.on_dashboard(ACTION_DASHBOARDS_PERMISSIONS_WRITE),
        ]);
        self.check(evaluator, OrgRole::Admin).await
    }

    /// All answers at once; a principal who cannot view gets nothing else.
    pub async fn access(&self) -> DashboardAccess {
        if !self.can_view().await {
            return DashboardAccess::default();
        }
        DashboardAccess {
            can_view: true,
            can_edit: self.can_edit().await,
            can_save: self.can_save().await,
            can_admin: self.can_admin().await,
            can_delete: self.can_delete().await,
        }
    }
}

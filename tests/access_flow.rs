use anyhow::Result;
use platform_authz::{
    AccessControl, AccessControlError, Evaluator, GetResourcesPermissionsQuery, Grantee, OrgRole,
    Principal, RequestContext, ResourceStore, has_access, has_global_access, req_org_admin,
    declarations::{ACTION_DASHBOARDS_READ, ACTION_DASHBOARDS_WRITE},
};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use suite_tests::harness;

fn write_dashboard(id: i64) -> Evaluator {
    Evaluator::permission(ACTION_DASHBOARDS_WRITE, [format!("dashboards:id:{id}")])
}

async fn count(h: &suite_tests::Harness, table: &str) -> Result<i64> {
    let row = h
        .store
        .connection()
        .query_one(Statement::from_string(
            DatabaseBackend::Sqlite,
            format!("SELECT COUNT(*) AS n FROM {table}"),
        ))
        .await?
        .ok_or_else(|| anyhow::anyhow!("no count row"))?;
    Ok(row.try_get("", "n")?)
}

#[tokio::test]
async fn viewer_is_denied_until_granted_on_the_dashboard() -> Result<()> {
    let h = harness(true).await?;
    let ctx = RequestContext::new();
    let viewer = Principal::new(42, 1, OrgRole::Viewer);

    assert!(!h.engine.evaluate(&ctx, &viewer, &write_dashboard(5)).await?);

    let edit = h.dashboards.map_permission("Edit")?;
    h.dashboards
        .set_user_permission(&ctx, 1, 42, "5", &edit)
        .await?;

    assert!(h.engine.evaluate(&ctx, &viewer, &write_dashboard(5)).await?);
    assert!(!h.engine.evaluate(&ctx, &viewer, &write_dashboard(6)).await?);
    Ok(())
}

#[tokio::test]
async fn later_set_replaces_and_empty_set_removes() -> Result<()> {
    let h = harness(true).await?;
    let ctx = RequestContext::new();

    let admin = h.dashboards.map_permission("Admin")?;
    let view = h.dashboards.map_permission("View")?;
    h.dashboards.set_user_permission(&ctx, 1, 7, "5", &admin).await?;
    h.dashboards.set_user_permission(&ctx, 1, 7, "5", &view).await?;

    let listed = h.dashboards.get_permissions(&ctx, 1, "5").await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(h.dashboards.map_actions(&listed[0]).as_deref(), Some("View"));
    assert_eq!(count(&h, "role").await?, 1);
    assert_eq!(count(&h, "user_role").await?, 1);

    let removed = h.dashboards.set_user_permission(&ctx, 1, 7, "5", &[]).await?;
    assert!(removed.actions.is_empty());
    assert!(h.dashboards.get_permissions(&ctx, 1, "5").await?.is_empty());
    assert_eq!(count(&h, "permission").await?, 0);
    assert_eq!(count(&h, "role").await?, 0);
    assert_eq!(count(&h, "user_role").await?, 0);

    let viewer = Principal::new(7, 1, OrgRole::Viewer);
    let roles = h.engine.get_user_roles(&ctx, &viewer).await?;
    assert!(roles.iter().all(|r| !r.name.starts_with("managed:")));
    Ok(())
}

#[tokio::test]
async fn team_and_built_in_grants_reach_members() -> Result<()> {
    let h = harness(true).await?;
    let ctx = RequestContext::new();
    let edit = h.dashboards.map_permission("Edit")?;

    h.dashboards.set_team_permission(&ctx, 1, 3, "8", &edit).await?;
    h.dashboards
        .set_built_in_role_permission(&ctx, 1, "Viewer", "9", &edit)
        .await?;

    let member = Principal::new(11, 1, OrgRole::Viewer).with_teams([3]);
    let outsider = Principal::new(12, 1, OrgRole::Viewer);
    assert!(h.engine.evaluate(&ctx, &member, &write_dashboard(8)).await?);
    assert!(!h.engine.evaluate(&ctx, &outsider, &write_dashboard(8)).await?);
    assert!(h.engine.evaluate(&ctx, &outsider, &write_dashboard(9)).await?);

    let other_org = Principal::new(11, 2, OrgRole::Viewer).with_teams([3]);
    assert!(!h.engine.evaluate(&ctx, &other_org, &write_dashboard(8)).await?);

    let listed = h
        .store
        .get_resources_permissions(
            1,
            &GetResourcesPermissionsQuery {
                resource: "dashboards".into(),
                resource_ids: vec!["8".into(), "9".into()],
                ..Default::default()
            },
        )
        .await?;
    let grantees: Vec<_> = listed.iter().map(|p| p.grantee.clone()).collect();
    assert_eq!(
        grantees,
        vec![
            Grantee::Team(3),
            Grantee::BuiltInRole(platform_authz::BuiltInRole::Viewer)
        ]
    );
    Ok(())
}

#[tokio::test]
async fn global_checks_ignore_org_grants() -> Result<()> {
    let h = harness(true).await?;
    let ctx = RequestContext::new();
    let edit = h.dashboards.map_permission("Edit")?;
    h.dashboards.set_user_permission(&ctx, 1, 42, "5", &edit).await?;

    let viewer = Principal::new(42, 1, OrgRole::Viewer);
    let ac = h.engine.as_ref();
    assert!(has_access(ac, &ctx, &viewer, |_| false, &write_dashboard(5)).await);
    assert!(!has_global_access(ac, &ctx, &viewer, |_| true, &write_dashboard(5)).await);
    Ok(())
}

#[tokio::test]
async fn disabled_engine_defers_to_the_fallback() -> Result<()> {
    let h = harness(false).await?;
    let ctx = RequestContext::new();
    let read = Evaluator::permission(ACTION_DASHBOARDS_READ, ["dashboards:id:1"]);
    let ac = h.engine.as_ref();

    assert!(ac.is_disabled());
    let admin = Principal::new(1, 1, OrgRole::Admin);
    let viewer = Principal::new(2, 1, OrgRole::Viewer);
    assert!(has_access(ac, &ctx, &admin, req_org_admin, &read).await);
    assert!(!has_access(ac, &ctx, &viewer, req_org_admin, &read).await);
    Ok(())
}

#[tokio::test]
async fn cancelled_requests_stop_before_the_store() -> Result<()> {
    let h = harness(true).await?;
    let ctx = RequestContext::new();
    ctx.cancel();

    let err = h
        .engine
        .evaluate(&ctx, &Principal::new(1, 1, OrgRole::Viewer), &write_dashboard(1))
        .await
        .unwrap_err();
    assert!(matches!(err, AccessControlError::Cancelled));

    let view = h.dashboards.map_permission("View")?;
    let err = h
        .dashboards
        .set_user_permission(&ctx, 1, 1, "1", &view)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessControlError::Cancelled));
    assert_eq!(count(&h, "permission").await?, 0);
    Ok(())
}

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{self, HeaderMap, HeaderName, HeaderValue, Method, request::Parts},
    routing::{get, post},
};
use platform_api::{ApiError, ApiResult};
use platform_authz::{
    AccessControl, AccessControlService, AuthzResult, DashboardAccess, DashboardGuardian,
    Evaluator, FixedRoleRegistry, OrgRole, Permission, PermissionsProvider, Principal,
    RequestContext, ResourceDescription, ResourceManager, ResourcePermission, ResourceStore,
    RoleDto, has_access, has_global_access, req_grafana_admin, req_org_admin,
    declarations::{
        ACTION_ROLES_READ, SCOPE_ROLES_ALL, dashboard_resource_options, default_registrations,
        folder_resource_options,
    },
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::config::AppConfig;

pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_ORG_ID: &str = "x-org-id";
pub const HEADER_ORG_ROLE: &str = "x-org-role";
pub const HEADER_TEAM_IDS: &str = "x-team-ids";
pub const HEADER_GRAFANA_ADMIN: &str = "x-grafana-admin";
pub const HEADER_LOGIN: &str = "x-login";

/// Org used when the proxy does not send `X-Org-Id`.
const DEFAULT_ORG_ID: i64 = 1;

#[derive(Clone)]
pub struct AppState {
    pub ac: Arc<AccessControlService>,
    pub managers: Arc<HashMap<String, ResourceManager>>,
    pub config: Arc<AppConfig>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wires the engine and the resource managers over one store and declares
    /// the default fixed roles.
    pub fn new<S>(
        config: Arc<AppConfig>,
        store: Arc<S>,
        shutdown: CancellationToken,
    ) -> AuthzResult<Self>
    where
        S: ResourceStore + PermissionsProvider + 'static,
    {
        let provider: Arc<dyn PermissionsProvider> = store.clone();
        let resources: Arc<dyn ResourceStore> = store;

        let ac = AccessControlService::new(Arc::new(FixedRoleRegistry::new()), provider)
            .with_enabled(config.access_control_enabled);
        ac.declare_fixed_roles(default_registrations())?;

        let managers = [dashboard_resource_options(), folder_resource_options()]
            .into_iter()
            .map(|options| {
                let manager = ResourceManager::new(options, resources.clone());
                (manager.resource().to_string(), manager)
            })
            .collect();

        Ok(Self {
            ac: Arc::new(ac),
            managers: Arc::new(managers),
            config,
            shutdown,
        })
    }

    fn manager(&self, resource: &str) -> ApiResult<&ResourceManager> {
        self.managers
            .get(resource)
            .ok_or_else(|| ApiError::NotFound(format!("resource {resource}")))
    }

    /// Cancelled when the server shuts down.
    fn request_context(&self) -> RequestContext {
        RequestContext::with_token(self.shutdown.child_token())
    }
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "access-control server listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let layer = CorsLayer::new()
        .allow_headers([
            http::header::CONTENT_TYPE,
            HeaderName::from_static(HEADER_USER_ID),
            HeaderName::from_static(HEADER_ORG_ID),
            HeaderName::from_static(HEADER_ORG_ROLE),
            HeaderName::from_static(HEADER_TEAM_IDS),
            HeaderName::from_static(HEADER_GRAFANA_ADMIN),
            HeaderName::from_static(HEADER_LOGIN),
        ])
        .allow_methods([Method::POST, Method::GET]);
    if allowed.is_empty() {
        layer.allow_origin(AllowOrigin::any())
    } else {
        layer
            .allow_credentials(true)
            .allow_origin(AllowOrigin::list(allowed))
    }
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/access-control/user/permissions", get(user_permissions_handler))
        .route("/api/access-control/user/roles", get(user_roles_handler))
        .route("/api/access-control/roles", get(fixed_roles_handler))
        .route(
            "/api/access-control/{resource}/description",
            get(description_handler),
        )
        .route(
            "/api/access-control/{resource}/{resource_id}",
            get(resource_permissions_handler),
        )
        .route(
            "/api/access-control/{resource}/{resource_id}/users/{user_id}",
            post(set_user_permission_handler),
        )
        .route(
            "/api/access-control/{resource}/{resource_id}/teams/{team_id}",
            post(set_team_permission_handler),
        )
        .route(
            "/api/access-control/{resource}/{resource_id}/builtInRoles/{role}",
            post(set_built_in_role_permission_handler),
        )
        .route(
            "/api/dashboards/id/{dashboard_id}/access",
            get(dashboard_access_handler),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

/// Principal forwarded by the authenticating proxy.
pub struct CurrentUser(pub Principal);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        principal_from_headers(&parts.headers).map(CurrentUser)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<Option<&'a str>> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim()).filter(|s| !s.is_empty()))
            .map_err(|_| ApiError::invalid(format!("{name} is not valid text"))),
    }
}

fn parse_id(name: &str, raw: &str) -> ApiResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::invalid(format!("{name} must be an integer")))
}

pub fn principal_from_headers(headers: &HeaderMap) -> ApiResult<Principal> {
    let user_id = header_str(headers, HEADER_USER_ID)?
        .ok_or(ApiError::Unauthorized)
        .and_then(|raw| parse_id(HEADER_USER_ID, raw))?;
    if user_id <= 0 {
        return Err(ApiError::Unauthorized);
    }
    let org_id = match header_str(headers, HEADER_ORG_ID)? {
        Some(raw) => parse_id(HEADER_ORG_ID, raw)?,
        None => DEFAULT_ORG_ID,
    };
    let org_role = header_str(headers, HEADER_ORG_ROLE)?
        .map(str::parse::<OrgRole>)
        .transpose()?;
    let team_ids = header_str(headers, HEADER_TEAM_IDS)?
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| parse_id(HEADER_TEAM_IDS, id))
        .collect::<ApiResult<Vec<_>>>()?;
    let is_grafana_admin = header_str(headers, HEADER_GRAFANA_ADMIN)?
        .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");
    let login = header_str(headers, HEADER_LOGIN)?.unwrap_or_default().to_string();

    Ok(Principal {
        user_id,
        login,
        org_id,
        org_name: String::new(),
        org_role,
        team_ids,
        is_grafana_admin,
    })
}

async fn authorize(
    state: &AppState,
    ctx: &RequestContext,
    principal: &Principal,
    evaluator: Evaluator,
) -> ApiResult<()> {
    if has_access(state.ac.as_ref(), ctx, principal, req_org_admin, &evaluator).await {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    ok: bool,
    access_control_enabled: bool,
    version: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        access_control_enabled: !state.ac.is_disabled(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `{action: [scopes]}` with both levels sorted; actions without a target list no scopes.
fn scopes_by_action(permissions: &[Permission]) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for permission in permissions {
        let scopes = grouped.entry(permission.action.clone()).or_default();
        if !permission.scope.is_empty() {
            scopes.insert(permission.scope.clone());
        }
    }
    grouped
        .into_iter()
        .map(|(action, scopes)| (action, scopes.into_iter().collect()))
        .collect()
}

async fn user_permissions_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> ApiResult<Json<BTreeMap<String, Vec<String>>>> {
    let ctx = state.request_context();
    let permissions = state.ac.get_user_permissions(&ctx, &principal).await?;
    Ok(Json(scopes_by_action(&permissions)))
}

async fn user_roles_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> ApiResult<Json<Vec<RoleDto>>> {
    let ctx = state.request_context();
    Ok(Json(state.ac.get_user_roles(&ctx, &principal).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FixedRoleView {
    #[serde(flatten)]
    role: RoleDto,
    built_in_roles: Vec<&'static str>,
}

async fn fixed_roles_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> ApiResult<Json<Vec<FixedRoleView>>> {
    let ctx = state.request_context();
    let evaluator = Evaluator::permission(ACTION_ROLES_READ, [SCOPE_ROLES_ALL]);
    if !has_global_access(state.ac.as_ref(), &ctx, &principal, req_grafana_admin, &evaluator).await
    {
        return Err(ApiError::Forbidden);
    }
    let registry = state.ac.registry();
    let roles = registry
        .roles()
        .into_iter()
        .map(|role| FixedRoleView {
            built_in_roles: registry
                .grants_of(&role.name)
                .into_iter()
                .map(|b| b.as_str())
                .collect(),
            role,
        })
        .collect();
    Ok(Json(roles))
}

async fn description_handler(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(resource): Path<String>,
) -> ApiResult<Json<ResourceDescription>> {
    Ok(Json(state.manager(&resource)?.description()))
}

/// A grant together with the level its actions correspond to, if any.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourcePermissionView {
    #[serde(flatten)]
    grant: ResourcePermission,
    permission: Option<String>,
}

impl ResourcePermissionView {
    fn new(manager: &ResourceManager, grant: ResourcePermission) -> Self {
        Self {
            permission: manager.map_actions(&grant),
            grant,
        }
    }
}

async fn resource_permissions_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path((resource, resource_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<ResourcePermissionView>>> {
    let manager = state.manager(&resource)?;
    let ctx = state.request_context();
    let evaluator = Evaluator::permission(manager.read_action(), [manager.scope_of(&resource_id)]);
    authorize(&state, &ctx, &principal, evaluator).await?;

    let grants = manager
        .get_permissions(&ctx, principal.org_id, &resource_id)
        .await?;
    Ok(Json(
        grants
            .into_iter()
            .map(|grant| ResourcePermissionView::new(manager, grant))
            .collect(),
    ))
}

/// Requested level; an empty string removes the grant.
#[derive(Debug, Deserialize)]
struct SetPermissionBody {
    #[serde(default)]
    permission: String,
}

async fn prepare_set<'a>(
    state: &'a AppState,
    principal: &Principal,
    resource: &str,
    resource_id: &str,
    body: &SetPermissionBody,
) -> ApiResult<(&'a ResourceManager, RequestContext, Vec<String>)> {
    let manager = state.manager(resource)?;
    let ctx = state.request_context();
    let evaluator = Evaluator::permission(manager.write_action(), [manager.scope_of(resource_id)]);
    authorize(state, &ctx, principal, evaluator).await?;

    let actions = if body.permission.is_empty() {
        Vec::new()
    } else {
        manager.map_permission(&body.permission)?
    };
    Ok((manager, ctx, actions))
}

async fn set_user_permission_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path((resource, resource_id, user_id)): Path<(String, String, i64)>,
    Json(body): Json<SetPermissionBody>,
) -> ApiResult<Json<ResourcePermissionView>> {
    let (manager, ctx, actions) =
        prepare_set(&state, &principal, &resource, &resource_id, &body).await?;
    let grant = manager
        .set_user_permission(&ctx, principal.org_id, user_id, &resource_id, &actions)
        .await?;
    Ok(Json(ResourcePermissionView::new(manager, grant)))
}

async fn set_team_permission_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path((resource, resource_id, team_id)): Path<(String, String, i64)>,
    Json(body): Json<SetPermissionBody>,
) -> ApiResult<Json<ResourcePermissionView>> {
    let (manager, ctx, actions) =
        prepare_set(&state, &principal, &resource, &resource_id, &body).await?;
    let grant = manager
        .set_team_permission(&ctx, principal.org_id, team_id, &resource_id, &actions)
        .await?;
    Ok(Json(ResourcePermissionView::new(manager, grant)))
}

async fn set_built_in_role_permission_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path((resource, resource_id, role)): Path<(String, String, String)>,
    Json(body): Json<SetPermissionBody>,
) -> ApiResult<Json<ResourcePermissionView>> {
    let (manager, ctx, actions) =
        prepare_set(&state, &principal, &resource, &resource_id, &body).await?;
    let grant = manager
        .set_built_in_role_permission(&ctx, principal.org_id, &role, &resource_id, &actions)
        .await?;
    Ok(Json(ResourcePermissionView::new(manager, grant)))
}

async fn dashboard_access_handler(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(dashboard_id): Path<i64>,
) -> ApiResult<Json<DashboardAccess>> {
    let ac: Arc<dyn AccessControl> = state.ac.clone();
    let guardian = DashboardGuardian::new(ac, state.request_context(), principal, dashboard_id)
        .with_viewers_can_edit(state.config.viewers_can_edit);
    let access = guardian.access().await;
    if !access.can_view {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(access))
}

/// Resolves on ctrl-c or SIGTERM and cancels every request context.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };

    info!("shutdown requested");
    token.cancel();
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use platform_authz::MemoryStore;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    fn router_with(config: AppConfig) -> Router {
        let state = AppState::new(
            Arc::new(config),
            Arc::new(MemoryStore::new()),
            CancellationToken::new(),
        )
        .unwrap();
        build_router(state)
    }

    fn router() -> Router {
        router_with(AppConfig::default())
    }

    fn get_as(uri: &str, user_id: i64, role: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(HEADER_USER_ID, user_id.to_string())
            .header(HEADER_ORG_ROLE, role)
            .body(Body::empty())
            .unwrap()
    }

    fn post_as(uri: &str, user_id: i64, role: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(HEADER_USER_ID, user_id.to_string())
            .header(HEADER_ORG_ROLE, role)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    #[tokio::test]
    async fn preflight_allows_every_principal_header() {
        let router = router_with(AppConfig {
            cors_allowed_origins: vec!["http://dash.test".into()],
            ..AppConfig::default()
        });
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/access-control/user/permissions")
            .header(http::header::ORIGIN, "http://dash.test")
            .header(http::header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .header(
                http::header::ACCESS_CONTROL_REQUEST_HEADERS,
                "x-user-id,x-grafana-admin,x-login",
            )
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert!(response.status().is_success());
        let allowed = response
            .headers()
            .get(http::header::ACCESS_CONTROL_ALLOW_HEADERS)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        for header in [
            HEADER_USER_ID,
            HEADER_ORG_ID,
            HEADER_ORG_ROLE,
            HEADER_TEAM_IDS,
            HEADER_GRAFANA_ADMIN,
            HEADER_LOGIN,
        ] {
            assert!(allowed.contains(header), "{header} missing from {allowed}");
        }
    }

    #[tokio::test]
    async fn health_reports_engine_state() {
        let (status, body) = send(
            &router(),
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["accessControlEnabled"], true);
    }

    #[tokio::test]
    async fn requests_without_a_user_are_unauthorized() {
        let request = Request::builder()
            .uri("/api/access-control/user/permissions")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router(), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn malformed_principal_headers_are_bad_requests() {
        let (status, _) = send(
            &router(),
            get_as("/api/access-control/user/permissions", 5, "Owner"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn viewer_permissions_come_from_fixed_roles() {
        let (status, body) = send(
            &router(),
            get_as("/api/access-control/user/permissions", 5, "Viewer"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dashboards:read"], json!(["dashboards:*"]));
        assert!(body.get("dashboards:write").is_none());
    }

    #[tokio::test]
    async fn admin_grant_lets_a_viewer_save_a_dashboard() {
        let router = router();

        let (status, body) =
            send(&router, get_as("/api/dashboards/id/5/access", 7, "Viewer")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["canView"], true);
        assert_eq!(body["canSave"], false);

        let (status, body) = send(
            &router,
            post_as(
                "/api/access-control/dashboards/5/users/7",
                1,
                "Admin",
                json!({"permission": "Edit"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["permission"], "Edit");
        assert_eq!(body["roleName"], "managed:users:7:permissions");

        let (_, body) = send(&router, get_as("/api/dashboards/id/5/access", 7, "Viewer")).await;
        assert_eq!(body["canSave"], true);
        assert_eq!(body["canAdmin"], false);

        let (status, body) =
            send(&router, get_as("/api/access-control/dashboards/5", 1, "Admin")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["grantee"], json!({"kind": "user", "id": 7}));
    }

    #[tokio::test]
    async fn viewers_cannot_change_grants() {
        let (status, body) = send(
            &router(),
            post_as(
                "/api/access-control/dashboards/5/users/7",
                7,
                "Viewer",
                json!({"permission": "Admin"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn unknown_resources_and_levels_are_reported() {
        let router = router();
        let (status, _) = send(
            &router,
            get_as("/api/access-control/alerts/description", 1, "Admin"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &router,
            post_as(
                "/api/access-control/folders/3/teams/2",
                1,
                "Admin",
                json!({"permission": "Owner"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");

        let (status, _) = send(
            &router,
            post_as(
                "/api/access-control/folders/3/builtInRoles/Grafana%20Admin",
                1,
                "Admin",
                json!({"permission": "View"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn description_lists_levels() {
        let (status, body) = send(
            &router(),
            get_as("/api/access-control/folders/description", 2, "Viewer"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["permissions"], json!(["Admin", "Edit", "View"]));
        assert_eq!(body["assignments"]["builtInRoles"], true);
    }

    #[tokio::test]
    async fn fixed_roles_need_global_access() {
        let router = router();
        let (status, _) = send(&router, get_as("/api/access-control/roles", 1, "Admin")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let request = Request::builder()
            .uri("/api/access-control/roles")
            .header(HEADER_USER_ID, "1")
            .header(HEADER_GRAFANA_ADMIN, "true")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        let reader = body
            .as_array()
            .and_then(|roles| roles.iter().find(|r| r["name"] == "fixed:dashboards:reader"))
            .cloned()
            .unwrap();
        assert_eq!(reader["builtInRoles"], json!(["Viewer"]));
    }

    #[tokio::test]
    async fn disabled_engine_falls_back_to_org_roles() {
        let router = router_with(AppConfig {
            access_control_enabled: false,
            ..AppConfig::default()
        });
        let (status, _) = send(
            &router,
            post_as(
                "/api/access-control/dashboards/5/teams/2",
                3,
                "Editor",
                json!({"permission": "View"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &router,
            post_as(
                "/api/access-control/dashboards/5/teams/2",
                1,
                "Admin",
                json!({"permission": "View"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn principal_headers_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_USER_ID, HeaderValue::from_static("9"));
        headers.insert(HEADER_ORG_ID, HeaderValue::from_static("4"));
        headers.insert(HEADER_ORG_ROLE, HeaderValue::from_static("Editor"));
        headers.insert(HEADER_TEAM_IDS, HeaderValue::from_static("3, 8,"));
        headers.insert(HEADER_LOGIN, HeaderValue::from_static("ada"));
        let principal = principal_from_headers(&headers).unwrap();
        assert_eq!(principal.user_id, 9);
        assert_eq!(principal.org_id, 4);
        assert_eq!(principal.org_role, Some(OrgRole::Editor));
        assert_eq!(principal.team_ids, vec![3, 8]);
        assert_eq!(principal.login, "ada");
        assert!(!principal.is_grafana_admin);

        headers.insert(HEADER_TEAM_IDS, HeaderValue::from_static("x"));
        assert!(matches!(
            principal_from_headers(&headers),
            Err(ApiError::InvalidInput(_))
        ));
    }
}

//! Access-control core for the dashboard server.
//!
//! A principal's effective permissions are the union of the fixed roles bound
//! to its built-in roles and the managed grants stored for the user, its teams
//! and its built-in roles. Checks are expressed as [`Evaluator`] trees and run
//! by an [`AccessControl`] engine; per-resource grants are edited through a
//! [`ResourceManager`].

pub mod access;
pub mod context;
pub mod declarations;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod guardian;
pub mod models;
pub mod registry;
pub mod resource;
pub mod scope;
pub mod store;

pub use access::{has_access, has_global_access, req_grafana_admin, req_org_admin, req_signed_in};
pub use context::RequestContext;
pub use engine::{AccessControl, AccessControlService};
pub use error::{AccessControlError, AuthzResult, StoreError};
pub use evaluator::Evaluator;
pub use guardian::{DashboardAccess, DashboardGuardian};
pub use models::{
    BuiltInRole, GLOBAL_ORG_ID, GetResourcesPermissionsQuery, GetUserPermissionsQuery, Grantee,
    OrgRole, Permission, Principal, ResourcePermission, RoleDto, RoleRegistration,
    ScopesByAction, SetResourcePermissionCommand, build_permissions_map, group_scopes_by_action,
};
pub use registry::FixedRoleRegistry;
pub use resource::{
    Assignments, PermissionAssignment, ResourceDescription, ResourceManager, ResourceOptions,
    ResourceValidator,
};
pub use scope::{check_scope, scope_matches, validate_scope};
pub use store::{MemoryStore, PermissionsProvider, ResourceStore, StoreResult};

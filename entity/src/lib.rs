//! Database entities backing roles, permissions and role assignments.

pub mod builtin_role;
pub mod permission;
pub mod role;
pub mod team_role;
pub mod user_role;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{
    error::{AccessControlError, AuthzResult},
    models::{BuiltInRole, FIXED_ROLE_PREFIX, Permission, RoleDto, RoleRegistration},
    scope::check_scope,
};

/// Fixed roles declared at startup and the built-in roles they are bound to.
///
/// Created once by the process and shared with the engine by `Arc`.
#[derive(Debug, Default)]
pub struct FixedRoleRegistry {
    state: RwLock<RegistryState>,
}

#[derive(Clone, Debug, Default)]
struct RegistryState {
    roles: BTreeMap<String, RoleDto>,
    grants: HashMap<BuiltInRole, BTreeSet<String>>,
}

impl RegistryState {
    fn register(&mut self, role: RoleDto, grants: Vec<BuiltInRole>) -> AuthzResult<()> {
        let existing = self
            .roles
            .get(&role.name)
            .map(|known| (*known == role, known.version));
        match existing {
            Some((true, _)) => {}
            Some((false, version)) if role.version > version => {
                debug!(role = %role.name, version = role.version, "upgrading fixed role");
                for bound in self.grants.values_mut() {
                    bound.remove(&role.name);
                }
                self.roles.insert(role.name.clone(), role.clone());
            }
            Some(_) => return Err(AccessControlError::DuplicateRole(role.name)),
            None => {
                self.roles.insert(role.name.clone(), role.clone());
            }
        }
        for builtin in grants {
            self.grants
                .entry(builtin)
                .or_default()
                .insert(role.name.clone());
        }
        Ok(())
    }
}

impl FixedRoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every role or none of them.
    ///
    /// Declaring an identical role again is a no-op and a higher version
    /// replaces the previous definition. Anything else under a known name
    /// is a conflict.
    pub fn declare(
        &self,
        registrations: impl IntoIterator<Item = RoleRegistration>,
    ) -> AuthzResult<()> {
        let validated = registrations
            .into_iter()
            .map(validate_registration)
            .collect::<AuthzResult<Vec<_>>>()?;

        let mut state = self.state.write();
        let mut staged = state.clone();
        let count = validated.len();
        for (role, grants) in validated {
            staged.register(role, grants)?;
        }
        *state = staged;
        info!(count, "fixed roles declared");
        Ok(())
    }

    pub fn role(&self, name: &str) -> Option<RoleDto> {
        self.state.read().roles.get(name).cloned()
    }

    pub fn roles(&self) -> Vec<RoleDto> {
        self.state.read().roles.values().cloned().collect()
    }

    /// Built-in roles a fixed role is granted to.
    pub fn grants_of(&self, name: &str) -> Vec<BuiltInRole> {
        let state = self.state.read();
        BuiltInRole::ALL
            .into_iter()
            .filter(|b| state.grants.get(b).is_some_and(|names| names.contains(name)))
            .collect()
    }

    /// Fixed roles bound to any of `builtins`, each listed once.
    pub fn roles_for(&self, builtins: &[BuiltInRole]) -> Vec<RoleDto> {
        let state = self.state.read();
        let names: BTreeSet<&String> = builtins
            .iter()
            .filter_map(|b| state.grants.get(b))
            .flatten()
            .collect();
        names
            .into_iter()
            .filter_map(|name| state.roles.get(name).cloned())
            .collect()
    }

    pub fn permissions_for(&self, builtins: &[BuiltInRole]) -> Vec<Permission> {
        self.roles_for(builtins)
            .into_iter()
            .flat_map(|role| role.permissions)
            .collect()
    }
}

fn validate_registration(reg: RoleRegistration) -> AuthzResult<(RoleDto, Vec<BuiltInRole>)> {
    let RoleRegistration { role, grants } = reg;
    if !role.name.starts_with(FIXED_ROLE_PREFIX) || role.name.len() == FIXED_ROLE_PREFIX.len() {
        return Err(AccessControlError::InvalidRoleName(role.name));
    }
    // Actions without a target carry an empty scope.
    for permission in &role.permissions {
        if !permission.scope.is_empty() {
            check_scope(&permission.scope)?;
        }
    }
    let grants = grants
        .iter()
        .map(|g| g.parse::<BuiltInRole>())
        .collect::<AuthzResult<Vec<_>>>()?;
    Ok((role, grants))
}

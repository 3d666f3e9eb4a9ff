//! Scope syntax, matching and construction.
//!
//! A scope names a resource (`dashboards:id:5`) or a class of resources. A
//! single trailing `*` turns it into a prefix pattern, and it must follow a
//! `:` or `/` separator (`dashboards:id:*`, `folders/*`). A bare `*` covers
//! every scope.

use std::fmt;

use crate::error::{AccessControlError, AuthzResult};

pub const SCOPE_ALL: &str = "*";
const WILDCARD: char = '*';

/// Returns whether `scope` is well formed. The empty scope is not.
pub fn validate_scope(scope: &str) -> bool {
    let Some(last) = scope.chars().last() else {
        return false;
    };
    let prefix = &scope[..scope.len() - last.len_utf8()];
    if last == WILDCARD {
        if let Some(before) = prefix.chars().last() {
            if before != ':' && before != '/' {
                return false;
            }
        }
    }
    !prefix.contains(['*', '?'])
}

pub fn check_scope(scope: &str) -> AuthzResult<()> {
    if validate_scope(scope) {
        Ok(())
    } else {
        Err(AccessControlError::InvalidScope(scope.to_string()))
    }
}

/// Returns whether a granted scope covers a required one.
///
/// An exact match always covers. A granted scope ending in `*` covers every
/// required scope that starts with the text before the wildcard, including
/// narrower wildcards (`dashboards:*` covers `dashboards:id:*`). A required
/// wildcard is never covered by a literal grant.
pub fn scope_matches(granted: &str, required: &str) -> bool {
    if granted == required {
        return true;
    }
    match granted.strip_suffix(WILDCARD) {
        Some(prefix) => required.starts_with(prefix),
        None => false,
    }
}

/// Builder for `resource:attribute:value` scopes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    parts: Vec<String>,
}

impl Scope {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            parts: vec![resource.into()],
        }
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.parts.push(attribute.into());
        self
    }

    pub fn value(mut self, value: impl fmt::Display) -> Self {
        self.parts.push(value.to_string());
        self
    }

    pub fn wildcard(self) -> Self {
        self.value(WILDCARD)
    }

    pub fn build(&self) -> String {
        self.parts.join(":")
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

/// `dashboards:id:5` for resource `dashboards` and ID `5`.
pub fn resource_scope(resource: &str, resource_id: &str) -> String {
    Scope::new(resource).attribute("id").value(resource_id).build()
}

/// `dashboards:id:*` for resource `dashboards`.
pub fn resource_all_scope(resource: &str) -> String {
    Scope::new(resource).attribute("id").wildcard().build()
}

/// `dashboards:*` for resource `dashboards`.
pub fn resource_any_scope(resource: &str) -> String {
    Scope::new(resource).wildcard().build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_scopes_are_valid() {
        for scope in ["dashboards:id:5", "users:id:1", "folders/general", "x", "teams"] {
            assert!(validate_scope(scope), "{scope}");
        }
    }

    #[test]
    fn trailing_wildcard_needs_a_separator() {
        assert!(validate_scope("dashboards:id:*"));
        assert!(validate_scope("dashboards:*"));
        assert!(validate_scope("folders/*"));
        assert!(validate_scope("*"));
        assert!(!validate_scope("dashboards:id*"));
        assert!(!validate_scope("dashboards*"));
    }

    #[test]
    fn embedded_wildcards_are_rejected() {
        assert!(!validate_scope("dash*boards:id:5"));
        assert!(!validate_scope("dashboards:?:5"));
        assert!(!validate_scope("dashboards:*:*"));
        assert!(!validate_scope("**"));
    }

    #[test]
    fn empty_scope_is_invalid() {
        assert!(!validate_scope(""));
        assert!(matches!(
            check_scope(""),
            Err(AccessControlError::InvalidScope(s)) if s.is_empty()
        ));
    }

    #[test]
    fn wildcard_grants_cover_narrower_scopes() {
        assert!(scope_matches("dashboards:id:5", "dashboards:id:5"));
        assert!(scope_matches("dashboards:id:*", "dashboards:id:5"));
        assert!(scope_matches("dashboards:*", "dashboards:id:5"));
        assert!(scope_matches("*", "dashboards:id:5"));
        assert!(scope_matches("dashboards:*", "dashboards:id:*"));
        assert!(!scope_matches("dashboards:id:5", "dashboards:id:*"));
        assert!(!scope_matches("dashboards:id:5", "dashboards:id:50"));
        assert!(!scope_matches("folders:*", "dashboards:id:5"));
    }

    #[test]
    fn builders_compose_resource_scopes() {
        assert_eq!(resource_scope("dashboards", "5"), "dashboards:id:5");
        assert_eq!(resource_all_scope("dashboards"), "dashboards:id:*");
        assert_eq!(resource_any_scope("folders"), "folders:*");
        assert_eq!(
            Scope::new("users").attribute("login").value("ada").to_string(),
            "users:login:ada"
        );
    }
}

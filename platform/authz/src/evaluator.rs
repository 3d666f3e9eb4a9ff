use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::AuthzResult,
    models::{Permission, ScopesByAction, group_scopes_by_action},
    scope::{check_scope, scope_matches},
};

/// Boolean requirement over a principal's granted permissions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Evaluator {
    /// `action` granted on any of `scopes`; no scopes means the action alone.
    Permission { action: String, scopes: Vec<String> },
    All(Vec<Evaluator>),
    Any(Vec<Evaluator>),
}

impl Evaluator {
    pub fn permission<I, S>(action: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Evaluator::Permission {
            action: action.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn action(action: impl Into<String>) -> Self {
        Evaluator::Permission {
            action: action.into(),
            scopes: Vec::new(),
        }
    }

    pub fn all(children: impl IntoIterator<Item = Evaluator>) -> Self {
        Evaluator::All(children.into_iter().collect())
    }

    pub fn any(children: impl IntoIterator<Item = Evaluator>) -> Self {
        Evaluator::Any(children.into_iter().collect())
    }

    pub fn evaluate(&self, granted: &ScopesByAction) -> bool {
        match self {
            Evaluator::Permission { action, scopes } => {
                let Some(granted_scopes) = granted.get(action) else {
                    return false;
                };
                if scopes.is_empty() {
                    return true;
                }
                scopes.iter().any(|required| {
                    granted_scopes
                        .iter()
                        .any(|scope| scope_matches(scope, required))
                })
            }
            Evaluator::All(children) => children.iter().all(|c| c.evaluate(granted)),
            Evaluator::Any(children) => children.iter().any(|c| c.evaluate(granted)),
        }
    }

    pub fn evaluate_permissions(&self, permissions: &[Permission]) -> bool {
        self.evaluate(&group_scopes_by_action(permissions))
    }

    /// Rejects trees that require malformed scopes.
    pub fn validate(&self) -> AuthzResult<()> {
        match self {
            Evaluator::Permission { scopes, .. } => {
                scopes.iter().try_for_each(|scope| check_scope(scope))
            }
            Evaluator::All(children) | Evaluator::Any(children) => {
                children.iter().try_for_each(Evaluator::validate)
            }
        }
    }
}

impl fmt::Display for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evaluator::Permission { action, scopes } => {
                write!(f, "{action}({})", scopes.join(" "))
            }
            Evaluator::All(children) => write_group(f, "all", children),
            Evaluator::Any(children) => write_group(f, "any", children),
        }
    }
}

fn write_group(f: &mut fmt::Formatter<'_>, name: &str, children: &[Evaluator]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (idx, child) in children.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

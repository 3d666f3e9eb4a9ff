use thiserror::Error;

pub type AuthzResult<T> = Result<T, AccessControlError>;

/// Failure raised by a permission store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum AccessControlError {
    #[error("invalid scope: {0:?}")]
    InvalidScope(String),
    #[error("permission lookup failed")]
    Lookup(#[source] StoreError),
    #[error("resource permission store failed")]
    Store(#[source] StoreError),
    #[error("fixed role {0} declared twice with conflicting definitions")]
    DuplicateRole(String),
    #[error("unknown permission level: {0}")]
    UnknownPermissionLevel(String),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("invalid role name: {0}")]
    InvalidRoleName(String),
    #[error("invalid built-in role: {0}")]
    InvalidBuiltInRole(String),
    #[error("{0} assignments are not enabled for this resource")]
    AssignmentDisabled(&'static str),
    #[error("invalid resource: {0}")]
    InvalidResource(String),
    #[error("request cancelled")]
    Cancelled,
}

impl AccessControlError {
    /// True for errors caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidScope(_)
                | Self::UnknownPermissionLevel(_)
                | Self::InvalidAction(_)
                | Self::InvalidRoleName(_)
                | Self::InvalidBuiltInRole(_)
                | Self::AssignmentDisabled(_)
                | Self::InvalidResource(_)
        )
    }
}

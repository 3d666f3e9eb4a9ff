use anyhow::{Result, anyhow};
use platform_db::DatabaseSettings;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub access_control_enabled: bool,
    /// `None` runs the server on the in-memory store.
    pub database_url: Option<String>,
    pub viewers_can_edit: bool,
    pub cors_allowed_origins: Vec<String>,
    pub log_filter: Option<String>,
    pub otlp_endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            access_control_enabled: true,
            database_url: None,
            viewers_can_edit: false,
            cors_allowed_origins: Vec::new(),
            log_filter: None,
            otlp_endpoint: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let access_control_enabled =
            parse_flag("ACCESS_CONTROL_ENABLED", non_empty("ACCESS_CONTROL_ENABLED"), true)?;
        let viewers_can_edit =
            parse_flag("VIEWERS_CAN_EDIT", non_empty("VIEWERS_CAN_EDIT"), false)?;

        let cors_allowed_origins = non_empty("CORS_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect::<Vec<_>>();

        Ok(Self {
            access_control_enabled,
            database_url: non_empty(DatabaseSettings::default().env_key()),
            viewers_can_edit,
            cors_allowed_origins,
            log_filter: non_empty("LOG_FILTER"),
            otlp_endpoint: non_empty("OTLP_ENDPOINT"),
        })
    }
}

fn parse_flag(key: &str, raw: Option<String>, default: bool) -> Result<bool> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("{key} must be a boolean, got {other:?}")),
    }
}

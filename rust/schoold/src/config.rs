use crate::store::DeletePolicy;
use anyhow::{anyhow, Context};
use std::path::PathBuf;

pub const ENV_WORKSPACE: &str = "SCHOOLD_WORKSPACE";
pub const ENV_DELETE_POLICY: &str = "SCHOOLD_DELETE_POLICY";
pub const ENV_LOG_JSON: &str = "SCHOOLD_LOG_JSON";

/// Startup configuration for the sidecar, read once from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,
    pub delete_policy: DeletePolicy,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let workspace = lookup(ENV_WORKSPACE)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let delete_policy = match lookup(ENV_DELETE_POLICY) {
            Some(v) if !v.trim().is_empty() => v
                .parse::<DeletePolicy>()
                .map_err(|e| anyhow!(e))
                .with_context(|| format!("{ENV_DELETE_POLICY}={v}"))?,
            _ => DeletePolicy::default(),
        };

        let log_json = match lookup(ENV_LOG_JSON) {
            Some(v) => parse_flag(&v).with_context(|| format!("{ENV_LOG_JSON}={v}"))?,
            None => false,
        };

        Ok(Self {
            workspace,
            delete_policy,
            log_json,
        })
    }
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        other => Err(anyhow!("expected a boolean flag, got {other:?}")),
    }
}

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Env var selecting the active profile.
pub const PROFILE_ENV: &str = "SQS_BROKER_PROFILE";

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    pub aws: AwsConfig,
    pub provider: ProviderConfig,
}

impl BrokerConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SQS_BROKER_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or(PROFILE_ENV, "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            aws: AwsConfig::from_env_profiled(p),
            provider: ProviderConfig::from_env_profiled(p),
        }
    }

    /// Reject configurations the provider cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider.validate()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  aws:       region={}, static_credentials={}, endpoint={}",
            self.aws.region,
            self.aws.has_static_credentials(),
            self.aws.endpoint_url.as_deref().unwrap_or("(default)")
        );
        tracing::info!(
            "  provider:  prefix={}, deploy_env={}, boundary={}, additional_policy={}",
            self.provider.resource_prefix,
            self.provider.deploy_env,
            self.provider.permissions_boundary.as_deref().unwrap_or("(none)"),
            self.provider.additional_user_policy.as_deref().unwrap_or("(none)")
        );
        tracing::info!(
            "  polling:   bind_timeout={}s, interval={}s",
            self.provider.bind_timeout_secs,
            self.provider.poll_interval_secs
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "aws": {
                "region": self.aws.region,
                "endpoint_url": self.aws.endpoint_url,
                "static_credentials": self.aws.has_static_credentials(),
            },
            "provider": {
                "resource_prefix": self.provider.resource_prefix,
                "deploy_env": self.provider.deploy_env,
                "permissions_boundary": self.provider.permissions_boundary,
                "additional_user_policy": self.provider.additional_user_policy,
                "bind_timeout_secs": self.provider.bind_timeout_secs,
                "poll_interval_secs": self.provider.poll_interval_secs,
            },
        })
    }
}

// ── AWS ───────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "eu-west-2"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            endpoint_url: profiled_env_opt(p, "AWS_ENDPOINT_URL"),
        }
    }

    /// True when both halves of a static key pair are present.
    pub fn has_static_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

impl std::fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

// ── Provider ──────────────────────────────────────────────────

/// Settings for the provisioning orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Prefix for stack names and the IAM user path.
    pub resource_prefix: String,
    /// Environment tag applied to every provisioned resource.
    pub deploy_env: String,
    /// Permissions boundary ARN attached to binding users.
    pub permissions_boundary: Option<String>,
    /// Managed policy ARN attached to binding users in addition to the queue policy.
    pub additional_user_policy: Option<String>,
    /// Maximum wait for a synchronous bind.
    pub bind_timeout_secs: u64,
    /// Delay between stack status checks during a synchronous bind.
    pub poll_interval_secs: u64,
}

impl ProviderConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            resource_prefix: profiled_env_or(p, "BROKER_RESOURCE_PREFIX", ""),
            deploy_env: profiled_env_or(p, "BROKER_DEPLOY_ENV", "dev"),
            permissions_boundary: profiled_env_opt(p, "BROKER_PERMISSIONS_BOUNDARY"),
            additional_user_policy: profiled_env_opt(p, "BROKER_ADDITIONAL_USER_POLICY"),
            bind_timeout_secs: profiled_env_u64(p, "BROKER_BIND_TIMEOUT_SECS", 600),
            poll_interval_secs: profiled_env_u64(p, "BROKER_POLL_INTERVAL_SECS", 5),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resource_prefix.trim().is_empty() {
            return Err(ConfigError::Missing("BROKER_RESOURCE_PREFIX".into()));
        }
        if self.resource_prefix.contains('/') {
            return Err(ConfigError::Invalid {
                key: "BROKER_RESOURCE_PREFIX".into(),
                reason: "must not contain '/'".into(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "BROKER_POLL_INTERVAL_SECS".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn bind_timeout(&self) -> Duration {
        Duration::from_secs(self.bind_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

// ── Tests ────────────────────────────────────────────────────────

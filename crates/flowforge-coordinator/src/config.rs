//! `RuntimeConfig`: typed accessors over the environment variables
//! enumerated in §6.4, constructed once at process start and passed by
//! reference (the teacher's `RunnerConfig` pattern in its worker crate —
//! no global state, no lazy-static).

use std::collections::HashMap;
use std::path::PathBuf;

/// Per-persona retry ceiling: a finite count, or `unlimited` (§6.4
/// `PERSONA_MAX_RETRIES`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    Limited(u32),
    Unlimited,
}

impl RetryLimit {
    fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("unlimited") {
            return Some(Self::Unlimited);
        }
        raw.parse::<u32>().ok().map(Self::Limited)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(max) => attempt <= *max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    Redis,
    Local,
}

/// Process-wide configuration, read once via [`RuntimeConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub project_base: PathBuf,
    pub default_repo_name: String,
    pub allow_workspace_git: bool,

    pub git_username: Option<String>,
    pub git_password: Option<String>,
    pub git_token: Option<String>,
    pub git_ssh_key_path: Option<String>,
    pub git_credentials_path: Option<String>,
    pub git_default_branch: String,
    pub git_user_name: Option<String>,
    pub git_user_email: Option<String>,

    pub transport_type: TransportType,
    pub broker_url: Option<String>,
    pub request_stream: String,
    pub event_stream: String,
    pub group_prefix: String,
    /// Unique per process (§5: "a fresh UUID per process"), so no two
    /// coordinators compete for the same workload under the same consumer
    /// name. Overridable via `CONSUMER_ID` for deterministic tests.
    pub consumer_id: String,

    pub persona_timeouts: HashMap<String, u64>,
    pub persona_max_retries: HashMap<String, RetryLimit>,
    pub persona_default_timeout_ms: u64,
    pub persona_default_max_retries: RetryLimit,
    pub persona_retry_backoff_increment_ms: u64,
    pub allowed_personas: Vec<String>,

    pub skip_persona_operations: bool,
    pub skip_git_operations: bool,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_string(key) {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_string(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parses `PERSONA_TIMEOUTS`/`PERSONA_MAX_RETRIES`-shaped env vars: a JSON
/// object mapping persona name to value. Malformed JSON yields an empty
/// map rather than failing process startup.
fn env_json_map<T>(key: &str, parse: impl Fn(&serde_json::Value) -> Option<T>) -> HashMap<String, T> {
    let Some(raw) = env_string(key) else {
        return HashMap::new();
    };
    let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(&raw) else {
        return HashMap::new();
    };
    obj.iter()
        .filter_map(|(k, v)| parse(v).map(|parsed| (k.clone(), parsed)))
        .collect()
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let persona_max_retries_raw = env_string("PERSONA_MAX_RETRIES");
        let persona_max_retries = persona_max_retries_raw
            .as_deref()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .and_then(|v| v.as_object().cloned())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| {
                        let as_limit = match v {
                            serde_json::Value::String(s) => RetryLimit::parse(s),
                            serde_json::Value::Number(n) => n.as_u64().map(|n| RetryLimit::Limited(n as u32)),
                            _ => None,
                        };
                        as_limit.map(|limit| (k.clone(), limit))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let persona_default_max_retries = env_string("PERSONA_DEFAULT_MAX_RETRIES")
            .and_then(|raw| RetryLimit::parse(&raw))
            .unwrap_or(RetryLimit::Limited(3));

        Self {
            project_base: env_string("PROJECT_BASE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp/flowforge-workspaces")),
            default_repo_name: env_string("DEFAULT_REPO_NAME").unwrap_or_else(|| "repo".to_string()),
            allow_workspace_git: env_bool("ALLOW_WORKSPACE_GIT", false),

            git_username: env_string("GIT_USERNAME"),
            git_password: env_string("GIT_PASSWORD"),
            git_token: env_string("GIT_TOKEN"),
            git_ssh_key_path: env_string("GIT_SSH_KEY_PATH"),
            git_credentials_path: env_string("GIT_CREDENTIALS_PATH"),
            git_default_branch: env_string("GIT_DEFAULT_BRANCH").unwrap_or_else(|| "main".to_string()),
            git_user_name: env_string("GIT_USER_NAME"),
            git_user_email: env_string("GIT_USER_EMAIL"),

            transport_type: match env_string("TRANSPORT_TYPE").as_deref() {
                Some("redis") => TransportType::Redis,
                _ => TransportType::Local,
            },
            broker_url: env_string("BROKER_URL"),
            request_stream: env_string("REQUEST_STREAM").unwrap_or_else(|| "agent.requests".to_string()),
            event_stream: env_string("EVENT_STREAM").unwrap_or_else(|| "agent.events".to_string()),
            group_prefix: env_string("GROUP_PREFIX").unwrap_or_else(|| "flowforge".to_string()),
            consumer_id: env_string("CONSUMER_ID").unwrap_or_else(|| uuid::Uuid::now_v7().to_string()),

            persona_timeouts: env_json_map("PERSONA_TIMEOUTS", |v| v.as_u64()),
            persona_max_retries,
            persona_default_timeout_ms: env_u64("PERSONA_DEFAULT_TIMEOUT_MS", 60_000),
            persona_default_max_retries,
            persona_retry_backoff_increment_ms: env_u64("PERSONA_RETRY_BACKOFF_INCREMENT_MS", 15_000),
            allowed_personas: env_string("ALLOWED_PERSONAS")
                .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default(),

            skip_persona_operations: env_bool("SKIP_PERSONA_OPERATIONS", false),
            skip_git_operations: env_bool("SKIP_GIT_OPERATIONS", false),
        }
    }

    pub fn timeout_for(&self, persona: &str) -> u64 {
        self.persona_timeouts
            .get(persona)
            .copied()
            .unwrap_or(self.persona_default_timeout_ms)
    }

    pub fn max_retries_for(&self, persona: &str) -> RetryLimit {
        self.persona_max_retries
            .get(persona)
            .copied()
            .unwrap_or(self.persona_default_max_retries)
    }

    pub fn persona_allowed(&self, persona: &str) -> bool {
        self.allowed_personas.is_empty() || self.allowed_personas.iter().any(|p| p == persona)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_limit_parses_unlimited_case_insensitively() {
        assert_eq!(RetryLimit::parse("Unlimited"), Some(RetryLimit::Unlimited));
        assert_eq!(RetryLimit::parse("5"), Some(RetryLimit::Limited(5)));
        assert_eq!(RetryLimit::parse("nope"), None);
    }

    #[test]
    fn retry_limit_allows_respects_ceiling() {
        assert!(RetryLimit::Limited(3).allows(3));
        assert!(!RetryLimit::Limited(3).allows(4));
        assert!(RetryLimit::Unlimited.allows(1_000));
    }

    #[test]
    fn json_map_parse_ignores_malformed_input() {
        std::env::set_var("FLOWFORGE_TEST_TIMEOUTS", "not json");
        let map = env_json_map("FLOWFORGE_TEST_TIMEOUTS", |v| v.as_u64());
        assert!(map.is_empty());
        std::env::remove_var("FLOWFORGE_TEST_TIMEOUTS");
    }
}

use std::collections::HashMap;
use std::time::Duration;

use crate::query::path::CaseStyle;
use crate::retry::BackoffPolicy;

/// Cookie-auth parameters (`auth: {name, password, tokenDurationMinutes}` in spec.md §6).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub name: String,
    pub password: String,
    pub token_duration: Duration,
}

impl AuthConfig {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            token_duration: Duration::from_secs(10 * 60),
        }
    }

    pub fn token_duration_minutes(mut self, minutes: u64) -> Self {
        self.token_duration = Duration::from_secs(minutes * 60);
        self
    }
}

/// The full configuration surface from spec.md §6, built with the same
/// chaining idiom the teacher uses for `MangoQuery`/`Index`/`ChangesQueryParams`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub auth: Option<AuthConfig>,
    pub property_case_style: CaseStyle,
    pub property_overrides: HashMap<String, String>,
    pub query_cache_size: usize,
    pub find_timeout: Option<Duration>,
    pub changes_heartbeat: Duration,
    pub documents_must_have_id_prefix: Option<String>,
    pub retry_policy: BackoffPolicy,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth: None,
            property_case_style: CaseStyle::AsIs,
            property_overrides: HashMap::new(),
            query_cache_size: 256,
            find_timeout: None,
            changes_heartbeat: Duration::from_secs(60),
            documents_must_have_id_prefix: None,
            retry_policy: BackoffPolicy::default(),
        }
    }

    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn property_case_style(mut self, style: CaseStyle) -> Self {
        self.property_case_style = style;
        self
    }

    pub fn property_override(mut self, member: impl Into<String>, wire_name: impl Into<String>) -> Self {
        self.property_overrides.insert(member.into(), wire_name.into());
        self
    }

    pub fn query_cache_size(mut self, size: usize) -> Self {
        self.query_cache_size = size;
        self
    }

    pub fn find_timeout(mut self, timeout: Duration) -> Self {
        self.find_timeout = Some(timeout);
        self
    }

    pub fn changes_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.changes_heartbeat = heartbeat;
        self
    }

    pub fn documents_must_have_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.documents_must_have_id_prefix = Some(prefix.into());
        self
    }

    pub fn retry_policy(mut self, policy: BackoffPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

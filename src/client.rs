use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};

use crate::auth::SessionAuth;
use crate::config::ClientConfig;
use crate::db::CouchDatabase;
use crate::error::Error;
use crate::query::{PropertyPolicy, QueryCompiler};
use crate::retry::{response_to_error, with_retry};

/// Server identification, returned by `CouchClient::info`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ServerInfo {
    pub couchdb: String,
    pub version: String,
    pub vendor: Vendor,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Vendor {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseActionResult {
    pub ok: bool,
}

/// Entry point: owns the shared `reqwest::Client`, endpoint, configuration
/// and session-cookie cell. Cheap to clone (internals are `Arc`-free but
/// every field is itself shareable); in practice one `CouchClient` is built
/// once per process and handed `database()`-constructed handles around.
#[derive(Clone)]
pub struct CouchClient {
    http: HttpClient,
    config: ClientConfig,
    auth: Option<std::sync::Arc<SessionAuth>>,
    compiler: std::sync::Arc<QueryCompiler>,
}

impl CouchClient {
    pub fn new(config: ClientConfig) -> Self {
        let auth = config
            .auth
            .clone()
            .map(|auth_config| std::sync::Arc::new(SessionAuth::new(auth_config)));
        let compiler = std::sync::Arc::new(QueryCompiler::new(config.query_cache_size));
        Self {
            http: HttpClient::new(),
            config,
            auth,
            compiler,
        }
    }

    pub(crate) fn compiler(&self) -> &QueryCompiler {
        &self.compiler
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn property_policy(&self) -> PropertyPolicy {
        PropertyPolicy::new(self.config.property_case_style, self.config.property_overrides.clone())
    }

    pub(crate) async fn authenticated_request(&self, mut builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, Error> {
        if let Some(auth) = &self.auth {
            let cookie = auth.token(&self.http, &self.config.endpoint).await?;
            builder = builder.header(reqwest::header::COOKIE, format!("AuthSession={cookie}"));
        }
        Ok(builder)
    }

    pub(crate) async fn reauthenticate(&self) -> Result<(), Error> {
        if let Some(auth) = &self.auth {
            auth.reauthenticate(&self.http, &self.config.endpoint).await?;
        }
        Ok(())
    }

    pub(crate) fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Runs `op` under the configured backoff policy: retries
    /// transport/server errors with exponential backoff and jitter, and
    /// re-authenticates exactly once on a stale session.
    pub(crate) async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        with_retry(self.config.retry_policy, || self.reauthenticate(), op).await
    }

    /// Server identification (`GET /`).
    pub async fn info(&self) -> Result<ServerInfo, Error> {
        self.with_retry(|| async {
            let builder = self.authenticated_request(self.http.get(&self.config.endpoint)).await?;
            let response = builder.send().await?;
            if !response.status().is_success() {
                return Err(response_to_error(response).await);
            }
            Ok(response.json().await?)
        })
        .await
    }

    /// `GET /_all_dbs`.
    pub async fn all_dbs(&self) -> Result<Vec<String>, Error> {
        let url = format!("{}/_all_dbs", self.config.endpoint);
        self.with_retry(|| async {
            let builder = self.authenticated_request(self.http.get(&url)).await?;
            let response = builder.send().await?;
            if !response.status().is_success() {
                return Err(response_to_error(response).await);
            }
            Ok(response.json().await?)
        })
        .await
    }

    /// `PUT /{db}` — out of scope for the core per spec.md §1, kept as the
    /// thin administrative escape hatch the teacher also exposes.
    pub async fn create_database(&self, db_name: &str) -> Result<DatabaseActionResult, Error> {
        let url = format!("{}/{}", self.config.endpoint, escape_db_name(db_name));
        self.with_retry(|| async {
            let builder = self.authenticated_request(self.http.put(&url)).await?;
            let response = builder.send().await?;
            if !response.status().is_success() {
                return Err(response_to_error(response).await);
            }
            Ok(response.json().await?)
        })
        .await
    }

    /// `DELETE /{db}`.
    pub async fn delete_database(&self, db_name: &str) -> Result<DatabaseActionResult, Error> {
        let url = format!("{}/{}", self.config.endpoint, escape_db_name(db_name));
        self.with_retry(|| async {
            let builder = self.authenticated_request(self.http.delete(&url)).await?;
            let response = builder.send().await?;
            if !response.status().is_success() {
                return Err(response_to_error(response).await);
            }
            Ok(response.json().await?)
        })
        .await
    }

    /// Constructs a handle bound to one database, mirroring the teacher's
    /// `Nano::use_db`.
    pub fn database(&self, db_name: impl Into<String>) -> CouchDatabase {
        let db_name = db_name.into();
        let escaped = escape_db_name(&db_name);
        CouchDatabase::new(self.clone(), db_name, escaped)
    }
}

/// Percent-escapes `/`, `+`, `$`, `(`, `)` (and anything else non-alphanumeric)
/// in a database name, per spec.md §6.
pub(crate) fn escape_db_name(db_name: &str) -> String {
    utf8_percent_encode(db_name, NON_ALPHANUMERIC).to_string()
}

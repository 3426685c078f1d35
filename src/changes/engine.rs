use async_stream::try_stream;
use futures_core::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::CouchClient;
use crate::error::Error;
use crate::query::PropertyPolicy;
use crate::retry::response_to_error;

use super::filter::ChangesFilter;
use super::options::ChangesFeedOptions;

/// One entry of a document's leaf revisions, per spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRev {
    pub rev: String,
}

/// One event from a changes feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct ChangesEvent<T> {
    pub seq: String,
    pub id: String,
    pub changes: Vec<ChangeRev>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default = "Option::default")]
    pub doc: Option<T>,
}

/// The whole-payload response of a normal or long-poll feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct ChangesPage<T> {
    pub results: Vec<ChangesEvent<T>>,
    pub last_seq: String,
    #[serde(default)]
    pub pending: i64,
}

/// Executes normal, long-poll, and continuous changes feeds (spec.md §4.G).
pub struct ChangesEngine<'a> {
    client: &'a CouchClient,
    escaped_db_name: &'a str,
}

impl<'a> ChangesEngine<'a> {
    pub fn new(client: &'a CouchClient, escaped_db_name: &'a str) -> Self {
        Self { client, escaped_db_name }
    }

    /// Normal feed: GET `/_changes`, returning the whole payload at once.
    pub async fn normal<T>(
        &self,
        options: &ChangesFeedOptions,
        filter: Option<&ChangesFilter>,
        policy: &PropertyPolicy,
    ) -> Result<ChangesPage<T>, Error>
    where
        T: DeserializeOwned,
    {
        self.page(options, filter, policy, "normal").await
    }

    /// Long-poll feed: GET `/_changes?feed=longpoll`, blocking server-side
    /// until the first change or `options.timeout`.
    pub async fn long_poll<T>(
        &self,
        options: &ChangesFeedOptions,
        filter: Option<&ChangesFilter>,
        policy: &PropertyPolicy,
    ) -> Result<ChangesPage<T>, Error>
    where
        T: DeserializeOwned,
    {
        self.page(options, filter, policy, "longpoll").await
    }

    async fn page<T>(
        &self,
        options: &ChangesFeedOptions,
        filter: Option<&ChangesFilter>,
        policy: &PropertyPolicy,
        feed: &str,
    ) -> Result<ChangesPage<T>, Error>
    where
        T: DeserializeOwned,
    {
        let (url, body) = self.build_request(options, filter, policy, feed)?;
        let builder = if body.is_some() {
            self.client.http().post(&url)
        } else {
            self.client.http().get(&url)
        };
        let mut request = self.client.authenticated_request(builder).await?;
        if let Some(body) = &body {
            request = request.json(body);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(response_to_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// Continuous feed: GET `/_changes?feed=continuous`, yielding one event
    /// per NDJSON line until `cancel` is triggered or the connection ends.
    /// Backpressure falls naturally out of the stream protocol: a line is
    /// only pulled off the wire when the consumer polls for the next item.
    pub fn continuous<T>(
        &self,
        options: ChangesFeedOptions,
        filter: Option<ChangesFilter>,
        policy: PropertyPolicy,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<ChangesEvent<T>, Error>> + 'a
    where
        T: DeserializeOwned + 'a,
    {
        let client = self.client.clone();
        let endpoint = self.client.endpoint().to_string();
        let escaped_db_name = self.escaped_db_name.to_string();
        let default_heartbeat_millis = self.client.config().changes_heartbeat.as_millis() as i64;

        try_stream! {
            let (url, body) = build_request_owned(&endpoint, &escaped_db_name, &options, filter.as_ref(), &policy, "continuous", default_heartbeat_millis)?;
            let builder = if body.is_some() { client.http().post(&url) } else { client.http().get(&url) };
            let mut request = client.authenticated_request(builder).await?;
            if let Some(body) = &body {
                request = request.json(body);
            }

            let sent = tokio::select! {
                result = request.send() => result,
                _ = cancel.cancelled() => return,
            };
            let response = sent?;
            if response.status().is_success() {
                let mut stream = response.bytes_stream();
                let mut buffer: Vec<u8> = Vec::new();

                loop {
                    let chunk = tokio::select! {
                        chunk = futures_util::StreamExt::next(&mut stream) => chunk,
                        _ = cancel.cancelled() => break,
                    };
                    let chunk = match chunk {
                        Some(chunk) => chunk?,
                        None => break,
                    };
                    buffer.extend_from_slice(&chunk);

                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        let mut line = &line[..line.len() - 1];
                        if line.last() == Some(&b'\r') {
                            line = &line[..line.len() - 1];
                        }
                        if line.is_empty() {
                            continue;
                        }
                        let value: Value = serde_json::from_slice(line)?;
                        if value.get("last_seq").is_some() {
                            break;
                        }
                        let event: ChangesEvent<T> = serde_json::from_value(value)?;
                        yield event;
                    }
                }
            } else {
                Err(response_to_error(response).await)?;
            }
        }
    }

    fn build_request(
        &self,
        options: &ChangesFeedOptions,
        filter: Option<&ChangesFilter>,
        policy: &PropertyPolicy,
        feed: &str,
    ) -> Result<(String, Option<Value>), Error> {
        let default_heartbeat_millis = self.client.config().changes_heartbeat.as_millis() as i64;
        build_request_owned(
            self.client.endpoint(),
            self.escaped_db_name,
            options,
            filter,
            policy,
            feed,
            default_heartbeat_millis,
        )
    }
}

fn build_request_owned(
    endpoint: &str,
    escaped_db_name: &str,
    options: &ChangesFeedOptions,
    filter: Option<&ChangesFilter>,
    policy: &PropertyPolicy,
    feed: &str,
    default_heartbeat_millis: i64,
) -> Result<(String, Option<Value>), Error> {
    let mut params = options.to_query_params();
    if feed != "normal" {
        params.push(("feed", feed.to_string()));
        if options.heartbeat.is_none() {
            params.push(("heartbeat", default_heartbeat_millis.to_string()));
        }
    }
    let mut body = None;
    if let Some(filter) = filter {
        let resolved = filter.resolve(policy)?;
        if let Some(filter_param) = resolved.filter_param {
            params.push(("filter", filter_param));
        }
        params.extend(resolved.extra_params);
        body = resolved.body;
    }
    let query = params
        .into_iter()
        .map(|(k, v)| format!("{k}={}", percent_encoding::utf8_percent_encode(&v, percent_encoding::NON_ALPHANUMERIC)))
        .collect::<Vec<_>>()
        .join("&");
    let url = if query.is_empty() {
        format!("{endpoint}/{escaped_db_name}/_changes")
    } else {
        format!("{endpoint}/{escaped_db_name}/_changes?{query}")
    };
    Ok((url, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::PropertyPolicy;

    #[test]
    fn normal_feed_gets_no_default_heartbeat() {
        let (url, _) = build_request_owned("http://h", "db", &ChangesFeedOptions::new(), None, &PropertyPolicy::default(), "normal", 30_000).unwrap();
        assert!(!url.contains("heartbeat"));
    }

    #[test]
    fn continuous_feed_falls_back_to_the_configured_default_heartbeat() {
        let (url, _) = build_request_owned("http://h", "db", &ChangesFeedOptions::new(), None, &PropertyPolicy::default(), "continuous", 30_000).unwrap();
        assert!(url.contains("heartbeat=30000"));
    }

    #[test]
    fn explicit_heartbeat_option_overrides_the_configured_default() {
        let opts = ChangesFeedOptions::new().heartbeat(5_000);
        let (url, _) = build_request_owned("http://h", "db", &opts, None, &PropertyPolicy::default(), "continuous", 30_000).unwrap();
        assert!(url.contains("heartbeat=5000"));
        assert!(!url.contains("heartbeat=30000"));
    }
}

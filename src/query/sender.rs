use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::client::CouchClient;
use crate::document::{Attachment, AttachmentState};
use crate::error::Error;
use crate::retry::response_to_error;

use super::translator::MangoQueryDoc;

/// Deserialized `/{db}/_find` response, generic over the caller's document
/// payload type.
#[derive(Debug, serde::Deserialize)]
pub struct FindResponse<T> {
    pub docs: Vec<T>,
    #[serde(default)]
    pub bookmark: Option<String>,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub execution_stats: Option<Value>,
}

/// POSTs a Mango query document to `/{db}/_find` and hydrates attachment URIs
/// on every returned document, per spec.md §4.E.
pub async fn find<T>(
    client: &CouchClient,
    escaped_db_name: &str,
    doc: &MangoQueryDoc,
) -> Result<FindResponse<crate::document::Document<T>>, Error>
where
    T: Serialize + DeserializeOwned,
{
    let body = serde_json::to_value(doc)?;
    find_raw_value(client, escaped_db_name, &body).await
}

/// Posts a pre-built Mango query, bypassing IR translation. Still hydrates
/// attachment URIs on the returned rows.
pub async fn find_raw_value<T>(
    client: &CouchClient,
    escaped_db_name: &str,
    mango_query: &Value,
) -> Result<FindResponse<crate::document::Document<T>>, Error>
where
    T: Serialize + DeserializeOwned,
{
    let endpoint = client.endpoint();
    let url = format!("{endpoint}/{escaped_db_name}/_find");
    let mut builder = client.authenticated_request(client.http().post(&url)).await?.json(mango_query);
    if let Some(timeout) = client.config().find_timeout {
        builder = builder.timeout(timeout);
    }
    let response = builder.send().await?;
    if !response.status().is_success() {
        return Err(response_to_error(response).await);
    }
    let mut result: FindResponse<crate::document::Document<T>> = response.json().await?;
    for row in &mut result.docs {
        hydrate_attachments(row, endpoint, escaped_db_name);
    }
    Ok(result)
}

/// Posts a pre-built Mango query given as a raw JSON string.
pub async fn find_raw_str<T>(
    client: &CouchClient,
    escaped_db_name: &str,
    mango_query: &str,
) -> Result<FindResponse<crate::document::Document<T>>, Error>
where
    T: Serialize + DeserializeOwned,
{
    let value: Value = serde_json::from_str(mango_query)?;
    find_raw_value(client, escaped_db_name, &value).await
}

fn hydrate_attachments<T>(doc: &mut crate::document::Document<T>, endpoint: &str, escaped_db_name: &str) {
    let id = doc.id.clone();
    let rev = doc.rev.clone();
    for attachment in doc.attachments.values_mut() {
        set_attachment_uri(attachment, endpoint, escaped_db_name, &id);
        attachment.document_id = Some(id.clone());
        attachment.document_rev = rev.clone();
        attachment.state = AttachmentState::Clean;
    }
}

fn set_attachment_uri(attachment: &mut Attachment, endpoint: &str, escaped_db_name: &str, id: &str) {
    let escaped_name = utf8_percent_encode(&attachment.name, NON_ALPHANUMERIC).to_string();
    let escaped_id = utf8_percent_encode(id, NON_ALPHANUMERIC).to_string();
    attachment.uri = Some(format!(
        "{endpoint}/{escaped_db_name}/{escaped_id}/{escaped_name}"
    ));
}

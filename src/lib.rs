//! Typed query-builder, Mango translator, changes-feed engine and
//! document/attachment model for a CouchDB-compatible JSON-over-HTTP
//! document database.
#[cfg(feature = "color")]
pub use colored_json;

pub mod auth;
pub mod changes;
pub mod client;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod query;
mod retry;

pub use client::CouchClient;
pub use config::{AuthConfig, ClientConfig};
pub use db::CouchDatabase;
pub use document::{Attachment, AttachmentState, Document};
pub use error::{CouchDbErrorBody, Error};

use serde::Serialize;
use serde_json::Value;

/// Convenience conversions shared across response/wire types, kept from the
/// teacher's `Convert` trait.
pub trait Convert {
    fn to_string_pretty(&self) -> Result<String, Error>
    where
        Self: Serialize,
    {
        let u = serde_json::to_value(&self)?;
        Ok(serde_json::to_string_pretty(&u)?)
    }

    fn to_json(&self) -> Result<Value, Error>
    where
        Self: Serialize,
    {
        Ok(serde_json::to_value(&self)?)
    }

    #[cfg(feature = "color")]
    fn to_colored_string(&self) -> Result<String, Error>
    where
        Self: Serialize,
    {
        let u = serde_json::to_value(&self)?;
        Ok(colored_json::to_colored_json_auto(&u)?)
    }
}

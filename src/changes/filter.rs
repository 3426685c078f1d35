use serde_json::Value;

use crate::query::{Expr, PropertyPolicy};

/// Server-side filter negotiation for a changes feed (spec.md §4.G).
#[derive(Debug, Clone)]
pub enum ChangesFilter {
    /// `filter=_selector`, posted as `{selector: ...}`.
    Selector(Expr),
    /// `filter=_doc_ids`, posted as `{doc_ids: [...]}`.
    DocumentIds(Vec<String>),
    /// `filter=_view`, `view=<ddoc>/<view>`.
    View(String),
    /// `filter=_design`.
    Design,
    /// `filter=<ddoc>/<name>`, a named filter function.
    Named(String),
}

/// The resolved wire shape of a filter: the `filter` query parameter value,
/// any additional query parameters it requires, and an optional POST body.
pub(crate) struct ResolvedFilter {
    pub filter_param: Option<String>,
    pub extra_params: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl ChangesFilter {
    pub(crate) fn resolve(&self, policy: &PropertyPolicy) -> Result<ResolvedFilter, crate::error::Error> {
        match self {
            ChangesFilter::Selector(expr) => {
                let optimized = crate::query::optimizer::optimize(expr.clone())?;
                let selector = crate::query::translator::translate(&optimized, policy)?;
                Ok(ResolvedFilter {
                    filter_param: Some("_selector".to_string()),
                    extra_params: Vec::new(),
                    body: Some(serde_json::json!({ "selector": selector.selector })),
                })
            }
            ChangesFilter::DocumentIds(ids) => Ok(ResolvedFilter {
                filter_param: Some("_doc_ids".to_string()),
                extra_params: Vec::new(),
                body: Some(serde_json::json!({ "doc_ids": ids })),
            }),
            ChangesFilter::View(name) => Ok(ResolvedFilter {
                filter_param: Some("_view".to_string()),
                extra_params: vec![("view", name.clone())],
                body: None,
            }),
            ChangesFilter::Design => Ok(ResolvedFilter {
                filter_param: Some("_design".to_string()),
                extra_params: Vec::new(),
                body: None,
            }),
            ChangesFilter::Named(name) => Ok(ResolvedFilter {
                filter_param: Some(name.clone()),
                extra_params: Vec::new(),
                body: None,
            }),
        }
    }
}

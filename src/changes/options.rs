/// Revisions-returned policy for a changes feed, per the CouchDB `style`
/// query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    MainOnly,
    AllDocs,
}

impl Style {
    fn as_wire_str(self) -> &'static str {
        match self {
            Style::MainOnly => "main_only",
            Style::AllDocs => "all_docs",
        }
    }
}

/// Options recognized by the Changes Feed Engine (spec.md §4.G's table),
/// built with the same `.field(value)` chaining the teacher uses for
/// `ChangesQueryParams`.
#[derive(Debug, Clone, Default)]
pub struct ChangesFeedOptions {
    pub since: Option<String>,
    pub include_docs: bool,
    pub limit: Option<i64>,
    pub descending: bool,
    pub heartbeat: Option<i64>,
    pub timeout: Option<i64>,
    pub conflicts: bool,
    pub attachments: bool,
    pub att_encoding_info: bool,
    pub style: Option<Style>,
}

impl ChangesFeedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: impl Into<String>) -> Self {
        self.since = Some(since.into());
        self
    }

    pub fn include_docs(mut self, enable: bool) -> Self {
        self.include_docs = enable;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn descending(mut self, enable: bool) -> Self {
        self.descending = enable;
        self
    }

    pub fn heartbeat(mut self, millis: i64) -> Self {
        self.heartbeat = Some(millis);
        self
    }

    pub fn timeout(mut self, millis: i64) -> Self {
        self.timeout = Some(millis);
        self
    }

    pub fn conflicts(mut self, enable: bool) -> Self {
        self.conflicts = enable;
        self
    }

    pub fn attachments(mut self, enable: bool) -> Self {
        self.attachments = enable;
        self
    }

    pub fn att_encoding_info(mut self, enable: bool) -> Self {
        self.att_encoding_info = enable;
        self
    }

    pub fn style(mut self, style: Style) -> Self {
        self.style = Some(style);
        self
    }

    /// Renders to `(key, value)` query-string pairs, in a stable order.
    pub(crate) fn to_query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(since) = &self.since {
            params.push(("since", since.clone()));
        }
        if self.include_docs {
            params.push(("include_docs", "true".to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if self.descending {
            params.push(("descending", "true".to_string()));
        }
        if let Some(heartbeat) = self.heartbeat {
            params.push(("heartbeat", heartbeat.to_string()));
        }
        if let Some(timeout) = self.timeout {
            params.push(("timeout", timeout.to_string()));
        }
        if self.conflicts {
            params.push(("conflicts", "true".to_string()));
        }
        if self.attachments {
            params.push(("attachments", "true".to_string()));
        }
        if self.att_encoding_info {
            params.push(("att_encoding_info", "true".to_string()));
        }
        if let Some(style) = self.style {
            params.push(("style", style.as_wire_str().to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_only_set_fields() {
        let opts = ChangesFeedOptions::new().since("0").include_docs(true);
        let params = opts.to_query_params();
        assert_eq!(
            params,
            vec![("since", "0".to_string()), ("include_docs", "true".to_string())]
        );
    }
}

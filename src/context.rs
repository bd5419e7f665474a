use std::fmt;

/// Identity of one request, threaded through a call chain and used as the log prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub label: String,
}

impl RequestContext {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            label: label.into(),
        }
    }

    /// Same request id, narrower label (e.g. per stage)
    pub fn child(&self, label: impl Into<String>) -> Self {
        Self {
            request_id: self.request_id.clone(),
            label: label.into(),
        }
    }

    pub fn short_id(&self) -> &str {
        let end = self.request_id.len().min(8);
        &self.request_id[..end]
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.label, self.short_id())
    }
}

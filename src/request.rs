//! Request: the immutable unit of work handed to the orchestrator

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a request, used to correlate log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An incoming request.
///
/// Fields are read-only once built; the builder methods consume `self`.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    id: RequestId,
    query: String,
    kind: String,
    attributes: BTreeMap<String, String>,
    /// Set only by the engine itself on requests it re-enters after a prior
    /// ethical pass. Never derived from user-supplied fields.
    #[serde(skip)]
    ethics_cleared: bool,
}

impl Request {
    pub fn new(query: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            query: query.into(),
            kind: kind.into(),
            attributes: BTreeMap::new(),
            ethics_cleared: false,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_attributes<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub(crate) fn ethics_cleared(&self) -> bool {
        self.ethics_cleared
    }

    /// Mark a request the engine built itself as already past the ethical gate
    pub(crate) fn cleared(mut self) -> Self {
        self.ethics_cleared = true;
        self
    }
}

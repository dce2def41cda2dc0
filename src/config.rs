//! Client configuration.

use serde::{Deserialize, Serialize};

/// Namespace prefix used for remote method names when none is configured.
pub const DEFAULT_NAMESPACE: &str = "MR";

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix of every remote method: `<namespace>.<model>.<method>`.
    pub namespace: String,
    /// Per-stream buffer capacity for [`crate::live::LiveQueryStream`].
    pub stream_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            stream_capacity: 1024,
        }
    }
}

impl ClientConfig {
    /// Set the remote method namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the stream buffer capacity (clamped to at least 1).
    #[must_use]
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }

    /// Fully qualified method name for a model-scoped remote call.
    #[must_use]
    pub fn model_method(&self, model: &str, method: &str) -> String {
        format!("{}.{model}.{method}", self.namespace)
    }

    /// Fully qualified method name for a client-scoped remote call.
    #[must_use]
    pub fn client_method(&self, method: &str) -> String {
        format!("{}.{method}", self.namespace)
    }
}

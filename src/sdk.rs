//! Adapter seam for imported SDK libraries.
//!
//! The gateway never links a concrete SDK. An adapter exposes the library's
//! namespaces and callables through these traits, and the catalog builder
//! walks that object graph at startup. Opening a nested namespace may
//! require instantiating a client object (possibly with placeholder
//! credentials), which can fail; the [`NamespaceChild`] shape lets the
//! builder skip such children with a diagnostic instead of aborting.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::{auth::CredentialHandle, catalog::ParamSpec};

/// Named arguments handed to a callable, order-insensitive.
pub type CallArgs = BTreeMap<String, Value>;

/// Error reported by an underlying callable, pre-classified by the adapter.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream rate limit: {0}")]
    RateLimited(String),

    #[error("temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl CallError {
    /// Network-class errors, upstream throttling, and temporary outages are
    /// worth retrying; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CallError::Network(_) | CallError::RateLimited(_) | CallError::Unavailable(_)
        )
    }
}

/// One callable exposed by an SDK adapter.
#[async_trait]
pub trait SdkCallable: Send + Sync {
    /// Last segment of the canonical dotted name.
    fn name(&self) -> &str;

    /// Declared parameters, in call order.
    fn params(&self) -> Vec<ParamSpec>;

    /// Raw documentation text, if the adapter has any.
    fn doc(&self) -> Option<String> {
        None
    }

    /// Whether the callable tolerates arguments beyond its declared set.
    fn accepts_extra_args(&self) -> bool {
        false
    }

    /// Whether the underlying work suspends rather than blocks. Blocking
    /// adapters should move the work onto a blocking thread inside
    /// `invoke`; the engine drives both shapes under the same
    /// timeout/retry contract.
    fn is_async(&self) -> bool {
        true
    }

    /// Perform the call. The credential handle is whatever the auth
    /// resolver produced for this library family, or `None`.
    async fn invoke(
        &self,
        args: CallArgs,
        credential: Option<CredentialHandle>,
    ) -> Result<Value, CallError>;
}

/// A nested namespace slot. `Unavailable` covers children whose client
/// object could not be instantiated or introspected.
pub enum NamespaceChild {
    Ready {
        segment: String,
        namespace: Arc<dyn SdkNamespace>,
    },
    Unavailable {
        segment: String,
        reason: String,
    },
}

/// A node in an adapter's namespace graph.
pub trait SdkNamespace: Send + Sync {
    fn callables(&self) -> Vec<Arc<dyn SdkCallable>>;

    fn children(&self) -> Vec<NamespaceChild> {
        Vec::new()
    }
}

/// Handle to one imported library.
pub trait SdkLibrary: Send + Sync {
    /// Library family name; first segment of every canonical name.
    fn name(&self) -> &str;

    fn root(&self) -> Arc<dyn SdkNamespace>;
}

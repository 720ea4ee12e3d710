use crate::batch::LoaderId;
use std::sync::Arc;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Cache key, loader key or configuration field involved (e.g. "users/posts/9f2c..", "FRAGMENT_CACHE_MODE")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "memory_store", "batch_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for loaders, the fragment cache and the tick driver.
#[derive(Debug, Error)]
pub enum Error {
    /// A bulk fetch failed. Every waiter of the same loader in the same tick
    /// receives one of these pointing at the same underlying error.
    #[error("Fetch failed for loader `{loader}`: {source}")]
    Fetch {
        loader: LoaderId,
        #[source]
        source: Arc<Error>,
    },

    #[error("Persistence error: {message}{}", format_context(.context))]
    Persistence {
        message: String,
        context: ErrorContext,
    },

    #[error("Cache read error: {message}{}", format_context(.context))]
    CacheRead {
        message: String,
        context: ErrorContext,
    },

    #[error("Cache write error: {message}{}", format_context(.context))]
    CacheWrite {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Wrap a shared bulk-fetch failure for one waiter of `loader`.
    pub fn fetch(loader: LoaderId, source: Arc<Error>) -> Self {
        Error::Fetch { loader, source }
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Error::Persistence {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn persistence_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Persistence {
            message: msg.into(),
            context,
        }
    }

    pub fn cache_read_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::CacheRead {
            message: msg.into(),
            context,
        }
    }

    pub fn cache_write_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::CacheWrite {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Persistence { context, .. }
            | Error::CacheRead { context, .. }
            | Error::CacheWrite { context, .. }
            | Error::Configuration { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The loader whose bulk fetch produced this error, if any.
    pub fn loader(&self) -> Option<&LoaderId> {
        match self {
            Error::Fetch { loader, .. } => Some(loader),
            _ => None,
        }
    }

    /// True for cache infrastructure failures, which callers treat as a miss.
    pub fn is_cache_failure(&self) -> bool {
        matches!(self, Error::CacheRead { .. } | Error::CacheWrite { .. })
    }
}

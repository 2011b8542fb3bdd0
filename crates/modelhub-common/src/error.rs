//! Error types for the modelhub controllers
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the resource it concerns so that a reconciler can
//! surface the failure as a status condition without losing context.

use thiserror::Error;

use crate::ResourceKind;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for modelhub operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Declared spec is invalid and needs a user change
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// `namespace/name` of the offending object
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.versions[1].name")
        field: Option<String>,
    },

    /// A dependency the reconciler needs does not exist (yet)
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: ResourceKind,
        /// Namespace searched
        namespace: String,
        /// Name searched
        name: String,
    },

    /// A model version could not be translated into a Dataset spec
    #[error("cannot translate {source_type} source: {message}")]
    Translation {
        /// ModelSource type being translated
        source_type: String,
        /// Which field is missing or malformed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<ResourceKind>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a validation error without resource context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific `namespace/name`
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific resource and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a not-found error for a dependency
    pub fn not_found(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a translation error for the given source type
    pub fn translation(source_type: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Translation {
            source_type: source_type.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: ResourceKind, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, translation and serialization errors need a spec change.
    /// Kubernetes 4xx errors are not retryable except for 409 Conflict and
    /// 429 Too Many Requests, which clear on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    ae.code == 409 || ae.code == 429 || !(400..500).contains(&ae.code)
                }
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::NotFound { .. } => true,
            Error::Translation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// True when the store rejected a write because the object changed underneath us
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// Get the `namespace/name` this error concerns, if known
    pub fn resource(&self) -> Option<String> {
        match self {
            Error::Validation { resource, .. } => Some(resource.clone()),
            Error::NotFound {
                namespace, name, ..
            } => Some(format!("{}/{}", namespace, name)),
            _ => None,
        }
    }
}

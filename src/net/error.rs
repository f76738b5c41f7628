//! Endpoint error taxonomy.

use std::io;

use thiserror::Error;

use crate::lifecycle::LifecycleState;
use crate::net::backend::BackendKind;

/// Errors raised by endpoint lifecycle calls and socket backends.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Address, port or path already in use, permission denied, or the host
    /// could not be resolved. Never retried automatically.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The selected backend or host platform cannot serve the requested
    /// address family.
    #[error("{feature} not supported by the {backend} backend")]
    Unsupported {
        backend: BackendKind,
        feature: &'static str,
    },

    /// Socket or pool-slot allocation failed.
    #[error("resource allocation failed: {0}")]
    Resource(String),

    /// Lifecycle method called in a state that does not allow it.
    #[error("cannot {operation} endpoint in state {state}")]
    IllegalState {
        operation: &'static str,
        state: LifecycleState,
    },
}

impl EndpointError {
    pub(crate) fn bind(address: impl ToString, source: io::Error) -> Self {
        EndpointError::Bind {
            address: address.to_string(),
            source,
        }
    }

    /// True for failures that indicate the address is held by someone else.
    pub fn is_address_in_use(&self) -> bool {
        matches!(
            self,
            EndpointError::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse
        )
    }
}

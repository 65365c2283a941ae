//! Typed error kinds shared across the agent's components.
//!
//! Each variant corresponds to one of the error kinds named by the design: a
//! `ConfigError` is always fatal to the task that raised it; a
//! `TransientRuntimeError` always leaves room for fallback or retry. Keeping
//! the distinction in the type means a caller matches on kind rather than on
//! a string message.

use crate::domain::WorkloadId;
use thiserror::Error;

/// Errors raised by the Workload Lifecycle Engine, the Message Routing Core,
/// and the adapters they drive.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Required configuration (e.g. a referenced registry) is missing.
    #[error("config error for workload {workload_uuid}: {reason}")]
    ConfigError {
        /// The workload the failing task was acting on.
        workload_uuid: WorkloadId,
        /// Human-readable reason.
        reason: String,
    },

    /// A runtime call failed but is retryable (pull, start).
    #[error("transient runtime error for workload {workload_uuid}: {reason}")]
    TransientRuntimeError {
        /// The workload the failing call was acting on.
        workload_uuid: WorkloadId,
        /// Human-readable reason.
        reason: String,
    },

    /// The runtime rejected the operation definitively.
    #[error("fatal runtime error for workload {workload_uuid}: {reason}")]
    FatalRuntimeError {
        /// The workload the failing call was acting on.
        workload_uuid: WorkloadId,
        /// Human-readable reason.
        reason: String,
    },

    /// The image was not available after falling back to the local cache.
    #[error("image unavailable for workload {workload_uuid}: {image}")]
    ImageUnavailable {
        /// The workload that needed the image.
        workload_uuid: WorkloadId,
        /// The image reference that could not be resolved.
        image: String,
    },

    /// The broker server is inactive.
    #[error("broker down")]
    BrokerDown,

    /// An individual producer/consumer closed unexpectedly.
    #[error("endpoint closed for workload {workload_uuid}")]
    EndpointClosed {
        /// The workload whose endpoint closed.
        workload_uuid: WorkloadId,
    },

    /// A remote connector session could not be reached.
    #[error("connector session error for workload {workload_uuid}: {reason}")]
    ConnectorSessionError {
        /// The workload behind the failing connector session.
        workload_uuid: WorkloadId,
        /// Human-readable reason.
        reason: String,
    },

    /// A request from the local HTTP/WebSocket API was malformed.
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

impl AgentError {
    /// `true` for error kinds the supervisor may retry without operator
    /// intervention (transient runtime errors, endpoint closures, connector
    /// session drops, broker outages). `false` for kinds that require a
    /// fresh task (config errors, fatal runtime errors, image unavailability)
    /// or that are a client-facing response rather than internal state
    /// (protocol errors).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientRuntimeError { .. }
                | Self::BrokerDown
                | Self::EndpointClosed { .. }
                | Self::ConnectorSessionError { .. }
        )
    }
}

/// Result type returned by lifecycle and routing operations.
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        let err = AgentError::TransientRuntimeError {
            workload_uuid: WorkloadId::generate(),
            reason: "pull timed out".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn config_errors_are_not_retryable() {
        let err = AgentError::ConfigError {
            workload_uuid: WorkloadId::generate(),
            reason: "missing registry".to_string(),
        };
        assert!(!err.is_retryable());
    }
}

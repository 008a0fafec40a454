//! Protocol error types.

use std::time::Duration;
use thiserror::Error;

use sitefleet_common::NodeId;

/// Node protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("State unavailable: {0}")]
    StateUnavailable(String),

    #[error("Node '{0}' is already registered")]
    AlreadyRegistered(NodeId),

    #[error("Node '{0}' is not connected")]
    UnknownNode(NodeId),

    #[error("RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl From<ProtocolError> for tonic::Status {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::StateUnavailable(msg) => tonic::Status::unavailable(msg),
            ProtocolError::InvalidMessage(msg) => tonic::Status::invalid_argument(msg),
            ProtocolError::AlreadyRegistered(id) => {
                tonic::Status::already_exists(format!("node '{}' is already registered", id))
            }
            ProtocolError::Rpc(status) => status,
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

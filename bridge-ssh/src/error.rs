use std::error::Error;

use bridge_common::CollaboratorError;

/// Error kinds surfaced by the bridge core. Mirrors the taxonomy the rest
/// of the collaborator traits use, with a russh/IO `#[from]` boundary so
/// the bridge never has to stringly-match on a library error.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("bad parameter: {0}")]
    BadParameter(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("host key rejected: {0}")]
    HostKey(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("ssh protocol error: {0}")]
    Protocol(#[from] russh::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown channel type: {0}")]
    UnknownChannelType(String),
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
}

impl BridgeError {
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<CollaboratorError> for BridgeError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::BadParameter(m) => BridgeError::BadParameter(m),
            CollaboratorError::AccessDenied(m) => BridgeError::AccessDenied(m),
            CollaboratorError::Unauthorized(m) => BridgeError::Unauthorized(m),
            CollaboratorError::Other(e) => BridgeError::Other(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_maps_through_collaborator_boundary() {
        let err = CollaboratorError::AccessDenied("no route to login".into());
        let bridge_err: BridgeError = err.into();
        assert!(matches!(bridge_err, BridgeError::AccessDenied(m) if m == "no route to login"));
    }

    #[test]
    fn other_wraps_an_arbitrary_std_error() {
        let io_err = std::io::Error::other("boom");
        let bridge_err = BridgeError::other(io_err);
        assert_eq!(bridge_err.to_string(), "boom");
    }
}

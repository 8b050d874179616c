use std::error::Error;

/// Error surface returned by the collaborator traits in [`crate::collaborators`].
///
/// Kept deliberately small: the bridge core converts these into its own
/// [`BridgeError`](https://docs.rs/bridge-ssh)-equivalent via `#[from]` rather than
/// reaching into collaborator internals.
#[derive(thiserror::Error, Debug)]
pub enum CollaboratorError {
    #[error("bad parameter: {0}")]
    BadParameter(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
}

impl CollaboratorError {
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_match_variant_kind() {
        assert_eq!(
            CollaboratorError::BadParameter("Source".into()).to_string(),
            "bad parameter: Source"
        );
        assert_eq!(
            CollaboratorError::AccessDenied("no role".into()).to_string(),
            "access denied: no role"
        );
    }
}

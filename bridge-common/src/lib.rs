pub mod collaborators;
pub mod error;
pub mod identity;

pub use collaborators::{AccessPoint, AuditEvent, AuditLog, AuthClient, SessionRegistry, SessionService, UserAgent};
pub use error::CollaboratorError;
pub use identity::Identity;

// =============================================================================
// Palisade - Error Module
// =============================================================================
//
// Project: Palisade - Federated Room Membership Authorization
// License: Apache 2.0 / MIT
//
// Description:
//   Crate-wide error type. Request-level failures carry the Matrix error
//   kind; federation failures that reflect missing information rather than
//   a policy decision use dedicated variants so callers can tell them apart.
//
// =============================================================================

use ruma::{api::client::error::ErrorKind, OwnedServerName};
use thiserror::Error;
use tracing::error;

/// Palisade global result type
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Palisade global error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    #[error("Bad request: {0:?}: {1}")]
    BadRequest(ErrorKind, &'static str),

    #[error("Bad request: {0:?}: {1}")]
    BadRequestString(ErrorKind, String),

    #[error("Bad database: {0}")]
    BadDatabase(&'static str),

    /// Gateway-class failure: no peer could produce an authorization
    /// decision. Distinct from a policy denial so that clients can retry
    /// with a different or expanded server list.
    #[error("Bad server response: {0}")]
    BadServerResponse(&'static str),

    /// This server cannot certify the join from its own knowledge. Returned
    /// to remote callers so they fail over to the next candidate.
    #[error("Unable to authorize join: {0}")]
    UnableToAuthorize(&'static str),

    /// A concurrent membership write advanced the state incompatibly.
    #[error("Conflicting membership write: {0}")]
    Conflict(&'static str),

    #[error("Could not reach {0}: {1}")]
    Unreachable(OwnedServerName, String),
}

impl Error {
    pub fn bad_database(message: &'static str) -> Self {
        error!("Bad database: {}", message);
        Self::BadDatabase(message)
    }

    /// Whether this error is a final policy denial (as opposed to an
    /// information gap or a transport problem).
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            Self::BadRequest(ErrorKind::Forbidden { .. }, _)
                | Self::BadRequestString(ErrorKind::Forbidden { .. }, _)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_is_a_policy_denial() {
        let error = Error::BadRequest(ErrorKind::forbidden(), "You are not allowed.");
        assert!(error.is_forbidden());

        let error =
            Error::BadRequestString(ErrorKind::forbidden(), "You are not allowed.".to_owned());
        assert!(error.is_forbidden());
    }

    #[test]
    fn gateway_failures_are_not_policy_denials() {
        let error = Error::BadServerResponse("No server available to assist in joining.");
        assert!(!error.is_forbidden());

        let error = Error::UnableToAuthorize("Restriction could not be evaluated.");
        assert!(!error.is_forbidden());
    }

    #[test]
    fn not_found_is_not_a_policy_denial() {
        let error = Error::BadRequest(ErrorKind::NotFound, "Room not found.");
        assert!(!error.is_forbidden());
    }
}

use crate::operation::Operation;
use serde::{Deserialize, Serialize};

/// Errors surfaced by services and normalized by every transport binding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CrudError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Domain not found: {0}")]
    DomainNotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Operation not supported: {0}")]
    UnsupportedOperation(Operation),
    #[error("No route for {0}")]
    RouteNotFound(String),
    #[error("Repository closed")]
    RepositoryClosed,
    #[error("Repository dropped response channel")]
    RepositoryDropped,
    #[error("Transport error: {0}")]
    Transport(String),
}

impl CrudError {
    /// HTTP-equivalent status code.
    pub fn status(&self) -> u16 {
        match self {
            CrudError::BadRequest(_) => 400,
            CrudError::DomainNotFound(_) | CrudError::RouteNotFound(_) => 404,
            CrudError::UnsupportedOperation(_) => 405,
            CrudError::Conflict(_) => 409,
            CrudError::Transport(_) => 502,
            CrudError::RepositoryClosed | CrudError::RepositoryDropped => 503,
        }
    }

    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            CrudError::BadRequest(_) => "BAD_REQUEST",
            CrudError::DomainNotFound(_) => "DOMAIN_NOT_FOUND",
            CrudError::Conflict(_) => "CONFLICT",
            CrudError::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            CrudError::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            CrudError::RepositoryClosed | CrudError::RepositoryDropped => "UNAVAILABLE",
            CrudError::Transport(_) => "TRANSPORT",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            status: self.status(),
            error: self.kind().to_string(),
            message: self.detail(),
        }
    }

    /// The message without the kind prefix.
    pub fn detail(&self) -> String {
        match self {
            CrudError::BadRequest(m)
            | CrudError::DomainNotFound(m)
            | CrudError::Conflict(m)
            | CrudError::RouteNotFound(m)
            | CrudError::Transport(m) => m.clone(),
            CrudError::UnsupportedOperation(op) => op.to_string(),
            CrudError::RepositoryClosed | CrudError::RepositoryDropped => self.to_string(),
        }
    }
}

impl From<serde_json::Error> for CrudError {
    fn from(e: serde_json::Error) -> Self {
        CrudError::BadRequest(e.to_string())
    }
}

impl From<json_patch::PatchError> for CrudError {
    fn from(e: json_patch::PatchError) -> Self {
        CrudError::BadRequest(format!("json patch: {e}"))
    }
}

/// Serialized form of a [`CrudError`], shared by REST bodies, GraphQL extensions and
/// error callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    /// Rebuilds the error on the receiving side of a transport.
    pub fn into_error(self) -> CrudError {
        match self.error.as_str() {
            "BAD_REQUEST" => CrudError::BadRequest(self.message),
            "DOMAIN_NOT_FOUND" => CrudError::DomainNotFound(self.message),
            "CONFLICT" => CrudError::Conflict(self.message),
            "UNSUPPORTED_OPERATION" => match self.message.parse() {
                Ok(op) => CrudError::UnsupportedOperation(op),
                Err(_) => CrudError::Transport(self.message),
            },
            "ROUTE_NOT_FOUND" => CrudError::RouteNotFound(self.message),
            "UNAVAILABLE" => CrudError::RepositoryClosed,
            _ => CrudError::Transport(self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(CrudError::BadRequest("x".into()).status(), 400);
        assert_eq!(CrudError::DomainNotFound("x".into()).status(), 404);
        assert_eq!(CrudError::Conflict("x".into()).status(), 409);
        assert_eq!(CrudError::UnsupportedOperation(Operation::Save).status(), 405);
        assert_eq!(CrudError::RepositoryClosed.status(), 503);
    }

    #[test]
    fn body_rebuilds_the_error_kind() {
        let body = CrudError::DomainNotFound("id 7".into()).to_body();
        assert_eq!(body.status, 404);
        assert_eq!(body.message, "id 7");
        assert_eq!(body.into_error(), CrudError::DomainNotFound("id 7".into()));

        let body = CrudError::UnsupportedOperation(Operation::EditMany).to_body();
        assert_eq!(
            body.into_error(),
            CrudError::UnsupportedOperation(Operation::EditMany)
        );
    }

    #[test]
    fn json_errors_are_bad_requests() {
        let err: CrudError = serde_json::from_str::<u64>("nope").unwrap_err().into();
        assert!(matches!(err, CrudError::BadRequest(_)));
    }
}

use thiserror::Error;

/// Errors returned by the cloudControl worker API or the transport below it.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The host could not be reached after every retry attempt.
    #[error("could not connect to API after {attempts} attempts: {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// A call that needs a token was made before `authenticate`.
    #[error("no valid token, authenticate first")]
    TokenRequired,

    #[error("bad request (400): {0}")]
    BadRequest(String),

    /// The token expired or the credentials were rejected.
    #[error("unauthorized (401): {0}")]
    Unauthorized(String),

    #[error("forbidden (403): {0}")]
    Forbidden(String),

    #[error("not found (404): {0}")]
    NotFound(String),

    #[error("duplicate entry (409): {0}")]
    Conflict(String),

    /// The remote resource no longer exists.
    #[error("gone (410): {0}")]
    Gone(String),

    #[error("internal server error (500): {0}")]
    InternalServer(String),

    #[error("not implemented (501): {0}")]
    NotImplemented(String),

    #[error("throttled (503): {0}")]
    Throttled(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid API response: {0}")]
    Parse(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DispatchError {
    /// Map a non-success HTTP status to its error kind.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 => DispatchError::BadRequest(body),
            401 => DispatchError::Unauthorized(body),
            403 => DispatchError::Forbidden(body),
            404 => DispatchError::NotFound(body),
            409 => DispatchError::Conflict(body),
            410 => DispatchError::Gone(body),
            500 => DispatchError::InternalServer(body),
            501 => DispatchError::NotImplemented(body),
            503 => DispatchError::Throttled(body),
            _ => DispatchError::Api {
                status,
                message: body,
            },
        }
    }

    /// The token must be (re)created before the call can succeed.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            DispatchError::Unauthorized(_) | DispatchError::TokenRequired
        )
    }

    /// The remote resource does not exist (any more).
    pub fn is_gone(&self) -> bool {
        matches!(self, DispatchError::Gone(_) | DispatchError::NotFound(_))
    }

    /// HTTP status behind this error, when the API answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            DispatchError::BadRequest(_) => Some(400),
            DispatchError::Unauthorized(_) => Some(401),
            DispatchError::Forbidden(_) => Some(403),
            DispatchError::NotFound(_) => Some(404),
            DispatchError::Conflict(_) => Some(409),
            DispatchError::Gone(_) => Some(410),
            DispatchError::InternalServer(_) => Some(500),
            DispatchError::NotImplemented(_) => Some(501),
            DispatchError::Throttled(_) => Some(503),
            DispatchError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short error code string used in structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Connection { .. } => "CONNECTION_ERROR",
            DispatchError::TokenRequired => "TOKEN_REQUIRED",
            DispatchError::BadRequest(_) => "BAD_REQUEST",
            DispatchError::Unauthorized(_) => "UNAUTHORIZED",
            DispatchError::Forbidden(_) => "FORBIDDEN",
            DispatchError::NotFound(_) => "NOT_FOUND",
            DispatchError::Conflict(_) => "CONFLICT_DUPLICATE",
            DispatchError::Gone(_) => "GONE",
            DispatchError::InternalServer(_) => "INTERNAL_SERVER_ERROR",
            DispatchError::NotImplemented(_) => "NOT_IMPLEMENTED",
            DispatchError::Throttled(_) => "THROTTLED",
            DispatchError::Api { .. } => "API_ERROR",
            DispatchError::Parse(_) => "PARSE_ERROR",
            DispatchError::Http(_) => "HTTP_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

/// Everything that can go wrong while building or serving the gateway.
///
/// Request-level variants render as a plain-text error page; none of them
/// stop the server.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Wrong method, content type, query string or body shape.
    #[error("{message}")]
    ClientProtocol { status: StatusCode, message: String },

    /// Missing, malformed or expired anti-forgery token.
    #[error("{0}")]
    Auth(&'static str),

    /// Non-local peer while the server only accepts loopback clients.
    #[error("permission denied")]
    Origin,

    #[error("Not Found")]
    NotFound,

    /// A static asset the UI needs is not available.
    #[error("Content missing")]
    Asset { name: String },

    /// A handler produced a value that does not encode as JSON.
    #[error("Malformed response: {0}")]
    Serialization(String),

    /// A handler panicked or its worker was torn down.
    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("path {0:?} is already registered")]
    DuplicatePath(String),

    #[error("invalid API path {0:?}")]
    InvalidPath(String),

    #[error("invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::ClientProtocol {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::ClientProtocol {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::ClientProtocol { status, .. } => *status,
            Self::Auth(_) => StatusCode::BAD_REQUEST,
            Self::Origin => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            ],
            format!("{self}\n"),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(
            GatewayError::bad_request("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::method_not_allowed("x").status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            GatewayError::Auth("Missing XSRF-TOKEN cookie").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(GatewayError::Origin.status(), StatusCode::FORBIDDEN);
        assert_eq!(GatewayError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::Asset {
                name: "ui/index.html".into()
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::Serialization("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn renders_plain_text() {
        let resp = GatewayError::Origin.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(resp.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    }
}

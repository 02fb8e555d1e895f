/*! Errors reported by the gateway to the host's request pipeline.
 *
 * Every variant maps to an HTTP status via [`GatewayError::status`],
 * the host decides how to render it.
*/

use std::error::Error as StdError;
use std::fmt::Display;
use std::io::Error as IoError;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

use crate::address::BackendAddress;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// `SCRIPT_FILENAME` was not resolved for this request
    #[error("no script to hand to the FastCGI backend")]
    MissingScript,

    /// An explicitly designated backend could not be reached
    #[error("FastCGI backend {address} is unavailable: {message}")]
    BackendUnavailable {
        address: BackendAddress,
        message: String,
    },

    /// The backend sent a `Status` header whose code is not a number
    #[error("unrecognizable status code returned from fastcgi: {token:?}")]
    MalformedBackendResponse { token: String },

    /// No complete response within the configured deadline
    #[error("FastCGI backend {address} did not answer within {after:?}")]
    Timeout {
        address: BackendAddress,
        after: Duration,
    },

    /// Transport and any other unexpected failure, carrying the original message
    #[error("FastCGI gateway failure: {message}")]
    Failed { message: String, transport: bool },
}

impl GatewayError {
    /// Wrap an arbitrary error as a generic gateway failure
    pub fn failed<E: Display>(e: E) -> GatewayError {
        GatewayError::Failed {
            message: e.to_string(),
            transport: false,
        }
    }

    /// The HTTP status the host should answer with
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingScript => StatusCode::NOT_FOUND,
            GatewayError::BackendUnavailable { .. }
            | GatewayError::MalformedBackendResponse { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Failed { transport: true, .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IoError> for GatewayError {
    fn from(e: IoError) -> GatewayError {
        GatewayError::Failed {
            message: e.to_string(),
            transport: true,
        }
    }
}

/// Box any error into a generic failure, keeping typed gateway errors as they are
pub(crate) fn wrap(e: Box<dyn StdError + Send + Sync>) -> GatewayError {
    match e.downcast::<GatewayError>() {
        Ok(g) => *g,
        Err(other) => GatewayError::failed(other),
    }
}

//! Client error types

use thiserror::Error;

use crate::response::ApiResponse;

/// Errors raised by [`HttpClient`](crate::HttpClient) and the service helpers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(#[from] osdu_identity::Error),

    #[error("unexpected HTTP status {} (expected one of {expected:?})", .response.status)]
    HttpStatus {
        expected: Vec<u16>,
        response: Box<ApiResponse>,
    },

    #[error("response body is not valid JSON: {0}")]
    ResponseParse(#[source] serde_json::Error),

    #[error("could not serialize request body: {0}")]
    RequestSerialize(#[source] serde_json::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] common::Error),

    #[error("unsupported service version: {0}")]
    InvalidServiceVersion(String),
}

impl Error {
    /// The response that failed status validation, if that is what happened.
    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            Error::HttpStatus { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// Result alias using client Error
pub type Result<T> = std::result::Result<T, Error>;

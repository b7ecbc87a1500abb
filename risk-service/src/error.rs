use marginfi_risk_engine::{
    actions::{handle_transaction_error, ActionMessage},
    RiskError,
};
use serde_json::{json, Value};
use solana_client::client_error::ClientError;
use solana_sdk::message::CompileError;
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Failure that already carries the message to show for it.
    #[error("{}", .0.description)]
    Action(ActionMessage),
    #[error("Risk engine error: {0}")]
    Risk(#[from] RiskError),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC request failed: {0}")]
    Rpc(#[from] ClientError),
    #[error("Request status not ok: {status}, body: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to encode query: {0}")]
    Query(#[from] serde_qs::Error),
    #[error("Failed to decode {0}")]
    Decode(String),
    #[error("Failed to compile transaction message: {0}")]
    Compile(#[from] CompileError),
    #[error("Request superseded by a newer one")]
    Superseded,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn action(message: impl Into<ActionMessage>) -> Self {
        ServiceError::Action(message.into())
    }

    pub fn to_action_message(&self) -> ActionMessage {
        match self {
            ServiceError::Action(message) => message.clone(),
            ServiceError::Risk(error) => error.into(),
            other => handle_transaction_error(&other.to_string(), false),
        }
    }
}

/// Errors returned to HTTP callers, one variant per status class.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::NotFound(_) => 404,
            ApiError::Internal(_) => 500,
        }
    }

    /// JSON body for the response. Internal details stay in the logs.
    pub fn to_body(&self) -> Value {
        let (code, message) = match self {
            ApiError::BadRequest(msg) => ("BAD_REQUEST", msg.as_str()),
            ApiError::Unauthorized(msg) => ("UNAUTHORIZED", msg.as_str()),
            ApiError::NotFound(msg) => ("NOT_FOUND", msg.as_str()),
            ApiError::Internal(_) => ("INTERNAL_ERROR", "Internal server error"),
        };

        json!({ "error": code, "message": message })
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        ApiError::Internal(error.to_string())
    }
}

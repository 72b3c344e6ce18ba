//! SDK error classification.

use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use sightline_connector::prelude::*;

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

const AUTH_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "ExpiredToken",
    "ExpiredTokenException",
    "SignatureDoesNotMatch",
];

/// Map an SDK failure onto the connector error taxonomy.
pub fn classify<E, R>(call: &str, err: SdkError<E, R>) -> ConnectorError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let transport = matches!(err, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_));
    let code = err.code().map(str::to_string);
    let message = format!("{call}: {}", DisplayErrorContext(&err));
    classify_parts(transport, code.as_deref(), message)
}

pub(crate) fn classify_parts(transport: bool, code: Option<&str>, message: String) -> ConnectorError {
    if transport {
        return ConnectorError::connection_failed(message);
    }
    match code {
        Some(code) if AUTH_CODES.contains(&code) => ConnectorError::auth(message),
        Some(code) if THROTTLING_CODES.contains(&code) => ConnectorError::rate_limited(message, None),
        _ => ConnectorError::network(message),
    }
}

//! CLI error type: maps library failures to messages and exit codes.

use aerolink_api::Error as ApiError;
use thiserror::Error;

/// Exit codes, one per failure family.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("could not reach the device: {0}")]
    Connection(ApiError),

    #[error("the device rejected the configured credentials")]
    AuthFailed,

    #[error("the device did not answer in time: {0}")]
    Timeout(ApiError),

    #[error("the device refused the command")]
    Refused,

    #[error(transparent)]
    Api(ApiError),
}

impl From<ApiError> for CliError {
    fn from(err: ApiError) -> Self {
        if err.is_connection() {
            Self::Connection(err)
        } else if err.is_timeout() {
            Self::Timeout(err)
        } else {
            Self::Api(err)
        }
    }
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Connection(_) => exit_code::CONNECTION,
            Self::AuthFailed => exit_code::AUTH,
            Self::Timeout(_) => exit_code::TIMEOUT,
            Self::Api(ApiError::Validation { .. }) => exit_code::USAGE,
            Self::Refused | Self::Api(_) => exit_code::GENERAL,
        }
    }
}

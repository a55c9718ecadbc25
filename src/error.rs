use std::env;
use std::fmt::{self, Debug, Display};

/// Codes `1..=99` are internal failures, anything above is meant for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

pub const VALIDATION: i32 = 100;
pub const NOT_FOUND: i32 = 101;
pub const CONFLICT: i32 = 102;
pub const PERMISSION: i32 = 103;
pub const INSUFFICIENT_BALANCE: i32 = 104;
pub const EXTERNAL_PROVIDER: i32 = 105;

impl Error {
    pub fn is_internal(&self) -> bool {
        (1..=99).contains(&self.code)
    }

    pub fn is_validation_error(&self) -> bool {
        self.code == VALIDATION
    }

    pub fn is_not_found_error(&self) -> bool {
        self.code == NOT_FOUND
    }

    pub fn is_conflict_error(&self) -> bool {
        self.code == CONFLICT
    }

    pub fn is_permission_error(&self) -> bool {
        self.code == PERMISSION
    }

    pub fn is_insufficient_balance_error(&self) -> bool {
        self.code == INSUFFICIENT_BALANCE
    }

    /// External provider failures are the only ones worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        self.code == EXTERNAL_PROVIDER
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        env_var_error(err)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        // unique_violation
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return conflict_error("record already exists");
            }
        }

        database_error(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        reqwest_error(err)
    }
}

impl From<oso::OsoError> for Error {
    fn from(err: oso::OsoError) -> Self {
        authorizor_error(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        serialization_error(err)
    }
}

pub fn validation_error(message: impl Into<String>) -> Error {
    Error {
        code: VALIDATION,
        message: message.into(),
    }
}

pub fn not_found_error(what: impl Display) -> Error {
    Error {
        code: NOT_FOUND,
        message: format!("{} not found", what),
    }
}

pub fn conflict_error(message: impl Into<String>) -> Error {
    Error {
        code: CONFLICT,
        message: message.into(),
    }
}

pub fn permission_error() -> Error {
    Error {
        code: PERMISSION,
        message: "permission denied".into(),
    }
}

pub fn insufficient_balance_error(message: impl Into<String>) -> Error {
    Error {
        code: INSUFFICIENT_BALANCE,
        message: message.into(),
    }
}

pub fn external_provider_error(message: impl Into<String>) -> Error {
    Error {
        code: EXTERNAL_PROVIDER,
        message: message.into(),
    }
}

pub fn env_var_error(_: env::VarError) -> Error {
    Error {
        code: 1,
        message: "environment variable error".into(),
    }
}

pub fn config_error(key: &str) -> Error {
    Error {
        code: 1,
        message: format!("invalid configuration value for {}", key),
    }
}

pub fn database_error<T: Debug>(err: T) -> Error {
    tracing::error!(?err, "database error");

    Error {
        code: 2,
        message: "database error".into(),
    }
}

pub fn reqwest_error(err: reqwest::Error) -> Error {
    tracing::warn!(%err, "reqwest error");

    Error {
        code: 3,
        message: "reqwest error".into(),
    }
}

pub fn upstream_error() -> Error {
    Error {
        code: 4,
        message: "upstream error".into(),
    }
}

pub fn unexpected_error() -> Error {
    Error {
        code: 5,
        message: "unexpected error".into(),
    }
}

pub fn authorizor_error(err: oso::OsoError) -> Error {
    tracing::error!(%err, "authorizor error");

    Error {
        code: 6,
        message: "authorizor error".into(),
    }
}

pub fn serialization_error(err: serde_json::Error) -> Error {
    tracing::error!(%err, "serialization error");

    Error {
        code: 7,
        message: "serialization error".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_facing_codes_are_not_internal() {
        assert!(!validation_error("bad").is_internal());
        assert!(!conflict_error("taken").is_internal());
        assert!(upstream_error().is_internal());
        assert!(unexpected_error().is_internal());
    }

    #[test]
    fn only_provider_errors_are_retryable() {
        assert!(external_provider_error("gateway down").is_retryable());
        assert!(!insufficient_balance_error("low").is_retryable());
        assert!(!permission_error().is_retryable());
    }

    #[test]
    fn not_found_message_names_the_entity() {
        let err = not_found_error("booking");
        assert!(err.is_not_found_error());
        assert_eq!(err.message, "booking not found");
    }
}

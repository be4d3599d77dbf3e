//! Shared error type for configuration loading

use thiserror::Error;

/// Failure while locating, reading, or validating a config file.
///
/// Every variant is produced before any session exists, so these errors
/// never carry token material and are safe to log verbatim.
#[derive(Error, Debug)]
pub enum Error {
    /// A field failed validation; the message names the field.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config file unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file malformed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Validation failure with a field-naming message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result alias for config operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_the_field() {
        let err = Error::config("redirect_uri must start with http:// or https://");
        assert_eq!(
            err.to_string(),
            "invalid configuration: redirect_uri must start with http:// or https://"
        );
    }

    #[test]
    fn io_and_parse_failures_convert() {
        fn fails_io() -> Result<String> {
            Ok(std::fs::read_to_string("/nonexistent/portal/oauth.toml")?)
        }
        let err = fails_io().unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got: {err:?}");
        assert!(err.to_string().starts_with("config file unreadable:"));

        let parse: std::result::Result<toml::Value, _> = toml::from_str("= broken =");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Toml(_)), "got: {err:?}");
    }
}

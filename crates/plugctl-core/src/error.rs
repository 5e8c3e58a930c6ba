//! Validation errors raised while building domain values.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("plugin name is required")]
    EmptyName,
    #[error("setting key is required")]
    EmptySettingKey,
    #[error("invalid table name {0:?}")]
    InvalidTableName(String),
    #[error("invalid plugin status {0:?}")]
    InvalidStatus(String),
    #[error("invalid audit action {0:?}")]
    InvalidAction(String),
    #[error("invalid {kind} setting value {raw:?}: {reason}")]
    InvalidSetting {
        kind: String,
        raw: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(ModelError::EmptyName.to_string(), "plugin name is required");
        assert_eq!(
            ModelError::InvalidTableName("a;b".into()).to_string(),
            "invalid table name \"a;b\""
        );
        let err = ModelError::InvalidSetting {
            kind: "integer".into(),
            raw: "x".into(),
            reason: "not a number".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid integer setting value \"x\": not a number"
        );
    }
}

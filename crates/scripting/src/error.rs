//! Error types for the scripting crate
//!
//! Softcode errors normally surface as `#-1 ...` tokens inside the output
//! (see [`crate::tokens`]). `ScriptError` covers the cases that are
//! reported to Rust callers instead.

use mush_core::MushError;

/// Script-specific error types
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// A register frame was restored out of LIFO order
    #[error("register frame {found} restored while {expected} is on top")]
    FrameOrder { expected: usize, found: usize },

    /// The root register frame can never be removed
    #[error("the root register frame cannot be restored")]
    RootFrame,

    /// The per-chain named register capacity is used up
    #[error("too many named registers (limit {limit})")]
    TooManyRegisters { limit: usize },

    /// Register name fails validation
    #[error("invalid register name: {0}")]
    InvalidRegisterName(String),

    /// Two functions registered under one name
    #[error("function already registered: {0}")]
    DuplicateFunction(String),

    /// A world fixture could not be loaded
    #[error("world fixture: {0}")]
    World(#[from] serde_json::Error),

    /// Regular expression failed to compile
    #[error("regular expression: {0}")]
    Regex(#[from] regex::Error),
}

impl From<ScriptError> for MushError {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::World(_) => MushError::InvalidData(err.to_string()),
            _ => MushError::Script(err.to_string()),
        }
    }
}

/// Result type for scripting operations
pub type Result<T> = std::result::Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_core_error() {
        let err: MushError = ScriptError::InvalidRegisterName("a b".into()).into();
        assert!(matches!(err, MushError::Script(ref msg) if msg == "invalid register name: a b"));

        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: MushError = ScriptError::from(bad).into();
        assert!(matches!(err, MushError::InvalidData(_)));
    }
}

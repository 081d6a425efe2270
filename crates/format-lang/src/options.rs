//! Decode configuration
//!
//! Options can be built in code or loaded from TOML:
//!
//! ```toml
//! mode = "recover"
//! max_depth = 64
//! max_array_elements = 4096
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DecodeError, DecodeErrorKind};

pub const DEFAULT_MAX_DEPTH: u32 = 256;
/// Element and node caps are opt-in; 0 means unlimited.
pub const DEFAULT_MAX_ARRAY_ELEMENTS: u64 = 0;
pub const DEFAULT_MAX_TOTAL_NODES: u64 = 0;

/// What happens when a field fails to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// The first failure aborts the whole decode
    #[default]
    Strict,
    /// Failed fields become Error nodes and decoding continues
    Recover,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    pub mode: DecodeMode,
    /// Nesting limit for struct, switch and compressed fields
    pub max_depth: u32,
    /// Element cap per repeated field (0 = unlimited)
    pub max_array_elements: u64,
    /// Cap on nodes produced by one decode (0 = unlimited)
    pub max_total_nodes: u64,
    /// Checked between field decodes; set it to abort
    #[serde(skip)]
    pub cancellation_token: Option<Arc<AtomicBool>>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            mode: DecodeMode::Strict,
            max_depth: DEFAULT_MAX_DEPTH,
            max_array_elements: DEFAULT_MAX_ARRAY_ELEMENTS,
            max_total_nodes: DEFAULT_MAX_TOTAL_NODES,
            cancellation_token: None,
        }
    }
}

impl DecodeOptions {
    pub fn recovering() -> Self {
        Self {
            mode: DecodeMode::Recover,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: DecodeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cancellation_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Parse options from TOML text; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token
            .as_ref()
            .is_some_and(|token| token.load(Ordering::Relaxed))
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), DecodeError> {
        if self.is_cancelled() {
            return Err(DecodeError::new(
                DecodeErrorKind::Cancelled,
                "decode cancelled",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = DecodeOptions::default();
        assert_eq!(opts.mode, DecodeMode::Strict);
        assert_eq!(opts.max_depth, 256);
        assert_eq!(opts.max_array_elements, 0);
        assert_eq!(opts.max_total_nodes, 0);
        assert!(!opts.is_cancelled());
    }

    #[test]
    fn test_recovering() {
        let opts = DecodeOptions::recovering();
        assert_eq!(opts.mode, DecodeMode::Recover);
        assert_eq!(opts.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn test_from_toml_partial() {
        let opts = DecodeOptions::from_toml_str("mode = \"recover\"\nmax_depth = 8\n").unwrap();
        assert_eq!(opts.mode, DecodeMode::Recover);
        assert_eq!(opts.max_depth, 8);
        assert_eq!(opts.max_array_elements, DEFAULT_MAX_ARRAY_ELEMENTS);
    }

    #[test]
    fn test_from_toml_rejects_bad_mode() {
        assert!(DecodeOptions::from_toml_str("mode = \"lenient\"").is_err());
    }

    #[test]
    fn test_cancellation() {
        let token = Arc::new(AtomicBool::new(false));
        let opts = DecodeOptions::default().with_cancellation_token(token.clone());
        assert!(opts.check_cancelled().is_ok());
        token.store(true, Ordering::Relaxed);
        let err = opts.check_cancelled().unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::Cancelled);
    }
}

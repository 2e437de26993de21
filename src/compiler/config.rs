//! Pipeline configuration.
//!
//! This module provides the options the driver hands to the lowering pipeline. Pointer size
//! and kernel identification come from the module itself; everything the driver decides lives
//! here.

use std::env;

/// Environment variable consulted when no library search path is configured.
pub const LIBRARY_PATH_ENV: &str = "GENLOWER_LIBRARY_PATH";

/// Default ceiling for the product of nested loop trip counts that still allows unrolling.
pub const DEFAULT_UNROLL_CEILING: u64 = 32;

/// Configuration for one run of the lowering pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Colon-separated candidate paths of the prebuilt library module.
    /// `None` falls back to [`LIBRARY_PATH_ENV`].
    pub library_path: Option<String>,

    /// Request strict math: the library's fast-path flag is cleared
    pub strict_math: bool,

    /// Run the library linker as the final stage
    pub link: bool,

    /// Maximum trip count product of a loop nest that may be force-unrolled (default: 32)
    pub unroll_ceiling: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            strict_math: false,
            link: false,
            unroll_ceiling: DEFAULT_UNROLL_CEILING,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration that links against the library found on `path`.
    #[must_use]
    pub fn with_library(path: impl Into<String>) -> Self {
        Self {
            library_path: Some(path.into()),
            link: true,
            ..Self::default()
        }
    }

    /// Sets the strict-math flag.
    #[must_use]
    pub fn strict_math(mut self, strict: bool) -> Self {
        self.strict_math = strict;
        self
    }

    /// Sets the unroll ceiling.
    #[must_use]
    pub fn unroll_ceiling(mut self, ceiling: u64) -> Self {
        self.unroll_ceiling = ceiling;
        self
    }

    /// The library search path: the configured one, else the environment variable.
    #[must_use]
    pub fn library_search_path(&self) -> Option<String> {
        self.library_path
            .clone()
            .or_else(|| env::var(LIBRARY_PATH_ENV).ok())
            .filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(!config.link);
        assert!(!config.strict_math);
        assert_eq!(config.unroll_ceiling, 32);
    }

    #[test]
    fn test_builder_style() {
        let config = PipelineConfig::with_library("/a:/b")
            .strict_math(true)
            .unroll_ceiling(8);
        assert!(config.link);
        assert!(config.strict_math);
        assert_eq!(config.unroll_ceiling, 8);
        assert_eq!(config.library_search_path().as_deref(), Some("/a:/b"));
    }
}

//! Error types for microstructure synthesis.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a synthesis run.
///
/// Recoverable sampling problems (rejection loops that hit their retry cap,
/// degenerate shapes, precipitates without a free site) are not errors; they
/// are logged and counted in [`crate::sampler::SamplingReport`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SynthError {
    /// A statistics table is malformed or has the wrong size.
    #[error("invalid {table} table: {reason}")]
    InputData {
        /// Name of the offending table.
        table: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The run configuration is rejected before any work starts.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A gap-filling sweep made no progress while voxels were still unresolved.
    #[error("gap filling pass {pass} stalled with {remaining} unresolved voxels")]
    UnresolvableVoxel {
        /// Pass number (1, 2 or 3).
        pass: u8,
        /// Number of voxels still unresolved.
        remaining: usize,
    },

    /// The run was cancelled through its [`crate::pipeline::CancelToken`].
    #[error("synthesis cancelled")]
    Cancelled,

    /// Writing an output file failed.
    #[error("failed to write {}: {source}", path.display())]
    IoWrite {
        /// The path that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for synthesis operations.
pub type Result<T> = std::result::Result<T, SynthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SynthError::InputData {
            table: "odf",
            reason: "expected 5832 bins, got 3".into(),
        };
        assert_eq!(
            format!("{err}"),
            "invalid odf table: expected 5832 bins, got 3"
        );

        let err = SynthError::UnresolvableVoxel {
            pass: 3,
            remaining: 12,
        };
        assert!(format!("{err}").contains("12 unresolved"));
    }
}

use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures surfaced by pipeline stages.
///
/// `Source` is global: the tee hands a clone of it to every branch. The other
/// variants are scoped to the branch named in them.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("source failed: {0:#}")]
    Source(Arc<anyhow::Error>),
    #[error("branch {branch}: encoder configuration rejected: {reason:#}")]
    Configure {
        branch: String,
        reason: Arc<anyhow::Error>,
    },
    #[error("branch {branch}: encode failed: {reason:#}")]
    Encode {
        branch: String,
        reason: Arc<anyhow::Error>,
    },
}

impl PipelineError {
    pub fn source(err: anyhow::Error) -> Self {
        Self::Source(Arc::new(err))
    }

    pub fn configure(branch: &str, err: anyhow::Error) -> Self {
        Self::Configure {
            branch: branch.to_string(),
            reason: Arc::new(err),
        }
    }

    pub fn encode(branch: &str, err: anyhow::Error) -> Self {
        Self::Encode {
            branch: branch.to_string(),
            reason: Arc::new(err),
        }
    }

    /// Whether the failure takes down every branch, not just one.
    pub fn is_global(&self) -> bool {
        matches!(self, Self::Source(_))
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            Self::Source(_) => None,
            Self::Configure { branch, .. } | Self::Encode { branch, .. } => Some(branch),
        }
    }
}

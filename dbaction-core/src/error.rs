/// Structured error types for dbaction-core.
///
/// Uses `thiserror` for the taxonomy callers match on. The work inside an
/// action returns `anyhow::Result`, so whatever the driver raised travels
/// through untouched and can be downcast again at the edge.

use std::fmt;
use thiserror::Error;

/// Finalizer step that failed while ending a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Commit,
    Rollback,
    Release,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Commit => "commit",
            Stage::Rollback => "rollback",
            Stage::Release => "release",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for running actions
#[derive(Error, Debug)]
pub enum Error {
    /// The wrapped function, or a transform applied to its result, failed
    #[error("action failed: {0:#}")]
    Execution(#[source] anyhow::Error),

    /// The transactor could not hand out a session
    #[error("failed to acquire connection: {0:#}")]
    Acquisition(#[source] anyhow::Error),

    /// Commit, rollback or release failed after the action finished.
    ///
    /// This supersedes the action's own outcome. When the action had failed
    /// too, its error is kept in `superseded`.
    #[error("failed to {stage} session: {source:#}")]
    Finalization {
        stage: Stage,
        #[source]
        source: anyhow::Error,
        superseded: Option<anyhow::Error>,
    },

    /// A session was asked for its connection a second time
    #[error("session connection was already taken")]
    ConnectionTaken,
}

/// Result type alias for dbaction operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an execution error
    pub fn execution(source: impl Into<anyhow::Error>) -> Self {
        Self::Execution(source.into())
    }

    /// Create an acquisition error
    pub fn acquisition(source: impl Into<anyhow::Error>) -> Self {
        Self::Acquisition(source.into())
    }

    /// Create a finalization error for the given stage
    pub fn finalization(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        Self::Finalization {
            stage,
            source: source.into(),
            superseded: None,
        }
    }

    /// Record the execution error a finalization failure replaced.
    ///
    /// Other variants are returned unchanged.
    pub fn superseding(self, original: anyhow::Error) -> Self {
        match self {
            Self::Finalization { stage, source, .. } => Self::Finalization {
                stage,
                source,
                superseded: Some(original),
            },
            other => other,
        }
    }

    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    pub fn is_acquisition(&self) -> bool {
        matches!(self, Self::Acquisition(_))
    }

    /// Stage of a finalization failure, if this is one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Finalization { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Execution error replaced by a finalization failure
    pub fn superseded(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Finalization { superseded, .. } => superseded.as_ref(),
            _ => None,
        }
    }

    /// Find a concrete error type anywhere in the carried error's chain.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let inner = match self {
            Self::Execution(err) | Self::Acquisition(err) => err,
            Self::Finalization { source, .. } => source,
            Self::ConnectionTaken => return None,
        };
        inner.chain().find_map(|cause| cause.downcast_ref::<E>())
    }

    /// Unwrap the user's error from an execution failure.
    pub fn into_execution(self) -> std::result::Result<anyhow::Error, Self> {
        match self {
            Self::Execution(err) => Ok(err),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        let err = Error::execution(anyhow::anyhow!("duplicate key"));
        assert_eq!(err.to_string(), "action failed: duplicate key");

        let err = Error::finalization(Stage::Commit, anyhow::anyhow!("connection reset"));
        assert_eq!(
            err.to_string(),
            "failed to commit session: connection reset"
        );
    }

    #[test]
    fn test_superseding_only_touches_finalization() {
        let err = Error::finalization(Stage::Rollback, anyhow::anyhow!("socket closed"))
            .superseding(anyhow::anyhow!("insert failed"));
        assert_eq!(err.stage(), Some(Stage::Rollback));
        assert_eq!(err.superseded().unwrap().to_string(), "insert failed");

        let err = Error::acquisition(anyhow::anyhow!("pool timed out"))
            .superseding(anyhow::anyhow!("ignored"));
        assert!(err.is_acquisition());
        assert!(err.superseded().is_none());
    }

    #[test]
    fn test_downcast_through_context() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = Error::execution(anyhow::Error::new(io_err).context("reading rows"));

        let found = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(found.kind(), io::ErrorKind::ConnectionReset);
        assert!(Error::ConnectionTaken.downcast_ref::<io::Error>().is_none());
    }
}

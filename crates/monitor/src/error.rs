use std::path::PathBuf;

use thiserror::Error;

use crate::service::Phase;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitor root {0} does not exist or is not a directory")]
    RootMissing(PathBuf),

    #[error("cannot watch {root}: {source}")]
    Watch {
        root: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("monitor is {0:?} and no longer accepts work")]
    NotRunning(Phase),
}

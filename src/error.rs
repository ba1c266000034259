use std::{error::Error, fmt, io, path::PathBuf};

/// The result type used across the training driver.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Training driver failures.
#[derive(Debug)]
pub enum TrainErr {
    Io(io::Error),
    Serde(serde_json::Error),
    /// The configured optimizer name is not one this driver can build.
    UnsupportedConfiguration(String),
    InvalidConfig(String),
    /// The data loader produced no batch right after being reset.
    EmptyLoader,
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    MissingParameter(String),
    CheckpointIo {
        path: PathBuf,
        source: io::Error,
    },
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Io(e) => write!(f, "io error: {e}"),
            TrainErr::Serde(e) => write!(f, "serialization error: {e}"),
            TrainErr::UnsupportedConfiguration(name) => {
                write!(f, "unsupported optimizer configuration: {name}")
            }
            TrainErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            TrainErr::EmptyLoader => write!(f, "data loader yields no batches"),
            TrainErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(f, "{what} size mismatch: got {got}, expected {expected}"),
            TrainErr::MissingParameter(name) => {
                write!(f, "state has no entry for parameter `{name}`")
            }
            TrainErr::CheckpointIo { path, source } => {
                write!(f, "checkpoint io failed at {}: {source}", path.display())
            }
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Io(e) => Some(e),
            TrainErr::Serde(e) => Some(e),
            TrainErr::CheckpointIo { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for TrainErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

impl TrainErr {
    pub(crate) fn checkpoint_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::CheckpointIo {
            path: path.into(),
            source,
        }
    }
}

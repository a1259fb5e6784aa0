use thiserror::Error;

pub type Result<T, E = FusionError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FusionError {
    #[error("failed to spawn worker thread `{name}`: {source}")]
    WorkerSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("reconstruction initialization failed: {0:#}")]
    Initialization(anyhow::Error),

    #[error("{what} buffer has {actual} elements, expected {expected}")]
    BufferSize {
        what: &'static str,
        actual: usize,
        expected: usize,
    },

    #[error("fusion session already stopped")]
    Stopped,
}

impl FusionError {
    pub(crate) fn check_len(what: &'static str, actual: usize, expected: usize) -> Result<()> {
        if actual == expected {
            Ok(())
        } else {
            Err(FusionError::BufferSize {
                what,
                actual,
                expected,
            })
        }
    }
}

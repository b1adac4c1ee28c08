use std::fmt::Debug;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("{device} transport error: {detail}")]
    Transport { device: &'static str, detail: String },
    #[error("channel {channel} outside mux range 0..{limit}")]
    ChannelOutOfRange { channel: usize, limit: usize },
    #[error("excitation switch error: {0}")]
    Excitation(String),
    #[error("{peripheral} unavailable: {detail}")]
    PeripheralUnavailable {
        peripheral: &'static str,
        detail: String,
    },
    #[error("measurement cycle timed out after {0:?}")]
    CycleTimeout(std::time::Duration),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FixtureError {
    /// Wraps a bus-level error (embedded-hal errors are only `Debug`).
    pub fn transport<E: Debug>(device: &'static str, err: E) -> Self {
        FixtureError::Transport {
            device,
            detail: format!("{err:?}"),
        }
    }

    pub fn peripheral<E: Debug>(peripheral: &'static str, err: E) -> Self {
        FixtureError::PeripheralUnavailable {
            peripheral,
            detail: format!("{err:?}"),
        }
    }
}

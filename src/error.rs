use std::io;
use thiserror::Error;

use crate::config::ConfigError;
use crate::mdns::MdnsError;
use crate::player::PlayerError;
use crate::preferences::PreferencesError;
use crate::protocol::ProtocolError;
use crate::wakeword::DetectorError;

pub type Result<T> = std::result::Result<T, SatelliteError>;

#[derive(Error, Debug)]
pub enum SatelliteError {
    #[error("audio capture error: {0}")]
    Audio(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Preferences(#[from] PreferencesError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    Player(#[from] PlayerError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Mdns(#[from] MdnsError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

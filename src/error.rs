//! Error taxonomy for the track engine (see spec §7: format-reject, geometry-invalid, I/O-fatal,
//! bitstream-corruption, overflow). Mirrors the grounding repo's flat `thiserror` enum style.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackEngineError {
    /// A header prober rejected the image on magic/field grounds; the dispatcher may try the
    /// next strategy.
    #[error("image header was not recognized by this format's prober")]
    FormatReject,

    /// A populated geometry failed validation (bad side/cylinder/sector counts).
    #[error("geometry is out of the supported range: {0}")]
    InvalidGeometry(&'static str),

    /// The underlying file handle reported an unrecoverable error.
    #[error("unrecoverable I/O error: {0}")]
    IoFatal(String),

    /// A parameter passed to an engine entry point was invalid.
    #[error("invalid parameter: {0}")]
    Parameter(&'static str),

    /// No geometry in the active type table matched the image's file size.
    #[error("no known geometry matches this image size")]
    UnknownFormat,

    /// The requested track or sector could not be located.
    #[error("requested sector or track does not exist")]
    SeekError,

    /// An arena or track-position counter overflowed a bound that should be statically
    /// impossible to exceed in a correctly configured engine.
    #[error("internal overflow: {0}")]
    Overflow(&'static str),
}

impl From<std::io::Error> for TrackEngineError {
    fn from(err: std::io::Error) -> Self {
        TrackEngineError::IoFatal(err.to_string())
    }
}

impl From<binrw::Error> for TrackEngineError {
    fn from(err: binrw::Error) -> Self {
        TrackEngineError::IoFatal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackEngineError>;

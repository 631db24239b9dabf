//! Error types for score loading, configuration and navigation.
//!
//! Nothing in the practice engine is fatal to the host: loaders return
//! `PracticeError`, seeks return `SeekError`, and runtime components turn
//! failures into a deactivated feature or a logged no-op.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PracticeError {
    /// A score or config file could not be read from disk.
    #[error("Failed to read file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The MusicXML document is not well-formed XML.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// The document parsed but is not something we can practice from.
    ///
    /// ```
    /// # use practicelib::PracticeError;
    /// let err = PracticeError::UnsupportedDocument("score-timewise".to_string());
    /// assert_eq!(
    ///     err.to_string(),
    ///     "Unsupported root element: 'score-timewise'. Only 'score-partwise' is supported."
    /// );
    /// ```
    #[error("Unsupported root element: '{0}'. Only 'score-partwise' is supported.")]
    UnsupportedDocument(String),

    /// Invalid UTF-8 in an uncompressed MusicXML payload.
    #[error("Invalid UTF-8 in MusicXML file: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// A compressed .mxl archive is broken or has no MusicXML root file.
    #[error("MXL archive error: {0}")]
    Archive(String),

    /// Engine configuration could not be decoded.
    #[error("Invalid engine configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// The host's move primitive rejected or failed a jump.
    #[error("Navigation to measure {measure} failed: {message}")]
    Navigation { measure: usize, message: String },

    #[error(transparent)]
    Seek(#[from] SeekError),
}

/// Why a seek was refused. A refused seek never mutates timeline or cursor.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekError {
    #[error("timeline is not built")]
    NotBuilt,

    #[error("no cursor is attached")]
    NoCursor,

    #[error("measure index {index} is outside 0..{count}")]
    OutOfRange { index: usize, count: usize },
}

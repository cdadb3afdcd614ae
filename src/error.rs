//! Error types and handling for Watermarker

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Watermarker operations
pub type Result<T> = std::result::Result<T, WatermarkError>;

/// Main error type for Watermarker operations
#[derive(Debug, Error)]
pub enum WatermarkError {
    /// I/O related errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    ImageError(#[from] image::ImageError),

    /// Store or settings errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Requested profile does not exist
    #[error("Profile '{name}' not found")]
    ProfileNotFound { name: String },

    /// Profile name already taken
    #[error("Profile '{name}' already exists")]
    ProfileExists { name: String },

    /// Profile values out of range
    #[error("Invalid profile '{name}': {message}")]
    InvalidProfile { name: String, message: String },

    /// Font could not be located on disk
    #[error("Font not found: {font}")]
    FontNotFound { font: String },

    /// Font file could not be parsed
    #[error("Couldn't load font {font}: {message}")]
    FontError { font: String, message: String },

    /// Text does not fit the area left by anchor and margin
    #[error("No font size fits the target dimensions ({max_width:.1}x{target_height:.1} px)")]
    NoFittingSize { max_width: f32, target_height: f32 },

    /// File is not an image we can decode
    #[error("Not an image: {file:?}")]
    NotAnImage { file: PathBuf },

    /// Per-file failure with context
    #[error("Processing failed: {message} (file: {file:?})")]
    ProcessingError {
        message: String,
        file: Option<PathBuf>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerdeError(String),

    /// Runtime errors (task joins, logging setup)
    #[error("System error: {message}")]
    SystemError { message: String },
}

impl WatermarkError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn profile_not_found<S: Into<String>>(name: S) -> Self {
        Self::ProfileNotFound { name: name.into() }
    }

    pub fn profile_exists<S: Into<String>>(name: S) -> Self {
        Self::ProfileExists { name: name.into() }
    }

    /// Create a new invalid profile error
    pub fn invalid_profile<N: Into<String>, S: Into<String>>(name: N, message: S) -> Self {
        Self::InvalidProfile {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn font<F: Into<String>, S: Into<String>>(font: F, message: S) -> Self {
        Self::FontError {
            font: font.into(),
            message: message.into(),
        }
    }

    /// Create a new per-file processing error
    pub fn processing<S: Into<String>>(message: S, file: Option<PathBuf>) -> Self {
        Self::ProcessingError {
            message: message.into(),
            file,
        }
    }

    /// Create a new system error
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::SystemError {
            message: message.into(),
        }
    }

    /// Get the associated file path if available
    pub fn file_path(&self) -> Option<&PathBuf> {
        match self {
            Self::ProcessingError { file, .. } => file.as_ref(),
            Self::NotAnImage { file } => Some(file),
            _ => None,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::IoError(e) => format!("File system error: {}", e),
            Self::ImageError(e) => format!("Image processing failed: {}", e),
            Self::NotAnImage { file } => {
                format!(
                    "{:?} is not an image. Supported formats: JPEG, PNG, WebP, GIF, TIFF, BMP",
                    file
                )
            }
            Self::FontNotFound { font } => {
                format!(
                    "Font '{}' was not found. Pass a path to a .ttf/.otf file or a font file name installed on this system",
                    font
                )
            }
            Self::NoFittingSize { .. } => {
                "The watermark text cannot fit in the space left by the anchor and margin. \
                 Try a shorter text, a smaller margin or a different anchor."
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<toml::de::Error> for WatermarkError {
    fn from(err: toml::de::Error) -> Self {
        Self::SerdeError(format!("TOML parsing error: {}", err))
    }
}

impl From<toml::ser::Error> for WatermarkError {
    fn from(err: toml::ser::Error) -> Self {
        Self::SerdeError(format!("TOML serialization error: {}", err))
    }
}

impl From<serde_yaml::Error> for WatermarkError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::SerdeError(format!("YAML error: {}", err))
    }
}

impl From<serde_json::Error> for WatermarkError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerdeError(format!("JSON error: {}", err))
    }
}

/// Error context extension for adding file path information
pub trait ErrorContext<T> {
    /// Add file context to an error
    fn with_file_context(self, file: PathBuf) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<WatermarkError>,
{
    fn with_file_context(self, file: PathBuf) -> Result<T> {
        self.map_err(|e| match e.into() {
            WatermarkError::ProcessingError {
                message,
                file: None,
            } => WatermarkError::ProcessingError {
                message,
                file: Some(file),
            },
            // Bare I/O and codec errors lose the path otherwise
            WatermarkError::IoError(e) => WatermarkError::ProcessingError {
                message: e.to_string(),
                file: Some(file),
            },
            WatermarkError::ImageError(e) => WatermarkError::ProcessingError {
                message: e.to_string(),
                file: Some(file),
            },
            other => other,
        })
    }
}

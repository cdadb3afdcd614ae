//! Watermarker - batch text watermarking driven by named profiles
//!
//! A profile holds everything about a watermark: the text, the font, where it
//! is anchored, how tall it is relative to the image, outline and opacity, and
//! the folder marked copies go to. Profiles live in a single store file next
//! to a few global settings; one of them is the default.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use watermarker::{ProfileStore, WatermarkEngine};
//!
//! # async fn run() -> watermarker::Result<()> {
//! let store = ProfileStore::open("watermarker.toml")?;
//! let profile = store.load_profile("Default")?;
//! let output_dir = profile.output_dir.clone();
//!
//! let engine = WatermarkEngine::new(profile)?.quality(85);
//! let result = engine.mark_file("photo.jpg", output_dir).await?;
//! println!("Marked {:?}", result.output_path);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

pub mod config;
pub mod error;
pub mod parallel;
pub mod processing;

// Re-export commonly used types
pub use config::{Anchor, AxisAnchor, Profile, ProfileOverrides, ProfileStore};
pub use error::{Result, WatermarkError};
pub use parallel::{discover_inputs, BatchProcessor, BatchSummary, ProgressReporter};
pub use processing::{MarkResult, WatermarkEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How the global subscriber is set up
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
    /// One JSON object per line instead of human-readable text
    pub json: bool,
    /// Append to this file instead of writing to stderr
    pub file: Option<PathBuf>,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `options.level`. Fails if a subscriber is already set
/// or the log file can't be opened.
pub fn init_logging(options: &LoggingOptions) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.level))
        .map_err(|e| WatermarkError::config(format!("Invalid log level '{}': {}", options.level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match (&options.file, options.json) {
        (Some(path), json) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| WatermarkError::config(format!("Couldn't open log file {:?}: {}", path, e)))?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            if json {
                builder.json().try_init()
            } else {
                builder.try_init()
            }
        }
        (None, true) => builder.json().with_writer(std::io::stderr).try_init(),
        (None, false) => builder.with_writer(std::io::stderr).try_init(),
    };

    installed.map_err(|e| WatermarkError::system(format!("Logging already initialised: {}", e)))
}

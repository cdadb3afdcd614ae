//! Batch runs: find input files, mark them with bounded concurrency

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, WatermarkError};
use crate::processing::{MarkResult, WatermarkEngine};

pub mod progress;

pub use progress::{BatchSummary, FileFailure, ProgressReporter};

/// Collect the files to mark.
///
/// Files are taken as given. Directories are listed, descending into
/// subfolders only when `recursive` is set. Anything under `exclude` (the
/// output folder) is left out. The result is sorted and free of duplicates.
pub fn discover_inputs<P: AsRef<Path>>(
    paths: &[P],
    recursive: bool,
    exclude: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let exclude = exclude.map(|p| p.canonicalize().unwrap_or_else(|_| p.to_path_buf()));
    let is_excluded = |path: &Path| match &exclude {
        Some(ex) => path
            .canonicalize()
            .map(|p| p.starts_with(ex))
            .unwrap_or(false),
        None => false,
    };

    let mut files = BTreeSet::new();

    for path in paths {
        let path = path.as_ref();
        if path.is_file() {
            files.insert(path.to_path_buf());
        } else if path.is_dir() {
            let max_depth = if recursive { usize::MAX } else { 1 };
            let walker = WalkDir::new(path)
                .min_depth(1)
                .max_depth(max_depth)
                .into_iter()
                .filter_entry(|entry| !(entry.file_type().is_dir() && is_excluded(entry.path())));

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Skipping unreadable entry: {}", e);
                        continue;
                    }
                };
                if entry.file_type().is_file() {
                    files.insert(entry.into_path());
                }
            }
        } else {
            return Err(WatermarkError::processing(
                "Input path does not exist",
                Some(path.to_path_buf()),
            ));
        }
    }

    let files: Vec<PathBuf> = files.into_iter().filter(|f| !is_excluded(f)).collect();
    debug!("Discovered {} input files", files.len());
    Ok(files)
}

/// Marks a list of files with one engine
pub struct BatchProcessor {
    engine: WatermarkEngine,
    output_dir: PathBuf,
    jobs: usize,
}

impl BatchProcessor {
    /// `jobs` of `None` uses the CPU count
    pub fn new(engine: WatermarkEngine, output_dir: impl Into<PathBuf>, jobs: Option<usize>) -> Self {
        let jobs = jobs.unwrap_or_else(num_cpus::get).max(1);
        Self {
            engine,
            output_dir: output_dir.into(),
            jobs,
        }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Mark every file, skipping non-images and carrying on past failures
    pub async fn process(&self, files: Vec<PathBuf>, progress: &ProgressReporter) -> BatchSummary {
        let start_time = Instant::now();
        info!(
            "Marking {} files with profile '{}' ({} at a time)",
            files.len(),
            self.engine.profile().name,
            self.jobs
        );

        let mut summary = BatchSummary::default();
        let mut results = stream::iter(files)
            .map(|file| {
                let engine = self.engine.clone();
                let output_dir = self.output_dir.clone();
                async move {
                    let result = engine.mark_file(&file, &output_dir).await;
                    (file, result)
                }
            })
            .buffer_unordered(self.jobs);

        while let Some((file, result)) = results.next().await {
            record(&mut summary, file, result);
            progress.inc();
        }

        summary.duration = start_time.elapsed();
        progress.finish(&summary);
        info!(
            "Batch finished in {:.2}s: {} processed, {} skipped, {} failed",
            summary.duration.as_secs_f64(),
            summary.processed,
            summary.skipped,
            summary.failed
        );
        summary
    }
}

fn record(summary: &mut BatchSummary, file: PathBuf, result: Result<MarkResult>) {
    match result {
        Ok(marked) => {
            debug!(
                "Marked {:?} -> {:?} in {:.2}s",
                marked.input_path,
                marked.output_path,
                marked.processing_time.as_secs_f64()
            );
            summary.processed += 1;
        }
        Err(WatermarkError::NotAnImage { .. }) => {
            warn!("Skipping {:?}: not an image", file);
            summary.skipped += 1;
        }
        Err(e) => {
            warn!("Couldn't mark {:?}: {}", file, e);
            summary.failed += 1;
            summary.failures.push(FileFailure {
                path: file,
                message: e.user_message(),
            });
        }
    }
}

//! Mark every image in a folder with a one-off profile
//!
//! Usage: cargo run --example batch_mark -- <FOLDER> [TEXT]

use std::path::PathBuf;

use watermarker::{
    discover_inputs, init_logging, BatchProcessor, LoggingOptions, Profile, ProgressReporter,
    WatermarkEngine,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&LoggingOptions {
        level: "info".into(),
        ..Default::default()
    })?;

    let mut args = std::env::args().skip(1);
    let folder = PathBuf::from(args.next().unwrap_or_else(|| ".".into()));
    let text = args.next().unwrap_or_else(|| "@Watermark".into());

    let mut profile = Profile::named("demo")
        .text(text)
        .anchored("mb".parse()?, [0.5, 0.98])
        .opacity(160)
        .output_dir(folder.join("Watermarked"));
    profile.relative_height = 0.04;

    let files = discover_inputs(&[&folder], false, Some(profile.output_dir.as_path()))?;
    println!("Marking {} files in {}", files.len(), folder.display());

    let output_dir = profile.output_dir.clone();
    let engine = WatermarkEngine::new(profile)?.quality(85);
    let progress = ProgressReporter::new(files.len() as u64);
    let summary = BatchProcessor::new(engine, output_dir, None)
        .process(files, &progress)
        .await;

    println!(
        "{} marked, {} skipped, {} failed in {:.2}s",
        summary.processed,
        summary.skipped,
        summary.failed,
        summary.duration.as_secs_f64()
    );
    for failure in &summary.failures {
        println!("  {}: {}", failure.path.display(), failure.message);
    }
    Ok(())
}

//! Watermarker CLI - batch text watermarking with reusable profiles
//!
//! Marks images with a text watermark described by a named profile, and
//! manages the profile store those profiles live in.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use console::style;
use serde_json::json;
use tracing::{debug, info, warn};

use watermarker::config::{DEFAULT_LOG_LEVEL, DEFAULT_STORE_FILE};
use watermarker::{
    discover_inputs, init_logging, Anchor, BatchProcessor, BatchSummary, LoggingOptions, Profile,
    ProfileOverrides, ProfileStore, ProgressReporter, WatermarkEngine, WatermarkError,
};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Watermarker - batch text watermarking driven by named profiles
#[derive(Parser)]
#[command(
    name = "watermarker",
    version,
    about = "Batch text watermarking driven by named profiles",
    long_about = "Watermarker draws a text watermark onto batches of images. Everything about the \
                  mark (text, font, anchor, size, outline, opacity, output folder) lives in named \
                  profiles kept in a single store file; one of them is the default."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Profile store file (.toml, .yaml or .json)
    #[arg(
        long,
        global = true,
        env = "WATERMARKER_STORE",
        default_value = DEFAULT_STORE_FILE,
        value_name = "PATH"
    )]
    store: PathBuf,

    /// Log level, overriding the one saved in the store
    #[arg(long, global = true, value_name = "LEVEL", value_parser = LOG_LEVELS)]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only, no progress bar)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Watermark images
    Mark(MarkArgs),
    /// Manage watermark profiles
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },
    /// Show or change global settings
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Args)]
struct MarkArgs {
    /// Image files or folders (default: current folder)
    #[arg(value_name = "INPUT")]
    inputs: Vec<PathBuf>,

    /// Profile to use (default: the store's default profile)
    #[arg(short, long, value_name = "NAME")]
    profile: Option<String>,

    #[command(flatten)]
    overrides: ProfileArgs,

    /// Descend into subfolders
    #[arg(short = 'R', long)]
    recursive: bool,

    /// Files marked at once (default: CPU count)
    #[arg(short, long, value_name = "COUNT")]
    jobs: Option<usize>,

    /// JPEG quality (1-100)
    #[arg(long, default_value = "90", value_name = "QUALITY", value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Store the overridden values back into the profile
    #[arg(long)]
    save: bool,

    /// List the files that would be marked and stop
    #[arg(long)]
    dry_run: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

/// Profile values settable from the command line
#[derive(Args, Default)]
struct ProfileArgs {
    /// Watermark text
    #[arg(long, value_name = "TEXT")]
    text: Option<String>,

    /// Font file path or installed font file name
    #[arg(long, value_name = "FONT")]
    font: Option<String>,

    /// Margin as a fraction of the image size
    #[arg(long, value_name = "RATIO", value_parser = parse_ratio)]
    margin: Option<f32>,

    /// Text height as a fraction of the image height
    #[arg(long, value_name = "RATIO", value_parser = parse_ratio)]
    height: Option<f32>,

    /// Outline width as a fraction of the font size (0 disables it)
    #[arg(long, value_name = "RATIO", value_parser = parse_ratio)]
    stroke_width: Option<f32>,

    /// Opacity (0-255)
    #[arg(long, value_name = "ALPHA")]
    opacity: Option<u8>,

    /// Two-letter anchor: l/m/r then t/m/b (e.g. "rb")
    #[arg(long, value_name = "ANCHOR", value_parser = parse_anchor)]
    anchor: Option<Anchor>,

    /// Anchor point as fractions of the image size
    #[arg(long, value_name = "X,Y", value_parser = parse_position)]
    position: Option<[f32; 2]>,

    /// Output folder for marked copies
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,
}

impl From<&ProfileArgs> for ProfileOverrides {
    fn from(args: &ProfileArgs) -> Self {
        Self {
            text: args.text.clone(),
            font: args.font.clone(),
            margin: args.margin,
            relative_height: args.height,
            relative_stroke_width: args.stroke_width,
            opacity: args.opacity,
            anchor: args.anchor,
            position: args.position,
            output_dir: args.output.clone(),
        }
    }
}

#[derive(Subcommand)]
enum ProfileCommand {
    /// List profile names
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show a profile's values (default: the default profile)
    Show {
        name: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Create a profile from the default profile or another base
    Create {
        name: String,
        /// Profile to copy values from
        #[arg(long, value_name = "BASE")]
        from: Option<String>,
        /// Make the new profile the default
        #[arg(long)]
        set_default: bool,
        #[command(flatten)]
        values: ProfileArgs,
    },
    /// Change values of an existing profile
    Update {
        name: String,
        #[command(flatten)]
        values: ProfileArgs,
    },
    /// Delete one or more profiles
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Make a profile the default
    SetDefault { name: String },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Show global settings
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Save the log level used when no flag or RUST_LOG is given
    SetLogLevel {
        #[arg(value_parser = LOG_LEVELS)]
        level: String,
    },
    /// Print the store file path
    Path,
}

/// Parse a fraction between 0 and 1
fn parse_ratio(s: &str) -> Result<f32, String> {
    let value = s
        .trim()
        .parse::<f32>()
        .map_err(|_| format!("'{}' is not a number", s))?;
    if !(0.0..=1.0).contains(&value) {
        return Err("Value must be between 0 and 1".to_string());
    }
    Ok(value)
}

/// Parse position string (e.g., "0.5,1")
fn parse_position(s: &str) -> Result<[f32; 2], String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        return Err("Position must be in format 'X,Y' (e.g., '1,1')".to_string());
    }

    let x = parse_ratio(parts[0]).map_err(|e| format!("Invalid X value: {}", e))?;
    let y = parse_ratio(parts[1]).map_err(|e| format!("Invalid Y value: {}", e))?;
    Ok([x, y])
}

fn parse_anchor(s: &str) -> Result<Anchor, String> {
    s.parse::<Anchor>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{}: {}", style("Error").red().bold(), describe(&e));
            process::exit(1);
        }
    }
}

/// Friendly text for errors from the library, full chain for the rest
fn describe(error: &anyhow::Error) -> String {
    match error.downcast_ref::<WatermarkError>() {
        Some(e) => e.user_message(),
        None => format!("{:#}", error),
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    // Read the store first so its log level applies, write it once logging is up
    let store = ProfileStore::load(&cli.store);

    let level = if cli.verbose {
        "debug".to_string()
    } else if cli.quiet {
        "error".to_string()
    } else {
        cli.log_level
            .clone()
            .or_else(|| store.as_ref().ok().map(|s| s.log_level().to_string()))
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
    };
    init_logging(&LoggingOptions {
        level,
        json: cli.log_json,
        file: cli.log_file.clone(),
    })?;

    let mut store =
        store.with_context(|| format!("Couldn't open profile store {:?}", cli.store))?;
    store
        .initialise()
        .with_context(|| format!("Couldn't create profile store {:?}", cli.store))?;
    debug!("Using profile store {:?}", store.path());

    match cli.command {
        Commands::Mark(args) => run_mark(&mut store, args, cli.quiet).await,
        Commands::Profile { action } => {
            handle_profile(&mut store, action)?;
            Ok(0)
        }
        Commands::Config { action } => {
            handle_config(&mut store, action)?;
            Ok(0)
        }
    }
}

/// Mark a batch, returning the exit code
async fn run_mark(store: &mut ProfileStore, args: MarkArgs, quiet: bool) -> anyhow::Result<i32> {
    let base = match &args.profile {
        Some(name) => store.load_profile(name)?,
        None => {
            let default = store.load_default();
            if default.load_failed {
                warn!("Marking with built-in values for '{}'", default.profile.name);
            }
            default.profile
        }
    };

    let overrides = ProfileOverrides::from(&args.overrides);
    let profile = overrides.merged(base);
    profile.validate()?;

    if args.save && !overrides.is_empty() {
        store.upsert(profile.clone())?;
        store.save()?;
        info!("Saved overrides into profile '{}'", profile.name);
    }

    let inputs = if args.inputs.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        args.inputs.clone()
    };
    let output_dir = profile.output_dir.clone();

    let files = discover_inputs(&inputs, args.recursive, Some(output_dir.as_path()))?;
    if files.is_empty() {
        if !args.json {
            println!("{}: No files to mark", style("Info").blue().bold());
        }
        return Ok(0);
    }
    info!("Found {} files to mark", files.len());

    if args.dry_run {
        print_dry_run(&files, &profile, &output_dir, args.json)?;
        return Ok(0);
    }

    let engine = WatermarkEngine::new(profile)
        .context("Couldn't prepare the watermark")?
        .quality(args.quality);
    let progress = if args.json || quiet {
        ProgressReporter::hidden()
    } else {
        ProgressReporter::new(files.len() as u64)
    };

    let processor = BatchProcessor::new(engine, &output_dir, args.jobs);
    let summary = processor.process(files, &progress).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !quiet {
        print_summary(&summary, processor.output_dir());
    }

    Ok(if summary.has_failures() { 1 } else { 0 })
}

fn print_dry_run(files: &[PathBuf], profile: &Profile, output_dir: &Path, json: bool) -> anyhow::Result<()> {
    if json {
        let value = json!({
            "profile": profile.name,
            "output_dir": output_dir,
            "files": files,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!(
        "{} files would be marked with profile {} into {}:",
        style(files.len()).bold(),
        style(&profile.name).cyan(),
        output_dir.display()
    );
    for file in files {
        println!("  {}", file.display());
    }
    Ok(())
}

/// Print batch summary
fn print_summary(summary: &BatchSummary, output_dir: &Path) {
    println!();
    println!("{}", style("Watermark Summary:").bold());
    println!("  {}: {}", style("Marked").green(), summary.processed);
    if summary.skipped > 0 {
        println!("  {}: {}", style("Skipped").yellow(), summary.skipped);
    }
    if summary.failed > 0 {
        println!("  {}: {}", style("Failed").red(), summary.failed);
    }
    println!("  {}: {:.2}s", style("Duration").blue(), summary.duration.as_secs_f64());
    if summary.processed > 0 {
        println!("  {}: {:.1} files/sec", style("Speed").cyan(), summary.files_per_second());
        println!("  {}: {}", style("Output").cyan(), output_dir.display());
    }

    if !summary.failures.is_empty() {
        println!("\nErrors:");
        for (i, failure) in summary.failures.iter().enumerate() {
            println!("  {}: {}: {}", i + 1, failure.path.display(), failure.message);
        }
    }
}

fn handle_profile(store: &mut ProfileStore, action: ProfileCommand) -> anyhow::Result<()> {
    match action {
        ProfileCommand::List { json } => {
            let default = store.default_profile_name();
            if json {
                let value = json!({
                    "default": default,
                    "profiles": store.profile_names(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                for name in store.profile_names() {
                    if name == default {
                        println!("{} {}", style(name).cyan().bold(), style("(default)").dim());
                    } else {
                        println!("{}", name);
                    }
                }
            }
        }
        ProfileCommand::Show { name, json } => {
            let profile = match name {
                Some(name) => store.load_profile(&name)?,
                None => store.load_default().profile,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                print_profile(&profile, profile.name == store.default_profile_name());
            }
        }
        ProfileCommand::Create {
            name,
            from,
            set_default,
            values,
        } => {
            let base = match from {
                Some(base) => store.load_profile(&base)?,
                None => store.load_default().profile,
            };
            let mut profile = ProfileOverrides::from(&values).merged(base);
            profile.name = name.clone();

            store.create(profile)?;
            if set_default {
                store.set_default_profile(&name)?;
            }
            store.save()?;
            println!("{}: Created profile '{}'", style("Success").green().bold(), name);
        }
        ProfileCommand::Update { name, values } => {
            let overrides = ProfileOverrides::from(&values);
            if overrides.is_empty() {
                println!("{}: Nothing to update", style("Info").blue().bold());
                return Ok(());
            }
            let profile = overrides.merged(store.load_profile(&name)?);
            store.update(profile)?;
            store.save()?;
            println!("{}: Updated profile '{}'", style("Success").green().bold(), name);
        }
        ProfileCommand::Delete { names } => {
            let removed = store.remove(&names)?;
            store.save()?;
            println!("{}: Deleted {} profile(s)", style("Success").green().bold(), removed);
        }
        ProfileCommand::SetDefault { name } => {
            store.set_default_profile(&name)?;
            store.save()?;
            println!("{}: Default profile is now '{}'", style("Success").green().bold(), name);
        }
    }
    Ok(())
}

/// Print one profile as an aligned table
fn print_profile(profile: &Profile, is_default: bool) {
    if is_default {
        println!("{} {}", style(&profile.name).cyan().bold(), style("(default)").dim());
    } else {
        println!("{}", style(&profile.name).cyan().bold());
    }

    let rows = [
        ("text", profile.text.clone()),
        ("font", profile.font.clone()),
        ("margin", profile.margin.to_string()),
        ("height", profile.relative_height.to_string()),
        ("stroke width", profile.relative_stroke_width.to_string()),
        ("opacity", profile.opacity.to_string()),
        ("anchor", profile.anchor.to_string()),
        (
            "position",
            format!("{},{}", profile.position[0], profile.position[1]),
        ),
        ("output", profile.output_dir.display().to_string()),
    ];
    for (key, value) in rows {
        println!("  {:<13} {}", style(key).bold(), value);
    }
}

fn handle_config(store: &mut ProfileStore, action: ConfigCommand) -> anyhow::Result<()> {
    match action {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(store.settings())?);
            } else {
                println!("{}", style("Settings:").bold());
                println!("  {:<16} {}", "store", store.path().display());
                println!("  {:<16} {}", "default profile", store.default_profile_name());
                println!("  {:<16} {}", "log level", store.log_level());
                println!("  {:<16} {}", "profiles", store.profiles().len());
            }
        }
        ConfigCommand::SetLogLevel { level } => {
            store.set_log_level(&level)?;
            store.save()?;
            println!("{}: Log level is now '{}'", style("Success").green().bold(), level);
        }
        ConfigCommand::Path => {
            println!("{}", store.path().display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("1,1").unwrap(), [1.0, 1.0]);
        assert_eq!(parse_position("0.25, 0.5").unwrap(), [0.25, 0.5]);
        assert!(parse_position("1").is_err());
        assert!(parse_position("1,2").is_err());
        assert!(parse_position("a,b").is_err());
    }

    #[test]
    fn test_parse_ratio() {
        assert_eq!(parse_ratio("0.05").unwrap(), 0.05);
        assert!(parse_ratio("-0.1").is_err());
        assert!(parse_ratio("1.5").is_err());
    }

    #[test]
    fn test_parse_anchor() {
        assert_eq!(parse_anchor("rb").unwrap().to_string(), "rb");
        assert!(parse_anchor("xx").is_err());
    }

    #[test]
    fn test_profile_args_to_overrides() {
        let args = ProfileArgs {
            text: Some("(c) me".into()),
            height: Some(0.1),
            ..Default::default()
        };
        let overrides = ProfileOverrides::from(&args);
        assert_eq!(overrides.text.as_deref(), Some("(c) me"));
        assert_eq!(overrides.relative_height, Some(0.1));
        assert!(overrides.font.is_none());
        assert!(ProfileOverrides::from(&ProfileArgs::default()).is_empty());
    }

    #[test]
    fn test_mark_args_parse() {
        let cli = Cli::try_parse_from([
            "watermarker",
            "--store",
            "s.toml",
            "mark",
            "a.jpg",
            "-p",
            "web",
            "--anchor",
            "lt",
            "--position",
            "0,0",
            "-R",
        ])
        .unwrap();
        assert_eq!(cli.store, PathBuf::from("s.toml"));
        match cli.command {
            Commands::Mark(args) => {
                assert_eq!(args.inputs, vec![PathBuf::from("a.jpg")]);
                assert_eq!(args.profile.as_deref(), Some("web"));
                assert!(args.recursive);
                assert_eq!(args.quality, 90);
                assert_eq!(args.overrides.position, Some([0.0, 0.0]));
            }
            _ => panic!("expected mark"),
        }
    }
}

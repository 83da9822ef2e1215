/*!
 * Quill CLI - Command Line Interface
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use quill::{
    analysis::{Aggressiveness, AnalysisRequest, AnalysisResult, CoachingLevel, EssayMode},
    config::QuillConfig,
    error::{QuillError, EXIT_DEGRADED, EXIT_FATAL, EXIT_SUCCESS},
    logging, AnalysisService,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "quill")]
#[command(version, about = "Essay analysis with caching, pooled persistence and graceful fallback", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an essay read from a file ("-" for stdin)
    Analyze {
        /// Essay file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Essay mode (free-form labels such as "persuasive" are normalized)
        #[arg(short = 'm', long = "mode", default_value = "auto")]
        mode: EssayMode,

        /// Coaching level
        #[arg(long, value_enum, default_value = "medium")]
        coaching: CoachingArg,

        /// Suggestion aggressiveness
        #[arg(long, value_enum, default_value = "medium")]
        aggressiveness: AggressivenessArg,

        /// Append the result to this JSON-lines file
        #[arg(long, value_name = "FILE")]
        store: Option<PathBuf>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration file helpers
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a configuration file
    Init {
        /// Destination file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Preset to start from
        #[arg(long, value_enum, default_value = "default")]
        preset: PresetArg,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum CoachingArg {
    Light,
    Medium,
    Intensive,
}

impl From<CoachingArg> for CoachingLevel {
    fn from(level: CoachingArg) -> Self {
        match level {
            CoachingArg::Light => CoachingLevel::Light,
            CoachingArg::Medium => CoachingLevel::Medium,
            CoachingArg::Intensive => CoachingLevel::Intensive,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum AggressivenessArg {
    Low,
    Medium,
    High,
}

impl From<AggressivenessArg> for Aggressiveness {
    fn from(level: AggressivenessArg) -> Self {
        match level {
            AggressivenessArg::Low => Aggressiveness::Low,
            AggressivenessArg::Medium => Aggressiveness::Medium,
            AggressivenessArg::High => Aggressiveness::High,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum PresetArg {
    Default,
    Development,
    Production,
}

impl From<PresetArg> for QuillConfig {
    fn from(preset: PresetArg) -> Self {
        match preset {
            PresetArg::Default => QuillConfig::default(),
            PresetArg::Development => QuillConfig::development_preset(),
            PresetArg::Production => QuillConfig::production_preset(),
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<QuillError>()
                .map_or(EXIT_FATAL, QuillError::exit_code)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => QuillConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => QuillConfig::default(),
    };

    match cli.command {
        Commands::Analyze {
            file,
            mode,
            coaching,
            aggressiveness,
            store,
            json,
        } => {
            logging::init_logging(&config.logging)?;
            let text = read_essay(&file)?;
            let request = AnalysisRequest::new(text)
                .with_mode(mode)
                .with_coaching(coaching.into())
                .with_aggressiveness(aggressiveness.into());
            analyze(config, request, store, json)
        }
        Commands::Config(ConfigCommands::Init {
            file,
            preset,
            force,
        }) => {
            if file.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", file.display());
            }
            QuillConfig::from(preset).to_file(&file)?;
            println!("Wrote configuration to {}", file.display());
            Ok(EXIT_SUCCESS)
        }
        Commands::Config(ConfigCommands::Show) => {
            config.validate()?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(EXIT_SUCCESS)
        }
    }
}

fn read_essay(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut text)
            .context("Failed to read essay from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn analyze(
    config: QuillConfig,
    request: AnalysisRequest,
    store: Option<PathBuf>,
    json: bool,
) -> Result<i32> {
    let mut builder = AnalysisService::builder(config);
    if let Some(path) = store {
        builder = builder.jsonl_store(path);
    }
    let service = builder.build()?;

    let result = service.analyze(&request);
    service.shutdown();

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&request, &result);
    }

    Ok(if result.is_fallback {
        EXIT_DEGRADED
    } else {
        EXIT_SUCCESS
    })
}

fn print_summary(request: &AnalysisRequest, result: &AnalysisResult) {
    println!("Fingerprint: {}", request.fingerprint());
    println!(
        "Mode: {}  Coaching: {}  Aggressiveness: {}",
        request.mode, request.coaching, request.aggressiveness
    );
    println!();
    for (dimension, score) in &result.scores {
        println!("  {:<14} {:>5.1}", dimension, score);
    }
    println!();

    if result.is_fallback {
        println!(
            "Fallback analysis ({}): the analyzer was unavailable.",
            result.error_class.as_deref().unwrap_or("unknown")
        );
    }
    if let Some(notes) = result.payload.get("analysis_notes").and_then(|n| n.as_str()) {
        println!("{}", notes);
    }
    if let Some(suggestions) = result.payload.get("suggestions").and_then(|s| s.as_array()) {
        for suggestion in suggestions {
            if let Some(text) = suggestion.get("text").and_then(|t| t.as_str()) {
                println!("  - {}", text);
            }
        }
    }
}

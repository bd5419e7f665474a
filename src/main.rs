use clap::{Parser, Subcommand};
use std::path::PathBuf;

use voice_session_recorder::combine::CombinationOutcome;
use voice_session_recorder::config::load_config;
use voice_session_recorder::context::RequestContext;
use voice_session_recorder::models::Speaker;
use voice_session_recorder::serve::{build_state, serve_api};

type DynError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reconstruct chunked voice session recordings")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API with the periodic stale-job reaper
    Serve {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Combine the uploaded chunks of one conversation channel
    Combine {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,

        conversation_id: String,

        #[arg(short, long, value_enum, default_value_t = Speaker::Patient)]
        speaker: Speaker,
    },
    /// Detect silent segments in a stored recording
    Analyze {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,

        /// Storage path of the recording
        file_path: String,
    },
    /// Fail processing jobs whose heartbeat expired
    Reap {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), DynError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        Command::Serve { config } => serve_api(load_config(&config)?),
        Command::Combine {
            config,
            conversation_id,
            speaker,
        } => combine(config, conversation_id, speaker),
        Command::Analyze { config, file_path } => analyze(config, file_path),
        Command::Reap { config } => reap(config),
    }
}

fn combine(
    config_path: PathBuf,
    conversation_id: String,
    speaker: Speaker,
) -> Result<(), DynError> {
    let config = load_config(&config_path)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let state = build_state(&config).await?;
        let ctx = RequestContext::new("combine");
        let outcome = state.combine.combine(&ctx, &conversation_id, speaker).await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);

        if let CombinationOutcome::Failed { reason, .. } = outcome {
            return Err(format!("Combination failed: {}", reason).into());
        }
        Ok::<(), DynError>(())
    })
}

fn analyze(config_path: PathBuf, file_path: String) -> Result<(), DynError> {
    let config = load_config(&config_path)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let state = build_state(&config).await?;
        let ctx = RequestContext::new("silence");
        let analysis = state.silence.analyze(&ctx, &file_path).await?;
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        Ok::<(), DynError>(())
    })
}

fn reap(config_path: PathBuf) -> Result<(), DynError> {
    let config = load_config(&config_path)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let state = build_state(&config).await?;
        let ctx = RequestContext::new("reaper");
        let reclaimed = state.combine.reap_stale_jobs(&ctx).await?;
        println!("Reclaimed {} stale job(s)", reclaimed);
        Ok::<(), DynError>(())
    })
}

//! The `amadeus` binary: bootstrap a session and serve the wire protocol
//! on stdio.
//!
//! Logs go to stderr — stdout belongs to the JSON-RPC surface.

use std::path::PathBuf;
use std::sync::Arc;

use amadeus_config::load_config;
use amadeus_llm::create_llm;
use amadeus_session::{Metadata, Session, ShareDir};
use amadeus_soul::{Runtime, Soul, load_agent};
use amadeus_wire::{Wire, WireFile};
use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "amadeus", version, about = "Amadeus coding assistant")]
struct Cli {
    /// Working directory the agent operates in. Defaults to the current
    /// directory.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Resume the last session of this working directory.
    #[arg(long, conflicts_with = "session")]
    resume: bool,

    /// Open a specific session by id.
    #[arg(long)]
    session: Option<String>,

    /// Auto-approve every tool action.
    #[arg(long)]
    yolo: bool,

    /// Agent specification file. Defaults to the built-in agent.
    #[arg(long)]
    agent_file: Option<PathBuf>,

    /// Override the thinking toggle (defaults to the stored metadata).
    #[arg(long)]
    thinking: Option<bool>,

    /// Model name from the config to use instead of the default.
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let share = ShareDir::resolve().context("cannot resolve the share directory")?;
    std::fs::create_dir_all(share.root()).context("cannot create the share directory")?;
    let work_dir = match cli.work_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot resolve the current directory")?,
    };

    let config = Arc::new(load_config(share.root()).context("cannot load configuration")?);
    let metadata = Metadata::load(&share.metadata_path()).unwrap_or_default();
    let thinking = cli.thinking.or(metadata.thinking);

    let llm = {
        let selected = match &cli.model {
            Some(name) => config
                .models
                .get(name)
                .map(|model| (model, config.providers.get(&model.provider)))
                .and_then(|(model, provider)| provider.map(|provider| (model, provider))),
            None => config.default_model(),
        };
        match selected {
            None => None,
            Some((model, provider)) => {
                let mut provider = provider.clone();
                let mut model = model.clone();
                amadeus_config::apply_env_overrides(&mut provider, &mut model);
                create_llm(&provider, &model, thinking).context("cannot configure the LLM")?
            },
        }
    };

    let session = if cli.resume {
        Session::resume_last(&share, &work_dir).await?
    } else if let Some(id) = &cli.session {
        Session::open(&share, &work_dir, id).await?
    } else {
        Session::create(&share, &work_dir).await?
    };
    info!(session_id = %session.id, work_dir = %work_dir.display(), "Session ready");

    let wire_file =
        WireFile::open(session.wire_file_path()).context("cannot open the wire trace")?;
    let wire = Wire::with_file(wire_file);

    let (runtime, context) =
        Runtime::create(Arc::clone(&config), llm, session, cli.yolo, None).await?;
    let approval = runtime.approval.share();
    let agent = load_agent(cli.agent_file.as_deref(), runtime, wire.clone()).await?;
    agent.toolset.load_mcp(config.mcp.clone(), approval);

    let soul = Arc::new(Soul::new(agent, context, wire));

    amadeus_server::WireServer::new(soul)
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("wire server failed")?;
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use slide_common::{AspectRatio, Language, Style};
use slide_core::client::adapters_from_config;
use slide_core::mock::{MockImageModel, MockPlanningModel};
use slide_core::{Config, DeckFormat, JobStore, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod generate;
pub mod server;

#[derive(Parser)]
#[command(name = "slide")]
#[command(about = "Turn free-form text into an illustrated slide deck")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file (.toml or .json); defaults to .slide/config.* then slide.config.*
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use the built-in offline models instead of the remote endpoints
    #[arg(long, global = true)]
    pub offline: bool,

    /// Deck format: pptx | html (defaults to the configured output_format)
    #[arg(long, global = true)]
    pub format: Option<DeckFormat>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a deck from a text file or inline text
    Generate {
        /// Read the source text from this file
        #[arg(short, long, conflicts_with = "text")]
        input: Option<PathBuf>,
        /// Source text
        #[arg(short, long)]
        text: Option<String>,
        /// Number of slides to generate
        #[arg(short, long, default_value_t = 5)]
        slides: u32,
        /// Output language: 中文 | English | 日本語 (or zh, en, ja)
        #[arg(short, long, default_value_t = Language::default())]
        language: Language,
        /// Background style: business | technology | minimal | creative | academic
        #[arg(long, default_value_t = Style::default())]
        style: Style,
        /// Page shape: 16:9 | 4:3 | 1:1
        #[arg(long)]
        aspect: Option<AspectRatio>,
        /// Output file name without extension
        #[arg(short, long)]
        output: Option<String>,
        /// Only print the output path
        #[arg(short, long)]
        quiet: bool,
    },
    /// Paste text and answer a few prompts
    Interactive,
    /// Serve the HTTP job API
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 5000)]
        port: u16,
    },
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(format) = cli.format {
        config.output_format = format;
    }
    let store = JobStore::new(config.retention.clone());
    let sweeper = store.spawn_sweeper();
    let orchestrator = Arc::new(build_orchestrator(&config, store, cli.offline)?);

    let outcome = match cli.command {
        Some(Commands::Generate {
            input,
            text,
            slides,
            language,
            style,
            aspect,
            output,
            quiet,
        }) => {
            let text = generate::read_source(input, text).await?;
            let options = generate::GenerateOptions {
                text,
                num_slides: slides,
                language,
                style,
                aspect_ratio: aspect.unwrap_or(config.pipeline.aspect_ratio),
                output,
                quiet,
            };
            generate::run(&orchestrator, &config, options).await
        }
        Some(Commands::Serve { host, port }) => {
            server::serve(orchestrator, config.pipeline.aspect_ratio, &host, port).await
        }
        Some(Commands::Interactive) | None => generate::interactive(&orchestrator, &config).await,
    };

    sweeper.abort();
    outcome
}

fn init_tracing(debug: bool) {
    let default = if debug { "info,slide_core=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Logs go to stderr so progress output on stdout stays readable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_with_fallback(),
    };
    config.apply_env_overrides();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_orchestrator(
    config: &Config,
    store: Arc<JobStore>,
    offline: bool,
) -> Result<Orchestrator> {
    let assembler = config.output_format.assembler();
    tracing::debug!(format = %config.output_format, "deck assembler selected");
    if offline {
        tracing::info!("using offline models");
        return Ok(Orchestrator::new(
            &config.pipeline,
            store,
            Arc::new(MockPlanningModel::new()),
            Arc::new(MockImageModel::new()),
            assembler,
        ));
    }

    let (planner, images) = adapters_from_config(config).context(
        "model endpoints are not configured \
         (set ARK_API_KEY, LLM_ENDPOINT and IMAGE_ENDPOINT, or pass --offline)",
    )?;
    Ok(Orchestrator::new(
        &config.pipeline,
        store,
        Arc::new(planner),
        Arc::new(images),
        assembler,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_flag_parses() {
        let cli = Cli::try_parse_from(["slide", "generate", "--text", "hi", "--format", "html"])
            .unwrap();
        assert_eq!(cli.format, Some(DeckFormat::Html));

        let cli = Cli::try_parse_from(["slide", "serve"]).unwrap();
        assert_eq!(cli.format, None);
        assert!(Cli::try_parse_from(["slide", "--format", "pdf", "serve"]).is_err());
    }

    #[tokio::test]
    async fn test_offline_orchestrator_writes_pptx_by_default() {
        let config = Config::with_defaults();
        let store = JobStore::new(config.retention.clone());
        let orchestrator = build_orchestrator(&config, store, true).unwrap();
        let id = orchestrator
            .submit(slide_common::GenerationRequest::new("Tides. Moon. Coastlines.", 3))
            .unwrap();
        for _ in 0..500 {
            if orchestrator.status(&id).await.unwrap().state.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let result = orchestrator.result(&id).await.unwrap();
        assert!(result.artifact.file_name.ends_with(".pptx"));
        assert!(result.artifact.bytes.starts_with(b"PK"));
    }
}

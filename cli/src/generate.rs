//! `generate` and `interactive`: run one job in-process and write the deck.

use anyhow::{bail, Context, Result};
use slide_common::{AspectRatio, GenerationRequest, Language, Style};
use slide_core::{Config, JobId, JobState, JobStatus, Orchestrator};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_SLIDES: u32 = 5;

pub struct GenerateOptions {
    pub text: String,
    pub num_slides: u32,
    pub language: Language,
    pub style: Style,
    pub aspect_ratio: AspectRatio,
    pub output: Option<String>,
    pub quiet: bool,
}

pub async fn read_source(input: Option<PathBuf>, text: Option<String>) -> Result<String> {
    match (input, text) {
        (Some(path), _) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        (None, Some(text)) => Ok(text),
        (None, None) => bail!("either --input or --text is required"),
    }
}

fn default_output_name() -> String {
    format!("presentation_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

pub async fn run(
    orchestrator: &Orchestrator,
    config: &Config,
    options: GenerateOptions,
) -> Result<()> {
    let request = GenerationRequest::new(options.text, options.num_slides)
        .with_language(options.language)
        .with_style(options.style)
        .with_aspect_ratio(options.aspect_ratio);
    let id = orchestrator.submit(request)?;
    if !options.quiet {
        println!("Job {id} submitted");
    }

    let status = wait_for(orchestrator, &id, options.quiet).await?;
    if status.state == JobState::Failed {
        let reason = status
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        bail!("generation failed: {reason}");
    }

    let result = orchestrator.result(&id).await?;
    let name = options.output.unwrap_or_else(default_output_name);
    let artifact = &result.artifact;
    let path =
        write_artifact(&config.output_dir, &name, &artifact.file_name, &artifact.bytes).await?;

    if options.quiet {
        println!("{}", path.display());
    } else {
        if !result.dropped_indices.is_empty() {
            let dropped: Vec<String> = result
                .dropped_indices
                .iter()
                .map(|i| (i + 1).to_string())
                .collect();
            println!("Skipped slides without an image: {}", dropped.join(", "));
        }
        println!(
            "Deck written to {} ({}/{} slides)",
            path.display(),
            result.included,
            result.requested
        );
    }
    Ok(())
}

/// Polls until the job is terminal, printing each new progress message.
async fn wait_for(orchestrator: &Orchestrator, id: &JobId, quiet: bool) -> Result<JobStatus> {
    let mut last = String::new();
    loop {
        let status = orchestrator.status(id).await?;
        if !quiet && status.progress.message != last {
            println!("[{:>3}%] {}", status.progress.percent, status.progress.message);
            last.clone_from(&status.progress.message);
        }
        if status.state.is_terminal() {
            return Ok(status);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn write_artifact(
    dir: &Path,
    name: &str,
    file_name: &str,
    bytes: &[u8],
) -> Result<PathBuf> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("pptx");
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!("{name}.{extension}"));
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Collects text until two consecutive blank lines.
fn push_line(buffer: &mut Vec<String>, line: String) -> bool {
    let blank = line.trim().is_empty();
    if blank && buffer.last().is_some_and(|l| l.trim().is_empty()) {
        buffer.pop();
        return true;
    }
    buffer.push(line);
    false
}

async fn prompt<R>(lines: &mut tokio::io::Lines<R>, question: &str) -> Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    stdout.write_all(question.as_bytes()).await?;
    stdout.flush().await?;
    Ok(lines.next_line().await?.unwrap_or_default().trim().to_string())
}

pub async fn interactive(orchestrator: &Orchestrator, config: &Config) -> Result<()> {
    println!("Paste the source text. Finish with two empty lines.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let mut buffer = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if push_line(&mut buffer, line) {
            break;
        }
    }
    let text = buffer.join("\n");
    if text.trim().is_empty() {
        bail!("no text entered");
    }

    let answer = prompt(&mut lines, &format!("Number of slides [{DEFAULT_SLIDES}]: ")).await?;
    let num_slides = if answer.is_empty() {
        DEFAULT_SLIDES
    } else {
        answer
            .parse()
            .with_context(|| format!("'{answer}' is not a slide count"))?
    };
    let output = prompt(&mut lines, "Output name (blank for a timestamp): ").await?;

    let options = GenerateOptions {
        text,
        num_slides,
        language: Language::default(),
        style: Style::default(),
        aspect_ratio: config.pipeline.aspect_ratio,
        output: (!output.is_empty()).then_some(output),
        quiet: false,
    };
    run(orchestrator, config, options).await
}

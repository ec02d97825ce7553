use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use canvasgen_contracts::errors::{ErrorKind, GenerationError};
use canvasgen_contracts::events::EventWriter;
use canvasgen_contracts::media::PassthroughMediaGateway;
use canvasgen_contracts::request::{AspectRatio, GenerationParams, ImageStyle, Moderation};
use canvasgen_engine::{DirectoryMediaGateway, ImageGenerator};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "canvasgen", version, about = "Image generation across providers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one image and print `{url, id?, status}` or `{code, message}`.
    Generate(GenerateArgs),
    /// Providers with a configured credential.
    Providers,
    /// Providers whose configured model supports image-to-image.
    ImageToImageProviders,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "dryrun")]
    provider: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    source_image: Option<String>,
    #[arg(long = "reference-image")]
    reference_images: Vec<String>,
    #[arg(long)]
    mask: Option<String>,
    #[arg(long)]
    aspect_ratio: Option<AspectRatio>,
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    output_quality: Option<u8>,
    #[arg(long)]
    style: Option<ImageStyle>,
    #[arg(long)]
    moderation: Option<Moderation>,
    #[arg(long)]
    media_dir: PathBuf,
    #[arg(long)]
    public_base_url: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
}

impl GenerateArgs {
    fn params(&self) -> GenerationParams {
        GenerationParams {
            model: self.model.clone(),
            source_image_url: self.source_image.clone(),
            additional_image_urls: self.reference_images.clone(),
            mask_url: self.mask.clone(),
            aspect_ratio: self.aspect_ratio,
            output_quality: self.output_quality,
            style: self.style,
            moderation: self.moderation,
        }
    }
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("canvasgen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Providers => {
            let generator = ImageGenerator::from_env(Arc::new(PassthroughMediaGateway));
            print_json(&serde_json::to_value(generator.list_providers())?)?;
            Ok(0)
        }
        Command::ImageToImageProviders => {
            let generator = ImageGenerator::from_env(Arc::new(PassthroughMediaGateway));
            print_json(&serde_json::to_value(
                generator.list_image_to_image_providers(),
            )?)?;
            Ok(0)
        }
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let gateway = DirectoryMediaGateway::new(&args.media_dir)
        .with_public_base_url(args.public_base_url.clone());
    let generator = ImageGenerator::from_env(Arc::new(gateway))
        .with_events(args.events.clone().map(EventWriter::new));

    match generator.generate(&args.prompt, &args.provider, args.params()) {
        Ok(result) => {
            tracing::info!(
                provider = %result.provider_id,
                model = %result.model,
                attempts = result.attempts,
                "image stored"
            );
            print_json(&serde_json::to_value(result.to_wire())?)?;
            Ok(0)
        }
        Err(err) => {
            print_json(&serde_json::to_value(err.to_wire())?)?;
            Ok(exit_code(&err))
        }
    }
}

fn exit_code(err: &GenerationError) -> i32 {
    match err.kind {
        ErrorKind::ContentModeration => 2,
        _ => 1,
    }
}

fn print_json(value: &Value) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, value).context("failed writing JSON to stdout")?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(())
}

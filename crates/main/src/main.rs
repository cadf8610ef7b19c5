use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use resume_export::dom::{Document, DocumentSpec};
use resume_export::raster::SkiaRasterizer;
use resume_export::sample::{build_sample_resume, SampleOptions};
use resume_export::sink::DirectorySink;
use resume_export::{DocumentMetadata, ExportConfig, ExportRequest, Exporter};

/// Exports laid-out resumes to print-ready PDFs.
///
/// Text is rendered with the fonts found under `assets/fonts` or the directory named
/// by `RESUME_EXPORT_FONTS_DIR`; without fonts, pages are exported without text.
/// Set `RUST_LOG=debug` to follow the pipeline stages.
#[derive(Parser)]
#[command(author, version, about = "Export laid-out resumes to print-ready PDFs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a laid-out document described as JSON.
    Export(ExportArgs),

    /// Export the built-in sample resume.
    #[command(alias = "demo")]
    Sample(SampleArgs),
}

#[derive(Args)]
struct OutputArgs {
    /// Directory the PDF is written to.
    #[arg(long, default_value = "downloads")]
    out_dir: PathBuf,

    /// Oversampling factor, clamped to 1.0..=4.0.
    #[arg(long)]
    scale: Option<f32>,
}

#[derive(Args)]
struct ExportArgs {
    /// JSON file with the document's body children.
    #[arg(long)]
    document: PathBuf,

    /// Template identifier, e.g. `oslo`, `stockholm` or `classic`.
    #[arg(long)]
    template: String,

    #[arg(long)]
    owner: Option<String>,

    #[arg(long)]
    email: Option<String>,

    #[arg(long)]
    phone: Option<String>,

    /// Milliseconds to wait before capturing the document.
    #[arg(long)]
    settle_ms: Option<u64>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args)]
struct SampleArgs {
    #[arg(long, default_value = "classic")]
    template: String,

    #[arg(long)]
    owner: Option<String>,

    /// Number of experience entries in the sample.
    #[arg(long, default_value_t = 4)]
    entries: usize,

    #[command(flatten)]
    output: OutputArgs,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| Box::new(err) as Box<dyn Error>)
        .and_then(|runtime| runtime.block_on(run(cli.command)));

    if let Err(err) = result {
        eprintln!("Error: {}", err);
        print_error_sources(err.as_ref());
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Export(args) => {
            let json = std::fs::read_to_string(&args.document)?;
            let spec: DocumentSpec = serde_json::from_str(&json)?;
            let mut document = Document::from_spec(&spec)?;

            let mut config = ExportConfig::default();
            if let Some(settle_ms) = args.settle_ms {
                config = config.with_settle_delay(Duration::from_millis(settle_ms));
            }
            let metadata = DocumentMetadata {
                owner_name: args.owner,
                email: args.email,
                phone: args.phone,
            };
            let request = ExportRequest::new(args.template).with_metadata(metadata);
            export(&mut document, request, config, args.output).await
        }
        Commands::Sample(args) => {
            let mut options = SampleOptions {
                entries: args.entries,
                ..SampleOptions::default()
            };
            if let Some(owner) = args.owner {
                options.owner = owner;
            }
            let sample = build_sample_resume(&args.template, &options)?;
            let mut document = sample.document;
            let request = ExportRequest::new(args.template).with_metadata(sample.metadata);
            let config = ExportConfig::default().with_settle_delay(Duration::ZERO);
            export(&mut document, request, config, args.output).await
        }
    }
}

async fn export(
    document: &mut Document,
    request: ExportRequest,
    mut config: ExportConfig,
    output: OutputArgs,
) -> Result<(), Box<dyn Error>> {
    if let Some(scale) = output.scale {
        config = config.with_scale(scale);
    }
    let sink = DirectorySink::new(&output.out_dir);
    let exporter = Exporter::new(config, SkiaRasterizer::default(), sink);
    let summary = exporter.export(document, request).await.into_result()?;
    println!(
        "Generated {} ({} page(s), {} bytes)",
        exporter.sink().path_for(&summary.filename).display(),
        summary.pages,
        summary.bytes.len()
    );
    Ok(())
}

fn print_error_sources(mut error: &(dyn Error + 'static)) {
    while let Some(source) = error.source() {
        eprintln!("  caused by: {}", source);
        error = source;
    }
}

//! CLI binary for multimodal-rag.
//!
//! A thin shim over the library crate that maps CLI flags and `.env`
//! settings to `PipelineConfig` and prints reports.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use multimodal_rag::pipeline::input::is_url;
use multimodal_rag::pipeline::merge::render;
use multimodal_rag::services::{RecordStore, SqliteRecordStore};
use multimodal_rag::{
    Answer, Conversation, FieldTable, IngestOutcome, IngestPhase, IngestProgressCallback,
    IngestReport, Ingestor, PipelineConfig, ProgressCallback, QueryPipeline,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner while pages are extracted, then a
/// bar over the document's images while they are described.
struct CliProgressCallback {
    bar: ProgressBar,
    failed_images: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failed_images: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total_images: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_images as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Describing");
        self.bar.reset_eta();
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_ingest_start(&self, source: &str, total_pages: usize, total_images: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "{source}: {total_pages} pages, {total_images} images"
            ))
        ));
        if total_images > 0 {
            self.activate_bar(total_images);
        }
    }

    fn on_phase(&self, phase: IngestPhase) {
        self.bar.set_message(phase.to_string());
    }

    fn on_image_described(&self, page_number: u32, _total_images: usize, succeeded: bool) {
        if !succeeded {
            self.failed_images.fetch_add(1, Ordering::SeqCst);
            self.bar.println(format!(
                "  {} image on page {:>3}  {}",
                red("✗"),
                page_number,
                dim("no backend could describe it")
            ));
        }
        self.bar.inc(1);
    }

    fn on_ingest_complete(&self, _chunks_indexed: usize, _records: usize) {
        self.bar.finish_and_clear();
        let failed = self.failed_images.load(Ordering::SeqCst);
        if failed > 0 {
            eprintln!(
                "{} {} images kept as placeholders",
                cyan("⚠"),
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ingest a brochure (describe images, index, extract packages)
  mmrag process brochure.pdf

  # Ingest from URL, re-processing even if unchanged
  mmrag process --force https://example.com/bang-gia.pdf

  # Ingest every PDF in a directory, skipping the Upstage tier
  mmrag process ./brochures --no-primary

  # List processed sources
  mmrag list

  # Re-index and re-extract from saved content (no vision calls)
  mmrag regenerate brochure

  # Ask a question
  mmrag ask "Giá gói SD70 là bao nhiêu?"

  # Chat with follow-up questions (/reset clears history, exit quits)
  mmrag chat

  # Show saved content for a source
  mmrag inspect brochure --text

  # Show extracted package records, or check them against the field table
  mmrag records
  mmrag records --validate

VISION FALLBACK CHAIN (first configured tier that answers wins):
  primary     Upstage document-digitization   UPSTAGE_API_KEY
  secondary   vision LLM (Gemini by default)  GEMINI_API_KEY, VISION_PROVIDER, VISION_MODEL
  local       local model (Ollama)            LOCAL_VISION_MODEL, LOCAL_VISION_PROVIDER

ENVIRONMENT VARIABLES:
  DATA_DIR                Artifacts, vector index and record DB (default: ./data)
  OPENAI_API_KEY          OpenAI key: answers, extraction and embeddings
  EMBEDDING_API_KEY       Embedding key, if different from OPENAI_API_KEY
  EMBEDDING_BASE_URL      OpenAI-compatible embedding endpoint
  EMBEDDING_MODEL         Embedding model (default: text-embedding-3-small)
  LLM_PROVIDER, LLM_MODEL Answer model
  EXTRACTION_PROVIDER, EXTRACTION_MODEL
                          Record extraction model (default: answer model)
  EMBEDDING_TIMEOUT_SECS  Per-request embedding timeout (default: 60)
  CHAT_HISTORY_TURNS      Exchanges remembered by chat (default: 3)
  CHUNK_SIZE, CHUNK_OVERLAP, RETRIEVAL_K, VISION_TIMEOUT_SECS, COLLECTION_NAME
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download

A .env file in the working directory is loaded first.
"#;

/// Ingest PDFs with image descriptions, index them, and answer questions.
#[derive(Parser, Debug)]
#[command(
    name = "mmrag",
    version,
    about = "Ingest PDFs (text + described images) and answer questions over them",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory for saved content, the vector index and the record DB.
    #[arg(long, global = true, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output JSON instead of human-readable text.
    #[arg(long, global = true, env = "MMRAG_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "MMRAG_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MMRAG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MMRAG_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a local PDF, every PDF in a directory, or an HTTP/HTTPS URL.
    Process {
        /// Local PDF file path, directory of PDFs, or URL.
        input: String,

        /// Re-process even if the source bytes are unchanged.
        #[arg(long)]
        force: bool,

        /// Skip structured record extraction.
        #[arg(long, env = "MMRAG_NO_RECORDS")]
        no_records: bool,

        /// PDF user password for encrypted documents.
        #[arg(long, env = "MMRAG_PASSWORD")]
        password: Option<String>,

        /// Images described concurrently.
        #[arg(short, long, env = "MMRAG_CONCURRENCY", default_value_t = 4)]
        concurrency: usize,

        /// Skip the primary (Upstage) vision tier even if it is configured.
        #[arg(long, env = "MMRAG_NO_PRIMARY")]
        no_primary: bool,
    },

    /// List processed sources.
    List,

    /// Re-index and re-extract a source from its saved content.
    Regenerate {
        /// Source identifier, as shown by `list`.
        source: String,

        /// Skip structured record extraction.
        #[arg(long)]
        no_records: bool,
    },

    /// Ask a question against the indexed documents.
    Ask {
        question: String,

        /// Chunks to retrieve.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Interactive question answering that remembers recent exchanges.
    Chat {
        /// Chunks to retrieve per message.
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Show the saved content of a source.
    Inspect {
        source: String,

        /// Print the full merged text.
        #[arg(long)]
        text: bool,
    },

    /// Show persisted package records.
    Records {
        /// Show only this package.
        name: Option<String>,

        /// Check records against the field table; fails if any is invalid.
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; a malformed one is not worth aborting for.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    // The bar tracks one document, so batches log instead.
    let is_single_process = match &cli.command {
        Command::Process { input, .. } => is_url(input) || !Path::new(input).is_dir(),
        _ => false,
    };
    let show_progress = is_single_process && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let mut config = PipelineConfig::from_env().context("Invalid configuration")?;
    if let Some(ref dir) = cli.data_dir {
        config.data_dir = dir.clone();
    }

    match cli.command {
        Command::Process {
            ref input,
            force,
            no_records,
            ref password,
            concurrency,
            no_primary,
        } => {
            ensure_pdfium(cli.quiet)?;
            config.force = force;
            config.extract_structured = !no_records;
            config.password = password.clone();
            config.describe_concurrency = concurrency.max(1);
            config.use_primary_vision = !no_primary;

            let mut ingestor = Ingestor::from_config(config).context("Failed to set up pipeline")?;
            if !is_single_process {
                return process_dir(&ingestor, Path::new(input), cli.json, cli.quiet).await;
            }
            if show_progress {
                let cb: ProgressCallback = CliProgressCallback::new();
                ingestor = ingestor.with_progress(cb);
            }
            let report = ingestor.ingest(input).await.context("Ingestion failed")?;
            print_report(&report, cli.json, cli.quiet)?;
        }

        Command::List => {
            let store = multimodal_rag::ContentStore::new(config.processed_dir());
            let sources = store.list().await.context("Failed to list sources")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&sources)?);
            } else if sources.is_empty() {
                eprintln!("No processed sources in {}", store.dir().display());
            } else {
                for source in sources {
                    println!("{source}");
                }
            }
        }

        Command::Regenerate {
            ref source,
            no_records,
        } => {
            config.extract_structured = !no_records;
            let ingestor = Ingestor::from_config(config).context("Failed to set up pipeline")?;
            let report = ingestor
                .regenerate(source)
                .await
                .with_context(|| format!("Failed to regenerate '{source}'"))?;
            print_report(&report, cli.json, cli.quiet)?;
        }

        Command::Ask { ref question, k } => {
            let pipeline = QueryPipeline::from_config(&config).context("Failed to set up query")?;
            let answer = match k {
                Some(k) => pipeline.answer_with_k(question, k).await,
                None => pipeline.answer(question).await,
            }
            .context("Query failed")?;

            print_answer(&answer, cli.json, cli.quiet)?;
        }

        Command::Chat { k } => {
            if let Some(k) = k {
                config.retrieval_k = k;
            }
            let turns = config.chat_history_turns;
            let pipeline = QueryPipeline::from_config(&config).context("Failed to set up query")?;
            chat(Conversation::new(pipeline, turns), cli.json, cli.quiet).await?;
        }

        Command::Inspect { ref source, text } => {
            let store = multimodal_rag::ContentStore::new(config.processed_dir());
            let artifact = store
                .load(source)
                .await
                .with_context(|| format!("Failed to load '{source}'"))?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&artifact)?);
            } else {
                let s = &artifact.statistics;
                println!("Source:        {}", artifact.source_identifier);
                println!("Extracted at:  {}", artifact.extracted_at);
                println!("PDF digest:    {}", artifact.source_digest);
                println!("Content hash:  {}", artifact.document.content_hash);
                println!("Pages:         {}", s.pages);
                println!(
                    "Images:        {} ({} described, {} failed)",
                    s.images, s.images_described, s.images_failed
                );
                if text {
                    println!();
                    println!("{}", render(&artifact.document.pages));
                }
            }
        }

        Command::Records { ref name, validate } => {
            let store = SqliteRecordStore::new(&config.records_db_path())
                .context("Failed to open record store")?;
            let records: Vec<_> = match name {
                Some(n) => store.get(n).await?.into_iter().collect(),
                None => store.list().await?,
            };
            if validate {
                return validate_records(&records, &FieldTable::telecom_packages(), cli.json);
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                eprintln!("No records found");
            } else {
                for record in records {
                    println!("{}", bold(&record.name));
                    for (field, value) in &record.fields {
                        println!("  {field:<24} {value}");
                    }
                    for (field, value) in &record.extra {
                        println!("  {} {}", dim(&format!("{field:<24}")), dim(value));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Make the pdfium library available before the first extraction.
///
/// On the very first run the library (~30 MB) is downloaded from
/// bblanchon/pdfium-binaries and cached; later runs only check the path.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    if pdfium_auto::is_pdfium_cached() {
        return Ok(());
    }

    if quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.set_message("Connecting…");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    // block_in_place keeps the callback borrow valid without a 'static bound.
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;

    dl_bar.finish_with_message("ready ✓");
    Ok(())
}

/// Ingest a directory of PDFs; fails at the end if any file failed.
async fn process_dir(ingestor: &Ingestor, dir: &Path, json: bool, quiet: bool) -> Result<()> {
    let results = ingestor
        .ingest_dir(dir)
        .await
        .with_context(|| format!("Failed to read '{}'", dir.display()))?;
    if results.is_empty() {
        eprintln!("No PDF files in {}", dir.display());
        return Ok(());
    }

    let mut failed = 0;
    let mut reports = Vec::new();
    for (path, result) in &results {
        match result {
            Ok(report) if json => reports.push(report),
            Ok(report) => print_report(report, false, quiet)?,
            Err(e) => {
                failed += 1;
                eprintln!("{}  {}  {}", red("✘"), bold(&path.display().to_string()), e);
            }
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    if !quiet {
        eprintln!(
            "{} processed, {} failed, {} total",
            results.len() - failed,
            failed,
            results.len()
        );
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} files failed", results.len());
    }
    Ok(())
}

/// Read questions from stdin until EOF, `exit` or `quit`.
async fn chat(mut conversation: Conversation, json: bool, quiet: bool) -> Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    if !quiet {
        eprintln!("{}", dim("Ask about the indexed documents. /reset clears history, exit quits."));
    }
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if !quiet {
            eprint!("{} ", cyan("›"));
            io::stderr().flush()?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "exit" | "quit" => break,
            "/reset" => {
                conversation.reset();
                if !quiet {
                    eprintln!("{}", dim("history cleared"));
                }
            }
            message => {
                let answer = conversation.ask(message).await.context("Query failed")?;
                print_answer(&answer, json, quiet)?;
            }
        }
    }
    Ok(())
}

fn print_answer(answer: &Answer, json: bool, quiet: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(answer)?);
        return Ok(());
    }
    println!("{}", answer.answer);
    if quiet {
        return Ok(());
    }
    if answer.grounded {
        eprintln!();
        for chunk in &answer.sources {
            eprintln!(
                "  {} {} p.{}",
                dim("source:"),
                chunk.source_reference.source_identifier,
                chunk.source_reference.page_number
            );
        }
    } else {
        eprintln!("{} no indexed context matched this question", cyan("⚠"));
    }
    Ok(())
}

/// Count valid and invalid records; fails if any record is invalid.
fn validate_records(
    records: &[multimodal_rag::StructuredRecord],
    table: &FieldTable,
    json: bool,
) -> Result<()> {
    let checked: Vec<_> = records
        .iter()
        .map(|r| (r, table.validate(r)))
        .collect();
    let invalid = checked.iter().filter(|(_, issues)| !issues.is_empty()).count();

    if json {
        let rows: Vec<_> = checked
            .iter()
            .map(|(r, issues)| {
                serde_json::json!({
                    "name": r.name,
                    "valid": issues.is_empty(),
                    "errors": issues.iter().map(ToString::to_string).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("Total records: {}", checked.len());
        println!("Valid:         {}", checked.len() - invalid);
        println!("Invalid:       {}", invalid);
        for (record, issues) in checked.iter().filter(|(_, i)| !i.is_empty()) {
            println!("{} {}", red("✘"), bold(&record.name));
            for issue in issues {
                println!("    {}", dim(&issue.to_string()));
            }
        }
    }

    if invalid > 0 {
        anyhow::bail!("{invalid} of {} records are invalid", checked.len());
    }
    Ok(())
}

fn print_report(report: &IngestReport, json: bool, quiet: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("Failed to serialise report")?
        );
        return Ok(());
    }
    if quiet {
        return Ok(());
    }

    if report.skipped_unchanged {
        eprintln!(
            "{} {} unchanged since last run; nothing to do (use --force)",
            dim("•"),
            bold(&report.source_identifier)
        );
        return Ok(());
    }

    let mark = match report.outcome {
        IngestOutcome::Complete => green("✔"),
        IngestOutcome::Partial => cyan("⚠"),
        IngestOutcome::Empty => red("✘"),
    };
    eprintln!(
        "{}  {}  {} pages  {}/{} images described  {} chunks  {} records  {}ms",
        mark,
        bold(&report.source_identifier),
        report.pages,
        report.images_described,
        report.images,
        report.chunks_indexed,
        report.records.len(),
        report.duration_ms,
    );
    for warning in &report.warnings {
        eprintln!("   {} {}", cyan("⚠"), dim(&warning.to_string()));
    }
    if report.outcome == IngestOutcome::Empty {
        eprintln!("   {}", red("nothing could be extracted from this document"));
    }
    Ok(())
}

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use doc_model::DocumentStore;
use pagemark_core::{Baker, BakeReport, PagemarkConfig};
use pdf_engine::{default_engine, OpenSource, PdfEngine};
use serde::Serialize;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "pagemark-cli")]
#[command(about = "Pagemark CLI")]
pub struct Cli {
    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Write logs to this file instead of stderr.
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Create an annotation project for a PDF.
    Init {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "PROJECT")]
        output: PathBuf,
    },
    /// Flatten a project's annotations into a new PDF.
    Bake {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,
        #[arg(long, value_name = "OUT")]
        output: PathBuf,
        #[arg(long, value_name = "CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print the text runs of a page as JSON.
    Text {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    pages: Vec<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
struct InitOutput {
    project: String,
    id: String,
    page_count: usize,
}

#[derive(Debug, Serialize)]
struct BakeOutputJson {
    output: String,
    bytes: usize,
    report: BakeReport,
}

#[derive(Debug, Serialize)]
struct TextRegionOutput {
    text: String,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(&cli)?;

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Init { file, output } => run_init(&file, &output),
        Commands::Bake { project, output, config } => run_bake(&project, &output, config.as_deref()),
        Commands::Text { file, page } => run_text(&file, page),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.quiet {
        LevelFilter::Error
    } else {
        match cli.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    match &cli.log_file {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            WriteLogger::init(level, Config::default(), file)
                .context("failed to initialize logging")?;
        }
        None => {
            TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)
                .context("failed to initialize logging")?;
        }
    }

    Ok(())
}

fn run_info(file: &Path) -> Result<()> {
    ensure_file_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let pages = (0..page_count)
        .map(|index| {
            engine
                .page_size(handle, index)
                .map(|size| PageSizeOutput { width: size.width_pt, height: size.height_pt })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let payload = InfoOutput { path: file.display().to_string(), page_count, pages };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    engine.close(handle)?;

    Ok(())
}

fn run_init(file: &Path, output: &Path) -> Result<()> {
    ensure_file_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;
    let page_count = engine.page_count(handle)? as usize;
    let source = engine.source_bytes(handle)?.to_vec();
    engine.close(handle)?;

    let title = file.file_stem().and_then(|name| name.to_str()).unwrap_or("document");
    let state = DocumentStore::new(title, source, page_count).snapshot();

    storage::write_project(output, &state)
        .with_context(|| format!("failed to write project to {}", output.display()))?;
    log::info!("created project {} with {page_count} pages", state.id);

    let payload = InitOutput {
        project: output.display().to_string(),
        id: state.id.to_string(),
        page_count,
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    Ok(())
}

fn run_bake(project: &Path, output: &Path, config: Option<&Path>) -> Result<()> {
    ensure_file_exists(project)?;

    let config = match config {
        Some(path) => PagemarkConfig::from_file(path)
            .and_then(PagemarkConfig::with_env_overrides)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PagemarkConfig::from_env().context("invalid environment configuration")?,
    };

    let state = storage::read_project(project)
        .with_context(|| format!("failed to read project {}", project.display()))?;
    let store = DocumentStore::from_state(state)
        .with_context(|| format!("project {} is corrupt", project.display()))?;

    let baker = Baker::new(config.export);
    let baked = baker
        .bake_with_progress(&store.snapshot(), |progress| {
            log::debug!("baked page {}/{}", progress.done, progress.total);
        })
        .context("failed to bake project")?;

    for skipped in &baked.report.skipped {
        log::warn!(
            "skipped {} annotation {} on page {}: {}",
            skipped.kind,
            skipped.id,
            skipped.page_index + 1,
            skipped.reason
        );
    }

    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, &baked.bytes)
        .with_context(|| format!("failed to write PDF to {}", output.display()))?;

    let payload = BakeOutputJson {
        output: output.display().to_string(),
        bytes: baked.bytes.len(),
        report: baked.report,
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    Ok(())
}

fn run_text(file: &Path, page: u32) -> Result<()> {
    ensure_file_exists(file)?;

    if page == 0 {
        anyhow::bail!("--page is 1-based and must be >= 1");
    }

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let regions = engine
        .text_regions(handle, page - 1)
        .context("failed to extract text")?
        .into_iter()
        .map(|region| TextRegionOutput {
            text: region.text,
            x: region.bbox.x,
            y: region.bbox.y,
            width: region.bbox.width,
            height: region.bbox.height,
        })
        .collect::<Vec<_>>();

    println!("{}", serde_json::to_string_pretty(&regions)?);

    engine.close(handle)?;

    Ok(())
}

fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pyslice::config::{self, Backend, PysliceConfig};
use pyslice::extract::extract_detailed;
use pyslice::parser::outline;
use pyslice::sandbox::sandbox_for;
use pyslice::scan::scan_repository;
use pyslice::{extract, skeletonize, validate_with, PysliceError};

#[derive(Parser)]
#[command(name = "pyslice")]
#[command(
    about = "Extract self-contained Python classes, skeletons and sandbox verdicts",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level filter (e.g. debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Config file (defaults to ./pyslice.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List top-level classes of a file
    Classes {
        file: PathBuf,
    },

    /// Print a class together with only the imports it uses
    Extract {
        file: PathBuf,
        /// Class name, optionally qualified (pkg.module.Widget)
        class: String,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Reduce a file (or one class of it) to signatures and docstrings
    Skeleton {
        file: PathBuf,
        /// Skeletonize the extracted unit of this class only
        #[arg(long)]
        class: Option<String>,
        /// Print a JSON object instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Run a file (or one extracted class) in the sandbox; exits 1 unless valid
    Validate {
        file: PathBuf,
        #[arg(long)]
        class: Option<String>,
        /// Override the configured sandbox backend
        #[arg(long, value_enum)]
        backend: Option<Backend>,
        #[arg(long)]
        json: bool,
    },

    /// Extract, skeletonize and validate every top-level class under a directory
    Scan {
        dir: PathBuf,
        /// JSON lines report (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum)]
        backend: Option<Backend>,
    },

    /// Manage pyslice.toml
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Create default pyslice.toml in the current directory
    Init,
    /// Show the effective configuration
    Show,
}

fn init_logging(log_level: &str) {
    // JSON через PYSLICE_LOG_JSON=1, по умолчанию человекочитаемый вывод в stderr
    let json_logging = std::env::var("PYSLICE_LOG_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("pyslice={log_level}").into());

    if json_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            e.downcast_ref::<PysliceError>()
                .map(PysliceError::exit_code)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let cwd = std::env::current_dir()?;
    let config = config::load_config(cli.config.as_deref(), &cwd)?;

    match cli.command {
        Commands::Classes { file } => handle_classes(&file),
        Commands::Extract {
            file,
            class,
            output,
        } => handle_extract(&file, &class, output.as_deref()),
        Commands::Skeleton { file, class, json } => handle_skeleton(&file, class.as_deref(), json),
        Commands::Validate {
            file,
            class,
            backend,
            json,
        } => handle_validate(config, &file, class.as_deref(), backend, json),
        Commands::Scan {
            dir,
            output,
            backend,
        } => handle_scan(config, &dir, output.as_deref(), backend),
        Commands::Config { action } => handle_config(action, &config, &cwd),
    }
}

fn read_source(file: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(file)
        .map_err(PysliceError::from)
        .with_context(|| format!("failed to read {}", file.display()))
}

/// Whole file, or the extracted unit of `class`.
fn unit_source(file: &Path, class: Option<&str>) -> anyhow::Result<String> {
    let source = read_source(file)?;
    match class {
        Some(class) => Ok(extract(&source, class)?),
        None => Ok(source),
    }
}

// === Handlers ===

fn handle_classes(file: &Path) -> anyhow::Result<i32> {
    let source = read_source(file)?;
    for class in outline(&source)? {
        println!("{}\t{}\t{} units", class.line, class.name, class.units.len());
    }
    Ok(0)
}

fn handle_extract(file: &Path, class: &str, output: Option<&Path>) -> anyhow::Result<i32> {
    let source = read_source(file)?;
    let extraction = extract_detailed(&source, class)?;
    tracing::debug!(
        imports = extraction.imports.len(),
        used = extraction.used.len(),
        "extracted {}",
        class
    );

    match output {
        Some(path) => {
            std::fs::write(path, &extraction.source)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Written: {}", path.display());
        }
        None => print!("{}", extraction.source),
    }
    Ok(0)
}

fn handle_skeleton(file: &Path, class: Option<&str>, as_json: bool) -> anyhow::Result<i32> {
    let skeleton = skeletonize(&unit_source(file, class)?)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&skeleton)?);
    } else {
        print!("{}", skeleton.text);
        eprintln!(
            "# {} units, {} docstrings",
            skeleton.unit_count, skeleton.docstring_count
        );
    }
    Ok(0)
}

fn handle_validate(
    mut config: PysliceConfig,
    file: &Path,
    class: Option<&str>,
    backend: Option<Backend>,
    as_json: bool,
) -> anyhow::Result<i32> {
    if let Some(backend) = backend {
        config.sandbox.backend = backend;
    }
    let source = unit_source(file, class)?;
    let sandbox = sandbox_for(&config.sandbox);
    let verdict = validate_with(sandbox.as_ref(), &source);

    if as_json {
        println!("{}", serde_json::to_string(&verdict)?);
    } else {
        println!("{}: {}", sandbox.name(), verdict);
    }
    Ok(if verdict.is_valid() { 0 } else { 1 })
}

fn handle_scan(
    mut config: PysliceConfig,
    dir: &Path,
    output: Option<&Path>,
    backend: Option<Backend>,
) -> anyhow::Result<i32> {
    if let Some(backend) = backend {
        config.sandbox.backend = backend;
    }
    let sandbox = sandbox_for(&config.sandbox);
    let (records, summary) = scan_repository(dir, &config.scan, sandbox.as_ref())
        .with_context(|| format!("failed to scan {}", dir.display()))?;

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };
    for record in &records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    eprintln!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "sandbox": sandbox.name(),
            "summary": summary,
        }))?
    );
    Ok(0)
}

fn handle_config(action: ConfigAction, config: &PysliceConfig, cwd: &Path) -> anyhow::Result<i32> {
    match action {
        ConfigAction::Init => {
            let path = config::init_config(cwd)?;
            println!("Created: {}", path.display());
        }
        ConfigAction::Show => {
            println!("# Effective config\n");
            println!("{}", config::render_config(config)?);
        }
    }
    Ok(0)
}

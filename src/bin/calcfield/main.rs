//! Binary entry point for the calcfield formula CLI.
#![forbid(unsafe_code)]

mod config;
mod ui;

use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use calcfield::catalog::{check_staleness, InMemoryCatalog, StalenessReport};
use calcfield::expr::{
    CompiledExpression, Compiler, CompilerConfig, ErrorReport, ExpressionError,
    ExpressionErrorWithCode, ModelGraphSignature,
};

use config::CliConfig;
use ui::{Theme, Ui};

const LOG_ENV: &str = "CALCFIELD_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "calcfield",
    version,
    about = "Compile and check derived-field formulas offline",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        help = "Output format for structured responses [default: text]"
    )]
    format: Option<OutputFormat>,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "CALCFIELD_CONFIG",
        help = "Path to the CLI config file"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Maximum formula nesting depth")]
    max_depth: Option<usize>,

    #[arg(long, global = true, help = "Maximum number of formula nodes")]
    max_nodes: Option<usize>,

    #[arg(long, global = true, value_enum, help = "Terminal color theme")]
    theme: Option<Theme>,

    #[arg(long, global = true, help = "Suppress decorations in text output")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Validate a formula and print its dependencies")]
    Compile {
        #[arg(value_name = "INPUT", help = "Formula JSON file, or - for stdin")]
        input: PathBuf,
    },

    #[command(about = "Print the infix rendering of a formula")]
    Render {
        #[arg(value_name = "INPUT", help = "Formula JSON file, or - for stdin")]
        input: PathBuf,
    },

    #[command(about = "Check a formula against a schema catalog")]
    Check {
        #[arg(value_name = "INPUT", help = "Formula JSON file, or - for stdin")]
        input: PathBuf,

        #[arg(long, value_name = "FILE", help = "Catalog JSON file")]
        catalog: PathBuf,

        #[arg(
            long,
            value_name = "HEX",
            help = "Persisted model graph signature to compare against"
        )]
        signature: Option<ModelGraphSignature>,
    },

    #[command(subcommand)]
    #[command(about = "Inspect the CLI configuration")]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    #[command(about = "Print the config file location")]
    Path,
    #[command(about = "Print the resolved configuration")]
    Show,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse catalog {path}: {source}")]
    Catalog {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = CliConfig::load(cli.config.clone())?;
    let format = cli.format.or(cfg.format()).unwrap_or_default();
    let theme = cli.theme.or(cfg.theme()).unwrap_or_default();
    let ui = Ui::new(theme, cli.quiet);
    let compiler = Compiler::new(cfg.compiler_config(cli.max_depth, cli.max_nodes));

    match cli.command {
        Command::Compile { input } => {
            let text = read_input(&input)?;
            match compiler.compile_str(&text) {
                Ok(compiled) => {
                    let report = CompileReport::new(&compiled);
                    emit(format, &report, || print_compile_text(&ui, &report))?;
                }
                Err(err) => reject(format, &ui, &err)?,
            }
        }
        Command::Render { input } => {
            let text = read_input(&input)?;
            match compiler.compile_str(&text) {
                Ok(compiled) => {
                    let report = RenderReport {
                        rendered: compiled.ast.to_string(),
                    };
                    emit(format, &report, || println!("{}", report.rendered))?;
                }
                Err(err) => reject(format, &ui, &err)?,
            }
        }
        Command::Check {
            input,
            catalog,
            signature,
        } => {
            let text = read_input(&input)?;
            let catalog = load_catalog(&catalog)?;
            match compiler.compile_str(&text) {
                Ok(compiled) => {
                    let expected = signature.unwrap_or_else(|| compiled.signature());
                    let staleness = check_staleness(&compiled.dependencies, expected, &catalog);
                    let report = CheckReport {
                        accepted: true,
                        staleness,
                    };
                    emit(format, &report, || print_check_text(&ui, &report))?;
                    if report.staleness.is_stale() {
                        std::process::exit(2);
                    }
                }
                Err(err) => reject(format, &ui, &err)?,
            }
        }
        Command::Config(ConfigCommand::Path) => {
            let report = ConfigPathReport {
                path: cfg.path().map(Path::to_path_buf),
                exists: cfg.loaded(),
            };
            emit(format, &report, || match &report.path {
                Some(path) => println!("{}", path.display()),
                None => ui.warn("no config directory found; pass --config or set CALCFIELD_CONFIG"),
            })?;
        }
        Command::Config(ConfigCommand::Show) => {
            let report = ConfigShowReport {
                path: cfg.path().map(Path::to_path_buf),
                loaded: cfg.loaded(),
                compiler: *compiler.config(),
                format,
                theme,
            };
            emit(format, &report, || print_config_text(&ui, &report))?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn read_input(path: &Path) -> Result<String, CliError> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|source| CliError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        return Ok(buf);
    }
    fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn load_catalog(path: &Path) -> Result<InMemoryCatalog, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Catalog {
        path: path.to_path_buf(),
        source,
    })
}

/// Reports a rejected formula and exits with status 2.
fn reject(format: OutputFormat, ui: &Ui, err: &ExpressionError) -> Result<(), Box<dyn Error>> {
    let report = RejectionReport {
        accepted: false,
        error: err.report(),
    };
    emit(format, &report, || {
        ui.failure(&ExpressionErrorWithCode(err).to_string());
        ui.section(
            "Rejection",
            [
                ("kind", report.error.kind.to_string()),
                ("path", report.error.path.clone()),
            ],
        );
    })?;
    std::process::exit(2);
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompileReport<'a> {
    accepted: bool,
    #[serde(flatten)]
    compiled: &'a CompiledExpression,
    signature: ModelGraphSignature,
    rendered: String,
}

impl<'a> CompileReport<'a> {
    fn new(compiled: &'a CompiledExpression) -> Self {
        Self {
            accepted: true,
            compiled,
            signature: compiled.signature(),
            rendered: compiled.ast.to_string(),
        }
    }
}

#[derive(Serialize)]
struct RenderReport {
    rendered: String,
}

#[derive(Serialize)]
struct RejectionReport {
    accepted: bool,
    error: ErrorReport,
}

#[derive(Serialize)]
struct CheckReport {
    accepted: bool,
    #[serde(flatten)]
    staleness: StalenessReport,
}

#[derive(Serialize)]
struct ConfigPathReport {
    path: Option<PathBuf>,
    exists: bool,
}

#[derive(Serialize)]
struct ConfigShowReport {
    path: Option<PathBuf>,
    loaded: bool,
    compiler: CompilerConfig,
    format: OutputFormat,
    theme: Theme,
}

fn print_compile_text(ui: &Ui, report: &CompileReport<'_>) {
    let deps = &report.compiled.dependencies;
    ui.success("formula accepted");
    ui.formula(&report.rendered);
    ui.spacer();
    ui.section(
        "Summary",
        [
            ("models", deps.model_count().to_string()),
            ("fields", deps.columns().count().to_string()),
            ("joins", deps.join_dependencies().len().to_string()),
            ("signature", report.signature.to_string()),
        ],
    );
    ui.list("Referenced fields", deps.columns().map(|column| column.to_string()));
    ui.list(
        "Join dependencies",
        deps.join_dependencies().iter().map(ToString::to_string),
    );
}

fn print_check_text(ui: &Ui, report: &CheckReport) {
    let staleness = &report.staleness;
    if staleness.is_stale() {
        ui.warn("formula references schema that no longer exists");
    } else {
        ui.success("all referenced models and fields exist");
    }
    ui.section(
        "Staleness",
        [
            ("status", staleness.status.to_string()),
            ("expected", staleness.expected_signature.to_string()),
            ("observed", staleness.observed_signature.to_string()),
        ],
    );
    ui.list("Missing models", staleness.missing_models.iter().cloned());
    ui.list(
        "Missing fields",
        staleness.missing_fields.iter().map(ToString::to_string),
    );
}

fn print_config_text(ui: &Ui, report: &ConfigShowReport) {
    if !report.loaded {
        ui.info("no config file loaded; using defaults");
    }
    let path = report
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<none>".to_string());
    ui.section(
        "Configuration",
        [
            ("path", path),
            ("loaded", report.loaded.to_string()),
            ("max_depth", report.compiler.limits.max_depth.to_string()),
            ("max_nodes", report.compiler.limits.max_nodes.to_string()),
            ("theme", report.theme.as_str().to_string()),
        ],
    );
}

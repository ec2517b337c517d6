//! Cellflow - evaluate a document of reactive cells from the command line

mod default_functions;
mod error;

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use cellflow_core::{DEFAULT_MAX_CYCLES, DocumentSpec, Workspace};
use cellflow_engine::engine::{ContextRegistry, MINI, MiniContext, format_value};

use error::CliError;

const DOCUMENT_ID: &str = "cli";

struct Options {
    functions: Vec<PathBuf>,
    no_default_functions: bool,
    lang: String,
    manual: bool,
    max_cycles: usize,
    cells: Vec<String>,
}

enum Command {
    Help,
    Run(Options),
}

fn print_usage() {
    eprintln!("Usage: cellflow [OPTIONS] -c <SOURCE>...");
    eprintln!();
    eprintln!("Evaluates the cells as one document and prints one result per line.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --cell <SOURCE>       Add a cell to the document (can be repeated)");
    eprintln!("  -f, --functions <FILE>    Load custom Rhai functions (can be repeated)");
    eprintln!("  --no-default-functions    Skip default.rhai from the config dir");
    eprintln!("  --lang <name>             Language of the document (default: mini)");
    eprintln!("  --manual                  Manual execution, then run all cells once");
    eprintln!("  --max-cycles <n>          Give up after n engine cycles (default: 1000)");
    eprintln!("  -h, --help                Print help");
    eprintln!();
    eprintln!("Logging goes to stderr, filtered by CELLFLOW_LOG (default: warn).");
}

fn parse_args(args: &[String]) -> Result<Command, CliError> {
    let mut options = Options {
        functions: Vec::new(),
        no_default_functions: false,
        lang: MINI.to_string(),
        manual: false,
        max_cycles: DEFAULT_MAX_CYCLES,
        cells: Vec::new(),
    };

    let mut args = args.iter().skip(1);
    while let Some(arg) = args.next() {
        let mut value = || {
            args.next()
                .cloned()
                .ok_or_else(|| CliError::MissingValue(arg.clone()))
        };
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-c" | "--cell" => options.cells.push(value()?),
            "-f" | "--functions" => options.functions.push(PathBuf::from(value()?)),
            "--no-default-functions" => options.no_default_functions = true,
            "--lang" => options.lang = value()?,
            "--manual" => options.manual = true,
            "--max-cycles" => {
                let raw = value()?;
                options.max_cycles = raw.parse().map_err(|_| CliError::InvalidValue {
                    flag: arg.clone(),
                    value: raw,
                })?;
            }
            other if other.starts_with('-') => {
                return Err(CliError::UnknownOption(other.to_string()));
            }
            other => return Err(CliError::UnexpectedArgument(other.to_string())),
        }
    }

    if options.cells.is_empty() {
        return Err(CliError::NoCells);
    }
    Ok(Command::Run(options))
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("CELLFLOW_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_context(options: &Options) -> Result<MiniContext> {
    let mut files = options.functions.clone();
    default_functions::prepend_default_functions_if_present(&mut files, options.no_default_functions);

    let mut context = MiniContext::new();
    for path in &files {
        let script = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        context = context
            .with_functions(&script)
            .map_err(|message| CliError::Functions {
                path: path.display().to_string(),
                message,
            })?;
        info!(path = %path.display(), "functions loaded");
    }
    Ok(context)
}

/// Evaluate the document and print it. Returns false when any cell failed.
fn run(options: Options) -> Result<bool> {
    let registry = Arc::new(ContextRegistry::new());
    registry.register(MINI, Arc::new(load_context(&options)?));

    let mut workspace = Workspace::new(registry);
    let spec = DocumentSpec::new(DOCUMENT_ID, &options.lang)
        .with_autorun(!options.manual)
        .with_cells(options.cells.iter().map(String::as_str));
    workspace.add_document(spec)?;
    if options.manual {
        workspace.document_mut(DOCUMENT_ID)?.run_all()?;
    }

    let cycles = workspace.play(options.max_cycles);
    debug!(cycles, "document settled");
    if workspace.needs_update() {
        bail!("Cells still running after {} cycles", options.max_cycles);
    }

    let mut ok = true;
    for cell in workspace.document(DOCUMENT_ID)?.cells() {
        match cell.errors().first() {
            Some(error) => {
                println!("#ERR {}", error);
                ok = false;
            }
            None => println!("{}", cell.value().map(format_value).unwrap_or_default()),
        }
    }
    Ok(ok)
}

fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let options = match parse_args(&args) {
        Ok(Command::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(Command::Run(options)) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match run(options) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("cellflow")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_repeated_flags() {
        let Ok(Command::Run(options)) = parse_args(&args(&[
            "-c", "x = 1", "--cell", "x + 1", "-f", "a.rhai", "--manual", "--max-cycles", "7",
        ])) else {
            panic!("expected options");
        };
        assert_eq!(options.cells, vec!["x = 1", "x + 1"]);
        assert_eq!(options.functions, vec![PathBuf::from("a.rhai")]);
        assert_eq!(options.lang, MINI);
        assert!(options.manual);
        assert_eq!(options.max_cycles, 7);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_args(&args(&["-c"])), Err(CliError::MissingValue(_))));
        assert!(matches!(parse_args(&args(&[])), Err(CliError::NoCells)));
        assert!(matches!(
            parse_args(&args(&["--bogus"])),
            Err(CliError::UnknownOption(_))
        ));
        assert!(matches!(
            parse_args(&args(&["-c", "1", "--max-cycles", "many"])),
            Err(CliError::InvalidValue { .. })
        ));
        assert!(matches!(parse_args(&args(&["-h", "--bogus"])), Ok(Command::Help)));
    }
}

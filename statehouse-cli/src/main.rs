use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::debug;
use thiserror::Error;

use statehouse_state::{
    BackendConfig, BackendError, LockInfo, StateBackend, StateId, create_backend,
};

#[derive(Parser)]
#[command(name = "statehouse")]
#[command(about = "A filesystem-backed remote state store", long_about = None)]
struct Cli {
    /// Directory holding state and lock files
    #[arg(long, global = true, env = "STATEHOUSE_DIR", default_value = "state")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stored state
    Get {
        /// State identifier
        id: String,

        /// Write the state to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Replace the stored state
    Update {
        /// State identifier
        id: String,

        /// Read the state from a file instead of stdin
        #[arg(long, short)]
        input: Option<PathBuf>,
    },
    /// Delete the stored state
    Purge {
        /// State identifier
        id: String,
    },
    /// Acquire the state lock
    Lock {
        /// State identifier
        id: String,

        /// JSON lock descriptor to present (a new one is generated if omitted)
        #[arg(long, short)]
        descriptor: Option<PathBuf>,

        /// Operation recorded in a generated descriptor
        #[arg(long, default_value = "manual")]
        operation: String,
    },
    /// Release the state lock
    Unlock {
        /// State identifier
        id: String,

        /// JSON lock descriptor holding the lock ID
        #[arg(long, short)]
        descriptor: PathBuf,
    },
    /// Release the state lock by its lock ID
    ForceUnlock {
        /// State identifier
        id: String,

        /// ID of the lock to release
        lock_id: String,
    },
    /// Show the current lock holder
    ShowLock {
        /// State identifier
        id: String,
    },
    /// List stored states
    List,
}

impl Commands {
    /// Whether the command may create files in the storage directory
    fn creates_files(&self) -> bool {
        matches!(self, Commands::Update { .. } | Commands::Lock { .. })
    }
}

/// Failure of a CLI command
#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("{0}")]
    Other(String),
}

impl CliError {
    /// Conflicts are an expected outcome and get their own exit code
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Backend(e) if e.is_conflict() => 2,
            _ => 1,
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config =
        BackendConfig::new("local").with_attribute("path", cli.dir.display().to_string());
    debug!("Using storage directory {}", cli.dir.display());

    let backend = create_backend(&config)?;

    let mut stdout = io::stdout().lock();
    execute(backend.as_ref(), cli.command, &mut stdout).await
}

async fn execute(
    backend: &dyn StateBackend,
    command: Commands,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if command.creates_files() {
        backend.init().await?;
    }

    match command {
        Commands::Get { id, output } => {
            run_get(backend, &parse_id(&id)?, output.as_deref(), out).await
        }
        Commands::Update { id, input } => {
            run_update(backend, &parse_id(&id)?, input.as_deref()).await
        }
        Commands::Purge { id } => {
            backend.purge(&parse_id(&id)?).await?;
            Ok(())
        }
        Commands::Lock {
            id,
            descriptor,
            operation,
        } => {
            run_lock(
                backend,
                &parse_id(&id)?,
                descriptor.as_deref(),
                &operation,
                out,
            )
            .await
        }
        Commands::Unlock { id, descriptor } => {
            let descriptor = read_file(&descriptor)?;
            backend.unlock(&parse_id(&id)?, &descriptor).await?;
            Ok(())
        }
        Commands::ForceUnlock { id, lock_id } => {
            backend.force_unlock(&parse_id(&id)?, &lock_id).await?;
            writeln!(out, "Lock {} released", lock_id).map_err(write_error)?;
            Ok(())
        }
        Commands::ShowLock { id } => run_show_lock(backend, &parse_id(&id)?, out).await,
        Commands::List => {
            for id in backend.list_states().await? {
                writeln!(out, "{}", id).map_err(write_error)?;
            }
            Ok(())
        }
    }
}

fn parse_id(id: &str) -> Result<StateId, CliError> {
    Ok(StateId::new(id)?)
}

async fn run_get(
    backend: &dyn StateBackend,
    id: &StateId,
    output: Option<&Path>,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let state = backend.get(id).await?;

    match output {
        Some(path) => fs::write(path, &state).map_err(|e| {
            CliError::Other(format!("Failed to write {}: {}", path.display(), e))
        })?,
        None => out.write_all(&state).map_err(write_error)?,
    }
    Ok(())
}

async fn run_update(
    backend: &dyn StateBackend,
    id: &StateId,
    input: Option<&Path>,
) -> Result<(), CliError> {
    let state = match input {
        Some(path) => read_file(path)?,
        None => {
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .map_err(|e| CliError::Other(format!("Failed to read stdin: {}", e)))?;
            buffer
        }
    };

    backend.update(id, &state).await?;
    Ok(())
}

async fn run_lock(
    backend: &dyn StateBackend,
    id: &StateId,
    descriptor: Option<&Path>,
    operation: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let descriptor = match descriptor {
        Some(path) => read_file(path)?,
        None => LockInfo::new(operation).encode()?,
    };

    let lock = backend.lock(id, &descriptor).await?;
    print_lock(&lock, out)
}

async fn run_show_lock(
    backend: &dyn StateBackend,
    id: &StateId,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match backend.read_lock(id).await? {
        Some(lock) => print_lock(&lock, out),
        None => {
            writeln!(out, "State {} is not locked", id).map_err(write_error)?;
            Ok(())
        }
    }
}

fn print_lock(lock: &LockInfo, out: &mut dyn Write) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(lock)
        .map_err(|e| CliError::Other(format!("Failed to encode lock: {}", e)))?;
    writeln!(out, "{}", json).map_err(write_error)?;
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    fs::read(path)
        .map_err(|e| CliError::Other(format!("Failed to read {}: {}", path.display(), e)))
}

fn write_error(e: io::Error) -> CliError {
    CliError::Other(format!("Failed to write output: {}", e))
}

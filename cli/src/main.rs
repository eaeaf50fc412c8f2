//! lazysession - inspect and edit sessions from the command line
//!
//! Every invocation opens the session found in `--basedir` (resuming its
//! on-disk state), runs one command and releases it again.

use clap::Parser;
use clap::Subcommand;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use color_eyre::eyre::eyre;
use lazysession_persistence::GeometryBlob;
use lazysession_persistence::RegistryMode;
use lazysession_persistence::Session;
use lazysession_persistence::SessionConfig;
use lazysession_persistence::SessionRegistry;
use lazysession_persistence::SessionValue;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;

/// Work with lazily persisted sessions and their undo/redo history
#[derive(Parser, Debug)]
#[command(name = "lazysession")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory containing the `<name>.session` folder
    #[arg(long, global = true)]
    basedir: Option<PathBuf>,

    /// Session name; derived from the base directory when omitted
    #[arg(long, global = true)]
    name: Option<String>,

    /// TOML file with `[session]` and `[settings]` tables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Maximum number of history records to keep
    #[arg(long, global = true)]
    depth: Option<usize>,

    /// Verbosity level; RUST_LOG is used when not given
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored under a key
    Get { key: String },
    /// Store a JSON value under a key
    Set { key: String, json: String },
    /// Store the contents of a STEP file as geometry
    SetStep { key: String, file: PathBuf },
    /// Store a JSON file, or one named member of it, under a key
    SetJson {
        key: String,
        file: PathBuf,
        /// Top-level member of the document to store instead of all of it
        #[arg(long)]
        member: Option<String>,
    },
    /// Remove a key and its files
    Delete { key: String },
    /// Snapshot the current state as a new history entry
    Record { label: String },
    /// Step back one history entry
    Undo,
    /// Step forward one history entry
    Redo,
    /// List history entries, marking the current one
    History,
    /// Drop every history entry and its snapshot
    ClearHistory,
    /// Write the complete live state to disk
    Dump,
    /// Print a summary of the session
    Show,
}

impl Cli {
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_toml_file(path)
                .wrap_err_with(|| format!("failed to load config {}", path.display()))?,
            None => SessionConfig::default(),
        };
        if let Some(basedir) = &self.basedir {
            config = config.with_basedir(basedir);
        }
        if let Some(name) = &self.name {
            config = config.with_name(name);
        }
        if let Some(depth) = self.depth {
            config = config.with_depth(depth);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut stdout = std::io::stdout().lock();
    run(cli, &mut stdout)
}

fn init_tracing(verbose: u8) -> Result<()> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let config = cli.session_config()?;
    let mut registry = SessionRegistry::new(RegistryMode::Single);
    let handle = registry.open(config)?;
    debug!("Running {:?} on session '{}'", cli.command, handle.lock().name());

    let result = execute(cli.command, &mut handle.lock(), out);
    registry.reset();
    result
}

fn execute(command: Command, session: &mut Session, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Get { key } => match session.require(&key)? {
            SessionValue::Generic(value) => writeln!(out, "{}", serde_json::to_string_pretty(value)?)?,
            SessionValue::Geometry(blob) => write!(out, "{}", blob.step_text())?,
            SessionValue::Mesh(mesh) => write!(out, "{}", mesh.obj)?,
        },
        Command::Set { key, json } => {
            let value: serde_json::Value = serde_json::from_str(&json)
                .wrap_err_with(|| format!("invalid JSON value for '{key}'"))?;
            session.set(&key, value)?;
            flush_unsynced(session)?;
        }
        Command::SetStep { key, file } => {
            session.set(&key, GeometryBlob::from_step(&file)?)?;
            flush_unsynced(session)?;
        }
        Command::SetJson { key, file, member } => {
            if session
                .set_from_file(&key, &file, member.as_deref(), None)?
                .is_none()
            {
                return Err(eyre!(
                    "{} has no member '{}'",
                    file.display(),
                    member.unwrap_or_default()
                ));
            }
            flush_unsynced(session)?;
        }
        Command::Delete { key } => {
            if session.delete(&key)?.is_none() {
                writeln!(out, "'{key}' was not resident; removed any files")?;
            }
        }
        Command::Record { label } => {
            session.record(&label)?;
            writeln!(out, "recorded '{label}' at {}", session.current())?;
        }
        Command::Undo => {
            let moved = session.undo()?;
            report_move(out, "undo", moved, session.current())?;
        }
        Command::Redo => {
            let moved = session.redo()?;
            report_move(out, "redo", moved, session.current())?;
        }
        Command::History => {
            writeln!(out, "depth {}", session.depth())?;
            let current = session.current();
            for (index, record) in session.history().iter().enumerate() {
                let marker = if index as i64 == current { '*' } else { ' ' };
                writeln!(out, "{marker} {index:>3}  {}  {}", record.id, record.label)?;
            }
        }
        Command::ClearHistory => session.clear_history()?,
        Command::Dump => session.dump()?,
        Command::Show => writeln!(out, "{session}")?,
    }
    Ok(())
}

/// Without autosync a `set` would only live in this process
fn flush_unsynced(session: &Session) -> Result<()> {
    if !session.settings().autosync {
        session.dump()?;
    }
    Ok(())
}

fn report_move(out: &mut impl Write, action: &str, moved: bool, current: i64) -> Result<()> {
    if moved {
        writeln!(out, "{action}: now at {current}")?;
    } else {
        writeln!(out, "{action}: unchanged at {current}")?;
    }
    Ok(())
}

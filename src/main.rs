//! `syncvisord`, the daemon binary.
//!
//! Parses the command line, initializes logging, optionally daemonizes,
//! and hands control to the [`Supervisor`]. Exit codes: 0 success, 1
//! invalid option, 2 configuration parse error, 3 unhandled fatal error.

use std::fs::{self, File};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use log::{error, info, warn};
use nix::unistd::{dup2, fork, setsid, ForkResult};

use syncvisor::{Config, ConfigError, MainConfig, PluginState, StaticLoader, Supervisor};

const DEFAULT_CONF: &str = "/etc/syncvisor.conf";
const PID_FILE: &str = "/var/run/syncvisord.pid";

const EXIT_INVALID_OPTION: u8 = 1;
const EXIT_CONF_PARSE: u8 = 2;
const EXIT_FATAL: u8 = 3;

#[derive(Parser)]
#[command(
    name = "syncvisord",
    version,
    about = "Host synchronization daemon hosting event-driven plugins"
)]
struct Args {
    /// Path to the main configuration file.
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONF)]
    config: PathBuf,

    /// Stay in the foreground and enable debugging messages.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Decode a plugin state file to stdout and exit.
    #[arg(short = 'D', long = "dump-state", value_name = "FILE")]
    dump_state: Option<PathBuf>,

    /// Append log output to this file.
    #[arg(short = 'l', long = "log", value_name = "FILE")]
    log: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _ = err.print();
            eprintln!("Try 'syncvisord --help' for more information.");
            return ExitCode::from(EXIT_INVALID_OPTION);
        }
    };

    init_logging(&args);

    if let Some(path) = &args.dump_state {
        return dump_state(path);
    }

    let conf = match MainConfig::load(&args.config) {
        Ok(conf) => conf,
        Err(err @ ConfigError::Xml { .. }) => {
            error!("{err}");
            return ExitCode::from(EXIT_CONF_PARSE);
        }
        Err(err) => {
            error!("{err}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    if !args.debug {
        if let Err(err) = daemonize() {
            error!("daemonize: {err}");
            return ExitCode::from(EXIT_FATAL);
        }
        write_pid_file(Path::new(PID_FILE));
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("runtime: {err}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    // The plugin library loader is deployment-specific; the stock binary
    // starts with an empty registry and every configured plugin must be
    // resolvable through it.
    let loader = StaticLoader::new();
    let supervisor = Supervisor::new(Config::default(), conf, &loader);

    match runtime.block_on(supervisor.run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_logging(args: &Args) {
    let default_filter = if args.debug { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    if args.debug {
        builder.target(env_logger::Target::Stdout);
    }
    if let Some(path) = &args.log {
        match File::options().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(err) => eprintln!("log file {}: {err}", path.display()),
        }
    }
    let _ = builder.try_init();
}

fn dump_state(path: &Path) -> ExitCode {
    match PluginState::load(path) {
        Ok(state) => {
            let stdout = std::io::stdout();
            if let Err(err) = state.dump(&mut stdout.lock()) {
                error!("{}: {err}", path.display());
                return ExitCode::from(EXIT_FATAL);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}: {err}", path.display());
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Forks into the background and detaches from the controlling terminal.
/// Runs before the tokio runtime is built; forking after threads exist is
/// not safe.
fn daemonize() -> io::Result<()> {
    match unsafe { fork() }.map_err(io::Error::from)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }
    setsid().map_err(io::Error::from)?;

    let devnull = File::options().read(true).write(true).open("/dev/null")?;
    for stdio in 0..=2 {
        dup2(devnull.as_raw_fd(), stdio).map_err(io::Error::from)?;
    }
    info!("Daemonized.");
    Ok(())
}

fn write_pid_file(path: &Path) {
    if let Err(err) = fs::write(path, format!("{}\n", std::process::id())) {
        warn!("Error saving PID file: {}: {err}", path.display());
    }
}

mod cli;
mod daemon;
mod globals;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{LogLevel, Verbosity};
use global_placeholders::global;
use macros_rs::string;
use std::path::PathBuf;

use sentinel::{
    helpers,
    logs::Stream,
    registry::{Registry, Selector},
};

#[derive(Copy, Clone, Debug, Default)]
struct NoneLevel;
impl LogLevel for NoneLevel {
    fn default() -> Option<log::Level> {
        None
    }
}

#[derive(Parser)]
#[command(name = "sentinel", version, about = "Lightweight single-host process supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[clap(flatten)]
    verbose: Verbosity<NoneLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a background process
    #[command(visible_alias = "start")]
    Run {
        /// Process name
        #[arg(short, long)]
        name: Option<String>,
        /// Auto-restart on exit
        #[arg(short, long)]
        restart: bool,
        /// Process group
        #[arg(short, long)]
        group: Option<String>,
        /// Path to .env file
        #[arg(short, long)]
        env_file: Option<PathBuf>,
        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// List all managed processes
    #[command(visible_alias = "ls")]
    List {
        /// Format output (default, json, raw)
        #[arg(long, default_value_t = string!("default"))]
        format: String,
    },
    /// Show detailed status of a process
    #[command(visible_alias = "info")]
    Status {
        /// Process ID or name
        selector: Selector,
    },
    /// Stop a running process
    #[command(visible_alias = "kill")]
    Stop {
        /// Process ID or name
        selector: Selector,
        /// Force kill with SIGKILL
        #[arg(short, long)]
        force: bool,
    },
    /// Restart a process
    Restart {
        /// Process ID or name
        selector: Selector,
    },
    /// View process logs
    Logs {
        /// Process ID or name
        selector: Selector,
        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
        /// Stream to show: stdout, stderr, or both
        #[arg(short, long, default_value_t = string!("both"))]
        stream: String,
        /// Clear logs instead of showing them
        #[arg(short, long)]
        clear: bool,
    },
    /// Remove dead processes from the catalog
    Clean,
    /// Stop all managed processes
    Stopall {
        /// Force kill all
        #[arg(short, long)]
        force: bool,
    },
    /// Start all stopped processes
    Startall,
    /// Restart all managed processes
    Restartall,
    /// Restart monitor daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
    /// Process group management
    Group {
        #[command(subcommand)]
        command: GroupCommand,
    },
    /// Port reservations
    Port {
        #[command(subcommand)]
        command: PortCommand,
    },
}

#[derive(Subcommand)]
enum DaemonCommand {
    /// Start the restart monitor daemon
    Start {
        /// Seconds between sweeps
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
    /// Stop the restart monitor daemon
    #[command(visible_alias = "kill")]
    Stop,
    /// Show daemon status
    #[command(visible_alias = "health")]
    Status,
}

#[derive(Subcommand)]
enum GroupCommand {
    /// Create a new process group
    Create {
        /// Group name
        name: String,
        /// Environment variables (KEY=VALUE)
        #[arg(short, long)]
        env: Vec<String>,
        /// Path to .env file
        #[arg(short = 'f', long)]
        env_file: Option<PathBuf>,
    },
    /// Delete a process group
    #[command(visible_alias = "rm")]
    Delete {
        /// Group name
        name: String,
        /// Stop all members before deleting
        #[arg(long)]
        stop: bool,
        /// Force kill members (with --stop)
        #[arg(short, long)]
        force: bool,
    },
    /// Add a process to a group
    Add {
        /// Group name
        name: String,
        /// Process ID or name
        selector: Selector,
    },
    /// Remove a process from its group
    Remove {
        /// Process ID or name
        selector: Selector,
    },
    /// List groups, or one group's members
    #[command(visible_alias = "ls")]
    List {
        /// Group name
        name: Option<String>,
        /// Format output (default, json, raw)
        #[arg(long, default_value_t = string!("default"))]
        format: String,
    },
    /// Start all stopped processes in a group
    Start {
        /// Group name
        name: String,
    },
    /// Stop all processes in a group
    Stop {
        /// Group name
        name: String,
        /// Force kill all
        #[arg(short, long)]
        force: bool,
    },
    /// Restart all processes in a group
    Restart {
        /// Group name
        name: String,
    },
}

#[derive(Subcommand)]
enum PortCommand {
    /// Reserve a port (random when not specified)
    #[command(visible_alias = "add")]
    Allocate {
        /// Specific port to reserve
        port: Option<u16>,
        /// Name for the reservation
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Release a reserved port
    #[command(visible_alias = "rm")]
    Free {
        /// Port to release
        port: u16,
    },
    /// List reserved ports
    #[command(visible_alias = "ls")]
    List {
        /// Filter by reservation name
        #[arg(short, long)]
        name: Option<String>,
        /// Format output (default, json, raw)
        #[arg(long, default_value_t = string!("default"))]
        format: String,
    },
}

fn main() {
    let parsed = Cli::parse();

    let mut builder = env_logger::Builder::new();
    builder.filter_level(parsed.verbose.log_level_filter()).init();

    globals::init();

    let registry = match Registry::open(global!("sentinel.base")) {
        Ok(registry) => registry,
        Err(err) => {
            eprintln!("{} {err}", *helpers::FAIL);
            std::process::exit(err.exit_code());
        }
    };

    let result = match &parsed.command {
        Commands::Run {
            name,
            restart,
            group,
            env_file,
            command,
        } => cli::run(&registry, command, name, *restart, group, env_file),
        Commands::List { format } => cli::list(&registry, format),
        Commands::Status { selector } => cli::status(&registry, selector),
        Commands::Stop { selector, force } => cli::stop(&registry, selector, *force),
        Commands::Restart { selector } => cli::restart(&registry, selector),
        Commands::Logs {
            selector,
            lines,
            follow,
            stream,
            clear,
        } => stream
            .parse::<Stream>()
            .and_then(|stream| cli::logs(&registry, selector, *lines, *follow, stream, *clear)),
        Commands::Clean => cli::clean(&registry),
        Commands::Stopall { force } => cli::stopall(&registry, *force),
        Commands::Startall => cli::startall(&registry),
        Commands::Restartall => cli::restartall(&registry),

        Commands::Daemon { command } => match command {
            DaemonCommand::Start { interval } => cli::daemon_start(&registry, *interval),
            DaemonCommand::Stop => cli::daemon_stop(&registry),
            DaemonCommand::Status => cli::daemon_status(&registry),
        },

        Commands::Group { command } => match command {
            GroupCommand::Create { name, env, env_file } => {
                cli::group::create(&registry, name, env, env_file)
            }
            GroupCommand::Delete { name, stop, force } => {
                cli::group::delete(&registry, name, *stop, *force)
            }
            GroupCommand::Add { name, selector } => cli::group::add(&registry, name, selector),
            GroupCommand::Remove { selector } => cli::group::remove(&registry, selector),
            GroupCommand::List { name, format } => cli::group::list(&registry, name, format),
            GroupCommand::Start { name } => cli::group::start(&registry, name),
            GroupCommand::Stop { name, force } => cli::group::stop(&registry, name, *force),
            GroupCommand::Restart { name } => cli::group::restart(&registry, name),
        },

        Commands::Port { command } => match command {
            PortCommand::Allocate { port, name } => cli::port::allocate(&registry, *port, name),
            PortCommand::Free { port } => cli::port::free(&registry, *port),
            PortCommand::List { name, format } => cli::port::list(&registry, name, format),
        },
    };

    if let Err(err) = result {
        eprintln!("{} {err}", *helpers::FAIL);
        std::process::exit(err.exit_code());
    }
}

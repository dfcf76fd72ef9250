use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use spm::commands;
use spm::config::{
    Config, DEFAULT_LOCK_TIMEOUT_SECS, DEFAULT_MASTER_CONFIG, DEFAULT_MINION_CONFIG,
    DEFAULT_SPM_DIR,
};
use spm::runtime::RealRuntime;
use spm::source::GitFetcher;

/// spm - Salt Package Manager
///
/// Install packages of Salt modules, states, runners, grains, formulas and
/// pillar data by linking their files into the Salt file and pillar roots.
///
/// Examples:
///   spm install https://github.com/org/nginx-formula.git
///   spm install ./mypkg --develop
///   spm remove nginx-formula
#[derive(Parser, Debug)]
#[command(author, version = env!("SPM_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level: error, warn, info, debug or trace (RUST_LOG overrides)
    #[arg(
        short = 'l',
        long = "loglevel",
        value_name = "LEVEL",
        default_value = "warn",
        global = true
    )]
    loglevel: LevelFilter,

    /// Folder holding the ledger, client configuration and fetched packages
    #[arg(
        long = "config-dir",
        env = "SPM_CONFIG",
        value_name = "PATH",
        default_value = DEFAULT_SPM_DIR,
        global = true
    )]
    config_dir: PathBuf,

    /// Salt master configuration to read file and pillar roots from
    #[arg(
        long = "master-config",
        env = "SALT_MASTER_CONFIG",
        value_name = "PATH",
        default_value = DEFAULT_MASTER_CONFIG,
        global = true
    )]
    master_config: PathBuf,

    /// Salt minion configuration, used when there is no master configuration
    #[arg(
        long = "minion-config",
        env = "SALT_MINION_CONFIG",
        value_name = "PATH",
        default_value = DEFAULT_MINION_CONFIG,
        global = true
    )]
    minion_config: PathBuf,

    /// Seconds to wait for another spm process to release the ledger
    #[arg(
        long = "lock-timeout",
        value_name = "SECONDS",
        default_value_t = DEFAULT_LOCK_TIMEOUT_SECS,
        global = true
    )]
    lock_timeout: u64,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install a package from a git repository or, with --develop, a local folder
    Install(InstallArgs),

    /// Remove an installed package
    Remove(RemoveArgs),

    /// List installed packages
    List,
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// Repository URL ending in .git, or a local folder with --develop
    #[arg(value_name = "REFERENCE")]
    reference: String,

    /// Link files from the local folder in place instead of fetching
    #[arg(short = 'd', long)]
    develop: bool,
}

#[derive(clap::Args, Debug)]
struct RemoveArgs {
    /// Name of the installed package
    #[arg(value_name = "NAME")]
    name: String,
}

impl Cli {
    fn config(&self) -> Config {
        Config::new(&self.config_dir)
            .with_host_configs(&self.master_config, &self.minion_config)
            .with_lock_timeout(Duration::from_secs(self.lock_timeout))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.loglevel.to_string()),
    )
    .init();

    let config = cli.config();
    let runtime = RealRuntime;
    let fetcher = GitFetcher::new();

    let result = match &cli.command {
        Commands::Install(args) => {
            commands::install(&runtime, &fetcher, &config, &args.reference, args.develop).await
        }
        Commands::Remove(args) => commands::remove(&runtime, &fetcher, &config, &args.name).await,
        Commands::List => commands::list(&runtime, &fetcher, &config),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use gitops_agent::config::{self, HostConfig};
use gitops_agent::scheduler::{self, Scheduler};

/// Long-running GitOps reconciliation agent.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Open the host config file in $EDITOR and exit.
    #[arg(long)]
    configure: bool,

    /// Path to the host config file.
    #[arg(short, long, default_value_os_t = config::default_config_path())]
    config: std::path::PathBuf,

    /// Raise the log level to debug.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        log::error!("{e:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.configure {
        return scheduler::run_configure(&cli.config);
    }

    let host_config = HostConfig::load(&cli.config)
        .with_context(|| format!("could not start: {}", cli.config.display()))?;

    log::info!(
        "Starting gitops-agent for infra '{}' with {} declared app(s)",
        host_config.infra_name,
        host_config.applications.len()
    );

    let mut scheduler = Scheduler::new(host_config, scheduler::default_state_root());
    scheduler.run_forever()
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbose && std::env::var("RUST_LOG").is_err() {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use embermq::{setup_tracing, AppError, GLOBAL_CONFIG};
use embermq::{AppResult, Broker, BrokerConfig};
use tokio::runtime;
use tracing::error;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// log level (v: debug, vv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn main() {
    if let Err(e) = run() {
        error!("embermq failed to start: {}", e);
        eprintln!("embermq failed to start: {}", e);
        std::process::exit(1);
    }
}

fn run() -> AppResult<()> {
    let commandline: CommandLine = CommandLine::parse();
    dotenv().ok();

    // the command line only fills in when the environment says nothing
    if std::env::var("RUST_LOG").is_err() {
        let level = match commandline.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let _log_guard = setup_tracing()?;

    // setup config
    let config_path = commandline
        .conf
        .as_ref()
        .map_or_else(|| PathBuf::from("conf.toml"), PathBuf::from);
    let broker_config = BrokerConfig::set_up_config(config_path)?;
    GLOBAL_CONFIG
        .set(broker_config)
        .map_err(|_| AppError::IllegalStateError("broker config already set".to_string()))?;

    Broker::start(&rt)?;

    Ok(())
}

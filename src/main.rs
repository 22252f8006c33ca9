use chrono::{SecondsFormat, Utc};
use clap::{Arg, ArgAction, ArgMatches, Command};
use huginn::client::{ApiClient, HttpApiClient};
use huginn::config::Config;
use huginn::executor::Executor;
use huginn::{Result, utils};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const INSTANCE_LOCK_NAME: &str = "huginn";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("huginn")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Passive DNS sensor: capture queries, submit them for analysis, log alerts")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("listen")
                .about("Capture DNS traffic and submit it for analysis")
                .arg(config_arg())
                .arg(
                    Arg::new("offline")
                        .long("offline")
                        .help("Do not contact the API; spill captured queries to the failed-queries file")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("send")
                .about("Submit DNS queries stored in pcap files")
                .arg(config_arg())
                .arg(
                    Arg::new("file")
                        .value_name("FILE")
                        .num_args(1..)
                        .required(true)
                        .help("pcap files to read, e.g. spill files from a previous run"),
                ),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("listen", sub)) => listen(sub).await,
        Some(("send", sub)) => send(sub).await,
        _ => unreachable!("subcommand is required"),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Configuration file path")
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    Config::load(matches.get_one::<String>("config").map(Path::new))
}

fn build_client(config: &Config) -> Result<Arc<dyn ApiClient>> {
    Ok(Arc::new(HttpApiClient::new(
        &config.api.host,
        &config.api.api_version,
        &config.api.api_key,
    )?))
}

async fn listen(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    let offline = matches.get_flag("offline");
    config.validate(true, !offline)?;

    let _lock = utils::lock_instance(INSTANCE_LOCK_NAME)?;

    let executor = Executor::new(build_client(&config)?, config)?;
    if offline {
        executor.start_offline().await
    } else {
        executor.start().await
    }
}

async fn send(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches)?;
    config.validate(false, true)?;

    let executor = Executor::new(build_client(&config)?, config)?;
    for file in matches.get_many::<String>("file").into_iter().flatten() {
        executor.send(Path::new(file)).await?;
        // keep the data, but make sure it is never submitted twice
        let sent = format!(
            "{}.{}",
            file,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        std::fs::rename(file, &sent)?;
        info!("file {file} sent, renamed to {sent}");
    }
    Ok(())
}

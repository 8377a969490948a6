//! # sograph
//!
//! sograph is a social graph server: friends, groups and join requests over
//! an authoritative database with a redis side-cache, plus a presence-based
//! relay that forwards queued messages to users once they are reachable.
#![warn(missing_docs)]
#![cfg_attr(
    feature = "rorm-main",
    allow(dead_code, unused_variables, unused_imports)
)]

use std::fs::read_to_string;
use std::path::Path;

use actix_toolbox::logging::setup_logging;
use clap::{Parser, Subcommand};
use log::{error, info};
use rorm::{Database, DatabaseConfiguration, DatabaseDriver};
use tokio::sync::watch;

use crate::cache::RelationshipCache;
use crate::chan::{start_relay_loop, start_ws_manager};
use crate::config::Config;
use crate::server::start_server;
use crate::service::{
    start_expiry_sweeper, MessageDispatcher, PresenceRegistry, RequestLifecycle, Stores,
};

pub mod cache;
pub mod chan;
pub mod config;
pub mod models;
pub mod server;
pub mod service;

/// The possible commands for sograph
#[derive(Subcommand)]
pub enum Command {
    /// Start the server
    Start,
}

/// The cli parser for sograph
#[derive(Parser)]
#[clap(version, about = "A social graph server")]
pub struct Cli {
    #[clap(long = "config-path")]
    #[clap(help = "Specify an alternative path to the config file")]
    #[clap(default_value_t = String::from("/etc/sograph/config.toml"))]
    config_path: String,

    #[clap(subcommand)]
    command: Command,
}

#[rorm::rorm_main]
#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start => {
            let conf = get_conf(&cli.config_path)?;

            setup_logging(&conf.logging)?;

            let db = get_db(&conf).await?;
            info!("Connected to database");

            let cache = RelationshipCache::connect(&conf.cache)
                .await
                .map_err(|err| format!("Error connecting to cache: {err}"))?;
            info!("Connected to cache");

            // Signals background tasks that the process is going down
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            let stores = Stores {
                db,
                cache: cache.clone(),
            };
            let presence = PresenceRegistry::new(cache.clone());
            let dispatcher = MessageDispatcher::new(
                cache.clone(),
                presence.clone(),
                &conf.dispatch,
                shutdown_rx.clone(),
            );
            let lifecycle = RequestLifecycle::new(
                stores.clone(),
                dispatcher.clone(),
                conf.retention.window_days,
            );

            let ws_manager_chan = start_ws_manager(
                presence.clone(),
                dispatcher.clone(),
                conf.dispatch.node_address.clone(),
            )
            .await?;
            start_relay_loop(
                cache,
                conf.dispatch.node_address.clone(),
                ws_manager_chan.clone(),
                shutdown_rx.clone(),
            );
            start_expiry_sweeper(lifecycle.clone(), conf.retention.sweep_interval, shutdown_rx);

            let result = start_server(
                &conf,
                stores,
                lifecycle,
                presence,
                dispatcher,
                ws_manager_chan,
            )
            .await;

            // The http server returned, stop the background tasks as well
            let _ = shutdown_tx.send(true);

            if let Err(err) = result {
                error!("Error while starting server: {err}");
                return Err(err.to_string());
            }
        }
    }

    Ok(())
}

/// Retrieve a [Config] by Path
///
/// **Parameter**:
/// - `config_path`: [&str]
fn get_conf(config_path: &str) -> Result<Config, String> {
    let path = Path::new(config_path);

    if !path.exists() {
        return Err(format!("File {config_path} does not exist"));
    }

    if !path.is_file() {
        return Err(format!("{config_path} is a directory"));
    }

    let config_str =
        read_to_string(path).map_err(|err| format!("Could not read config file: {err}"))?;

    let config: Config =
        toml::from_str(&config_str).map_err(|err| format!("Could not parse config file: {err}"))?;

    Ok(config)
}

/// Retrieves the database using the provided config.
///
/// If the connection fails, an error is returned
async fn get_db(config: &Config) -> Result<Database, String> {
    let c = DatabaseConfiguration {
        driver: DatabaseDriver::Postgres {
            host: config.database.host.clone(),
            port: config.database.port,
            name: config.database.name.clone(),
            user: config.database.user.clone(),
            password: config.database.password.clone(),
        },
        min_connections: 2,
        max_connections: 20,
        disable_logging: Some(true),
        statement_log_level: None,
        slow_statement_log_level: None,
    };

    Database::connect(c)
        .await
        .map_err(|e| format!("Error connecting to database: {e}"))
}

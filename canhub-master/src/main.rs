use std::path::PathBuf;
use std::sync::Arc;

use canhub_master::common::constants::DEFAULT_MASTER_NODE_ID;
use canhub_master::common::{open_bus, NodeId};
use canhub_master::{engine_channel, Database, DefinitionRegistry, Engine};
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "canhub-master", about = "CAN network master controller")]
struct Args {
    /// The socketcan interface to manage, e.g. "can0" or "vcan0"
    socket: String,
    /// Path to the SQLite store
    #[clap(long, short, default_value = "canhub.db")]
    database: PathBuf,
    /// Path to the message definitions CSV export
    #[clap(long)]
    definitions: Option<PathBuf>,
    /// Override the master's 4-byte node ID (8 hex chars)
    #[clap(long)]
    master_id: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let master_id = match &args.master_id {
        Some(text) => match NodeId::from_hex(text) {
            Ok(id) => id,
            Err(_) => {
                log::error!("--master-id must be 8 hex characters, got {text:?}");
                std::process::exit(1);
            }
        },
        None => DEFAULT_MASTER_NODE_ID,
    };

    let mut db = match Database::open(&args.database) {
        Ok(db) => db,
        Err(e) => {
            log::error!("Failed to open database {}: {e}", args.database.display());
            std::process::exit(1);
        }
    };

    // A missing or unreadable definitions file is not fatal: the live
    // stream then labels every frame UNKNOWN.
    let registry = match &args.definitions {
        Some(path) => match DefinitionRegistry::load_csv(path, &mut db) {
            Ok(registry) => registry,
            Err(e) => {
                log::warn!("Failed to load definitions from {}: {e}", path.display());
                DefinitionRegistry::empty()
            }
        },
        None => DefinitionRegistry::empty(),
    };

    let (bus_tx, bus_rx) = match open_bus(&args.socket) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("Failed to open CAN interface {}: {e}", args.socket);
            std::process::exit(1);
        }
    };

    let engine = match Engine::new(master_id, bus_tx, db, Arc::new(registry)) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Failed to initialize engine: {e}");
            std::process::exit(1);
        }
    };

    log::info!(
        "Managing {} as master {master_id} (db: {})",
        args.socket,
        args.database.display()
    );

    let (handle, commands) = engine_channel();
    let engine_task = tokio::spawn(engine.run(bus_rx, commands));

    tokio::signal::ctrl_c().await.ok();
    log::info!("Shutting down");
    handle.shutdown();
    engine_task.await.ok();
}

//! gridsync - headless grid synchronized with a gridsync records server.
//!
//! Reads grid commands from stdin and prints the table after each one. Remote
//! changes made by other clients show up on the next `list`.

use std::sync::{Arc, Mutex, PoisonError};

use gridsync_client::grid::{self, Command, HELP};
use gridsync_client::{Bootstrap, ClientConfig, HttpGateway, Readiness, SyncSession};
use gridsync_engine::{LocalStoreAdapter, MemoryStore, Origin, RecordSchema};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridsync_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = ClientConfig::from_env()?;

    tracing::info!("Connecting to {}", config.server_url);

    let schema = RecordSchema::people();
    let store = Arc::new(Mutex::new(MemoryStore::new()));
    let session = SyncSession::shared();
    let gateway = Arc::new(HttpGateway::new(config.server_url.clone()));

    let handle = Bootstrap::new(store.clone(), gateway, session)
        .schema(schema.clone())
        .resync_policy(config.resync_policy())
        .run(Readiness::ready())
        .await?;

    print_table(&store, &schema);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Help => {
                println!("{HELP}");
                continue;
            }
            Command::List => {}
            Command::Add => {
                let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(id) = grid::add_row(&mut *store, &schema) {
                    println!("added row {id}");
                }
            }
            Command::Set { id, field, value } => {
                let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = grid::edit_cell(&mut *store, &schema, &id, &field, &value) {
                    eprintln!("{e}");
                }
            }
            Command::Remove(ids) => {
                let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
                let removed = store.remove(&ids, Origin::Local);
                println!("removed {} row(s)", removed.len());
            }
            Command::Resync => {
                let report = handle.resync().await;
                if !report.resynced {
                    eprintln!("resync failed: {}", report.errors.join("; "));
                }
            }
        }

        print_table(&store, &schema);
    }

    handle.shutdown();
    tracing::info!("Bye");
    Ok(())
}

fn print_table(store: &Mutex<MemoryStore>, schema: &RecordSchema) {
    let records = store
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .records();
    println!("{}", grid::render_table(schema, &records));
}

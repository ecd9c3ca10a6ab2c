//! Tank arena: a small replicated game on top of Replicast.
//!
//! ```text
//! tank-arena                     server plus two bot clients, for 10 s
//! tank-arena server [config]     dedicated server, optional JSON config
//! tank-arena client [addr]       bot client, default 127.0.0.1:9001
//! ```

mod behaviors;

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use replicast::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

const MANIFEST: &str = include_str!("../manifest.json");
const LOCAL_RUN: Duration = Duration::from_secs(10);
const REPORT_EVERY: Duration = Duration::from_secs(2);

type BoxError = Box<dyn std::error::Error>;

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn load_contracts() -> Result<ContractTable, BoxError> {
    let manifest = ContractManifest::from_json_str(MANIFEST)?;
    let enemy = manifest
        .id_for_key("enemy")
        .ok_or("manifest has no enemy contract")?;
    Ok(ContractTable::from_manifest(
        &manifest,
        &behaviors::templates(enemy),
    )?)
}

/// Adds the spawner to the bootstrap list unless the config already has it.
fn server_config(
    mut config: SessionConfig,
    contracts: &ContractTable,
) -> Result<SessionConfig, BoxError> {
    let spawner = contracts
        .id_for_key("spawner")
        .ok_or("manifest has no spawner contract")?;
    if !config.bootstrap_objects.contains(&spawner) {
        config.bootstrap_objects.push(spawner);
    }
    Ok(config)
}

fn ctrl_c() -> impl Future<Output = ()> {
    async {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Logs notifications and a periodic status line until `stop` resolves or
/// the session goes idle.
async fn report_until(
    session: &NetworkSession,
    label: &str,
    stop: impl Future<Output = ()>,
) -> Result<(), ReplicastError> {
    let mut events = session.events();
    let mut report = tokio::time::interval(REPORT_EVERY);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            () = &mut stop => return Ok(()),
            _ = report.tick() => {
                let status = session.status().await?;
                info!(
                    label,
                    role = %status.role,
                    state = ?status.state,
                    objects = status.object_count,
                    connections = status.connection_count,
                    tick = status.tick,
                    "status"
                );
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Tick(_)) => {}
                Ok(SessionEvent::Disconnected) => {
                    info!(label, "session ended");
                    return Ok(());
                }
                Ok(event) => info!(label, ?event, "session event"),
                Err(RecvError::Lagged(missed)) => debug!(label, missed, "event stream lagged"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

async fn run_server(config_path: Option<String>) -> Result<(), BoxError> {
    let config = match config_path {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };
    let contracts = load_contracts()?;
    let config = server_config(config, &contracts)?;

    let session = NetworkSession::builder(contracts).config(config).build()?;
    let addr = session.start_server().await?;
    info!(%addr, "tank arena server listening, ctrl-c to stop");

    report_until(&session, "server", ctrl_c()).await?;
    session.shutdown().await?;
    Ok(())
}

async fn run_client(addr: SocketAddr) -> Result<(), BoxError> {
    let session = NetworkSession::builder(load_contracts()?).build()?;
    session.start_client(addr).await?;
    info!(%addr, "connected, ctrl-c to leave");

    report_until(&session, "client", ctrl_c()).await?;
    session.shutdown().await?;
    Ok(())
}

/// Server and two bot clients in one process.
async fn run_local() -> Result<(), BoxError> {
    let contracts = load_contracts()?;
    let config = SessionConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        ..server_config(SessionConfig::default(), &contracts)?
    };
    let server = NetworkSession::builder(contracts)
        .config(config)
        .exclusive(false)
        .build()?;
    let addr = server.start_server().await?;
    info!(%addr, "local arena started");

    let mut clients = Vec::new();
    for _ in 0..2 {
        let client = NetworkSession::builder(load_contracts()?)
            .exclusive(false)
            .build()?;
        client.start_client(addr).await?;
        clients.push(client);
    }

    report_until(&server, "server", tokio::time::sleep(LOCAL_RUN)).await?;

    for client in clients {
        let status = client.status().await?;
        info!(player = %status.local_player, objects = status.object_count, "client leaving");
        client.shutdown().await?;
    }
    server.shutdown().await?;
    info!("local arena stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    replicast::logging::init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None | Some("local") => run_local().await,
        Some("server") => run_server(args.next()).await,
        Some("client") => {
            let addr = match args.next() {
                Some(addr) => addr.parse()?,
                None => SessionConfig::default().server_addr(),
            };
            run_client(addr).await
        }
        Some(other) => Err(format!("unknown mode {other:?}, expected local, server or client").into()),
    }
}

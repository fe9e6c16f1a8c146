use std::{panic, time::Duration};

use anyhow::Result;
use clap::Parser;
use storage_host::{
    api::{self, Env},
    config::Config,
    consensus_follower,
    host::{Host, HostOptions},
    logging, node_client, reactor, stopper,
    storage::{DigestProofBuilder, DiskFileStore},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::try_parse()?;
    logging::setup(config.log_format);
    info!("Storage host");
    info!("{:#?}", config);

    let cancel_token = CancellationToken::new();
    let panic_token = cancel_token.clone();
    panic::set_hook(Box::new(move |info| {
        let message = logging::panic_message(info.payload());
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        error!(target: "panic", "Panic at {}: {}", location, message);
        panic_token.cancel();
    }));

    let node = node_client::Client::new_from_config(&config)?;
    let files = DiskFileStore::new(config.files_dir()).await?;
    let host = Host::new(
        HostOptions::builder()
            .persist_dir(config.persist_dir())
            .net_address(config.host_address.clone())
            .reorg_depth(config.storage_proof_reorg_depth)
            .build(),
        node.clone(),
        files,
        DigestProofBuilder,
    )
    .await?;

    let mut handles = vec![];
    handles.push(stopper::run(cancel_token.clone())?);

    let (tx, rx) = mpsc::channel(10);
    handles.push(reactor::run(host.clone(), cancel_token.clone(), rx));
    handles.push(consensus_follower::run(
        node,
        cancel_token.clone(),
        Duration::from_secs(config.poll_interval_secs),
        host.last_change_id().await,
        tx,
    ));
    handles.push(
        api::run(
            config.api_port,
            Env {
                cancel_token: cancel_token.clone(),
                host,
            },
        )
        .await?,
    );

    for handle in handles {
        let _ = handle.await;
    }
    info!("Exited");
    Ok(())
}

//! The ccnfwd daemon: brings up listeners and runs the forwarder until
//! interrupted. Exit code 0 on clean shutdown, non-zero when start-up
//! fails.

use anyhow::Context;
use clap::Parser;
use rust_ccnfwd_core::Forwarder;
use rust_ccnfwd_io::{Dispatcher, ForwarderHandle, ListenerSpec};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ccnfwd", about = "CCNx v1 ICN forwarder", version)]
struct Args {
    /// UDP listen addresses.
    #[arg(long = "udp", value_name = "ADDR")]
    udp: Vec<SocketAddr>,

    /// TCP listen addresses.
    #[arg(long = "tcp", value_name = "ADDR")]
    tcp: Vec<SocketAddr>,

    /// UNIX-domain listen sockets.
    #[arg(long = "unix", value_name = "PATH")]
    unix: Vec<PathBuf>,

    /// Raw-Ethernet listen interfaces (Linux only).
    #[cfg(target_os = "linux")]
    #[arg(long = "ether", value_name = "INTERFACE")]
    ether: Vec<String>,

    /// Ethertype for raw-Ethernet listeners.
    #[cfg(target_os = "linux")]
    #[arg(long, default_value_t = rust_ccnfwd_io::ether::DEFAULT_ETHERTYPE)]
    ethertype: u16,

    /// Link MTU for raw-Ethernet listeners.
    #[cfg(target_os = "linux")]
    #[arg(long, default_value_t = 1500)]
    mtu: usize,

    /// Content store capacity in objects; 0 disables caching.
    #[arg(long, default_value_t = 8192)]
    cs_capacity: usize,

    /// Log filter, e.g. "info" or "rust_ccnfwd_core=debug".
    #[arg(long, default_value = "info")]
    log: String,
}

impl Args {
    fn listeners(&self) -> Vec<ListenerSpec> {
        let mut specs = Vec::new();
        specs.extend(self.udp.iter().map(|addr| ListenerSpec::Udp(*addr)));
        specs.extend(self.tcp.iter().map(|addr| ListenerSpec::Tcp(*addr)));
        specs.extend(self.unix.iter().map(|path| ListenerSpec::Unix(path.clone())));
        #[cfg(target_os = "linux")]
        specs.extend(self.ether.iter().map(|interface| ListenerSpec::Ether {
            interface: interface.clone(),
            ethertype: self.ethertype,
            mtu: self.mtu,
        }));
        specs
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log))
        .init();

    // One thread runs the whole data plane; transports are tasks on it.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let listeners = args.listeners();
    if listeners.is_empty() {
        anyhow::bail!("no listeners configured; pass --udp, --tcp or --unix");
    }

    let forwarder = Forwarder::new(args.cs_capacity);
    let metrics = forwarder.metrics();
    let (dispatcher, handle) = Dispatcher::new(forwarder);
    let loop_task = tokio::spawn(dispatcher.run());

    for spec in listeners {
        handle
            .add_listener(spec.clone())
            .await
            .with_context(|| format!("starting listener {spec:?}"))?;
    }
    info!(cs_capacity = args.cs_capacity, "forwarder running");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!(
        interests = metrics.interests_received.value(),
        objects = metrics.objects_received.value(),
        "shutting down"
    );
    shutdown(&handle).await;
    loop_task.await.ok();
    Ok(())
}

async fn shutdown(handle: &ForwarderHandle) {
    if let Err(err) = handle.shutdown().await {
        tracing::warn!(%err, "dispatcher already gone");
    }
}

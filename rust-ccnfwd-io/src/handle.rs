//! The configuration surface of a running forwarder.
//!
//! A `ForwarderHandle` turns each call into a command on the dispatcher
//! queue and waits for the acknowledgment, so configuration changes are
//! serialized with packet processing.

use crate::dispatcher::{Command, ConnectSpec, Event, ListenerSpec};
use crate::local::LocalEndpoint;
use anyhow::{anyhow, Result};
use rust_ccnfwd_common::name::Name;
use rust_ccnfwd_common::types::ConnectionId;
use rust_ccnfwd_core::connection::ConnectionInfo;
use rust_ccnfwd_core::fib::RouteInfo;
use rust_ccnfwd_core::strategy::StrategyKind;
use tokio::sync::{mpsc, oneshot};

#[derive(Clone)]
pub struct ForwarderHandle {
    tx: mpsc::Sender<Event>,
}

impl ForwarderHandle {
    pub(crate) fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    async fn command<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Event::Command(make(reply_tx)))
            .await
            .map_err(|_| anyhow!("forwarder is gone"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("forwarder dropped the request"))
    }

    /// Bring up a listener. Idempotent on (transport, local address).
    pub async fn add_listener(&self, spec: ListenerSpec) -> Result<()> {
        self.command(|reply| Command::AddListener { spec, reply })
            .await?
    }

    /// Open an outbound connection and return its id.
    pub async fn add_connection(&self, spec: ConnectSpec) -> Result<ConnectionId> {
        self.command(|reply| Command::AddConnection { spec, reply })
            .await?
    }

    /// Close a connection. False if the id was unknown.
    pub async fn remove_connection(&self, conn_id: ConnectionId) -> Result<bool> {
        self.command(|reply| Command::RemoveConnection { conn_id, reply })
            .await
    }

    pub async fn add_route(
        &self,
        prefix: Name,
        conn_id: ConnectionId,
        cost: u32,
        strategy: Option<StrategyKind>,
    ) -> Result<()> {
        self.command(|reply| Command::AddRoute {
            prefix,
            conn_id,
            cost,
            strategy,
            reply,
        })
        .await?
        .map_err(Into::into)
    }

    /// True iff the route entry emptied and was deleted.
    pub async fn remove_route(&self, prefix: Name, conn_id: ConnectionId) -> Result<bool> {
        self.command(|reply| Command::RemoveRoute {
            prefix,
            conn_id,
            reply,
        })
        .await
    }

    pub async fn set_cs_capacity(&self, capacity: usize) -> Result<()> {
        self.command(|reply| Command::SetCsCapacity { capacity, reply })
            .await
    }

    pub async fn set_strategy(&self, prefix: Name, kind: StrategyKind) -> Result<()> {
        self.command(|reply| Command::SetStrategy {
            prefix,
            kind,
            reply,
        })
        .await?
        .map_err(Into::into)
    }

    /// Create an in-process application connection.
    pub async fn open_local(&self) -> Result<(ConnectionId, LocalEndpoint)> {
        self.command(|reply| Command::OpenLocal { reply }).await
    }

    pub async fn connections(&self) -> Result<Vec<ConnectionInfo>> {
        self.command(|reply| Command::Connections { reply }).await
    }

    pub async fn routes(&self) -> Result<Vec<RouteInfo>> {
        self.command(|reply| Command::Routes { reply }).await
    }

    /// Ask the dispatcher to stop after the current iteration.
    pub async fn shutdown(&self) -> Result<()> {
        self.command(|reply| Command::Shutdown { reply }).await
    }

    /// Blocking shutdown, for callers outside the runtime.
    pub fn shutdown_blocking(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .blocking_send(Event::Command(Command::Shutdown { reply: reply_tx }))
            .map_err(|_| anyhow!("forwarder is gone"))?;
        reply_rx
            .blocking_recv()
            .map_err(|_| anyhow!("forwarder dropped the request"))
    }
}

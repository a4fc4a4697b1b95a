//! Listener setup and the accept loops for both channels.
//!
//! Each accepted socket gets its own task in a shared `JoinSet`. Shutdown
//! stops accepting, cancels every connection through the shared token, and
//! drains the set under a bounded grace period.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::frontend::ControlConnection;
use crate::judge::JudgeConnection;
use crate::scheduler::Dispatcher;
use crate::service::BridgeService;

pub struct BridgeServer {
    config: BridgeConfig,
    dispatcher: Arc<Dispatcher>,
    service: Arc<dyn BridgeService>,
    auth: Arc<dyn Authenticator>,
}

impl BridgeServer {
    pub fn new(
        config: BridgeConfig,
        dispatcher: Arc<Dispatcher>,
        service: Arc<dyn BridgeService>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            service,
            auth,
        }
    }

    /// Bind both listeners. Separated from `run` so callers (and tests
    /// binding port 0) can learn the actual addresses before serving.
    pub async fn bind(self) -> Result<BoundServer> {
        let judge_listener = TcpListener::bind(self.config.judge_addr).await?;
        let control_listener = TcpListener::bind(self.config.control_addr).await?;
        let judge_addr = judge_listener.local_addr()?;
        let control_addr = control_listener.local_addr()?;
        tracing::info!(%judge_addr, %control_addr, "Bridge listening");
        Ok(BoundServer {
            config: self.config,
            dispatcher: self.dispatcher,
            service: self.service,
            auth: self.auth,
            judge_listener,
            control_listener,
            judge_addr,
            control_addr,
        })
    }
}

pub struct BoundServer {
    config: BridgeConfig,
    dispatcher: Arc<Dispatcher>,
    service: Arc<dyn BridgeService>,
    auth: Arc<dyn Authenticator>,
    judge_listener: TcpListener,
    control_listener: TcpListener,
    judge_addr: SocketAddr,
    control_addr: SocketAddr,
}

impl BoundServer {
    pub fn judge_addr(&self) -> SocketAddr {
        self.judge_addr
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Serve both channels until the token is cancelled, then drain.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.judge_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let connection = JudgeConnection::new(
                            self.dispatcher.clone(),
                            self.service.clone(),
                            self.auth.clone(),
                            self.config.clone(),
                            peer,
                        );
                        let cancel = cancel.clone();
                        tasks.spawn(async move { connection.run(stream, cancel).await });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept judge connection");
                    }
                },
                accepted = self.control_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let connection = ControlConnection::new(self.dispatcher.clone(), peer);
                        let cancel = cancel.clone();
                        tasks.spawn(async move { connection.run(stream, cancel).await });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept frontend connection");
                    }
                },
                // Reap finished connection tasks as we go.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Stop accepting before draining.
        drop(self.judge_listener);
        drop(self.control_listener);

        tracing::info!(
            connections = tasks.len(),
            "Draining connections before shutdown"
        );
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.config.shutdown_grace, drain)
            .await
            .is_err()
        {
            tracing::warn!("Shutdown grace period elapsed, aborting remaining connections");
        }
        Ok(())
    }
}

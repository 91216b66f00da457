//! Connection acceptor and server lifecycle.
//!
//! The server owns the listener and the shared [`Arena`]. `run_until` spawns
//! the scheduler and audit logger, then accepts connections until the
//! shutdown future resolves; every accepted socket gets its own handler
//! task.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::fs::File;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tracing::{info, warn};

use crate::config::ArenaConfig;
use crate::handler;
use crate::logger;
use crate::scheduler;
use crate::scores::{self, ScoreTable};
use crate::state::Arena;

pub struct ArenaServer {
    listener: TcpListener,
    arena: Arc<Arena>,
    audit_file: File,
}

impl ArenaServer {
    /// Assembles a server on an already-bound listener, so callers (and
    /// tests) control the address. Loads the score table and opens the audit
    /// file up front; either failing a validation or an open here is fatal,
    /// unlike persistence trouble during play.
    pub async fn new(listener: TcpListener, config: ArenaConfig) -> Result<Self> {
        let scores = match scores::load(&config.score_path).await {
            Ok(table) => table,
            Err(err) => {
                warn!(error = ?err, "score file unreadable, starting with an empty table");
                ScoreTable::new()
            }
        };
        let audit_file = logger::open(&config.audit_path).await?;
        let arena = Arc::new(Arena::new(config, scores)?);

        Ok(Self {
            listener,
            arena,
            audit_file,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let ArenaServer {
            listener,
            arena,
            audit_file,
        } = self;

        let scheduler_task = tokio::spawn(scheduler::run(Arc::clone(&arena)));
        let logger_task = tokio::spawn(logger::run(Arc::clone(&arena), audit_file));
        info!(rule = %arena.config().win_rule, "arena accepting players");

        tokio::pin!(shutdown);
        loop {
            select! {
                _ = &mut shutdown => {
                    info!("arena shutting down");
                    arena.shutdown();
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &arena);
                }
            }
        }

        // Both tasks exit once the arena deactivates; the logger finishes
        // its final drain before the server returns.
        if let Err(err) = scheduler_task.await {
            warn!(error = ?err, "scheduler task failed");
        }
        if let Err(err) = logger_task.await {
            warn!(error = ?err, "audit logger task failed");
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    arena: &Arc<Arena>,
) {
    match result {
        Ok((stream, peer)) => spawn_player_handler(stream, peer, arena),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_player_handler(stream: TcpStream, peer: SocketAddr, arena: &Arc<Arena>) {
    let arena = Arc::clone(arena);
    tokio::spawn(async move {
        if let Err(err) = handler::handle_connection(stream, arena).await {
            warn!(peer = %peer, error = ?err, "player connection closed with error");
        }
    });
}

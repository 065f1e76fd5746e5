//! Milter listener

use super::session::Session;
use crate::context::FilterContext;
use mailsift_common::config::MilterConfig;
use mailsift_common::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Where the MTA connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(String),
    Unix(PathBuf),
}

impl ListenAddr {
    /// `unix:/path` or `host:port`
    pub fn parse(listen: &str) -> Result<Self> {
        let listen = listen.trim();
        if let Some(path) = listen.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(Error::Config("empty unix socket path".to_string()));
            }
            return Ok(ListenAddr::Unix(PathBuf::from(path)));
        }
        if listen.is_empty() {
            return Err(Error::Config("empty milter listen address".to_string()));
        }
        Ok(ListenAddr::Tcp(listen.to_string()))
    }
}

impl std::fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => f.write_str(addr),
            ListenAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Accepts MTA connections and runs one session task per connection
pub struct MilterServer {
    listen: ListenAddr,
    ctx: Arc<FilterContext>,
    connection_semaphore: Arc<Semaphore>,
}

impl MilterServer {
    pub fn new(config: &MilterConfig, ctx: Arc<FilterContext>) -> Result<Self> {
        Ok(Self {
            listen: ListenAddr::parse(&config.listen)?,
            ctx,
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn listen_addr(&self) -> &ListenAddr {
        &self.listen
    }

    /// Accept connections until the task is dropped
    pub async fn run(&self) -> Result<()> {
        match &self.listen {
            ListenAddr::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!("Milter server listening on {}", addr);
                self.serve_tcp(listener).await
            }
            ListenAddr::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                info!("Milter server listening on unix:{}", path.display());
                loop {
                    match listener.accept().await {
                        Ok((stream, _)) => self.spawn_session(stream, "unix".to_string()),
                        Err(e) => error!("Failed to accept milter connection: {}", e),
                    }
                }
            }
        }
    }

    /// Serve an already bound TCP listener
    pub async fn serve_tcp(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                    }
                    self.spawn_session(stream, peer_addr.to_string());
                }
                Err(e) => error!("Failed to accept milter connection: {}", e),
            }
        }
    }

    fn spawn_session<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let permit = match self.connection_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Max milter connections reached, rejecting {}", peer);
                return;
            }
        };

        let session = Session::new(self.ctx.clone(), peer.clone());
        tokio::spawn(async move {
            debug!("Milter connection from {}", peer);
            if let Err(e) = session.run(stream).await {
                warn!("Milter session from {} ended: {}", peer, e);
            }
            drop(permit);
        });
    }
}

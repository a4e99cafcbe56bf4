//! Issuer connection manager: accept loop, session limit, shutdown.
use crate::config::IssuerConfig;
use crate::content::{ContentProvider, QuoteBook};
use crate::engine::Hashcash;
use crate::error::{ConfigError, Error, SessionError};
use crate::keys::KeyMaterial;
use crate::session::{run_issuer, IssuerContext};
use crate::time::sleep_or_cancel;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Pause after a failed `accept` before trying again.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct Server {
    listener: TcpListener,
    ctx: Arc<IssuerContext>,
    limit: Arc<Semaphore>,
    app_name: String,
}

impl Server {
    pub async fn bind(
        config: &IssuerConfig,
        keys: Arc<KeyMaterial>,
        content: Arc<dyn ContentProvider>,
        engine: Hashcash,
    ) -> Result<Self, Error> {
        config.validate()?;
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;
        Ok(Self {
            listener,
            ctx: Arc::new(IssuerContext::new(config, keys, content, engine)),
            limit: Arc::new(Semaphore::new(config.max_sessions)),
            app_name: config.app_name.clone(),
        })
    }

    /// Load keys and quotes named by `config`, then bind.
    pub async fn from_config(config: &IssuerConfig) -> Result<Self, Error> {
        let keys = KeyMaterial::load(
            &config.private_key_path,
            config.peer_public_key_path.as_deref(),
        )
        .map_err(ConfigError::from)?;
        let content: Arc<dyn ContentProvider> = match &config.quotes_path {
            Some(path) => Arc::new(QuoteBook::load(path)?),
            None => Arc::new(QuoteBook::builtin()),
        };
        Self::bind(config, Arc::new(keys), content, Hashcash::default()).await
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `cancel` fires, then wait for in-flight sessions.
    ///
    /// A permit is taken before each accept, so at most `max_sessions` sessions
    /// run at once and further connections queue in the listen backlog.
    pub async fn run(self, cancel: CancellationToken) {
        let addr = self
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        info!(app = %self.app_name, %addr, "server listening");

        let mut sessions = JoinSet::new();
        loop {
            while sessions.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let listener = &self.listener;
            let Some((stream, peer)) = accept_next(move || listener.accept(), &cancel).await else {
                break;
            };

            let ctx = self.ctx.clone();
            let cancel = cancel.clone();
            let span = info_span!("session", conn_id = %Uuid::new_v4(), %peer);
            sessions.spawn(
                async move {
                    let _permit = permit;
                    debug!("connection accepted");
                    match run_issuer(&ctx, stream, &peer.to_string(), &cancel).await {
                        Ok(()) => {}
                        Err(SessionError::ConnectionClosed) => {
                            debug!("peer left before finishing")
                        }
                        Err(SessionError::Cancelled) => debug!("session cancelled"),
                        Err(err) => warn!(error = %err, "session failed"),
                    }
                }
                .instrument(span),
            );
        }

        info!(in_flight = sessions.len(), "server shutting down");
        while sessions.join_next().await.is_some() {}
        info!("server stopped");
    }
}

/// Accept one connection, pausing [`ACCEPT_RETRY_DELAY`] after each failure.
///
/// Returns `None` once `cancel` fires.
async fn accept_next<F, Fut, T>(mut accept: F, cancel: &CancellationToken) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => return None,
            accepted = accept() => accepted,
        };
        match accepted {
            Ok(conn) => return Some(conn),
            Err(err) => {
                // EMFILE and similar keep failing until descriptors free up.
                warn!(error = %err, "accept failed");
                if !sleep_or_cancel(ACCEPT_RETRY_DELAY, cancel).await {
                    return None;
                }
            }
        }
    }
}

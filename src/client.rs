//! Solver connection manager: a pool of workers issuing repeated requests.
use crate::config::SolverConfig;
use crate::engine::Hashcash;
use crate::error::{ConfigError, SessionError};
use crate::keys::KeyMaterial;
use crate::session::{run_solver, SolverContext};
use crate::time::sleep_or_cancel;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Outcome counts over every request of a run.
///
/// Requests abandoned because the run was cancelled are neither successes nor failures.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    fn merge(&mut self, other: RunReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }
}

pub struct SolverClient {
    config: SolverConfig,
    ctx: Arc<SolverContext>,
}

impl SolverClient {
    pub fn new(
        config: SolverConfig,
        keys: Arc<KeyMaterial>,
        engine: Hashcash,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let ctx = Arc::new(SolverContext::new(&config, keys, engine));
        Ok(Self { config, ctx })
    }

    pub fn from_config(config: SolverConfig) -> Result<Self, ConfigError> {
        let keys = KeyMaterial::load(
            &config.private_key_path,
            config.peer_public_key_path.as_deref(),
        )?;
        Self::new(config, Arc::new(keys), Hashcash::default())
    }

    /// Start `workers` workers, staggered and spread round-robin over the
    /// configured servers, and collect their results.
    pub async fn run(&self, cancel: &CancellationToken) -> RunReport {
        info!(
            app = %self.config.app_name,
            workers = self.config.workers,
            requests = self.config.requests_per_worker,
            "client starting"
        );
        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers {
            if worker > 0 && !sleep_or_cancel(self.config.worker_spawn_delay, cancel).await {
                break;
            }
            let server = self.config.server_addrs[worker % self.config.server_addrs.len()].clone();
            let span = info_span!("worker", worker, %server);
            workers.spawn(
                worker_loop(
                    self.ctx.clone(),
                    server,
                    self.config.requests_per_worker,
                    self.config.request_delay,
                    cancel.clone(),
                )
                .instrument(span),
            );
        }

        let mut report = RunReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(partial) => report.merge(partial),
                Err(err) => warn!(error = %err, "worker panicked"),
            }
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            "client finished"
        );
        report
    }
}

async fn worker_loop(
    ctx: Arc<SolverContext>,
    server: String,
    requests: usize,
    request_delay: Duration,
    cancel: CancellationToken,
) -> RunReport {
    let mut report = RunReport::default();
    for iteration in 0..requests {
        if cancel.is_cancelled() {
            break;
        }
        if iteration > 0 && !sleep_or_cancel(request_delay, &cancel).await {
            break;
        }
        let conn_id = Uuid::new_v4();
        match fetch_once(&ctx, &server, &cancel).await {
            Ok(body) => {
                report.succeeded += 1;
                info!(iteration, %conn_id, content = %String::from_utf8_lossy(&body), "request served");
            }
            Err(SessionError::Cancelled) => {
                report.cancelled += 1;
                info!(iteration, %conn_id, "request abandoned on cancel");
            }
            Err(err) => {
                report.failed += 1;
                warn!(iteration, %conn_id, error = %err, "request failed");
            }
        }
    }
    report
}

async fn fetch_once(
    ctx: &SolverContext,
    server: &str,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, SessionError> {
    let exchange = async {
        let stream = tokio::time::timeout(ctx.io_timeout, TcpStream::connect(server))
            .await
            .map_err(|_| SessionError::Timeout)??;
        run_solver(ctx, stream, cancel).await
    };
    tokio::select! {
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        result = exchange => result,
    }
}

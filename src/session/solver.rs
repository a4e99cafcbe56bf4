//! Solver (client) side of the challenge-response exchange.
use super::io::EnvelopeStream;
use crate::config::SolverConfig;
use crate::engine::Hashcash;
use crate::envelope::{Envelope, EnvelopeCodec, StepTag};
use crate::error::{PuzzleError, SessionError};
use crate::keys::KeyMaterial;
use crate::stamp::PuzzleStamp;
use crate::stream::StopFlag;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Read-only state shared by every solver session.
pub struct SolverContext {
    pub engine: Hashcash,
    pub codec: EnvelopeCodec,
    pub max_iterations: u64,
    pub solve_threads: usize,
    pub io_timeout: Duration,
}

impl SolverContext {
    pub fn new(config: &SolverConfig, keys: Arc<KeyMaterial>, engine: Hashcash) -> Self {
        Self {
            engine,
            codec: EnvelopeCodec::new(keys),
            max_iterations: config.max_iterations,
            solve_threads: config.solve_threads,
            io_timeout: config.io_timeout,
        }
    }
}

#[derive(Debug)]
enum SolverState {
    SendChallengeRequest,
    AwaitChallenge,
    Solve { stamp: PuzzleStamp },
    SendSolution { stamp: PuzzleStamp },
    AwaitResult,
}

/// Raises the flag when dropped, so a search outlives neither its session nor a cancel.
struct StopOnDrop(Arc<StopFlag>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.force_stop();
    }
}

/// Run one full exchange and return the content the issuer released.
///
/// The search runs on the blocking pool so it cannot stall other sessions, and
/// is abandoned as soon as `cancel` fires or this future is dropped.
pub async fn run_solver<S>(
    ctx: &SolverContext,
    stream: S,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut io = EnvelopeStream::new(stream, ctx.codec.clone(), ctx.io_timeout);
    let mut state = SolverState::SendChallengeRequest;

    loop {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        state = match state {
            SolverState::SendChallengeRequest => {
                io.send(&Envelope::empty(StepTag::ChallengeRequest)).await?;
                SolverState::AwaitChallenge
            }
            SolverState::AwaitChallenge => {
                let envelope = io.recv_step(StepTag::ChallengeResponse).await?;
                let stamp: PuzzleStamp = serde_json::from_slice(&envelope.payload)?;
                debug!(difficulty = stamp.difficulty, origin = %stamp.origin, "challenge received");
                SolverState::Solve { stamp }
            }
            SolverState::Solve { stamp } => {
                let engine = ctx.engine.clone();
                let max_iterations = ctx.max_iterations;
                let threads = ctx.solve_threads;
                let stop = StopOnDrop(Arc::new(StopFlag::new()));
                let worker_stop = stop.0.clone();
                let started = Instant::now();
                let search = tokio::task::spawn_blocking(move || {
                    engine.solve_parallel_until(stamp, max_iterations, threads, worker_stop)
                });
                let solved = tokio::select! {
                    _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                    joined = search => match joined {
                        Ok(Err(PuzzleError::Cancelled)) => return Err(SessionError::Cancelled),
                        Ok(result) => result?,
                        Err(err) => return Err(SessionError::Join(err.to_string())),
                    },
                };
                debug!(
                    counter = solved.counter,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "challenge solved"
                );
                SolverState::SendSolution { stamp: solved }
            }
            SolverState::SendSolution { stamp } => {
                let payload = serde_json::to_vec(&stamp)?;
                io.send(&Envelope::new(StepTag::SolutionRequest, payload))
                    .await?;
                SolverState::AwaitResult
            }
            SolverState::AwaitResult => {
                let envelope = io.recv_step(StepTag::SolutionResponse).await?;
                return Ok(envelope.payload);
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::QuoteBook;
    use crate::keys::test_keys;
    use crate::session::issuer::{run_issuer, IssuerContext};
    use crate::stamp::MAX_DIFFICULTY;
    use tokio::io::duplex;

    fn solver_context(max_iterations: u64, solve_threads: usize) -> SolverContext {
        SolverContext {
            engine: Hashcash::default(),
            codec: EnvelopeCodec::new(test_keys()),
            max_iterations,
            solve_threads,
            io_timeout: Duration::from_secs(5),
        }
    }

    fn issuer_context(difficulty: u32) -> IssuerContext {
        IssuerContext {
            engine: Hashcash::default(),
            codec: EnvelopeCodec::new(test_keys()),
            difficulty,
            stamp_timeout: Duration::from_secs(500),
            io_timeout: Duration::from_secs(5),
            content: Arc::new(QuoteBook::builtin()),
        }
    }

    #[tokio::test]
    async fn full_exchange_delivers_quote() {
        let issuer = issuer_context(5);
        let solver = solver_context(10_000_000, 1);
        let (server_end, client_end) = duplex(64 * 1024);
        let cancel = CancellationToken::new();

        let (served, fetched) = tokio::join!(
            run_issuer(&issuer, server_end, "127.0.0.1:50000", &cancel),
            run_solver(&solver, client_end, &cancel),
        );
        served.unwrap();
        let quote = String::from_utf8(fetched.unwrap()).unwrap();
        assert!(QuoteBook::builtin().contains_text(&quote));
    }

    #[tokio::test]
    async fn parallel_solver_exchange() {
        let issuer = issuer_context(8);
        let solver = solver_context(10_000_000, 3);
        let (server_end, client_end) = duplex(64 * 1024);
        let cancel = CancellationToken::new();

        let (served, fetched) = tokio::join!(
            run_issuer(&issuer, server_end, "127.0.0.1:50001", &cancel),
            run_solver(&solver, client_end, &cancel),
        );
        served.unwrap();
        assert!(!fetched.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_search_fails_workflow() {
        let issuer = issuer_context(MAX_DIFFICULTY);
        let solver = solver_context(1, 1);
        let (server_end, client_end) = duplex(64 * 1024);
        let cancel = CancellationToken::new();

        let (served, fetched) = tokio::join!(
            run_issuer(&issuer, server_end, "127.0.0.1:50002", &cancel),
            run_solver(&solver, client_end, &cancel),
        );
        assert!(matches!(
            fetched,
            Err(SessionError::Puzzle(PuzzleError::PuzzleExhausted { iterations: 1 }))
        ));
        assert!(matches!(served, Err(SessionError::ConnectionClosed)));
    }

    #[test]
    fn cancel_mid_solve_frees_blocking_pool() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let issuer = issuer_context(MAX_DIFFICULTY);
        let solver = solver_context(u64::MAX, 2);

        let fetched = runtime.block_on(async {
            let (server_end, client_end) = duplex(64 * 1024);
            let server_cancel = CancellationToken::new();
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                trigger.cancel();
            });

            let (_, fetched) = tokio::join!(
                run_issuer(&issuer, server_end, "127.0.0.1:50003", &server_cancel),
                run_solver(&solver, client_end, &cancel),
            );
            fetched
        });
        assert!(matches!(fetched, Err(SessionError::Cancelled)));

        // Runtime shutdown waits for blocking tasks; an abandoned search would hold it.
        let started = Instant::now();
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

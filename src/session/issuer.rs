//! Issuer (server) side of the challenge-response exchange.
use super::io::EnvelopeStream;
use crate::config::IssuerConfig;
use crate::content::ContentProvider;
use crate::engine::Hashcash;
use crate::envelope::{Envelope, EnvelopeCodec, StepTag};
use crate::error::SessionError;
use crate::keys::KeyMaterial;
use crate::stamp::PuzzleStamp;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read-only state shared by every issuer session.
pub struct IssuerContext {
    pub engine: Hashcash,
    pub codec: EnvelopeCodec,
    pub difficulty: u32,
    pub stamp_timeout: Duration,
    pub io_timeout: Duration,
    pub content: Arc<dyn ContentProvider>,
}

impl IssuerContext {
    pub fn new(
        config: &IssuerConfig,
        keys: Arc<KeyMaterial>,
        content: Arc<dyn ContentProvider>,
        engine: Hashcash,
    ) -> Self {
        Self {
            engine,
            codec: EnvelopeCodec::new(keys),
            difficulty: config.difficulty,
            stamp_timeout: config.stamp_timeout,
            io_timeout: config.io_timeout,
            content,
        }
    }
}

/// Issuer states. Failures leave the machine through `Err`, which closes the connection.
#[derive(Debug)]
enum IssuerState {
    AwaitChallengeRequest,
    IssueChallenge,
    AwaitSolution { issued: PuzzleStamp },
    Validate {
        issued: PuzzleStamp,
        submitted: PuzzleStamp,
    },
    Respond,
}

/// Drive one exchange over `stream` for the peer at `peer`.
///
/// The stamp is bound to `peer`; nothing in the submitted stamp is trusted
/// except by comparison with the stamp minted here. Verification failures send
/// nothing back.
pub async fn run_issuer<S>(
    ctx: &IssuerContext,
    stream: S,
    peer: &str,
    cancel: &CancellationToken,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut io = EnvelopeStream::new(stream, ctx.codec.clone(), ctx.io_timeout);
    let mut state = IssuerState::AwaitChallengeRequest;

    loop {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        state = match state {
            IssuerState::AwaitChallengeRequest => {
                io.recv_step(StepTag::ChallengeRequest).await?;
                debug!("challenge requested");
                IssuerState::IssueChallenge
            }
            IssuerState::IssueChallenge => {
                let issued = ctx.engine.issue(ctx.difficulty, peer);
                let payload = serde_json::to_vec(&issued)?;
                io.send(&Envelope::new(StepTag::ChallengeResponse, payload))
                    .await?;
                debug!(difficulty = issued.difficulty, "challenge sent");
                IssuerState::AwaitSolution { issued }
            }
            IssuerState::AwaitSolution { issued } => {
                let envelope = io.recv_step(StepTag::SolutionRequest).await?;
                let submitted: PuzzleStamp = serde_json::from_slice(&envelope.payload)?;
                IssuerState::Validate { issued, submitted }
            }
            IssuerState::Validate { issued, submitted } => {
                if let Err(err) = ctx
                    .engine
                    .verify_issued(&submitted, &issued, ctx.stamp_timeout)
                {
                    warn!(error = %err, counter = submitted.counter, "solution rejected");
                    return Err(err.into());
                }
                debug!(counter = submitted.counter, digest = %submitted.digest_hex(), "solution verified");
                IssuerState::Respond
            }
            IssuerState::Respond => {
                let body = ctx.content.pick();
                io.send(&Envelope::new(StepTag::SolutionResponse, body))
                    .await?;
                info!("content delivered");
                return Ok(());
            }
        };
    }
}

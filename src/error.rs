use crate::envelope::StepTag;

/// Reasons an issuer rejects a submitted stamp.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("stamp origin does not match the connection peer")]
    OriginMismatch,
    #[error("stamp nonce seed does not match the issued seed")]
    NonceMismatch,
    #[error("stamp issue time does not match the issued stamp")]
    IssuedAtMismatch,
    #[error("stamp expired")]
    StampExpired,
    #[error("stamp does not meet difficulty")]
    DifficultyNotMet,
    #[error("unsupported stamp version {0}")]
    UnsupportedVersion(u32),
}

/// Solver-side puzzle failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PuzzleError {
    #[error("no solution within {iterations} iterations")]
    PuzzleExhausted { iterations: u64 },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("search stopped before a solution was found")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    DecryptFailed(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Everything that can end a single connection's exchange.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("peer did not answer in time")]
    Timeout,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("session cancelled")]
    Cancelled,
    #[error("encoded envelope is {len} bytes, receive buffer holds {max}")]
    Oversized { len: usize, max: usize },
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("protocol violation: expected {expected:?}, got {got:?}")]
    ProtocolViolation { expected: StepTag, got: StepTag },
    #[error("invalid stamp payload: {0}")]
    Stamp(#[from] serde_json::Error),
    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Puzzle(#[from] PuzzleError),
    #[error("solver task failed: {0}")]
    Join(String),
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to read key file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse private key: {0}")]
    Parse(String),
    #[error("key generation failed: {0}")]
    Generate(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid content file: {0}")]
    Content(String),
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Startup failures of a connection manager.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

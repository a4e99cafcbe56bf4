//! Hashcash proof-of-work admission control over TCP.
//!
//! An issuer hands each connecting client a stamp bound to the client's address.
//! The client must find a counter whose SHA-256 digest has enough leading zero
//! bits before the issuer releases any content. Every message travels as an
//! RSA-OAEP encrypted envelope.
//!
//! ```no_run
//! use hashgate::{Hashcash, STAMP_VERSION};
//!
//! let engine = Hashcash::default();
//! let stamp = engine.issue(12, "192.0.2.1:40000");
//! assert_eq!(stamp.version, STAMP_VERSION);
//! let solved = engine.solve(stamp.clone(), 10_000_000).unwrap();
//! engine
//!     .verify_issued(&solved, &stamp, std::time::Duration::from_secs(500))
//!     .unwrap();
//! ```

pub mod client;
pub mod config;
pub mod content;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod server;
pub mod session;
pub mod stamp;
pub mod stream;
pub mod telemetry;
pub mod time;

pub use client::{RunReport, SolverClient};
pub use config::{IssuerConfig, IssuerConfigBuilder, SolverConfig, SolverConfigBuilder};
pub use content::{ContentProvider, Quote, QuoteBook};
pub use engine::Hashcash;
pub use envelope::{Envelope, EnvelopeCodec, StepTag};
pub use error::{
    ConfigError, EnvelopeError, Error, KeyError, PuzzleError, SessionError, VerifyError,
};
pub use keys::KeyMaterial;
pub use server::Server;
pub use stamp::{PuzzleStamp, MAX_DIFFICULTY, STAMP_VERSION};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};

//! Hashcash puzzle engine: issue, solve and verify stamps.
use crate::error::{PuzzleError, VerifyError};
use crate::stamp::{meets_leading_zero_bits, PuzzleStamp, STAMP_VERSION};
use crate::stream::{CounterSource, StopFlag};
use crate::time::{SystemTimeProvider, TimeProvider};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flume::{Receiver, Sender};
use rand::RngCore;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Random bytes behind each nonce seed.
pub const NONCE_SEED_BYTES: usize = 16;

/// Stateless puzzle engine; the clock is the only injected dependency.
#[derive(Clone)]
pub struct Hashcash {
    time: Arc<dyn TimeProvider>,
}

impl std::fmt::Debug for Hashcash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hashcash").finish_non_exhaustive()
    }
}

impl Default for Hashcash {
    fn default() -> Self {
        Self::new(Arc::new(SystemTimeProvider))
    }
}

impl Hashcash {
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        Self { time }
    }

    /// Mint a fresh stamp for `origin` with a random seed and `counter = 0`.
    pub fn issue(&self, difficulty: u32, origin: impl Into<String>) -> PuzzleStamp {
        let mut seed = [0u8; NONCE_SEED_BYTES];
        rand::thread_rng().fill_bytes(&mut seed);
        PuzzleStamp {
            version: STAMP_VERSION,
            difficulty,
            issued_at: self.time.now_seconds(),
            origin: origin.into(),
            nonce_seed: BASE64.encode(seed),
            counter: 0,
        }
    }

    /// Search counters `1..=max_iterations` for one meeting the stamp's difficulty.
    ///
    /// The search is sequential and returns the smallest winning counter.
    pub fn solve(
        &self,
        stamp: PuzzleStamp,
        max_iterations: u64,
    ) -> Result<PuzzleStamp, PuzzleError> {
        self.solve_until(stamp, max_iterations, &StopFlag::new())
    }

    /// [`Hashcash::solve`] that gives up with [`PuzzleError::Cancelled`] once `stop` is set.
    pub fn solve_until(
        &self,
        mut stamp: PuzzleStamp,
        max_iterations: u64,
        stop: &StopFlag,
    ) -> Result<PuzzleStamp, PuzzleError> {
        for counter in 1..=max_iterations {
            if stop.should_stop() {
                return Err(PuzzleError::Cancelled);
            }
            if meets_leading_zero_bits(&stamp.digest_with_counter(counter), stamp.difficulty) {
                stamp.counter = counter;
                return Ok(stamp);
            }
        }
        Err(PuzzleError::PuzzleExhausted {
            iterations: max_iterations,
        })
    }

    /// Same search as [`Hashcash::solve`], spread over `threads` OS threads.
    ///
    /// Any winning counter inside the range may be returned, not necessarily the smallest.
    pub fn solve_parallel(
        &self,
        stamp: PuzzleStamp,
        max_iterations: u64,
        threads: usize,
    ) -> Result<PuzzleStamp, PuzzleError> {
        self.solve_parallel_until(
            stamp,
            max_iterations,
            threads,
            Arc::new(StopFlag::new()),
        )
    }

    /// [`Hashcash::solve_parallel`] that every worker abandons once `stop` is set.
    ///
    /// The workers also raise `stop` themselves when one of them wins, so pass
    /// a fresh flag per search.
    pub fn solve_parallel_until(
        &self,
        stamp: PuzzleStamp,
        max_iterations: u64,
        threads: usize,
        stop: Arc<StopFlag>,
    ) -> Result<PuzzleStamp, PuzzleError> {
        if threads == 0 {
            return Err(PuzzleError::InvalidConfig("threads must be >= 1".into()));
        }
        if threads == 1 {
            return self.solve_until(stamp, max_iterations, &stop);
        }

        let shared = Arc::new(stamp);
        let counters = Arc::new(CounterSource::new(1, max_iterations));
        let (tx, rx): (Sender<u64>, Receiver<u64>) = flume::bounded(threads);
        let mut joins = Vec::with_capacity(threads);

        for _ in 0..threads {
            let worker_stamp = shared.clone();
            let worker_counters = counters.clone();
            let worker_stop = stop.clone();
            let worker_tx = tx.clone();
            joins.push(thread::spawn(move || {
                worker_loop(&worker_stamp, &worker_counters, &worker_stop, worker_tx);
            }));
        }
        drop(tx);

        // Every worker drops its sender on exit, so `recv` fails only once all have quit.
        let found = rx.recv().ok();
        let stopped_early = stop.should_stop();
        stop.force_stop();
        join_handles(joins);

        match found {
            Some(counter) => {
                let mut solved = Arc::unwrap_or_clone(shared);
                solved.counter = counter;
                Ok(solved)
            }
            None if stopped_early => Err(PuzzleError::Cancelled),
            None => Err(PuzzleError::PuzzleExhausted {
                iterations: max_iterations,
            }),
        }
    }

    /// Check a submitted stamp against the expected binding and freshness.
    ///
    /// Evaluates exactly one digest. A zero counter is checked as counter 1.
    pub fn verify(
        &self,
        stamp: &PuzzleStamp,
        expected_origin: &str,
        expected_nonce_seed: &str,
        max_age: Duration,
    ) -> Result<(), VerifyError> {
        if stamp.version != STAMP_VERSION {
            return Err(VerifyError::UnsupportedVersion(stamp.version));
        }
        check_binding(stamp, expected_origin, expected_nonce_seed)?;
        self.check_work(stamp, max_age)
    }

    /// Verify a submitted stamp against the stamp this issuer minted for the connection.
    ///
    /// On top of [`Hashcash::verify`], the issue time and difficulty must be the
    /// ones the issuer retained.
    pub fn verify_issued(
        &self,
        submitted: &PuzzleStamp,
        issued: &PuzzleStamp,
        max_age: Duration,
    ) -> Result<(), VerifyError> {
        if submitted.version != issued.version {
            return Err(VerifyError::UnsupportedVersion(submitted.version));
        }
        check_binding(submitted, &issued.origin, &issued.nonce_seed)?;
        if submitted.issued_at != issued.issued_at {
            return Err(VerifyError::IssuedAtMismatch);
        }
        if submitted.difficulty < issued.difficulty {
            return Err(VerifyError::DifficultyNotMet);
        }
        self.check_work(submitted, max_age)
    }

    fn check_work(&self, stamp: &PuzzleStamp, max_age: Duration) -> Result<(), VerifyError> {
        let age = self.time.now_seconds().saturating_sub(stamp.issued_at);
        if age > max_age.as_secs() {
            return Err(VerifyError::StampExpired);
        }
        let counter = stamp.counter.max(1);
        if !meets_leading_zero_bits(&stamp.digest_with_counter(counter), stamp.difficulty) {
            return Err(VerifyError::DifficultyNotMet);
        }
        Ok(())
    }
}

fn check_binding(
    stamp: &PuzzleStamp,
    expected_origin: &str,
    expected_nonce_seed: &str,
) -> Result<(), VerifyError> {
    if stamp.origin != expected_origin {
        return Err(VerifyError::OriginMismatch);
    }
    if stamp.nonce_seed != expected_nonce_seed {
        return Err(VerifyError::NonceMismatch);
    }
    Ok(())
}

fn worker_loop(stamp: &PuzzleStamp, counters: &CounterSource, stop: &StopFlag, tx: Sender<u64>) {
    while !stop.should_stop() {
        let Some(counter) = counters.fetch() else {
            break;
        };
        if meets_leading_zero_bits(&stamp.digest_with_counter(counter), stamp.difficulty) {
            let _ = tx.send(counter);
            stop.force_stop();
            break;
        }
    }
}

fn join_handles(joins: Vec<thread::JoinHandle<()>>) {
    for handle in joins {
        let _ = handle.join();
    }
}

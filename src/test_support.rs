//! Shared test doubles.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rand::RngCore;

use crate::application::CancellationFlag;
use crate::domain::{CryptoContext, CryptoError, NoiseMetadata, PublicKey};
use crate::ports::{Clock, CorrectedStatistic, CryptoEngine, VariableBounds};

pub use crate::adapters::InMemoryComputationService as ScriptedService;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Engine double: random keys, scripted plaintexts, call counters.
///
/// Raw DP rows are read as `(mean, variance)` pairs, one per variable.
/// Confidence bounds are the estimate plus or minus the variable's noise
/// `scale` (mean) or `sensitivity` (variance).
pub struct RecordingEngine {
    calls: AtomicU32,
    created: AtomicU32,
    discarded: AtomicU32,
    numeric: AtomicU32,
    statistics: AtomicU32,
    fail_public_key: AtomicBool,
    fail_decryption: AtomicBool,
    numeric_rows: Mutex<Vec<Vec<f64>>>,
    statistics_json: Mutex<String>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            created: AtomicU32::new(0),
            discarded: AtomicU32::new(0),
            numeric: AtomicU32::new(0),
            statistics: AtomicU32::new(0),
            fail_public_key: AtomicBool::new(false),
            fail_decryption: AtomicBool::new(false),
            numeric_rows: Mutex::new(vec![vec![1.0, 2.0]]),
            statistics_json: Mutex::new(r#"[{"variable":"x","mean":1.0}]"#.to_string()),
        }
    }

    pub fn set_numeric_rows(&self, rows: Vec<Vec<f64>>) {
        *lock(&self.numeric_rows) = rows;
    }

    pub fn set_statistics_json(&self, json: &str) {
        *lock(&self.statistics_json) = json.to_string();
    }

    pub fn fail_public_key(&self) {
        self.fail_public_key.store(true, Ordering::SeqCst);
    }

    pub fn fail_decryption(&self) {
        self.fail_decryption.store(true, Ordering::SeqCst);
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts_created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn contexts_discarded(&self) -> u32 {
        self.discarded.load(Ordering::SeqCst)
    }

    pub fn numeric_decrypts(&self) -> u32 {
        self.numeric.load(Ordering::SeqCst)
    }

    pub fn statistics_decrypts(&self) -> u32 {
        self.statistics.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn check_decryption(&self) -> Result<(), CryptoError> {
        if self.fail_decryption.load(Ordering::SeqCst) {
            return Err(CryptoError::Decryption("ciphertext does not match key".into()));
        }
        Ok(())
    }
}

impl CryptoEngine for RecordingEngine {
    fn new_context(&self, scheme_params_b64: &str) -> Result<CryptoContext, CryptoError> {
        self.record();
        if scheme_params_b64.is_empty() {
            return Err(CryptoError::InvalidParameters("empty scheme parameters".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Ok(CryptoContext::from_bytes(secret))
    }

    fn public_key(&self, context: &CryptoContext) -> Result<PublicKey, CryptoError> {
        self.record();
        if self.fail_public_key.load(Ordering::SeqCst) {
            return Err(CryptoError::PublicKey("key derivation failed".into()));
        }
        let public = context.as_bytes().iter().rev().map(|b| b ^ 0xa5).collect();
        Ok(PublicKey::from_bytes(public))
    }

    fn decrypt_numeric_table(
        &self,
        _context: &CryptoContext,
        _ciphertext: &[u8],
    ) -> Result<Vec<Vec<f64>>, CryptoError> {
        self.record();
        self.numeric.fetch_add(1, Ordering::SeqCst);
        self.check_decryption()?;
        Ok(lock(&self.numeric_rows).clone())
    }

    fn decrypt_statistics(
        &self,
        _context: &CryptoContext,
        _ciphertext: &[u8],
    ) -> Result<String, CryptoError> {
        self.record();
        self.statistics.fetch_add(1, Ordering::SeqCst);
        self.check_decryption()?;
        Ok(lock(&self.statistics_json).clone())
    }

    fn correct_statistics(&self, raw_row: &[f64]) -> Result<Vec<CorrectedStatistic>, CryptoError> {
        self.record();
        if raw_row.len() % 2 != 0 {
            return Err(CryptoError::Statistics(format!(
                "expected (mean, variance) pairs, got {} values",
                raw_row.len()
            )));
        }
        Ok(raw_row
            .chunks_exact(2)
            .map(|pair| CorrectedStatistic {
                mean: pair[0],
                variance: pair[1],
            })
            .collect())
    }

    fn confidence_interval(
        &self,
        raw_row: &[f64],
        noise: &[NoiseMetadata],
    ) -> Result<Vec<VariableBounds>, CryptoError> {
        let corrected = self.correct_statistics(raw_row)?;
        if corrected.len() != noise.len() {
            return Err(CryptoError::Statistics(format!(
                "{} variables but noise for {}",
                corrected.len(),
                noise.len()
            )));
        }
        Ok(corrected
            .iter()
            .zip(noise)
            .map(|(c, n)| VariableBounds {
                mean: (c.mean - n.scale, c.mean + n.scale),
                variance: (c.variance - n.sensitivity, c.variance + n.sensitivity),
            })
            .collect())
    }

    fn discard_context(&self, _context: &CryptoContext) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ClockState {
    now: Duration,
    sleeps: Vec<Duration>,
    cancel_after: Option<(usize, CancellationFlag)>,
}

/// Clock whose time only moves when something sleeps on it.
#[derive(Default)]
pub struct ManualClock {
    state: Mutex<ClockState>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.state).sleeps.clone()
    }

    /// Set `flag` once `sleeps` sleeps have completed.
    pub fn cancel_after_sleeps(&self, sleeps: usize, flag: CancellationFlag) {
        lock(&self.state).cancel_after = Some((sleeps, flag));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        lock(&self.state).now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = lock(&self.state);
        state.now += duration;
        state.sleeps.push(duration);
        if let Some((after, flag)) = &state.cancel_after {
            if state.sleeps.len() >= *after {
                flag.cancel();
            }
        }
    }
}

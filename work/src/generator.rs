//! PoW generation (multi-threaded CPU).

use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use crate::validator::work_value_for_input;
use crate::{AuthorizationError, WorkNonce};

/// Searches the nonce space for a value meeting a difficulty target.
pub struct WorkGenerator;

/// Batch size per thread before checking whether another thread succeeded.
const BATCH_SIZE: u64 = 4096;

impl WorkGenerator {
    /// Find a nonce such that `work_value(input, nonce) >= min_difficulty`.
    ///
    /// The nonce space is striped across the rayon pool; the first thread
    /// to find a valid nonce signals the others to stop. Blocking: call it
    /// from `spawn_blocking` when on an async runtime.
    pub fn generate(&self, input: &[u8], min_difficulty: u64) -> Result<WorkNonce, AuthorizationError> {
        if min_difficulty == 0 {
            return Ok(WorkNonce(0));
        }

        let found = AtomicU64::new(u64::MAX);
        let num_threads = rayon::current_num_threads().max(1);

        (0..num_threads).into_par_iter().for_each(|thread_id| {
            let mut nonce = thread_id as u64;
            let stride = num_threads as u64;

            loop {
                if found.load(Ordering::Relaxed) != u64::MAX {
                    return;
                }

                let end = nonce.saturating_add(BATCH_SIZE * stride);
                if end == nonce {
                    return;
                }
                while nonce < end {
                    if work_value_for_input(input, nonce) >= min_difficulty {
                        found.store(nonce, Ordering::Relaxed);
                        return;
                    }
                    nonce = nonce.wrapping_add(stride);
                }
            }
        });

        match found.load(Ordering::Relaxed) {
            u64::MAX => Err(AuthorizationError::Cancelled),
            nonce => Ok(WorkNonce(nonce)),
        }
    }
}

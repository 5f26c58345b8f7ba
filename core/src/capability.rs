//! External capabilities — the intent producer and the narrator.
//!
//! Both are injected trait objects. Implementations talk to a language
//! model or anything else; the core only sees text in, text out.
//!
//! RULE: Every capability call goes through `call_with_policy`.
//! Each attempt runs on its own worker thread and is time-boxed. A timed
//! out attempt has its CancelToken set and counts as a failure. After
//! `max_attempts` failures the call is a `Capability` error.

use crate::{
    error::{InsightError, InsightResult},
    narration::{ConversationTurn, NarrationRequest},
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Turns a question into intent JSON (raw text; markdown fences allowed).
pub trait IntentProducer: Send + Sync {
    fn produce_intent(
        &self,
        question: &str,
        history: &[ConversationTurn],
        cancel: &CancelToken,
    ) -> anyhow::Result<String>;
}

/// Turns result payloads into a prose answer.
pub trait Narrator: Send + Sync {
    fn narrate(&self, request: &NarrationRequest, cancel: &CancelToken) -> anyhow::Result<String>;
}

/// Cooperative cancellation flag shared with a capability attempt.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicy {
    pub timeout_ms:   u64,
    pub max_attempts: u32,
    /// Delay before retry n is `backoff_ms * n`.
    pub backoff_ms:   u64,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self { timeout_ms: 30_000, max_attempts: 2, backoff_ms: 500 }
    }
}

/// Run `call` under `policy`. The closure receives a fresh CancelToken per
/// attempt and should give up early once it is cancelled.
pub fn call_with_policy<T, F>(name: &'static str, policy: &CallPolicy, call: F) -> InsightResult<T>
where
    T: Send + 'static,
    F: Fn(&CancelToken) -> anyhow::Result<T> + Send + Sync + 'static,
{
    let call = Arc::new(call);
    let attempts = policy.max_attempts.max(1);
    let timeout = Duration::from_millis(policy.timeout_ms);
    let mut reason = String::new();

    for attempt in 1..=attempts {
        let token = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let worker_call = Arc::clone(&call);
        let worker_token = token.clone();
        thread::spawn(move || {
            let _ = tx.send(worker_call(&worker_token));
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => reason = e.to_string(),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                token.cancel();
                reason = format!("timed out after {timeout:?}");
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                reason = "worker thread panicked".to_string();
            }
        }
        log::warn!("{name} attempt {attempt}/{attempts} failed: {reason}");

        if attempt < attempts && policy.backoff_ms > 0 {
            thread::sleep(Duration::from_millis(policy.backoff_ms * u64::from(attempt)));
        }
    }

    Err(InsightError::Capability { name, attempts, reason })
}

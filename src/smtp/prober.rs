//! Concurrent orchestration of SMTP credential probing
//!
//! The prober owns a pool of worker threads fed from a shared cursor over
//! the username and password cartesian product. Each worker runs one
//! connection task per credential on a fresh stream, delivers the outcome
//! and pulls the next pair until the cursor is exhausted or the stop flag
//! is raised. Successes accumulate in a guarded result vector; callbacks
//! report successes and per-attempt progress to the host.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{Builder, JoinHandle};

use derive_more::{Display, Error, From};

use crate::smtp::config::{ProbeParams, SmtpConfig};
use crate::smtp::connection::{AuthOutcome, ConnectionError, SmtpConnection};
use crate::smtp::stream::{StreamConnector, TcpConnector};

#[derive(Debug, Display, From, Error)]
pub enum ProberError {
    Io(std::io::Error),
    #[display(fmt = "prober lock poisoned")]
    PoisonedLock,
    #[display(fmt = "prober is already running")]
    AlreadyRunning,
}

type Result<T> = std::result::Result<T, ProberError>;

pub type SuccessCallback = Arc<dyn Fn(&AuthOutcome) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Terminal status of a probe run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Every credential pair was attempted
    Completed,
    /// The stop flag cut the run short
    StoppedEarly,
    /// The probe cannot make progress against this server
    Aborted { reason: String },
}

/// Everything a probe run produced
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub outcomes: Vec<AuthOutcome>,
    pub status: ProbeStatus,
}

/// Row-major cursor over the username and password product
struct CredentialCursor {
    user_idx: usize,
    pass_idx: usize,
}

/// State shared between the prober and its workers
struct ProbeShared {
    config: SmtpConfig,
    params: ProbeParams,
    connector: Arc<dyn StreamConnector>,

    cursor: Mutex<CredentialCursor>,
    results: Mutex<Vec<AuthOutcome>>,
    abort_reason: Mutex<Option<String>>,
    stop: AtomicBool,
    attempts: AtomicUsize,

    on_success: Mutex<Option<SuccessCallback>>,
    on_progress: Mutex<Option<ProgressCallback>>,
}

impl ProbeShared {
    /// Hand out the next credential pair, in row-major order
    ///
    /// Each pair is assigned to exactly one caller.
    fn next_credentials(&self) -> Option<(String, String)> {
        let mut cursor = match self.cursor.lock() {
            Ok(cursor) => cursor,
            Err(_) => return None,
        };

        if cursor.user_idx >= self.params.usernames.len() || self.params.passwords.is_empty() {
            return None;
        }

        let pair = (
            self.params.usernames[cursor.user_idx].clone(),
            self.params.passwords[cursor.pass_idx].clone(),
        );

        cursor.pass_idx += 1;
        if cursor.pass_idx >= self.params.passwords.len() {
            cursor.pass_idx = 0;
            cursor.user_idx += 1;
        }

        Some(pair)
    }

    fn deliver(&self, outcome: AuthOutcome) {
        if !outcome.success {
            return;
        }

        if let Ok(mut results) = self.results.lock() {
            results.push(outcome.clone());
        }

        // Callbacks run outside the lock guarding their slot
        let callback = self.on_success.lock().ok().and_then(|slot| slot.clone());
        if let Some(callback) = callback {
            callback(&outcome);
        }

        if self.params.stop_on_first_success {
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    fn abort(&self, reason: String) {
        if let Ok(mut slot) = self.abort_reason.lock() {
            slot.get_or_insert(reason);
        }

        self.stop.store(true, Ordering::SeqCst);
    }

    fn record_attempt(&self) {
        let completed = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;

        let callback = self.on_progress.lock().ok().and_then(|slot| slot.clone());
        if let Some(callback) = callback {
            callback(self.params.total_attempts(), completed);
        }
    }
}

/// Worker body: pull, probe, deliver, until exhaustion or stop
fn worker_loop(shared: Arc<ProbeShared>) {
    while !shared.stop.load(Ordering::SeqCst) {
        let (username, password) = match shared.next_credentials() {
            Some(pair) => pair,
            None => break,
        };

        let mut task = SmtpConnection::new(&shared.config, username, password);
        match task.run(shared.connector.as_ref()) {
            Ok(outcome) => shared.deliver(outcome),
            Err(ConnectionError::NoSharedMechanism) => {
                // Negotiation will fail identically for every credential
                shared.abort(ConnectionError::NoSharedMechanism.to_string());
            }
            Err(e) => {
                log::warn!(
                    "attempt against {}:{} failed: {}",
                    shared.config.host,
                    shared.config.port,
                    e
                );
            }
        }

        shared.record_attempt();
    }
}

/// Runs one probe: a worker pool over the credential product
///
/// The prober exclusively owns its workers and the result buffer; workers
/// only ever hold a cloned handle to the shared state. All worker resources
/// are reclaimed before `stop` or `wait` returns.
pub struct SmtpProber {
    shared: Arc<ProbeShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl SmtpProber {
    pub fn new(config: SmtpConfig, params: ProbeParams) -> SmtpProber {
        SmtpProber::with_connector(config, params, Arc::new(TcpConnector))
    }

    pub fn with_connector(
        config: SmtpConfig,
        params: ProbeParams,
        connector: Arc<dyn StreamConnector>,
    ) -> SmtpProber {
        SmtpProber {
            shared: Arc::new(ProbeShared {
                config,
                params,
                connector,
                cursor: Mutex::new(CredentialCursor {
                    user_idx: 0,
                    pass_idx: 0,
                }),
                results: Mutex::new(Vec::new()),
                abort_reason: Mutex::new(None),
                stop: AtomicBool::new(false),
                attempts: AtomicUsize::new(0),
                on_success: Mutex::new(None),
                on_progress: Mutex::new(None),
            }),
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Invoked once per successful authentication
    pub fn set_success_callback(&self, callback: SuccessCallback) {
        if let Ok(mut slot) = self.shared.on_success.lock() {
            *slot = Some(callback);
        }
    }

    /// Invoked after every attempt with `(total_planned, completed)`
    pub fn set_progress_callback(&self, callback: ProgressCallback) {
        if let Ok(mut slot) = self.shared.on_progress.lock() {
            *slot = Some(callback);
        }
    }

    /// Spawn the worker pool and return immediately
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ProberError::AlreadyRunning);
        }

        let parallelism = self.shared.params.parallelism.max(1);
        let mut workers = self.workers.lock().map_err(|_| ProberError::PoisonedLock)?;

        for worker_id in 0..parallelism {
            let shared = self.shared.clone();
            let handle = Builder::new()
                .name(format!("smtp-prober-worker-{}", worker_id))
                .spawn(move || worker_loop(shared))?;
            workers.push(handle);
        }

        log::info!(
            "probing {}:{} with {} workers over {} credential pairs",
            self.shared.config.host,
            self.shared.config.port,
            parallelism,
            self.shared.params.total_attempts()
        );

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Attempts completed so far
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    /// Copies of the successful outcomes gathered so far
    pub fn results(&self) -> Vec<AuthOutcome> {
        self.shared
            .results
            .lock()
            .map(|results| results.clone())
            .unwrap_or_default()
    }

    /// Raise the stop flag and wait for every worker to exit. Idempotent.
    ///
    /// Workers observe the flag before pulling their next credential;
    /// in-flight attempts complete normally.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.join_workers();
    }

    /// Wait for the run to finish and summarize it
    pub fn wait(&self) -> ProbeReport {
        self.join_workers();

        let aborted = match self.shared.abort_reason.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };

        let status = match aborted {
            Some(reason) => ProbeStatus::Aborted { reason },
            None if self.shared.stop.load(Ordering::SeqCst) => ProbeStatus::StoppedEarly,
            None => ProbeStatus::Completed,
        };

        ProbeReport {
            outcomes: self.results(),
            status,
        }
    }

    /// Run the whole probe and block until it finishes
    pub fn run(&self) -> Result<ProbeReport> {
        self.start()?;

        Ok(self.wait())
    }

    fn join_workers(&self) {
        let handles: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(_) => Vec::new(),
        };

        for handle in handles {
            let _ = handle.join();
        }

        self.running.store(false, Ordering::SeqCst);
    }
}

//! Upload orchestrator: the client-side state machine.
//!
//! ```text
//! PENDING --upload--> UPLOADING --pause--> PAUSED --resume--> UPLOADING
//!                        |  |                 |
//!                        |  +--> FAILED       +--reset--> PENDING
//!                        +-----> COMPLETE --reset--> PENDING
//! ```
//!
//! Every attempt starts from the server's view of the session (the
//! existence/resume check), never from client-held progress.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ferry_protocol::UploadStatus;
use ferry_transfer::{
    ArtifactIdentity, ChunkSpec, FingerprintWorker, ProgressTracker, plan_chunks,
};

use crate::error::UploadError;
use crate::retry::RetryPolicy;
use crate::transport::{ChunkUpload, UploadTransport};
use crate::types::{UploadConfig, UploadEvent, UploadOutcome, UploadProgress};

/// Mutable lifecycle state, guarded by a std mutex (never held across `.await`).
struct Session {
    status: UploadStatus,
    source: Option<PathBuf>,
    identity: Option<ArtifactIdentity>,
    /// Cancellation scope of the running attempt.
    attempt: Option<CancellationToken>,
}

/// Drives one file at a time through fingerprint, check, transfer and merge.
///
/// Methods take `&self`, so `pause()` can be called while `upload()` or
/// `resume()` is being awaited elsewhere.
pub struct UploadOrchestrator<T: UploadTransport + 'static> {
    transport: Arc<T>,
    config: UploadConfig,
    fingerprint: FingerprintWorker,
    tracker: Arc<ProgressTracker>,
    session: Mutex<Session>,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

/// Everything a chunk task needs, shared by all tasks of one attempt.
struct ChunkContext<T> {
    transport: Arc<T>,
    tracker: Arc<ProgressTracker>,
    events_tx: mpsc::Sender<UploadEvent>,
    retry: RetryPolicy,
    identity: ArtifactIdentity,
    source: PathBuf,
    /// Child of the attempt token; also cancelled when a chunk gives up.
    abort: CancellationToken,
}

impl<T: UploadTransport + 'static> UploadOrchestrator<T> {
    /// Creates an orchestrator. Must be called inside a tokio runtime.
    pub fn new(transport: T, config: UploadConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            transport: Arc::new(transport),
            config,
            fingerprint: FingerprintWorker::spawn(),
            tracker: Arc::new(ProgressTracker::new()),
            session: Mutex::new(Session {
                status: UploadStatus::Pending,
                source: None,
                identity: None,
                attempt: None,
            }),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn status(&self) -> UploadStatus {
        self.session.lock().unwrap().status
    }

    /// Identity of the current file, once fingerprinted.
    pub fn identity(&self) -> Option<ArtifactIdentity> {
        self.session.lock().unwrap().identity.clone()
    }

    /// Snapshot of per-chunk progress and overall throughput.
    pub fn progress(&self) -> UploadProgress {
        let (status, identity) = {
            let session = self.session.lock().unwrap();
            (
                session.status,
                session.identity.as_ref().map(|i| i.to_string()),
            )
        };
        let (bytes_done, bytes_total) = self.tracker.totals();
        UploadProgress {
            status,
            identity,
            chunks: self.tracker.snapshot(),
            bytes_done,
            bytes_total,
            bytes_per_second: self.tracker.bytes_per_second(),
            eta: self.tracker.eta(),
        }
    }

    /// Uploads `path` from scratch (PENDING → UPLOADING).
    pub async fn upload(&self, path: impl AsRef<Path>) -> Result<UploadOutcome, UploadError> {
        let path = path.as_ref().to_path_buf();
        let token = self.begin("upload", |s| s == UploadStatus::Pending, |session| {
            session.source = Some(path.clone());
            session.identity = None;
        })?;
        self.run_attempt(token).await
    }

    /// Continues a paused upload (PAUSED → UPLOADING).
    ///
    /// The identity computed by the first attempt is reused; resume
    /// cursors are re-read from the server.
    pub async fn resume(&self) -> Result<UploadOutcome, UploadError> {
        let token = self.begin("resume", |s| s == UploadStatus::Paused, |_| {})?;
        self.run_attempt(token).await
    }

    /// Cancels every in-flight chunk request (UPLOADING → PAUSED).
    ///
    /// Bytes already persisted on the server are kept.
    pub fn pause(&self) -> Result<(), UploadError> {
        {
            let mut session = self.session.lock().unwrap();
            if session.status != UploadStatus::Uploading {
                return Err(UploadError::InvalidState {
                    action: "pause",
                    status: session.status,
                });
            }
            if let Some(token) = session.attempt.take() {
                token.cancel();
            }
            session.status = UploadStatus::Paused;
        }
        info!("upload paused");
        self.emit(UploadEvent::StateChanged(UploadStatus::Paused));
        Ok(())
    }

    /// Forgets the current file (COMPLETE / FAILED / PAUSED → PENDING).
    pub fn reset(&self) -> Result<(), UploadError> {
        {
            let mut session = self.session.lock().unwrap();
            if session.status == UploadStatus::Uploading {
                return Err(UploadError::InvalidState {
                    action: "reset",
                    status: session.status,
                });
            }
            session.status = UploadStatus::Pending;
            session.source = None;
            session.identity = None;
            session.attempt = None;
        }
        self.tracker.clear();
        self.emit(UploadEvent::StateChanged(UploadStatus::Pending));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Attempt
    // -----------------------------------------------------------------------

    /// Validates a transition into UPLOADING and opens a new cancellation scope.
    fn begin(
        &self,
        action: &'static str,
        allowed: impl Fn(UploadStatus) -> bool,
        prepare: impl FnOnce(&mut Session),
    ) -> Result<CancellationToken, UploadError> {
        let token = CancellationToken::new();
        {
            let mut session = self.session.lock().unwrap();
            if !allowed(session.status) {
                return Err(UploadError::InvalidState {
                    action,
                    status: session.status,
                });
            }
            prepare(&mut session);
            session.status = UploadStatus::Uploading;
            session.attempt = Some(token.clone());
        }
        self.emit(UploadEvent::StateChanged(UploadStatus::Uploading));
        Ok(token)
    }

    async fn run_attempt(&self, token: CancellationToken) -> Result<UploadOutcome, UploadError> {
        match self.attempt(&token).await {
            Ok(outcome) => {
                self.finish(UploadStatus::Complete);
                Ok(outcome)
            }
            Err(_) if token.is_cancelled() => {
                debug!("attempt ended by pause");
                Ok(UploadOutcome::Paused)
            }
            Err(e) => {
                error!(error = %e, "upload failed");
                self.finish(UploadStatus::Failed);
                self.emit(UploadEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn finish(&self, status: UploadStatus) {
        {
            let mut session = self.session.lock().unwrap();
            // A pause that raced a failure wins; a finished merge does not.
            if session.status == UploadStatus::Paused && status == UploadStatus::Failed {
                return;
            }
            session.status = status;
            session.attempt = None;
        }
        self.emit(UploadEvent::StateChanged(status));
    }

    async fn attempt(&self, token: &CancellationToken) -> Result<UploadOutcome, UploadError> {
        let (source, known) = {
            let session = self.session.lock().unwrap();
            (session.source.clone(), session.identity.clone())
        };
        let source = source.ok_or(UploadError::InvalidState {
            action: "upload",
            status: UploadStatus::Pending,
        })?;

        let file_size = tokio::fs::metadata(&source).await?.len();
        if file_size == 0 {
            return Err(UploadError::EmptyFile(source));
        }

        let identity = match known {
            Some(identity) => identity,
            None => {
                let handle = self.fingerprint.handle();
                let identity = tokio::select! {
                    _ = token.cancelled() => return Err(UploadError::Cancelled),
                    res = handle.fingerprint(source.clone()) => res?,
                };
                self.session.lock().unwrap().identity = Some(identity.clone());
                self.emit(UploadEvent::Fingerprinted {
                    identity: identity.to_string(),
                    size: file_size,
                });
                identity
            }
        };

        let check = tokio::select! {
            _ = token.cancelled() => return Err(UploadError::Cancelled),
            res = self.transport.check(identity.as_str()) => res?,
        };
        if check.exist {
            info!(artifact = %identity, "artifact already on server, skipping transfer");
            self.emit(UploadEvent::Deduplicated {
                identity: identity.to_string(),
            });
            return Ok(UploadOutcome::Deduplicated);
        }

        let plan = plan_chunks(&identity, file_size, self.config.chunk_size)?;
        self.tracker.clear();

        let mut pending = Vec::new();
        for chunk in plan {
            let resumed = check.persisted(&chunk.name).min(chunk.len());
            let percent = self.tracker.register(&chunk.name, chunk.len(), resumed);
            self.emit(UploadEvent::ChunkProgress {
                chunk: chunk.name.clone(),
                percent,
            });
            if resumed < chunk.len() {
                pending.push((chunk, resumed));
            }
        }
        info!(
            artifact = %identity,
            size = file_size,
            chunks = self.tracker.snapshot().len(),
            remaining = pending.len(),
            "transferring chunks"
        );

        self.transfer_chunks(&identity, &source, pending, token).await?;

        // Not cancellable: the server finishes a merge it has started.
        self.transport
            .merge(identity.as_str(), self.config.chunk_size, file_size)
            .await?;
        info!(artifact = %identity, size = file_size, "upload complete");
        self.emit(UploadEvent::Completed {
            identity: identity.to_string(),
            size: file_size,
        });
        Ok(UploadOutcome::Uploaded { size: file_size })
    }

    /// Sends every pending chunk, at most `max_concurrency` at a time.
    ///
    /// Returns once all chunks are persisted, the attempt is cancelled, or
    /// a chunk has exhausted its retries.
    async fn transfer_chunks(
        &self,
        identity: &ArtifactIdentity,
        source: &Path,
        pending: Vec<(ChunkSpec, u64)>,
        token: &CancellationToken,
    ) -> Result<(), UploadError> {
        if pending.is_empty() {
            return Ok(());
        }

        let ctx = Arc::new(ChunkContext {
            transport: Arc::clone(&self.transport),
            tracker: Arc::clone(&self.tracker),
            events_tx: self.events_tx.clone(),
            retry: self.config.retry.clone(),
            identity: identity.clone(),
            source: source.to_path_buf(),
            abort: token.child_token(),
        });
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let mut tasks = JoinSet::new();
        for (chunk, resumed) in pending {
            let ctx = Arc::clone(&ctx);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = tokio::select! {
                    _ = ctx.abort.cancelled() => return Err(UploadError::Cancelled),
                    permit = permits.acquire_owned() => permit.map_err(|_| UploadError::Cancelled)?,
                };
                ctx.send_chunk(chunk, resumed).await
            });
        }

        let mut failed = 0usize;
        let mut last_error = None;
        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok(Ok(())) | Ok(Err(UploadError::Cancelled)) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            failed += 1;
            last_error = Some(err);
            // Stop the remaining chunks; their persisted bytes stay resumable.
            ctx.abort.cancel();
        }

        if token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        match last_error {
            Some(last_error) => Err(UploadError::ChunksFailed { failed, last_error }),
            None => Ok(()),
        }
    }

    fn emit(&self, event: UploadEvent) {
        emit(&self.events_tx, event);
    }
}

impl<T: UploadTransport + 'static> ChunkContext<T> {
    /// Sends one chunk, retrying with backoff.
    ///
    /// Before every retry the resume cursor is re-read from the server so
    /// bytes persisted by the failed try are not sent again.
    async fn send_chunk(&self, chunk: ChunkSpec, mut resumed: u64) -> Result<(), UploadError> {
        let name = chunk.name.clone();
        let progress = |sent: u64| {
            if let Some(percent) = self.tracker.record(&name, sent) {
                emit(
                    &self.events_tx,
                    UploadEvent::ChunkProgress {
                        chunk: name.clone(),
                        percent,
                    },
                );
            }
        };

        let mut attempt = 0u32;
        loop {
            debug!(chunk = %chunk.name, start = resumed, "sending chunk");
            let result = self
                .transport
                .upload_chunk(ChunkUpload {
                    artifact: self.identity.as_str(),
                    source: &self.source,
                    chunk: &chunk,
                    start: resumed,
                    progress: &progress,
                    cancel: &self.abort,
                })
                .await;

            let err = match result {
                Ok(()) => {
                    self.completed(&chunk);
                    return Ok(());
                }
                Err(e) if self.abort.is_cancelled() => {
                    debug!(chunk = %chunk.name, "chunk transfer cancelled");
                    return Err(if e.is_cancelled() { e } else { UploadError::Cancelled });
                }
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= self.retry.max_tries() {
                warn!(chunk = %chunk.name, tries = attempt, error = %err, "chunk failed, giving up");
                return Err(err);
            }

            warn!(chunk = %chunk.name, attempt, error = %err, "chunk failed, retrying");
            emit(
                &self.events_tx,
                UploadEvent::ChunkRetry {
                    chunk: chunk.name.clone(),
                    attempt,
                    error: err.to_string(),
                },
            );

            tokio::select! {
                _ = self.abort.cancelled() => return Err(UploadError::Cancelled),
                _ = tokio::time::sleep(self.retry.delay_for_attempt(attempt)) => {}
            }

            match self.transport.check(self.identity.as_str()).await {
                Ok(check) if check.exist => {
                    self.completed(&chunk);
                    return Ok(());
                }
                Ok(check) => {
                    resumed = check.persisted(&chunk.name).min(chunk.len());
                    if let Some(percent) = self.tracker.rebase(&chunk.name, resumed) {
                        emit(
                            &self.events_tx,
                            UploadEvent::ChunkProgress {
                                chunk: chunk.name.clone(),
                                percent,
                            },
                        );
                    }
                    if resumed == chunk.len() {
                        self.completed(&chunk);
                        return Ok(());
                    }
                }
                // Keep the old cursor; a stale one is rejected by the server
                // and counted against the budget.
                Err(e) => warn!(chunk = %chunk.name, error = %e, "cursor refresh failed"),
            }
        }
    }

    fn completed(&self, chunk: &ChunkSpec) {
        self.tracker.complete(&chunk.name);
        debug!(chunk = %chunk.name, "chunk persisted");
        emit(
            &self.events_tx,
            UploadEvent::ChunkProgress {
                chunk: chunk.name.clone(),
                percent: 100,
            },
        );
    }
}

/// Best-effort event delivery; a full or unread channel never blocks the upload.
fn emit(tx: &mpsc::Sender<UploadEvent>, event: UploadEvent) {
    if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
        debug!(?event, "event channel full, dropping event");
    }
}

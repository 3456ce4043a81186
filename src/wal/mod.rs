//! Append-only write-ahead log and snapshot (C11, spec §4.11): durable,
//! crash-recoverable progress state for the orchestrator. Grounded in the
//! teacher's single-purpose `registry/cache.rs` for the "degrade, never
//! panic" I/O discipline, generalised here to a real durability log since
//! the teacher has no WAL of its own.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{ReconError, Result};
use crate::types::{ApiFixture, CapturedAsset};

pub const WAL_FILE_NAME: &str = "state.wal";
pub const SNAPSHOT_FILE_NAME: &str = "state.json";
const CORRUPT_LINE_PREVIEW_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Scrape,
    Extract,
    Dependencies,
    Capture,
    Rebuild,
}

impl Phase {
    pub const ORDER: [Phase; 5] = [Phase::Scrape, Phase::Extract, Phase::Dependencies, Phase::Capture, Phase::Rebuild];

    fn key(self) -> &'static str {
        match self {
            Phase::Scrape => "scrape",
            Phase::Extract => "extract",
            Phase::Dependencies => "dependencies",
            Phase::Capture => "capture",
            Phase::Rebuild => "rebuild",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseState {
    pub status: Option<PhaseStatus>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error: Option<String>,
}

/// The compacted, whole-state serialisation folded from WAL events onto the
/// prior snapshot (spec §3 StateFile).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub last_seq: u64,
    pub last_updated_at: String,
    pub phases: HashMap<String, PhaseState>,
    pub pending_urls: HashSet<String>,
    pub in_progress_urls: HashSet<String>,
    pub completed_urls: HashSet<String>,
    pub visited_urls: HashSet<String>,
    pub fixtures: HashMap<String, ApiFixture>,
    pub assets: HashMap<String, CapturedAsset>,
    pub extracted_bundles: HashSet<String>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            last_seq: 0,
            last_updated_at: Utc::now().to_rfc3339(),
            phases: Phase::ORDER.iter().map(|p| (p.key().to_string(), PhaseState::default())).collect(),
            pending_urls: HashSet::new(),
            in_progress_urls: HashSet::new(),
            completed_urls: HashSet::new(),
            visited_urls: HashSet::new(),
            fixtures: HashMap::new(),
            assets: HashMap::new(),
            extracted_bundles: HashSet::new(),
        }
    }
}

impl StateFile {
    pub fn phase(&self, phase: Phase) -> PhaseState {
        self.phases.get(phase.key()).cloned().unwrap_or_default()
    }
}

/// The discriminated event union (spec §4.11). `seq` and `timestamp` are
/// carried on every variant via the outer envelope, not duplicated in each
/// payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WalEventPayload {
    #[serde(rename = "phase:start")]
    PhaseStart { phase: Phase },
    #[serde(rename = "phase:complete")]
    PhaseComplete { phase: Phase },
    #[serde(rename = "phase:fail")]
    PhaseFail { phase: Phase, error: String },
    #[serde(rename = "scrape:result")]
    ScrapeResult { pending_urls: Vec<String> },
    #[serde(rename = "extract:bundle")]
    ExtractBundle { bundle_name: String },
    #[serde(rename = "capture:page:started")]
    CapturePageStarted { url: String },
    #[serde(rename = "capture:page:completed")]
    CapturePageCompleted { url: String, fixtures: Vec<ApiFixture>, assets: Vec<CapturedAsset> },
    #[serde(rename = "capture:page:failed")]
    CapturePageFailed { url: String, error: String },
    #[serde(rename = "capture:urls:discovered")]
    CaptureUrlsDiscovered { urls: Vec<String> },
    #[serde(rename = "rebuild:result")]
    RebuildResult { success: bool, detail: Option<String> },
    #[serde(rename = "wal:compacted")]
    WalCompacted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEvent {
    pub seq: u64,
    pub timestamp: String,
    #[serde(flatten)]
    pub payload: WalEventPayload,
}

/// Result of reading a WAL file: the events parsed before any corruption,
/// plus corruption details if parsing stopped early (spec §4.11, §8
/// scenario 6).
#[derive(Debug, Clone, Default)]
pub struct WalReadResult {
    pub events: Vec<WalEvent>,
    pub corrupted: bool,
    pub corrupted_at_line: Option<usize>,
    pub corrupted_content: Option<String>,
}

/// Reads and parses every line of the WAL at `path`. A line that fails to
/// parse as JSON stops reading — events before it are still returned, with
/// `corrupted=true` and the offending line's number/truncated content.
pub async fn read_wal(path: &Path) -> Result<WalReadResult> {
    let mut result = WalReadResult::default();
    let file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(result),
        Err(e) => return Err(ReconError::IoError(e)),
    };

    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await.map_err(ReconError::IoError)? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WalEvent>(&line) {
            Ok(event) => result.events.push(event),
            Err(e) => {
                warn!("WAL corrupted at line {line_no}: {e}");
                result.corrupted = true;
                result.corrupted_at_line = Some(line_no);
                let preview: String = line.chars().take(CORRUPT_LINE_PREVIEW_LEN).collect();
                result.corrupted_content = Some(preview);
                break;
            }
        }
    }
    Ok(result)
}

async fn read_snapshot(path: &Path) -> Result<StateFile> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(ReconError::JsonError),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateFile::default()),
        Err(e) => Err(ReconError::IoError(e)),
    }
}

/// Folds one event onto `state`, in place. Idempotent per invariant I4:
/// events with `seq <= state.last_seq` are no-ops, and list mutations
/// dedup by natural key so replaying the same event twice never duplicates
/// state.
pub fn apply_event(state: &mut StateFile, event: &WalEvent) {
    if event.seq <= state.last_seq {
        return;
    }

    match &event.payload {
        WalEventPayload::PhaseStart { phase } => {
            let entry = state.phases.entry(phase.key().to_string()).or_default();
            entry.status = Some(PhaseStatus::InProgress);
            entry.started_at = Some(event.timestamp.clone());
        }
        WalEventPayload::PhaseComplete { phase } => {
            let entry = state.phases.entry(phase.key().to_string()).or_default();
            entry.status = Some(PhaseStatus::Completed);
            entry.completed_at = Some(event.timestamp.clone());
        }
        WalEventPayload::PhaseFail { phase, error } => {
            let entry = state.phases.entry(phase.key().to_string()).or_default();
            entry.status = Some(PhaseStatus::Failed);
            entry.error = Some(error.clone());
        }
        WalEventPayload::ScrapeResult { pending_urls } => {
            for url in pending_urls {
                state.pending_urls.insert(url.clone());
            }
        }
        WalEventPayload::ExtractBundle { bundle_name } => {
            state.extracted_bundles.insert(bundle_name.clone());
        }
        WalEventPayload::CapturePageStarted { url } => {
            state.pending_urls.remove(url);
            state.in_progress_urls.insert(url.clone());
            state.visited_urls.insert(url.clone());
        }
        WalEventPayload::CapturePageCompleted { url, fixtures, assets } => {
            state.in_progress_urls.remove(url);
            state.completed_urls.insert(url.clone());
            for fixture in fixtures {
                state.fixtures.insert(fixture.id.clone(), fixture.clone());
            }
            for asset in assets {
                state.assets.insert(asset.url.clone(), asset.clone());
            }
        }
        WalEventPayload::CapturePageFailed { url, .. } => {
            state.in_progress_urls.remove(url);
        }
        WalEventPayload::CaptureUrlsDiscovered { urls } => {
            for url in urls {
                if !state.visited_urls.contains(url) {
                    state.visited_urls.insert(url.clone());
                    state.pending_urls.insert(url.clone());
                }
            }
        }
        WalEventPayload::RebuildResult { .. } => {}
        WalEventPayload::WalCompacted => {}
    }

    state.last_seq = event.seq;
    state.last_updated_at = event.timestamp.clone();
}

/// Loads the current state: snapshot folded with every WAL event on top, in
/// `seq` order, stopping at the first corrupt line if any.
pub async fn load_current_state(dir: &Path) -> Result<(StateFile, WalReadResult)> {
    let snapshot = read_snapshot(&dir.join(SNAPSHOT_FILE_NAME)).await?;
    let wal = read_wal(&dir.join(WAL_FILE_NAME)).await?;

    let mut state = snapshot;
    for event in &wal.events {
        apply_event(&mut state, event);
    }
    Ok((state, wal))
}

/// Atomically replaces the snapshot with `state` and truncates the WAL,
/// appending a `wal:compacted` marker first so a crash mid-compaction is
/// still recoverable from the pre-compaction WAL tail.
pub async fn compact(dir: &Path, state: &StateFile) -> Result<()> {
    let wal_path = dir.join(WAL_FILE_NAME);
    let wal = read_wal(&wal_path).await?;
    if wal.corrupted {
        return Err(ReconError::Wal(format!(
            "refusing to compact: WAL corrupted at line {}",
            wal.corrupted_at_line.unwrap_or(0)
        )));
    }

    let snapshot_path = dir.join(SNAPSHOT_FILE_NAME);
    let tmp_path = snapshot_path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(state).map_err(ReconError::JsonError)?;
    fs::write(&tmp_path, &bytes).await?;
    fs::rename(&tmp_path, &snapshot_path).await?;

    fs::write(&wal_path, b"").await?;
    debug!("compacted WAL into snapshot at seq {}", state.last_seq);
    Ok(())
}

enum WalCommand {
    Append(WalEventPayload, oneshot::Sender<Result<u64>>),
}

/// Single-writer append queue (spec §4.11): every append is length-delimited
/// (one JSON object per line) and fsynced before the call returns. Cloning
/// a `Wal` shares the same writer task and underlying file handle.
#[derive(Clone)]
pub struct Wal {
    tx: mpsc::UnboundedSender<WalCommand>,
}

impl Wal {
    /// Opens (creating if needed) the WAL file under `dir` and spawns its
    /// single writer task, seeded with the `last_seq` already recovered
    /// from `load_current_state` so appended events continue the sequence.
    pub async fn open(dir: &Path, starting_seq: u64) -> Result<Self> {
        Self::open_with_cancellation(dir, starting_seq, None).await
    }

    /// Same as `open`, but ties the writer task to a root cancellation
    /// signal (spec §5.9: "the WAL queue, abort drains pending rejections").
    /// On cancel, the writer stops accepting new work and rejects every
    /// command still queued rather than leaving callers waiting forever.
    pub async fn open_with_cancellation(dir: &Path, starting_seq: u64, cancel: Option<CancellationToken>) -> Result<Self> {
        let path = dir.join(WAL_FILE_NAME);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path).await.map_err(ReconError::IoError)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<WalCommand>();
        let mut seq = starting_seq;
        let mut file = file;

        tokio::spawn(async move {
            loop {
                let command = match &cancel {
                    Some(cancel) => {
                        tokio::select! {
                            cmd = rx.recv() => cmd,
                            _ = cancel.cancelled() => {
                                debug!("WAL writer stopping: cancelled; draining {} pending command(s)", rx.len());
                                break;
                            }
                        }
                    }
                    None => rx.recv().await,
                };
                match command {
                    Some(WalCommand::Append(payload, reply)) => {
                        seq += 1;
                        let event = WalEvent { seq, timestamp: Utc::now().to_rfc3339(), payload };
                        let result = append_one(&mut file, &event).await;
                        let _ = reply.send(result.map(|_| seq));
                    }
                    None => break,
                }
            }
            // Reject whatever is still queued so callers waiting on `append`
            // fail fast instead of hanging once the writer has stopped.
            while let Ok(WalCommand::Append(_, reply)) = rx.try_recv() {
                let _ = reply.send(Err(ReconError::Wal("WAL writer cancelled".to_string())));
            }
        });

        Ok(Self { tx })
    }

    /// Enqueues one event for append; resolves once it's written and
    /// fsynced. Concurrent callers are serialised by the single writer task.
    pub async fn append(&self, payload: WalEventPayload) -> Result<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Append(payload, reply_tx))
            .map_err(|_| ReconError::Wal("WAL writer task has shut down".to_string()))?;
        reply_rx.await.map_err(|_| ReconError::Wal("WAL writer task dropped the reply channel".to_string()))?
    }
}

async fn append_one(file: &mut File, event: &WalEvent) -> Result<()> {
    let mut line = serde_json::to_vec(event).map_err(ReconError::JsonError)?;
    line.push(b'\n');
    file.write_all(&line).await.map_err(ReconError::IoError)?;
    file.flush().await.map_err(ReconError::IoError)?;
    file.sync_all().await.map_err(ReconError::IoError)?;
    Ok(())
}

/// Convenience for constructing the canonical state-directory paths.
pub fn state_dir_paths(output_root: &Path) -> (PathBuf, PathBuf) {
    (output_root.join(SNAPSHOT_FILE_NAME), output_root.join(WAL_FILE_NAME))
}

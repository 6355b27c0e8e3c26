//! Comparison engine: `check_pages`, `diff` and `clear_session`
//!
//! Transport layers hand raw uploads to [`ComparisonEngine::check_pages`]
//! and receive plain serializable DTOs back. All state between calls lives
//! in the [`SessionStore`].

use chrono::Utc;
use serde::Serialize;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::align::{self, AlignMode};
use crate::config::EngineConfig;
use crate::diff::{Deadline, DiffEngine, DiffJob};
use crate::error::{Error, Result};
use crate::extract::{FileGroup, GroupSide, PageExtractor, Upload, UploadIssue};
use crate::pdf::{PageRenderer, PdftoppmRenderer};
use crate::raster;
use crate::result::{self, ComparisonResult, DiffReport, Status};
use crate::session::{lock, Session, SessionData, SessionId, SessionStatus, SessionStore};

/// Normalized `check_pages` input
#[derive(Debug, Clone, Default)]
pub struct CheckPagesRequest {
    pub files_a: Vec<Upload>,
    pub files_b: Vec<Upload>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPagesResponse {
    pub session_id: SessionId,
    pub group_file_count_a: usize,
    pub group_file_count_b: usize,
    pub file_names_a: Vec<String>,
    pub file_names_b: Vec<String>,
    pub upload_issues: Vec<UploadIssue>,
    pub align_mode: AlignMode,
}

/// One result row with images delivered as PNG data URIs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    pub filename: String,
    pub status: Status,
    pub original_a: Option<String>,
    pub original_b: Option<String>,
    pub diff_image: Option<String>,
    pub difference_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffResponse {
    pub results: Vec<DiffEntry>,
}

impl DiffResponse {
    pub fn from_report(report: &DiffReport) -> Result<Self> {
        let encode = |img: &Option<Arc<image::RgbImage>>| -> Result<Option<String>> {
            img.as_deref().map(raster::to_data_uri).transpose()
        };

        let results = report
            .results
            .iter()
            .map(|r: &ComparisonResult| {
                Ok(DiffEntry {
                    filename: r.filename.clone(),
                    status: r.status,
                    original_a: encode(&r.original_a)?,
                    original_b: encode(&r.original_b)?,
                    diff_image: encode(&r.diff_image)?,
                    difference_percentage: r.difference_percentage,
                    error: r.error.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DiffResponse { results })
    }
}

/// Format a percentage with the fixed 4-decimal display precision
pub fn format_percentage(value: f64) -> String {
    format!("{:.4}", value)
}

pub struct ComparisonEngine {
    config: EngineConfig,
    renderer: Arc<dyn PageRenderer>,
    differ: DiffEngine,
    store: Arc<SessionStore>,
}

impl ComparisonEngine {
    /// Engine rendering PDFs with `pdftoppm`
    pub fn new(config: EngineConfig) -> Result<Self> {
        let renderer = Arc::new(PdftoppmRenderer::new(config.pdftoppm_path.clone()));
        Self::with_renderer(config, renderer)
    }

    pub fn with_renderer(config: EngineConfig, renderer: Arc<dyn PageRenderer>) -> Result<Self> {
        let differ = DiffEngine::new(config.tolerance, config.worker_threads)?;
        let store = Arc::new(SessionStore::new(config.max_total_bytes, config.session_ttl()));
        info!(
            tolerance = config.tolerance,
            dpi = config.dpi,
            workers = differ.worker_count(),
            "Comparison engine ready"
        );
        Ok(Self {
            config,
            renderer,
            differ,
            store,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Ingest both groups, extract and align pages, and open a session.
    ///
    /// Validation and storage failures leave nothing behind. Every call
    /// issues a fresh session id.
    pub fn check_pages(&self, request: CheckPagesRequest) -> Result<CheckPagesResponse> {
        let started = Instant::now();
        let (sources_a, mut issues) = FileGroup::from_uploads(GroupSide::A, request.files_a, &self.config)?;
        let (sources_b, issues_b) = FileGroup::from_uploads(GroupSide::B, request.files_b, &self.config)?;
        issues.extend(issues_b);

        let mut reservation = self
            .store
            .reserve(sources_a.payload_bytes() + sources_b.payload_bytes())?;

        let extractor = PageExtractor::new(
            self.renderer.as_ref(),
            self.config.dpi,
            self.config.max_pages_per_document,
        );
        let group_a = extractor.extract(&sources_a);
        let group_b = extractor.extract(&sources_b);
        reservation.grow(group_a.raster_bytes() + group_b.raster_bytes())?;

        let alignment = align::align(&group_a, &group_b);
        issues.extend(group_a.issues.iter().cloned());
        issues.extend(group_b.issues.iter().cloned());
        issues.extend(align::mismatch_issues(&alignment, &group_a, &group_b));

        let response_parts = (
            group_a.unit_count(),
            group_b.unit_count(),
            group_a.file_names.clone(),
            group_b.file_names.clone(),
            alignment.mode,
        );

        let mut session = Session::new(SessionData {
            sources_a,
            sources_b,
            group_a,
            group_b,
            alignment,
            report: None,
        });
        session.mark_checked();
        let session_id = self.store.insert(session, reservation);

        let (group_file_count_a, group_file_count_b, file_names_a, file_names_b, align_mode) = response_parts;
        info!(
            session = %session_id,
            pages_a = group_file_count_a,
            pages_b = group_file_count_b,
            issues = issues.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pages checked"
        );

        Ok(CheckPagesResponse {
            session_id,
            group_file_count_a,
            group_file_count_b,
            file_names_a,
            file_names_b,
            upload_issues: issues,
            align_mode,
        })
    }

    /// Compute (or recompute) the comparison for a session.
    ///
    /// The session lock is held throughout. The report is committed only on
    /// success, so a timeout leaves the session exactly as it was.
    pub fn diff(&self, id: &str) -> Result<DiffReport> {
        let id = SessionId::from(id);
        let entry = self
            .store
            .get(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        let mut session = lock(&entry);

        match session.status() {
            SessionStatus::PagesChecked | SessionStatus::Diffed => {}
            _ => return Err(Error::SessionNotFound(id.to_string())),
        }
        session.touch();

        let started = Instant::now();
        let deadline = Deadline::after(self.config.diff_timeout());

        let results = {
            let data = session
                .data()
                .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

            let jobs: Vec<DiffJob<'_>> = data
                .alignment
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.is_matched())
                .filter_map(|(index, e)| match (e.a, e.b) {
                    (Some(a), Some(b)) => Some(DiffJob {
                        index,
                        a: &data.group_a.pages[a].raster,
                        b: &data.group_b.pages[b].raster,
                    }),
                    _ => None,
                })
                .collect();

            info!(session = %id, pairs = jobs.len(), "Starting diff");
            let diffs = self.differ.run(&jobs, deadline).map_err(|e| {
                warn!(session = %id, error = %e, "Diff aborted");
                e
            })?;
            result::assemble(&data.alignment, &data.group_a, &data.group_b, diffs)
        };

        let report = DiffReport {
            results,
            computed_at: Utc::now(),
            elapsed: started.elapsed(),
        };
        self.store.commit_report(&mut session, report.clone()).map_err(|e| {
            warn!(session = %id, error = %e, "Diff result not stored");
            e
        })?;

        info!(
            session = %id,
            changed = report.count(Status::Changed),
            unchanged = report.count(Status::Unchanged),
            added = report.count(Status::AddedInB),
            removed = report.count(Status::RemovedFromA),
            errors = report.count(Status::Error),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Diff complete"
        );
        Ok(report)
    }

    /// [`diff`](Self::diff) encoded for the wire
    pub fn diff_response(&self, id: &str) -> Result<DiffResponse> {
        let report = self.diff(id)?;
        DiffResponse::from_report(&report)
    }

    /// Tear down a session. Unknown ids succeed.
    pub fn clear_session(&self, id: &str) -> Result<()> {
        let id = SessionId::from(id);
        if !self.store.remove(&id) {
            debug!(session = %id, "Clear requested for unknown session");
        }
        Ok(())
    }

    pub fn session_status(&self, id: &str) -> Result<SessionStatus> {
        self.store.with_session(&SessionId::from(id), |s| Ok(s.status()))
    }

    /// Run one TTL sweep now
    pub fn sweep_expired(&self) -> usize {
        self.store.sweep_expired(Instant::now())
    }

    /// Start the background TTL sweeper
    pub fn spawn_sweeper(&self) -> Result<SweeperHandle> {
        let store = Arc::clone(&self.store);
        let interval = self.config.sweep_interval();
        let (stop, stop_rx) = mpsc::channel::<()>();

        let join = std::thread::Builder::new()
            .name("pagediff-sweeper".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let evicted = store.sweep_expired(Instant::now());
                        if evicted > 0 {
                            debug!(evicted, "Sweep finished");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(SweeperHandle {
            stop: Some(stop),
            join: Some(join),
        })
    }
}

/// Stops the sweeper thread when dropped
pub struct SweeperHandle {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Session storage
//!
//! The id → session map is the only shared mutable structure. Each session
//! sits behind its own mutex, held for the whole of any operation on it, so
//! a clear or a sweep can never free data an in-flight diff is reading.
//! The map itself is sharded (`DashMap`); its locks are only taken for
//! insert, remove and lookup, never while a session lock is awaited.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::align::Alignment;
use crate::error::{Error, Result};
use crate::extract::{ExtractedGroup, FileGroup};
use crate::result::DiffReport;

/// Opaque, unguessable session token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    /// Only exists while `check_pages` is building the session
    Collecting,
    PagesChecked,
    Diffed,
    Cleared,
}

/// Everything a session owns; dropped as a unit on teardown
#[derive(Debug)]
pub struct SessionData {
    pub sources_a: FileGroup,
    pub sources_b: FileGroup,
    pub group_a: ExtractedGroup,
    pub group_b: ExtractedGroup,
    pub alignment: Alignment,
    pub report: Option<DiffReport>,
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    last_touch: Instant,
    status: SessionStatus,
    data: Option<SessionData>,
    /// Budget held by this session, overlays included
    reserved_bytes: u64,
    /// Part of `reserved_bytes` charged for the current report's overlays
    report_bytes: u64,
}

impl Session {
    pub fn new(data: SessionData) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            created_at: now,
            last_access: now,
            last_touch: Instant::now(),
            status: SessionStatus::Collecting,
            data: Some(data),
            reserved_bytes: 0,
            report_bytes: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.reserved_bytes
    }

    pub fn data(&self) -> Option<&SessionData> {
        self.data.as_ref()
    }

    pub fn touch(&mut self) {
        self.last_access = Utc::now();
        self.last_touch = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_touch)
    }

    /// Collecting → PagesChecked
    pub fn mark_checked(&mut self) {
        if self.status == SessionStatus::Collecting {
            self.status = SessionStatus::PagesChecked;
        }
    }

    /// Store a completed report; PagesChecked/Diffed → Diffed
    pub fn commit_report(&mut self, report: DiffReport) -> Result<()> {
        match (self.status, self.data.as_mut()) {
            (SessionStatus::PagesChecked | SessionStatus::Diffed, Some(data)) => {
                data.report = Some(report);
                self.status = SessionStatus::Diffed;
                Ok(())
            }
            _ => Err(Error::SessionNotFound(self.id.to_string())),
        }
    }

    /// Release all owned payloads and rasters
    fn clear(&mut self) {
        self.data = None;
        self.status = SessionStatus::Cleared;
    }
}

/// Lock a session, recovering the guard if a previous holder panicked.
///
/// Sessions only change state through whole-value commits, so a poisoned
/// guard still holds a consistent session.
pub fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Byte reservation against the store budget, returned on drop unless it
/// is handed to a session
pub struct Reservation<'a> {
    store: &'a SessionStore,
    bytes: u64,
}

impl Reservation<'_> {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn grow(&mut self, more: u64) -> Result<()> {
        self.store.try_reserve(more)?;
        self.bytes += more;
        Ok(())
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.store.release(self.bytes);
        }
    }
}

pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
    used_bytes: AtomicU64,
    max_total_bytes: u64,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(max_total_bytes: u64, ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            used_bytes: AtomicU64::new(0),
            max_total_bytes,
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Acquire)
    }

    fn try_reserve(&self, bytes: u64) -> Result<()> {
        let max = self.max_total_bytes;
        self.used_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= max)
            })
            .map(|_| ())
            .map_err(|used| Error::StorageExhausted {
                requested: bytes,
                available: max.saturating_sub(used),
            })
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    pub fn reserve(&self, bytes: u64) -> Result<Reservation<'_>> {
        self.try_reserve(bytes)?;
        Ok(Reservation { store: self, bytes })
    }

    /// Insert a fully built session, taking over its reservation
    pub fn insert(&self, mut session: Session, mut reservation: Reservation<'_>) -> SessionId {
        session.reserved_bytes = reservation.bytes;
        reservation.bytes = 0;

        let id = session.id.clone();
        self.sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        debug!(session = %id, "Session stored");
        id
    }

    /// Shared handle to a live session. The map guard is dropped before
    /// returning so callers may block on the session lock.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Run `f` with exclusive access to a live session
    pub fn with_session<T>(&self, id: &SessionId, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let entry = self
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        let mut session = lock(&entry);
        if session.status == SessionStatus::Cleared {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        session.touch();
        f(&mut session)
    }

    /// Store a diff report on a locked session, charging its overlays to
    /// the budget in place of the previous report's.
    ///
    /// On failure (including [`Error::StorageExhausted`]) the session keeps
    /// its previous report, status and reservation.
    pub fn commit_report(&self, session: &mut Session, report: DiffReport) -> Result<()> {
        let old = session.report_bytes;
        let new = report.overlay_bytes();
        if new > old {
            self.try_reserve(new - old)?;
        }
        if let Err(e) = session.commit_report(report) {
            if new > old {
                self.release(new - old);
            }
            return Err(e);
        }
        if old > new {
            self.release(old - new);
        }
        session.reserved_bytes = session.reserved_bytes - old + new;
        session.report_bytes = new;
        Ok(())
    }

    fn teardown(&self, session: &mut Session) {
        self.release(session.reserved_bytes);
        session.reserved_bytes = 0;
        session.report_bytes = 0;
        session.clear();
    }

    /// Remove and clear a session, waiting for any in-flight operation.
    ///
    /// Returns false for unknown ids.
    pub fn remove(&self, id: &SessionId) -> bool {
        match self.sessions.remove(id) {
            Some((_, entry)) => {
                let mut session = lock(&entry);
                self.teardown(&mut session);
                info!(session = %id, "Session cleared");
                true
            }
            None => false,
        }
    }

    /// Evict sessions idle longer than the TTL. Sessions currently locked
    /// by an operation are in use and are skipped.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let candidates: Vec<(SessionId, Arc<Mutex<Session>>)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut evicted = 0;
        for (id, entry) in candidates {
            let mut session = match entry.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => continue,
            };
            if session.idle_for(now) <= self.ttl {
                continue;
            }
            if self
                .sessions
                .remove_if(&id, |_, current| Arc::ptr_eq(current, &entry))
                .is_some()
            {
                self.teardown(&mut session);
                evicted += 1;
                info!(session = %id, "Session expired");
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::AlignMode;
    use crate::config::EngineConfig;
    use crate::extract::{GroupKind, GroupSide, Upload};
    use crate::result::{ComparisonResult, Status};
    use image::RgbImage;

    fn data() -> SessionData {
        let (sources, _) = FileGroup::from_uploads(
            GroupSide::A,
            vec![Upload::new("a.png", vec![1, 2, 3])],
            &EngineConfig::default(),
        )
        .expect("group");
        let empty = |side| ExtractedGroup {
            side,
            kind: GroupKind::SingleMultiPage,
            pages: Vec::new(),
            failures: Vec::new(),
            file_names: Vec::new(),
            issues: Vec::new(),
        };
        SessionData {
            sources_a: sources.clone(),
            sources_b: sources,
            group_a: empty(GroupSide::A),
            group_b: empty(GroupSide::B),
            alignment: Alignment {
                mode: AlignMode::Positional,
                entries: Vec::new(),
            },
            report: None,
        }
    }

    fn stored(store: &SessionStore, bytes: u64) -> SessionId {
        let reservation = store.reserve(bytes).expect("reserve");
        let mut session = Session::new(data());
        session.mark_checked();
        store.insert(session, reservation)
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_reservation_released_on_drop() {
        let store = SessionStore::new(100, Duration::from_secs(60));
        {
            let mut r = store.reserve(40).expect("reserve");
            r.grow(20).expect("grow");
            assert_eq!(store.used_bytes(), 60);
        }
        assert_eq!(store.used_bytes(), 0);
    }

    #[test]
    fn test_budget_exhaustion() {
        let store = SessionStore::new(100, Duration::from_secs(60));
        let _id = stored(&store, 80);
        let err = store.reserve(30).err().expect("should fail");
        assert!(matches!(err, Error::StorageExhausted { requested: 30, available: 20 }));
        assert_eq!(store.used_bytes(), 80);
    }

    #[test]
    fn test_remove_releases_bytes_and_is_idempotent() {
        let store = SessionStore::new(100, Duration::from_secs(60));
        let id = stored(&store, 50);
        let handle = store.get(&id).expect("session");

        assert!(store.remove(&id));
        assert!(!store.remove(&id));
        assert_eq!(store.used_bytes(), 0);
        assert!(store.is_empty());

        let session = lock(&handle);
        assert_eq!(session.status(), SessionStatus::Cleared);
        assert!(session.data().is_none());
    }

    #[test]
    fn test_with_session_unknown_id() {
        let store = SessionStore::new(100, Duration::from_secs(60));
        let result = store.with_session(&SessionId::from("missing"), |_| Ok(()));
        assert!(matches!(result, Err(Error::SessionNotFound(_))));
    }

    #[test]
    fn test_commit_report_moves_to_diffed() {
        let store = SessionStore::new(100, Duration::from_secs(60));
        let id = stored(&store, 1);
        let status = store
            .with_session(&id, |s| {
                s.commit_report(DiffReport {
                    results: Vec::new(),
                    computed_at: Utc::now(),
                    elapsed: Duration::ZERO,
                })?;
                Ok(s.status())
            })
            .expect("commit");
        assert_eq!(status, SessionStatus::Diffed);
    }

    /// Report with one changed row whose overlay is `width` x 1 pixels
    fn report_with_overlay(width: u32) -> DiffReport {
        DiffReport {
            results: vec![ComparisonResult {
                filename: "a.png".to_string(),
                status: Status::Changed,
                difference_percentage: Some(100.0),
                diff_image: Some(Arc::new(RgbImage::new(width, 1))),
                original_a: None,
                original_b: None,
                error: None,
            }],
            computed_at: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_report_overlays_are_charged_to_budget() {
        let store = SessionStore::new(100, Duration::from_secs(60));
        let id = stored(&store, 50);
        let entry = store.get(&id).expect("session");
        let mut session = lock(&entry);

        store.commit_report(&mut session, report_with_overlay(10)).expect("fits");
        assert_eq!(store.used_bytes(), 80);
        assert_eq!(session.reserved_bytes(), 80);

        // A smaller replacement hands back the difference
        store.commit_report(&mut session, report_with_overlay(4)).expect("smaller");
        assert_eq!(store.used_bytes(), 62);

        let err = store
            .commit_report(&mut session, report_with_overlay(20))
            .err()
            .expect("over budget");
        assert!(matches!(err, Error::StorageExhausted { requested: 48, available: 38 }));
        assert_eq!(store.used_bytes(), 62);
        assert_eq!(session.status(), SessionStatus::Diffed);
        let kept = session.data().and_then(|d| d.report.as_ref()).map(DiffReport::overlay_bytes);
        assert_eq!(kept, Some(12));
        drop(session);

        assert!(store.remove(&id));
        assert_eq!(store.used_bytes(), 0);
    }

    #[test]
    fn test_sweep_evicts_idle_and_skips_busy() {
        let store = SessionStore::new(1000, Duration::from_secs(10));
        let idle = stored(&store, 10);
        let busy = stored(&store, 10);
        let later = Instant::now() + Duration::from_secs(30);

        let busy_handle = store.get(&busy).expect("busy");
        let guard = lock(&busy_handle);
        assert_eq!(store.sweep_expired(later), 1);
        drop(guard);

        assert!(store.get(&idle).is_none());
        assert!(store.get(&busy).is_some());
        assert_eq!(store.used_bytes(), 10);

        assert_eq!(store.sweep_expired(later), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_keeps_fresh_sessions() {
        let store = SessionStore::new(1000, Duration::from_secs(10));
        let id = stored(&store, 10);
        assert_eq!(store.sweep_expired(Instant::now()), 0);
        assert!(store.get(&id).is_some());
    }

    #[test]
    fn test_remove_waits_for_in_flight_operation() {
        let store = Arc::new(SessionStore::new(1000, Duration::from_secs(60)));
        let id = stored(&store, 10);
        let handle = store.get(&id).expect("session");
        let guard = lock(&handle);

        let remover = {
            let store = Arc::clone(&store);
            let id = id.clone();
            std::thread::spawn(move || store.remove(&id))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(guard.data().is_some());
        drop(guard);

        assert!(remover.join().expect("join"));
        assert_eq!(lock(&handle).status(), SessionStatus::Cleared);
    }
}

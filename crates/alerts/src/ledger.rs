//! Durable ledger of trade ids that have already been processed.

use crate::snapshot::{self, SnapshotError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// How long a seen trade id is remembered.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Ledger shared between the poll loop and the command handler.
pub type SharedLedger = Arc<Mutex<DedupLedger>>;

/// On-disk layout: the id list plus an id -> epoch seconds map.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerSnapshot {
    #[serde(default)]
    trades: Vec<String>,
    #[serde(default)]
    timestamps: BTreeMap<String, f64>,
}

/// Summary of ledger contents.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerStats {
    pub total: usize,
    pub oldest: Option<f64>,
    pub newest: Option<f64>,
}

/// Set of seen trade ids, each with the time it was last marked.
#[derive(Debug)]
pub struct DedupLedger {
    path: PathBuf,
    seen: HashMap<String, f64>,
}

impl DedupLedger {
    /// Load the ledger from `path` and drop entries older than `retention`.
    ///
    /// A missing or unreadable snapshot is not fatal: the ledger starts empty.
    pub fn open(path: impl Into<PathBuf>, retention: Duration, now: f64) -> Self {
        let path = path.into();
        let seen = match snapshot::load::<LedgerSnapshot>(&path) {
            Ok(Some(snapshot)) => Self::from_snapshot(snapshot, now),
            Ok(None) => {
                info!(path = %path.display(), "No trade ledger found, starting empty");
                HashMap::new()
            }
            Err(e) => {
                warn!(error = %e, "Could not load trade ledger, starting empty");
                HashMap::new()
            }
        };

        let mut ledger = Self { path, seen };
        let evicted = ledger.evict_older_than(now, retention);
        info!(
            entries = ledger.len(),
            evicted = evicted,
            "Trade ledger loaded"
        );
        ledger
    }

    fn from_snapshot(snapshot: LedgerSnapshot, now: f64) -> HashMap<String, f64> {
        let mut seen: HashMap<String, f64> = snapshot
            .timestamps
            .into_iter()
            .filter(|(_, ts)| ts.is_finite())
            .collect();
        // Ids persisted without a timestamp are adopted as seen now.
        for id in snapshot.trades {
            seen.entry(id).or_insert(now);
        }
        seen
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the id has not been seen.
    pub fn is_new(&self, id: &str) -> bool {
        !self.seen.contains_key(id)
    }

    /// Record `id` as seen at `now` and persist the ledger.
    ///
    /// Re-marking an id refreshes its timestamp. The in-memory entry is kept
    /// even when persisting fails.
    pub fn mark_seen(&mut self, id: &str, now: f64) -> Result<(), SnapshotError> {
        self.seen.insert(id.to_string(), now);
        self.save()
    }

    /// Remove entries last seen more than `retention` before `now`.
    pub fn evict_older_than(&mut self, now: f64, retention: Duration) -> usize {
        let cutoff = now - retention.as_secs_f64();
        let before = self.seen.len();
        self.seen.retain(|_, ts| *ts >= cutoff);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            total: self.seen.len(),
            oldest: self.seen.values().copied().reduce(f64::min),
            newest: self.seen.values().copied().reduce(f64::max),
        }
    }

    fn save(&self) -> Result<(), SnapshotError> {
        let timestamps: BTreeMap<String, f64> =
            self.seen.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let snapshot = LedgerSnapshot {
            trades: timestamps.keys().cloned().collect(),
            timestamps,
        };
        snapshot::save(&self.path, &snapshot)
    }
}

/// Current wall-clock time in epoch seconds.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

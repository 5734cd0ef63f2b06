//! Series buffers keyed by widget-instance id

use std::collections::HashMap;
use std::sync::Arc;

use super::buffer::{Sample, SeriesBuffer, Trend};
use super::error::HistoryResult;
use super::history::{decode_samples, encode_samples, history_key, HistoryStore};

/// Owns every series buffer, and optionally their durable snapshots
pub struct SeriesStore {
    default_capacity: usize,
    buffers: HashMap<String, SeriesBuffer>,
    history: Option<Arc<dyn HistoryStore>>,
}

impl SeriesStore {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            default_capacity: default_capacity.max(1),
            buffers: HashMap::new(),
            history: None,
        }
    }

    /// Restore buffers from, and snapshot them to, `history`
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn has_history(&self) -> bool {
        self.history.is_some()
    }

    /// Get or lazily create a buffer. A newly created buffer is warmed from
    /// history when a snapshot exists; an existing buffer keeps its capacity.
    pub fn ensure(&mut self, series_id: &str, capacity: Option<usize>) -> &mut SeriesBuffer {
        let capacity = capacity.unwrap_or(self.default_capacity);
        let history = self.history.clone();

        self.buffers
            .entry(series_id.to_string())
            .or_insert_with(|| restore(history.as_deref(), series_id, capacity))
    }

    /// Append a sample, creating the buffer with the default capacity
    pub fn push(&mut self, series_id: &str, sample: Sample) {
        self.ensure(series_id, None).push(sample);
    }

    /// Samples for a series, oldest first. Unknown ids read as empty.
    pub fn read(&self, series_id: &str) -> Vec<Sample> {
        self.buffers
            .get(series_id)
            .map(SeriesBuffer::samples)
            .unwrap_or_default()
    }

    pub fn get(&self, series_id: &str) -> Option<&SeriesBuffer> {
        self.buffers.get(series_id)
    }

    pub fn latest(&self, series_id: &str) -> Option<Sample> {
        self.buffers.get(series_id).and_then(SeriesBuffer::latest)
    }

    pub fn trend(&self, series_id: &str) -> Option<Trend> {
        self.buffers.get(series_id).and_then(SeriesBuffer::trend)
    }

    /// Drop a series' samples. The empty state is persisted on next flush.
    pub fn clear(&mut self, series_id: &str) {
        if let Some(buffer) = self.buffers.get_mut(series_id) {
            buffer.clear();
        }
    }

    /// Forget a series in memory. Its snapshot, if any, is left in place.
    pub fn remove(&mut self, series_id: &str) -> Option<SeriesBuffer> {
        self.buffers.remove(series_id)
    }

    /// Series ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.buffers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot every dirty buffer. Returns how many were written.
    /// Blocks on the history store; async callers should use
    /// [`take_snapshots`](Self::take_snapshots) and write elsewhere.
    pub fn flush(&mut self) -> HistoryResult<usize> {
        let Some(history) = self.history.clone() else {
            return Ok(0);
        };
        let snapshots = self.take_snapshots()?;
        match write_snapshots(history.as_ref(), &snapshots) {
            Ok(written) => Ok(written),
            Err(e) => {
                self.mark_dirty(&snapshots);
                Err(e)
            }
        }
    }

    /// Encode every dirty buffer and mark it clean. Returns nothing when
    /// there is no history store.
    pub fn take_snapshots(&mut self) -> HistoryResult<Vec<Snapshot>> {
        if self.history.is_none() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for (series_id, buffer) in self.buffers.iter_mut() {
            if !buffer.is_dirty() {
                continue;
            }
            snapshots.push(Snapshot {
                series_id: series_id.clone(),
                encoded: encode_samples(&buffer.samples())?,
            });
            buffer.mark_clean();
        }
        Ok(snapshots)
    }

    /// Flag the snapshotted series for the next flush again, after a
    /// failed write
    pub fn mark_dirty(&mut self, snapshots: &[Snapshot]) {
        for snapshot in snapshots {
            if let Some(buffer) = self.buffers.get_mut(&snapshot.series_id) {
                buffer.mark_dirty();
            }
        }
    }

    pub fn history(&self) -> Option<Arc<dyn HistoryStore>> {
        self.history.clone()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::new(20)
    }
}

/// Encoded samples of one series, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub series_id: String,
    pub encoded: String,
}

/// Write snapshots in order, stopping at the first failure
pub fn write_snapshots(history: &dyn HistoryStore, snapshots: &[Snapshot]) -> HistoryResult<usize> {
    for snapshot in snapshots {
        history.set(&history_key(&snapshot.series_id), &snapshot.encoded)?;
    }
    if !snapshots.is_empty() {
        tracing::debug!(written = snapshots.len(), "Flushed series history");
    }
    Ok(snapshots.len())
}

/// Best-effort warm start: a missing or unreadable snapshot yields an
/// empty buffer
fn restore(history: Option<&dyn HistoryStore>, series_id: &str, capacity: usize) -> SeriesBuffer {
    let Some(history) = history else {
        return SeriesBuffer::new(capacity);
    };

    let snapshot = history
        .get(&history_key(series_id))
        .and_then(|raw| raw.map(|raw| decode_samples(&raw)).transpose());

    match snapshot {
        Ok(Some(samples)) => {
            tracing::debug!(series_id = %series_id, count = samples.len(), "Restored series history");
            SeriesBuffer::restore(capacity, samples)
        }
        Ok(None) => SeriesBuffer::new(capacity),
        Err(e) => {
            tracing::warn!(series_id = %series_id, error = %e, "Ignoring unreadable series history");
            SeriesBuffer::new(capacity)
        }
    }
}

//! Pending-range bookkeeping for one resource.
//!
//! Instead of a completion bitmap, the set stores the byte ranges that are
//! still missing. A fresh download is the single range `[0, size-1]`; every
//! committed write carves its span out of the set, and the set is empty once
//! the download is complete. The persisted form is the coalesced list of
//! pending ranges, so metadata stays proportional to the number of gaps, not
//! to the file size.
//!
//! Workers claim bounded work units (`range_size` bytes at most) carved off
//! the front of an unclaimed range; claims are transient and never persisted.

mod persist;
mod range;


pub use persist::{MetadataError, MetadataStore, METADATA_VERSION};
pub use range::Range;

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Errors raised by [`RangeSet`] mutations.
#[derive(Debug, thiserror::Error)]
pub enum RangeSetError {
    /// A written span is not fully contained in a single pending range.
    #[error("bytes {start}-{end} are not pending")]
    NotPending { start: u64, end: u64 },
    /// No pending range starts at the given offset.
    #[error("no pending range starts at {start}")]
    NoSuchRange { start: u64 },
    /// The metadata snapshot could not be written durably.
    #[error("persisting range metadata failed: {0}")]
    Persist(#[source] std::io::Error),
}

/// One pending work unit; keyed by its start offset.
#[derive(Debug, Clone, Copy)]
struct Unit {
    end: u64,
    in_use: bool,
}

struct Inner {
    units: BTreeMap<u64, Unit>,
    pending_bytes: u64,
    store: Option<MetadataStore>,
}

/// Thread-safe set of not-yet-downloaded byte ranges.
///
/// All operations serialize on one mutex; `mark_written` persists the new
/// snapshot before it returns when a [`MetadataStore`] is attached.
pub struct RangeSet {
    inner: Mutex<Inner>,
    file_size: u64,
    range_size: u64,
    resumed: bool,
}

impl std::fmt::Debug for RangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeSet")
            .field("file_size", &self.file_size)
            .field("range_size", &self.range_size)
            .field("pending", &self.snapshot())
            .finish()
    }
}

impl RangeSet {
    /// Fresh, in-memory set covering `[0, file_size-1]`.
    pub fn fresh(file_size: u64, range_size: u64) -> Self {
        let ranges = if file_size == 0 {
            Vec::new()
        } else {
            vec![Range::new(0, file_size - 1)]
        };
        Self::build(file_size, range_size, &ranges, None, false)
    }

    /// In-memory set from an explicit list of pending ranges (resume path).
    /// Every range starts unclaimed.
    pub fn from_ranges(file_size: u64, range_size: u64, ranges: &[Range]) -> Self {
        Self::build(file_size, range_size, ranges, None, true)
    }

    /// Load persisted state from `store` when a valid snapshot for `file_size`
    /// exists, otherwise start fresh. The store stays attached for persistence.
    pub fn open(file_size: u64, range_size: u64, mut store: MetadataStore) -> Self {
        match store.load(file_size) {
            Some(ranges) => {
                tracing::info!(
                    pending = ranges.len(),
                    "resuming from persisted range metadata"
                );
                Self::build(file_size, range_size, &ranges, Some(store), true)
            }
            None => {
                let mut set = Self::fresh(file_size, range_size);
                set.inner.get_mut().unwrap_or_else(PoisonError::into_inner).store = Some(store);
                set
            }
        }
    }

    fn build(
        file_size: u64,
        range_size: u64,
        ranges: &[Range],
        store: Option<MetadataStore>,
        resumed: bool,
    ) -> Self {
        let mut units = BTreeMap::new();
        let mut pending_bytes = 0u64;
        for r in ranges {
            units.insert(
                r.start,
                Unit {
                    end: r.end,
                    in_use: false,
                },
            );
            pending_bytes += r.len();
        }
        RangeSet {
            inner: Mutex::new(Inner {
                units,
                pending_bytes,
                store,
            }),
            file_size,
            range_size: range_size.max(1),
            resumed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// True if the set was reconstructed from existing state rather than fresh.
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Claims the lowest unclaimed range, capped at `range_size` bytes.
    /// Returns `None` when everything pending is already claimed (or nothing is pending).
    pub fn claim(&self) -> Option<Range> {
        let mut inner = self.lock();
        let (start, end) = inner
            .units
            .iter()
            .find(|(_, u)| !u.in_use)
            .map(|(&s, u)| (s, u.end))?;

        let claim_end = if end - start >= self.range_size {
            start + self.range_size - 1
        } else {
            end
        };
        inner.units.insert(
            start,
            Unit {
                end: claim_end,
                in_use: true,
            },
        );
        if claim_end < end {
            inner.units.insert(
                claim_end + 1,
                Unit {
                    end,
                    in_use: false,
                },
            );
        }
        Some(Range::new(start, claim_end))
    }

    /// Drops the claim on the range currently starting at `start`. Bounds are
    /// left untouched; the range becomes claimable again.
    pub fn release(&self, start: u64) -> Result<(), RangeSetError> {
        let mut inner = self.lock();
        let unit = inner
            .units
            .get_mut(&start)
            .ok_or(RangeSetError::NoSuchRange { start })?;
        unit.in_use = false;
        merge_unclaimed(&mut inner.units, start);
        Ok(())
    }

    /// Records that `[start, end]` is durably on disk and persists the result.
    ///
    /// The span must lie inside one pending range: it removes that range on an
    /// exact match, shrinks it from either side, or splits it in two.
    pub fn mark_written(&self, start: u64, end: u64) -> Result<(), RangeSetError> {
        let mut inner = self.lock();
        let not_pending = RangeSetError::NotPending { start, end };
        if start > end {
            return Err(not_pending);
        }
        let (unit_start, unit) = match inner.units.range(..=start).next_back() {
            Some((&s, &u)) if u.end >= end => (s, u),
            _ => return Err(not_pending),
        };

        inner.units.remove(&unit_start);
        if start > unit_start {
            inner.units.insert(
                unit_start,
                Unit {
                    end: start - 1,
                    in_use: unit.in_use,
                },
            );
        }
        if end < unit.end {
            inner.units.insert(
                end + 1,
                Unit {
                    end: unit.end,
                    in_use: unit.in_use,
                },
            );
        }
        inner.pending_bytes -= end - start + 1;

        persist_locked(&mut inner, self.file_size)
    }

    /// Coalesced, start-ordered view of pending ranges. Never contains two
    /// overlapping or touching ranges.
    pub fn snapshot(&self) -> Vec<Range> {
        coalesce(&self.lock().units)
    }

    /// Writes the current snapshot to the attached store (no-op without one).
    pub fn persist(&self) -> Result<(), RangeSetError> {
        let mut inner = self.lock();
        persist_locked(&mut inner, self.file_size)
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.file_size - self.lock().pending_bytes
    }

    pub fn is_complete(&self) -> bool {
        self.lock().units.is_empty()
    }

    /// Number of ranges currently claimed by workers.
    pub fn claimed(&self) -> usize {
        self.lock().units.values().filter(|u| u.in_use).count()
    }

    /// Deletes persisted metadata (called once the download is verified complete).
    pub fn discard_metadata(&self) -> std::io::Result<()> {
        match self.lock().store.as_ref() {
            Some(store) => store.remove(),
            None => Ok(()),
        }
    }
}

fn persist_locked(inner: &mut Inner, file_size: u64) -> Result<(), RangeSetError> {
    let snapshot = coalesce(&inner.units);
    match inner.store.as_mut() {
        Some(store) => store
            .save(file_size, &snapshot)
            .map_err(RangeSetError::Persist),
        None => Ok(()),
    }
}

/// Merge the unclaimed unit at `start` with touching unclaimed neighbours.
fn merge_unclaimed(units: &mut BTreeMap<u64, Unit>, start: u64) {
    let mut start = start;
    let prev = units
        .range(..start)
        .next_back()
        .map(|(&s, &u)| (s, u));
    if let Some((prev_start, prev)) = prev {
        if !prev.in_use && prev.end + 1 == start {
            if let Some(cur) = units.remove(&start) {
                units.insert(
                    prev_start,
                    Unit {
                        end: cur.end,
                        in_use: false,
                    },
                );
                start = prev_start;
            }
        }
    }

    let Some(cur) = units.get(&start).copied() else {
        return;
    };
    let next_start = cur.end + 1;
    if let Some(next) = units.get(&next_start).copied() {
        if !next.in_use {
            units.remove(&next_start);
            units.insert(
                start,
                Unit {
                    end: next.end,
                    in_use: false,
                },
            );
        }
    }
}

fn coalesce(units: &BTreeMap<u64, Unit>) -> Vec<Range> {
    let mut out: Vec<Range> = Vec::with_capacity(units.len());
    for (&start, unit) in units {
        if let Some(last) = out.last_mut() {
            if last.end + 1 == start {
                last.end = unit.end;
                continue;
            }
        }
        out.push(Range::new(start, unit.end));
    }
    out
}

//! Search result containers and the per-query top-k heap.
//!
//! Batched searches run one task per query (rayon), each with its own [`TopK`]
//! heap, and the per-query lists are stitched into [`SearchResults`] or a
//! [`RangeSearchResult`] afterwards. No state is shared between queries.

use crate::distance::DistanceMetric;
use crate::error::{check_batch, Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One scored candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Stored id (`-1` marks an empty slot).
    pub label: i64,
    /// Metric value (squared L2 or inner product).
    pub distance: f32,
}

/// Heap entry ordered so the *worst* candidate sits on top.
///
/// Ordering: rank key (smaller is better), then source (shard) order, then label.
#[derive(Debug, Clone, Copy)]
struct Entry {
    key: f32,
    source: u32,
    neighbor: Neighbor,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .total_cmp(&other.key)
            .then(self.source.cmp(&other.source))
            .then(self.neighbor.label.cmp(&other.neighbor.label))
    }
}

/// Slots a [`TopK`] reserves up front; larger `k` grows with the candidates.
const HEAP_PREALLOC: usize = 1024;

/// Bounded max-heap keeping the `k` best candidates for one query.
#[derive(Debug)]
pub struct TopK {
    k: usize,
    metric: DistanceMetric,
    heap: BinaryHeap<Entry>,
}

impl TopK {
    /// Heap for the `k` best candidates under `metric`.
    pub fn new(k: usize, metric: DistanceMetric) -> Self {
        Self {
            k,
            metric,
            heap: BinaryHeap::with_capacity(k.min(HEAP_PREALLOC) + 1),
        }
    }

    /// Offer a candidate.
    #[inline]
    pub fn push(&mut self, label: i64, distance: f32) {
        self.push_from(0, label, distance);
    }

    /// Offer a candidate coming from source `source` (shard order for merges).
    #[inline]
    pub fn push_from(&mut self, source: u32, label: i64, distance: f32) {
        if self.k == 0 {
            return;
        }
        let entry = Entry {
            key: self.metric.rank_key(distance),
            source,
            neighbor: Neighbor { label, distance },
        };
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if let Some(worst) = self.heap.peek() {
            if entry < *worst {
                self.heap.pop();
                self.heap.push(entry);
            }
        }
    }

    /// Number of candidates held.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether no candidate has been accepted.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Candidates best-first.
    pub fn into_sorted(self) -> Vec<Neighbor> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| e.neighbor)
            .collect()
    }
}

/// Top-k results for a batch of queries, row-major `n * k`.
///
/// Slots without a neighbor hold label `-1` and the metric's worst distance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    /// Neighbors per query.
    pub k: usize,
    /// `n * k` distances.
    pub distances: Vec<f32>,
    /// `n * k` labels.
    pub labels: Vec<i64>,
}

impl SearchResults {
    pub(crate) fn from_neighbors(
        k: usize,
        metric: DistanceMetric,
        per_query: Vec<Vec<Neighbor>>,
    ) -> Result<Self> {
        let n = per_query.len();
        let mut distances = padded(n, k, metric.worst())?;
        let mut labels = padded(n, k, -1i64)?;
        for (q, neighbors) in per_query.into_iter().enumerate() {
            for (j, nb) in neighbors.into_iter().take(k).enumerate() {
                distances[q * k + j] = nb.distance;
                labels[q * k + j] = nb.label;
            }
        }
        Ok(Self {
            k,
            distances,
            labels,
        })
    }

    /// Number of queries.
    pub fn num_queries(&self) -> usize {
        if self.k == 0 {
            0
        } else {
            self.labels.len() / self.k
        }
    }

    /// Labels of query `q`.
    pub fn labels_of(&self, q: usize) -> &[i64] {
        &self.labels[q * self.k..(q + 1) * self.k]
    }

    /// Distances of query `q`.
    pub fn distances_of(&self, q: usize) -> &[f32] {
        &self.distances[q * self.k..(q + 1) * self.k]
    }

    /// Filled `(label, distance)` pairs of query `q`, best-first.
    pub fn neighbors_of(&self, q: usize) -> Vec<Neighbor> {
        self.labels_of(q)
            .iter()
            .zip(self.distances_of(q))
            .filter(|&(&label, _)| label >= 0)
            .map(|(&label, &distance)| Neighbor { label, distance })
            .collect()
    }
}

/// Variable-length results per query.
///
/// Query `i` owns `labels[lims[i]..lims[i + 1]]` and the matching `distances`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RangeSearchResult {
    /// `nq + 1` non-decreasing offsets.
    pub lims: Vec<usize>,
    /// Result labels, concatenated per query.
    pub labels: Vec<i64>,
    /// Result distances, concatenated per query.
    pub distances: Vec<f32>,
}

impl RangeSearchResult {
    /// Empty result for `nq` queries.
    pub fn new(nq: usize) -> Self {
        Self {
            lims: vec![0; nq + 1],
            labels: Vec::new(),
            distances: Vec::new(),
        }
    }

    pub(crate) fn from_buckets(buckets: Vec<Vec<Neighbor>>) -> Self {
        let total: usize = buckets.iter().map(Vec::len).sum();
        let mut lims = Vec::with_capacity(buckets.len() + 1);
        let mut labels = Vec::with_capacity(total);
        let mut distances = Vec::with_capacity(total);
        lims.push(0);
        for bucket in buckets {
            for nb in bucket {
                labels.push(nb.label);
                distances.push(nb.distance);
            }
            lims.push(labels.len());
        }
        Self {
            lims,
            labels,
            distances,
        }
    }

    /// Number of queries.
    pub fn nq(&self) -> usize {
        self.lims.len().saturating_sub(1)
    }

    /// Total number of results across all queries.
    pub fn buffer_size(&self) -> usize {
        self.labels.len()
    }

    /// `(labels, distances)` of query `q`.
    pub fn query(&self, q: usize) -> (&[i64], &[f32]) {
        let (start, end) = (self.lims[q], self.lims[q + 1]);
        (&self.labels[start..end], &self.distances[start..end])
    }

    /// Check the offset invariants.
    pub fn validate(&self) -> Result<()> {
        if self.lims.is_empty() {
            return Err(Error::CorruptData("lims must hold nq + 1 offsets".into()));
        }
        if self.lims[0] != 0 {
            return Err(Error::CorruptData("lims must start at 0".into()));
        }
        if self.lims.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::CorruptData("lims is not monotonic".into()));
        }
        let end = *self.lims.last().unwrap_or(&0);
        if end != self.labels.len() || self.labels.len() != self.distances.len() {
            return Err(Error::CorruptData(format!(
                "lims ends at {end} but there are {} labels and {} distances",
                self.labels.len(),
                self.distances.len()
            )));
        }
        Ok(())
    }
}

/// Validate a query batch and `k`; returns the number of queries.
pub(crate) fn check_queries(x: &[f32], dimension: usize, k: usize) -> Result<usize> {
    if k == 0 {
        return Err(Error::InvalidParameter("k must be greater than 0".into()));
    }
    let n = check_batch(x.len(), dimension)?;
    result_len(n, k)?;
    Ok(n)
}

fn result_len(n: usize, k: usize) -> Result<usize> {
    n.checked_mul(k)
        .ok_or_else(|| Error::InvalidParameter(format!("{n} queries with k = {k} overflow")))
}

/// `n * k` result slots filled with `fill`, allocated fallibly.
pub(crate) fn padded<T: Clone>(n: usize, k: usize, fill: T) -> Result<Vec<T>> {
    let len = result_len(n, k)?;
    let mut out = Vec::new();
    out.try_reserve_exact(len)?;
    out.resize(len, fill);
    Ok(out)
}

/// Run `scan` for every query in parallel and gather top-k results.
pub(crate) fn par_search<F>(
    x: &[f32],
    dimension: usize,
    k: usize,
    metric: DistanceMetric,
    scan: F,
) -> Result<SearchResults>
where
    F: Fn(&[f32], &mut TopK) -> Result<()> + Sync,
{
    check_queries(x, dimension, k)?;
    let per_query = x
        .par_chunks(dimension)
        .map(|q| {
            let mut heap = TopK::new(k, metric);
            scan(q, &mut heap)?;
            Ok(heap.into_sorted())
        })
        .collect::<Result<Vec<_>>>()?;
    SearchResults::from_neighbors(k, metric, per_query)
}

/// Run `scan` for every query in parallel and gather range results.
pub(crate) fn par_range_search<F>(x: &[f32], dimension: usize, scan: F) -> Result<RangeSearchResult>
where
    F: Fn(&[f32], &mut Vec<Neighbor>) -> Result<()> + Sync,
{
    check_batch(x.len(), dimension)?;
    let buckets = x
        .par_chunks(dimension)
        .map(|q| {
            let mut bucket = Vec::new();
            scan(q, &mut bucket)?;
            Ok(bucket)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RangeSearchResult::from_buckets(buckets))
}

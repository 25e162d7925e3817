use std::collections::HashMap;

use rayon::ThreadPool;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::phash::{HashParseError, LengthMismatch, PerceptualHash};
use crate::reference::ReferenceHashEntry;

/// How many candidates a lookup returns.
pub const TOP_MATCHES: usize = 2;

#[derive(Debug, Error)]
pub enum RankError {
    #[error("reference {name} has an invalid hash: {source}")]
    InvalidHash {
        name: String,
        source: HashParseError,
    },

    #[error("reference {name}: {source}")]
    LengthMismatch {
        name: String,
        source: LengthMismatch,
    },
}

/// Distance from the uploaded screenshot to one reference image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub name: String,
    pub distance: u32,
}

/// Keep the entries whose name contains `area` (case-sensitive).
pub fn filter_candidates(
    entries: Vec<ReferenceHashEntry>,
    area: Option<&str>,
) -> Vec<ReferenceHashEntry> {
    entries
        .into_iter()
        .filter(|e| area.is_none_or(|a| e.name.contains(a)))
        .collect()
}

/// Names act as keys: a repeated name keeps the position of its first row and
/// takes the distance of its last.
pub fn merge_duplicates(matches: Vec<Match>) -> Vec<Match> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(matches.len());
    let mut merged: Vec<Match> = Vec::with_capacity(matches.len());
    for m in matches {
        match index.get(&m.name) {
            Some(&i) => {
                tracing::debug!(name = %m.name, distance = m.distance, "duplicate reference name overrides earlier row");
                merged[i].distance = m.distance;
            }
            None => {
                index.insert(m.name.clone(), merged.len());
                merged.push(m);
            }
        }
    }
    merged
}

/// Hamming distance to every candidate, computed on `pool`. The output keeps
/// candidate order.
pub fn compute_distances(
    pool: &ThreadPool,
    input: &PerceptualHash,
    candidates: &[ReferenceHashEntry],
) -> Result<Vec<Match>, RankError> {
    pool.install(|| {
        candidates
            .par_iter()
            .map(|entry| distance_to(input, entry))
            .collect()
    })
}

fn distance_to(input: &PerceptualHash, entry: &ReferenceHashEntry) -> Result<Match, RankError> {
    let stored: PerceptualHash = entry.hash.parse().map_err(|source| RankError::InvalidHash {
        name: entry.name.clone(),
        source,
    })?;
    let distance = input
        .distance(&stored)
        .map_err(|source| RankError::LengthMismatch {
            name: entry.name.clone(),
            source,
        })?;
    Ok(Match {
        name: entry.name.clone(),
        distance,
    })
}

/// The `n` smallest distances, ascending. Equal distances keep their input
/// order.
pub fn closest(mut matches: Vec<Match>, n: usize) -> Vec<Match> {
    matches.sort_by_key(|m| m.distance);
    matches.truncate(n);
    matches
}

/// Filter, compare and keep the [`TOP_MATCHES`] closest candidates.
pub fn rank(
    pool: &ThreadPool,
    input: &PerceptualHash,
    entries: Vec<ReferenceHashEntry>,
    area: Option<&str>,
) -> Result<Vec<Match>, RankError> {
    let total = entries.len();
    let candidates = filter_candidates(entries, area);
    tracing::debug!(total, candidates = candidates.len(), area = ?area, "comparing against reference hashes");

    let distances = compute_distances(pool, input, &candidates)?;
    Ok(closest(merge_duplicates(distances), TOP_MATCHES))
}

//! The lookup pipeline shared by the HTTP handler and the `match_test` tool:
//! decode, crop, hash, rank against the map's reference table, then gather
//! the assets for the winners.

use rayon::ThreadPool;
use thiserror::Error;

use crate::assets::{self, MatchAssets};
use crate::decode::{DecodeError, FormatRegistry};
use crate::normalize::{self, CropBox};
use crate::phash::{self, PerceptualHash};
use crate::ranking::{self, Match, RankError};
use crate::reference::{MapName, MapStore, ReferenceError};

#[derive(Debug, Error)]
pub enum LocateError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Rank(#[from] RankError),
}

/// Everything needed to run a lookup. Cheap to borrow from shared state.
pub struct Locator<'a> {
    pub formats: &'a FormatRegistry,
    pub store: &'a MapStore,
    pub pool: &'a ThreadPool,
}

/// Intermediate results of a lookup, before any assets are read.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub width: u32,
    pub height: u32,
    pub crop: Option<CropBox>,
    pub hash: PerceptualHash,
    pub matches: Vec<Match>,
}

impl Locator<'_> {
    /// Hash the screenshot and rank it against the map's reference table.
    pub fn analyze(&self, map: &MapName, upload: &[u8], area: Option<&str>) -> Result<Analysis, LocateError> {
        let decoded = self.formats.decode(upload)?;
        let (width, height) = (decoded.image.width(), decoded.image.height());

        let normalized = normalize::normalize(decoded);
        let hash = phash::phash(&normalized.image);
        tracing::debug!(%map, width, height, crop = ?normalized.crop, %hash, "hashed upload");

        let entries = self.store.load_hashes(map)?;
        let matches = ranking::rank(self.pool, &hash, entries, area)?;

        Ok(Analysis {
            width,
            height,
            crop: normalized.crop,
            hash,
            matches,
        })
    }

    /// Full lookup: analysis plus the images and place records of the matches.
    pub fn locate(&self, map: &MapName, upload: &[u8], area: Option<&str>) -> Result<MatchAssets, LocateError> {
        let analysis = self.analyze(map, upload, area)?;
        tracing::info!(%map, area = ?area, matches = ?analysis.matches, "located screenshot");
        Ok(assets::assemble(self.store, map, &analysis.matches)?)
    }
}

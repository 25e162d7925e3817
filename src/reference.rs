use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("no reference data for map {0}")]
    UnknownMap(MapName),

    #[error("failed to read {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("reference image {} is missing: {source}", .path.display())]
    MissingImage { path: PathBuf, source: io::Error },

    #[error("reference image name {0:?} escapes the map directory")]
    InvalidImageName(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid map name {0:?}: only ASCII letters, digits, '_' and '-' are allowed")]
pub struct InvalidMapName(pub String);

/// Map identifier taken from the request path. It is spliced into file
/// names, so only a conservative character set is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapName(String);

impl MapName {
    pub fn parse(raw: &str) -> Result<Self, InvalidMapName> {
        let valid = !raw.is_empty()
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if valid {
            Ok(Self(raw.to_owned()))
        } else {
            Err(InvalidMapName(raw.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MapName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of `map_hash/image_hash_{map}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceHashEntry {
    pub name: String,
    pub hash: String,
}

/// One row of `map_place/map_place_{map}.json`. Everything except `name` is
/// passed through to clients untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceEntry {
    pub name: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Read-only view of the per-map data files under a root directory.
/// Nothing is cached: every call goes to disk.
#[derive(Debug, Clone)]
pub struct MapStore {
    root: PathBuf,
}

impl MapStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn hash_table_path(&self, map: &MapName) -> PathBuf {
        self.root.join("map_hash").join(format!("image_hash_{map}.json"))
    }

    pub fn place_table_path(&self, map: &MapName) -> PathBuf {
        self.root.join("map_place").join(format!("map_place_{map}.json"))
    }

    pub fn image_path(&self, map: &MapName, name: &str) -> Result<PathBuf, ReferenceError> {
        let rel = Path::new(name);
        let plain = !name.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(ReferenceError::InvalidImageName(name.to_owned()));
        }
        Ok(self.root.join("map_image").join(map.as_str()).join(rel))
    }

    /// Load the hash table. A missing table means the map does not exist.
    pub fn load_hashes(&self, map: &MapName) -> Result<Vec<ReferenceHashEntry>, ReferenceError> {
        let path = self.hash_table_path(map);
        read_json(&path).map_err(|e| match e {
            ReferenceError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                ReferenceError::UnknownMap(map.clone())
            }
            other => other,
        })
    }

    pub fn load_places(&self, map: &MapName) -> Result<Vec<PlaceEntry>, ReferenceError> {
        read_json(&self.place_table_path(map))
    }

    pub fn read_image(&self, map: &MapName, name: &str) -> Result<Vec<u8>, ReferenceError> {
        let path = self.image_path(map, name)?;
        std::fs::read(&path).map_err(|source| ReferenceError::MissingImage { path, source })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ReferenceError> {
    let bytes = std::fs::read(path).map_err(|source| ReferenceError::Io {
        path: path.to_owned(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ReferenceError::Json {
        path: path.to_owned(),
        source,
    })
}

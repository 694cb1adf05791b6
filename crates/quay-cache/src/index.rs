//! Line-oriented cache index.
//!
//! One entry per line: `<coordinate>::<sha256>::<provenance>::<relative path>`.
//! Coordinates themselves may contain `::` (an empty qualifier), so a line is
//! split around the 64-digit hash rather than on the first separator.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use quay_core::{ContentHash, Coordinate};

const SEPARATOR: &str = "::";
const HASH_LEN: usize = 64;

/// How a cached artifact entered the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Signature verified against the trust store when fetched.
    Signed,
    /// Fetched with signature checks disabled for its channel.
    Unverified,
    /// Copied from a local (`file:`) repository; never signature checked.
    Local,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Signed => "signed",
            Provenance::Unverified => "unverified",
            Provenance::Local => "local",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signed" => Ok(Provenance::Signed),
            "unverified" => Ok(Provenance::Unverified),
            "local" => Ok(Provenance::Local),
            other => Err(format!("unknown provenance '{other}'")),
        }
    }
}

/// A recorded cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub coordinate: Coordinate,
    pub hash: ContentHash,
    pub provenance: Provenance,
    /// Path relative to the installation root, `/` separated.
    pub path: String,
}

impl CachedEntry {
    /// Absolute location under the given installation root.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        self.path.split('/').fold(root.to_path_buf(), |p, s| p.join(s))
    }

    fn to_line(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
            self.coordinate, self.hash, self.provenance, self.path
        )
    }
}

/// In-memory index, in file order.
pub(crate) type Index = IndexMap<Coordinate, CachedEntry>;

/// Parse an index file body. Errors carry the 1-based line number.
pub(crate) fn parse(text: &str) -> Result<Index, (usize, String)> {
    let mut index = Index::new();
    for (n, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = parse_line(line).map_err(|detail| (n + 1, detail))?;
        index.shift_remove(&entry.coordinate);
        index.insert(entry.coordinate.clone(), entry);
    }
    Ok(index)
}

fn parse_line(line: &str) -> Result<CachedEntry, String> {
    for (pos, _) in line.match_indices(SEPARATOR) {
        let hash_start = pos + SEPARATOR.len();
        let hash_end = hash_start + HASH_LEN;
        let Some(candidate) = line.get(hash_start..hash_end) else {
            continue;
        };
        let Some(hash) = ContentHash::from_hex(candidate) else {
            continue;
        };
        let Some((provenance, path)) = line
            .get(hash_end..)
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
            .and_then(|rest| rest.split_once(SEPARATOR))
        else {
            continue;
        };
        let provenance: Provenance = provenance.parse()?;
        if path.is_empty() {
            return Err("empty path".to_string());
        }
        let coordinate: Coordinate = line[..pos].parse().map_err(|e| format!("{e}"))?;
        return Ok(CachedEntry {
            coordinate,
            hash,
            provenance,
            path: path.to_string(),
        });
    }
    Err("expected <coordinate>::<sha256>::<provenance>::<path>".to_string())
}

/// Serialize an index back to its file form.
pub(crate) fn format(index: &Index) -> String {
    let mut out = String::new();
    for entry in index.values() {
        out.push_str(&entry.to_line());
        out.push('\n');
    }
    out
}

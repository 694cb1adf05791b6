//! Keyring binary format.
//!
//! A fixed header with magic bytes, a 3-byte format version and the entry
//! count, followed by length-prefixed certificate and revocation blobs,
//! terminated by a SHA-256 over everything before it.

use sha2::{Digest, Sha256};

/// Magic bytes identifying a keyring file: "QKR\0"
pub const MAGIC: [u8; 4] = [0x51, 0x4B, 0x52, 0x00];

/// Current format version (major, minor, patch).
pub const VERSION: [u8; 3] = [0, 1, 0];

/// 4 (magic) + 3 (version) + 4 (count)
const HEADER_SIZE: usize = 11;

/// Size of the trailing content hash.
const HASH_SIZE: usize = 32;

/// One keyring entry: encoded certificate plus its revocation, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyringEntry {
    pub certificate: Vec<u8>,
    pub revocation: Option<Vec<u8>>,
}

/// Serialize entries into keyring bytes.
pub fn encode(entries: &[KeyringEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION);
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        put_blob(&mut buf, &entry.certificate);
        put_blob(&mut buf, entry.revocation.as_deref().unwrap_or_default());
    }
    let hash = Sha256::digest(&buf);
    buf.extend_from_slice(&hash);
    buf
}

fn put_blob(buf: &mut Vec<u8>, blob: &[u8]) {
    buf.extend_from_slice(&(blob.len() as u32).to_le_bytes());
    buf.extend_from_slice(blob);
}

/// Parse keyring bytes. The error is a human-readable description of the
/// first structural problem found.
pub fn decode(bytes: &[u8]) -> Result<Vec<KeyringEntry>, String> {
    if bytes.len() < HEADER_SIZE + HASH_SIZE {
        return Err("file too small to be a keyring".into());
    }
    if bytes[..4] != MAGIC {
        return Err("invalid magic bytes".into());
    }
    let version = &bytes[4..7];
    if version[0] != VERSION[0] || version[1] > VERSION[1] {
        return Err(format!(
            "unsupported format version {}.{}.{}",
            version[0], version[1], version[2]
        ));
    }

    let (body, stored_hash) = bytes.split_at(bytes.len() - HASH_SIZE);
    if Sha256::digest(body).as_slice() != stored_hash {
        return Err("content hash mismatch".into());
    }

    let mut reader = Reader {
        data: body,
        pos: 7,
    };
    let count = reader.u32()?;
    let mut entries = Vec::new();
    for i in 0..count {
        let certificate = reader.blob().map_err(|e| format!("entry {i}: {e}"))?;
        if certificate.is_empty() {
            return Err(format!("entry {i}: empty certificate"));
        }
        let revocation = reader.blob().map_err(|e| format!("entry {i}: {e}"))?;
        entries.push(KeyringEntry {
            certificate: certificate.to_vec(),
            revocation: (!revocation.is_empty()).then(|| revocation.to_vec()),
        });
    }
    if reader.pos != body.len() {
        return Err("trailing bytes after last entry".into());
    }
    Ok(entries)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| "truncated".to_string())?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, String> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn blob(&mut self) -> Result<&'a [u8], String> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}

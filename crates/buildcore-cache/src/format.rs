//! Shared binary cache file format:
//! `u8 version; u32 magic; u32 entryCount; [entries]…; u8[32] hmac`.
//! Entries are tagged-field serialized; strings are `varuint32 len; bytes`;
//! all multi-byte integers are little-endian.

use buildcore_types::{ActionEntry, CacheEntry};
use thiserror::Error;

pub const MAGIC: u32 = 0x4243_5448;
pub const VERSION: u8 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("truncated cache file")]
    Truncated,
    #[error("bad magic number")]
    BadMagic,
    #[error("unknown cache file version {0}, discarding")]
    UnknownVersion(u8),
    #[error("signature mismatch")]
    BadSignature,
    #[error("malformed tagged field {0}")]
    MalformedField(u8),
}

pub fn write_varuint32(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

pub fn read_varuint32(buf: &[u8], pos: &mut usize) -> Result<u32, FormatError> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *buf.get(*pos).ok_or(FormatError::Truncated)?;
        *pos += 1;
        result |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

pub fn write_string(out: &mut Vec<u8>, s: &str) {
    write_varuint32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

pub fn read_string(buf: &[u8], pos: &mut usize) -> Result<String, FormatError> {
    let len = read_varuint32(buf, pos)? as usize;
    let end = pos.checked_add(len).ok_or(FormatError::Truncated)?;
    let bytes = buf.get(*pos..end).ok_or(FormatError::Truncated)?;
    *pos = end;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

pub fn write_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn read_u64(buf: &[u8], pos: &mut usize) -> Result<u64, FormatError> {
    let end = pos.checked_add(8).ok_or(FormatError::Truncated)?;
    let bytes = buf.get(*pos..end).ok_or(FormatError::Truncated)?;
    *pos = end;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

/// Tags for `CacheEntry` (TargetCache) fields.
mod target_tag {
    pub const TARGET_ID: u8 = 1;
    pub const SOURCES_FP: u8 = 2;
    pub const DEPS_FP: u8 = 3;
    pub const OUTPUT_BLOB_IDS: u8 = 4;
    pub const OUTPUT_HASH_BUNDLE: u8 = 5;
    pub const CREATED_AT: u8 = 6;
    pub const LAST_ACCESSED: u8 = 7;
    pub const SIZE_BYTES: u8 = 8;
    pub const END: u8 = 0;
}

pub fn encode_cache_entry(entry: &CacheEntry) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(target_tag::TARGET_ID);
    write_string(&mut out, &entry.target_id);
    out.push(target_tag::SOURCES_FP);
    write_string(&mut out, &entry.sources_fingerprint);
    out.push(target_tag::DEPS_FP);
    write_string(&mut out, &entry.deps_fingerprint);
    out.push(target_tag::OUTPUT_BLOB_IDS);
    write_varuint32(&mut out, entry.output_blob_ids.len() as u32);
    for id in &entry.output_blob_ids {
        write_string(&mut out, id);
    }
    out.push(target_tag::OUTPUT_HASH_BUNDLE);
    write_string(&mut out, &entry.output_hash_bundle);
    out.push(target_tag::CREATED_AT);
    write_u64(&mut out, entry.created_at);
    out.push(target_tag::LAST_ACCESSED);
    write_u64(&mut out, entry.last_accessed);
    out.push(target_tag::SIZE_BYTES);
    write_u64(&mut out, entry.size_bytes);
    out.push(target_tag::END);
    out
}

pub fn decode_cache_entry(buf: &[u8], pos: &mut usize) -> Result<CacheEntry, FormatError> {
    let mut target_id = String::new();
    let mut sources_fingerprint = String::new();
    let mut deps_fingerprint = String::new();
    let mut output_blob_ids = Vec::new();
    let mut output_hash_bundle = String::new();
    let mut created_at = 0u64;
    let mut last_accessed = 0u64;
    let mut size_bytes = 0u64;

    loop {
        let tag = *buf.get(*pos).ok_or(FormatError::Truncated)?;
        *pos += 1;
        match tag {
            target_tag::END => break,
            target_tag::TARGET_ID => target_id = read_string(buf, pos)?,
            target_tag::SOURCES_FP => sources_fingerprint = read_string(buf, pos)?,
            target_tag::DEPS_FP => deps_fingerprint = read_string(buf, pos)?,
            target_tag::OUTPUT_BLOB_IDS => {
                let count = read_varuint32(buf, pos)?;
                output_blob_ids = (0..count)
                    .map(|_| read_string(buf, pos))
                    .collect::<Result<_, _>>()?;
            }
            target_tag::OUTPUT_HASH_BUNDLE => output_hash_bundle = read_string(buf, pos)?,
            target_tag::CREATED_AT => created_at = read_u64(buf, pos)?,
            target_tag::LAST_ACCESSED => last_accessed = read_u64(buf, pos)?,
            target_tag::SIZE_BYTES => size_bytes = read_u64(buf, pos)?,
            other => return Err(FormatError::MalformedField(other)),
        }
    }

    Ok(CacheEntry {
        target_id,
        sources_fingerprint,
        deps_fingerprint,
        output_blob_ids,
        output_hash_bundle,
        created_at,
        last_accessed,
        size_bytes,
    })
}

mod action_tag {
    pub const ACTION_ID: u8 = 1;
    pub const INPUTS_FP: u8 = 2;
    pub const OUTPUT_BLOB_IDS: u8 = 3;
    pub const METADATA_KV: u8 = 4;
    pub const CREATED_AT: u8 = 5;
    pub const LAST_ACCESSED: u8 = 6;
    pub const SUCCESS: u8 = 7;
    pub const END: u8 = 0;
}

pub fn encode_action_entry(entry: &ActionEntry) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(action_tag::ACTION_ID);
    write_string(&mut out, &entry.action_id);
    out.push(action_tag::INPUTS_FP);
    write_string(&mut out, &entry.inputs_fingerprint);
    out.push(action_tag::OUTPUT_BLOB_IDS);
    write_varuint32(&mut out, entry.output_blob_ids.len() as u32);
    for id in &entry.output_blob_ids {
        write_string(&mut out, id);
    }
    out.push(action_tag::METADATA_KV);
    write_varuint32(&mut out, entry.metadata_kv.len() as u32);
    for (k, v) in &entry.metadata_kv {
        write_string(&mut out, k);
        write_string(&mut out, v);
    }
    out.push(action_tag::CREATED_AT);
    write_u64(&mut out, entry.created_at);
    out.push(action_tag::LAST_ACCESSED);
    write_u64(&mut out, entry.last_accessed);
    out.push(action_tag::SUCCESS);
    out.push(u8::from(entry.success));
    out.push(action_tag::END);
    out
}

pub fn decode_action_entry(buf: &[u8], pos: &mut usize) -> Result<ActionEntry, FormatError> {
    let mut action_id = String::new();
    let mut inputs_fingerprint = String::new();
    let mut output_blob_ids = Vec::new();
    let mut metadata_kv = Vec::new();
    let mut created_at = 0u64;
    let mut last_accessed = 0u64;
    let mut success = false;

    loop {
        let tag = *buf.get(*pos).ok_or(FormatError::Truncated)?;
        *pos += 1;
        match tag {
            action_tag::END => break,
            action_tag::ACTION_ID => action_id = read_string(buf, pos)?,
            action_tag::INPUTS_FP => inputs_fingerprint = read_string(buf, pos)?,
            action_tag::OUTPUT_BLOB_IDS => {
                let count = read_varuint32(buf, pos)?;
                output_blob_ids = (0..count)
                    .map(|_| read_string(buf, pos))
                    .collect::<Result<_, _>>()?;
            }
            action_tag::METADATA_KV => {
                let count = read_varuint32(buf, pos)?;
                metadata_kv = (0..count)
                    .map(|_| -> Result<(String, String), FormatError> {
                        let k = read_string(buf, pos)?;
                        let v = read_string(buf, pos)?;
                        Ok((k, v))
                    })
                    .collect::<Result<_, _>>()?;
            }
            action_tag::CREATED_AT => created_at = read_u64(buf, pos)?,
            action_tag::LAST_ACCESSED => last_accessed = read_u64(buf, pos)?,
            action_tag::SUCCESS => {
                let byte = *buf.get(*pos).ok_or(FormatError::Truncated)?;
                *pos += 1;
                success = byte != 0;
            }
            other => return Err(FormatError::MalformedField(other)),
        }
    }

    Ok(ActionEntry {
        action_id,
        inputs_fingerprint,
        output_blob_ids,
        metadata_kv,
        created_at,
        last_accessed,
        success,
    })
}

/// Signs `payload` (the concatenated entry bytes) with a workspace-specific
/// key, BLAKE3-HMAC (keyed hash, which is BLAKE3's drop-in
/// HMAC replacement).
pub fn sign(key: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    *blake3::keyed_hash(key, payload).as_bytes()
}

pub fn verify(key: &[u8; 32], payload: &[u8], signature: &[u8; 32]) -> bool {
    sign(key, payload) == *signature
}

/// Serializes a full cache file: header, entries, trailing signature.
pub fn write_file<T>(key: &[u8; 32], entries: &[T], encode: impl Fn(&T) -> Vec<u8>) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(VERSION);
    body.extend_from_slice(&MAGIC.to_le_bytes());
    body.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        body.extend_from_slice(&encode(entry));
    }
    let signature = sign(key, &body);
    body.extend_from_slice(&signature);
    body
}

/// Parses a full cache file, returning the decoded entries. Any structural
/// or signature problem returns `Err` so the caller can discard-and-rebuild
/// per "Security" policy — never a fatal error.
pub fn read_file<T>(
    key: &[u8; 32],
    bytes: &[u8],
    decode: impl Fn(&[u8], &mut usize) -> Result<T, FormatError>,
) -> Result<Vec<T>, FormatError> {
    if bytes.len() < 1 + 4 + 4 + 32 {
        return Err(FormatError::Truncated);
    }
    let sig_start = bytes.len() - 32;
    let body = &bytes[..sig_start];
    let signature: [u8; 32] = bytes[sig_start..].try_into().unwrap();
    if !verify(key, body, &signature) {
        return Err(FormatError::BadSignature);
    }

    let mut pos = 0usize;
    let version = body[pos];
    pos += 1;
    if version != VERSION {
        return Err(FormatError::UnknownVersion(version));
    }
    let magic = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
    pos += 4;
    if magic != MAGIC {
        return Err(FormatError::BadMagic);
    }
    let count = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
    pos += 4;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(decode(body, &mut pos)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cache_entry(n: u64) -> CacheEntry {
        CacheEntry {
            target_id: format!("w//p:t{n}"),
            sources_fingerprint: "abc".into(),
            deps_fingerprint: "def".into(),
            output_blob_ids: vec!["blob1".into(), "blob2".into()],
            output_hash_bundle: "bundle".into(),
            created_at: n,
            last_accessed: n + 1,
            size_bytes: n * 100,
        }
    }

    #[test]
    fn cache_entry_roundtrips() {
        let entry = sample_cache_entry(7);
        let encoded = encode_cache_entry(&entry);
        let mut pos = 0;
        let decoded = decode_cache_entry(&encoded, &mut pos).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(pos, encoded.len());
    }

    #[test]
    fn action_entry_roundtrips() {
        let entry = ActionEntry {
            action_id: "a1".into(),
            inputs_fingerprint: "fp".into(),
            output_blob_ids: vec!["b1".into()],
            metadata_kv: vec![("flag".into(), "-O2".into())],
            created_at: 1,
            last_accessed: 2,
            success: true,
        };
        let encoded = encode_action_entry(&entry);
        let mut pos = 0;
        let decoded = decode_action_entry(&encoded, &mut pos).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn full_file_roundtrips_and_verifies() {
        let key = [7u8; 32];
        let entries = vec![sample_cache_entry(1), sample_cache_entry(2)];
        let bytes = write_file(&key, &entries, encode_cache_entry);
        let decoded = read_file(&key, &bytes, decode_cache_entry).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn wrong_key_is_rejected() {
        let key = [7u8; 32];
        let wrong_key = [8u8; 32];
        let entries = vec![sample_cache_entry(1)];
        let bytes = write_file(&key, &entries, encode_cache_entry);
        let err = read_file(&wrong_key, &bytes, decode_cache_entry).unwrap_err();
        assert_eq!(err, FormatError::BadSignature);
    }

    #[test]
    fn corrupt_bytes_are_rejected_not_fatal() {
        let key = [7u8; 32];
        let entries = vec![sample_cache_entry(1)];
        let mut bytes = write_file(&key, &entries, encode_cache_entry);
        bytes[5] ^= 0xff;
        assert!(read_file(&key, &bytes, decode_cache_entry).is_err());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let key = [1u8; 32];
        let entries: Vec<CacheEntry> = vec![];
        let mut bytes = write_file(&key, &entries, encode_cache_entry);
        // version byte is the first byte of the signed body
        bytes[0] = 99;
        let new_sig = sign(&key, &bytes[..bytes.len() - 32]);
        let sig_start = bytes.len() - 32;
        bytes[sig_start..].copy_from_slice(&new_sig);
        assert_eq!(
            read_file(&key, &bytes, decode_cache_entry).unwrap_err(),
            FormatError::UnknownVersion(99)
        );
    }

    #[test]
    fn varuint_roundtrips_large_values() {
        for value in [0u32, 1, 127, 128, 300, u32::MAX] {
            let mut buf = Vec::new();
            write_varuint32(&mut buf, value);
            let mut pos = 0;
            assert_eq!(read_varuint32(&buf, &mut pos).unwrap(), value);
        }
    }
}

//! Composite cache keys.

use buildcore_hash::Hasher;

/// `H(targetId ⋄ sortedSourceHashes ⋄ sortedDepOutputHashes)`.
pub fn target_cache_key(target_id: &str, source_hashes: &[String], dep_output_hashes: &[String]) -> String {
    let mut sources = source_hashes.to_vec();
    sources.sort();
    let mut deps = dep_output_hashes.to_vec();
    deps.sort();

    let mut buf = String::new();
    buf.push_str(target_id);
    buf.push('\u{0}');
    buf.push_str(&sources.join(","));
    buf.push('\u{0}');
    buf.push_str(&deps.join(","));

    let digest = Hasher::new().hash_bytes(buf.as_bytes());
    hex::encode(digest)
}

/// `H(actionId ⋄ sortedInputHashes ⋄ sortedMetadataKV)`. Stricter than the
/// target key: toolchain/flag metadata is part of the key, so any metadata
/// drift (e.g. a compiler flag change) invalidates the entry.
pub fn action_cache_key(action_id: &str, input_hashes: &[String], metadata_kv: &[(String, String)]) -> String {
    let mut inputs = input_hashes.to_vec();
    inputs.sort();
    let mut kv: Vec<String> = metadata_kv.iter().map(|(k, v)| format!("{k}={v}")).collect();
    kv.sort();

    let mut buf = String::new();
    buf.push_str(action_id);
    buf.push('\u{0}');
    buf.push_str(&inputs.join(","));
    buf.push('\u{0}');
    buf.push_str(&kv.join(","));

    let digest = Hasher::new().hash_bytes(buf.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_key_is_order_independent_in_inputs() {
        let a = target_cache_key("w//p:t", &["h2".into(), "h1".into()], &["d1".into()]);
        let b = target_cache_key("w//p:t", &["h1".into(), "h2".into()], &["d1".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn target_key_changes_when_source_hash_changes() {
        let a = target_cache_key("w//p:t", &["h1".into()], &[]);
        let b = target_cache_key("w//p:t", &["h1-modified".into()], &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn action_key_is_stricter_on_metadata() {
        let a = action_cache_key("compile", &["in1".into()], &[("flags".into(), "-O2".into())]);
        let b = action_cache_key("compile", &["in1".into()], &[("flags".into(), "-O3".into())]);
        assert_ne!(a, b);
    }
}

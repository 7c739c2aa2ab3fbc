//! Opaque node identifiers.
//!
//! A node id is `<bucket>_<payload>` where the payload is the bucket-relative
//! path in URL-safe base64 without padding.  Bucket names can never contain
//! `_`, so the first underscore always separates scope from payload.
//!
//! The root directory has several spellings (`""`, `"/"`, `"root"`).  All of
//! them encode to the id of [`ROOT_TOKEN`] and decode back to `""`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Path token used for the root directory inside ids.
pub const ROOT_TOKEN: &str = "root";

/// Whether `path` is one of the root spellings.
pub fn is_root(path: &str) -> bool {
    matches!(path, "" | "/" | ROOT_TOKEN)
}

/// Encode a bucket-relative `path` into an id scoped to `scope`.
pub fn encode(scope: &str, path: &str) -> String {
    let path = if is_root(path) { ROOT_TOKEN } else { path };
    format!("{}_{}", scope, URL_SAFE_NO_PAD.encode(path.as_bytes()))
}

/// Decode an id back into its bucket-relative path.
///
/// Returns `None` for anything that is not a well-formed id; callers treat
/// that as "not found".  Root ids decode to `""`.  Padded payloads (either
/// `=` or the `.` substitute some clients use) are accepted.
pub fn decode(id: &str) -> Option<String> {
    let (_, payload) = id.split_once('_')?;
    let payload = payload.trim_end_matches(['=', '.']);
    if payload.is_empty() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let path = String::from_utf8(bytes).ok()?;
    if is_root(&path) {
        Some(String::new())
    } else {
        Some(path)
    }
}

/// Scope (bucket) part of an id, if it has one.
pub fn scope_of(id: &str) -> Option<&str> {
    id.split_once('_').map(|(scope, _)| scope)
}

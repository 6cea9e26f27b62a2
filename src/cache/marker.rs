//! `KILN_MODULE(name, entry)` marker handling
//!
//! Module builds carry their name inside the source text. The marker is a
//! plain textual convention: the word `KILN_MODULE`, optional whitespace, an
//! opening parenthesis, an identifier, and a comma. No preprocessing or
//! parsing beyond that is done, so a marker inside a comment still counts.

use crate::cache::key::CacheKey;
use crate::error::{KilnError, KilnResult};

/// Marker keyword
pub const MARKER: &str = "KILN_MODULE";

/// Name of the exported symbol holding the module's registration name
pub const MODULE_NAME_SYMBOL: &str = "kiln_module_name";

/// Name of the exported symbol holding the entry symbol's name
pub const MODULE_ENTRY_SYMBOL: &str = "kiln_module_entry";

/// Name of the exported symbol holding the cache key
pub const CACHE_KEY_SYMBOL: &str = "kiln_cache_key";

/// A located marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMarker {
    /// Declared module name
    pub name: String,
    /// Byte range of the name inside the source
    span: (usize, usize),
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

fn line_of(source: &str, pos: usize) -> usize {
    source[..pos].bytes().filter(|&b| b == b'\n').count() + 1
}

/// Find the single module marker in `source`
pub fn find(source: &str) -> KilnResult<ModuleMarker> {
    let bytes = source.as_bytes();
    let mut found = Vec::new();

    for (start, _) in source.match_indices(MARKER) {
        // Skip longer identifiers such as MY_KILN_MODULE or KILN_MODULE_X
        if start > 0 && is_ident_byte(bytes[start - 1]) {
            continue;
        }
        let after = start + MARKER.len();
        if after < bytes.len() && is_ident_byte(bytes[after]) {
            continue;
        }

        let open = skip_whitespace(bytes, after);
        if open >= bytes.len() || bytes[open] != b'(' {
            continue;
        }
        found.push((start, open + 1));
    }

    if found.len() != 1 {
        return Err(KilnError::ModuleMarkerCount { found: found.len() });
    }

    let (start, args) = found[0];
    let name_start = skip_whitespace(bytes, args);
    let mut name_end = name_start;
    while name_end < bytes.len() && is_ident_byte(bytes[name_end]) {
        name_end += 1;
    }

    let malformed = |reason: &str| KilnError::ModuleMarkerMalformed {
        line: line_of(source, start),
        reason: reason.to_string(),
    };

    if name_end == name_start {
        return Err(malformed("expected a module name"));
    }
    if bytes[name_start].is_ascii_digit() {
        return Err(malformed("module name must not start with a digit"));
    }
    let comma = skip_whitespace(bytes, name_end);
    if comma >= bytes.len() || bytes[comma] != b',' {
        return Err(malformed("expected ',' after the module name"));
    }

    Ok(ModuleMarker {
        name: source[name_start..name_end].to_string(),
        span: (name_start, name_end),
    })
}

/// Rewrite the marker's name to `<name>_<key>` and prepend the prelude
///
/// The prelude defines the marker macro so it exports the registration
/// name, exports the cache key, and resets line numbering so compiler
/// diagnostics still point at the caller's lines.
pub fn inject(source: &str, marker: &ModuleMarker, key: &CacheKey) -> String {
    let (start, end) = marker.span;
    let mut out = prelude(key);
    out.push_str(&source[..start]);
    out.push_str(&registration_name(&marker.name, key));
    out.push_str(&source[end..]);
    out
}

/// Registration name of a module built under `key`
pub fn registration_name(name: &str, key: &CacheKey) -> String {
    format!("{}_{}", name, key)
}

fn prelude(key: &CacheKey) -> String {
    format!(
        r#"#ifdef __cplusplus
#define KILN_EXTERN_C extern "C"
#else
#define KILN_EXTERN_C
#endif
#if defined(_WIN32)
#define KILN_EXPORT KILN_EXTERN_C __declspec(dllexport)
#else
#define KILN_EXPORT KILN_EXTERN_C __attribute__((visibility("default")))
#endif
#define {marker}(name, entry) \
    KILN_EXPORT const char {name_sym}[] = #name; \
    KILN_EXPORT const char {entry_sym}[] = #entry
KILN_EXPORT const char {key_sym}[] = "{key}";
#line 1
"#,
        marker = MARKER,
        name_sym = MODULE_NAME_SYMBOL,
        entry_sym = MODULE_ENTRY_SYMBOL,
        key_sym = CACHE_KEY_SYMBOL,
        key = key,
    )
}

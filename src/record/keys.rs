//! Canonical field names.
//!
//! Upstream sends the same logical field under many spellings: `userName`,
//! `UserName`, `user_name`, and sometimes dotted paths like `meta.x` that
//! collide with flattened names like `meta_x`. Every key is rewritten to a
//! single canonical snake_case form before anything else sees it, so
//! statistics and decisions are keyed on one name per field.

use std::sync::LazyLock;

use regex::Regex;

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^A-Za-z0-9_]+").expect("invalid key pattern")
});

/// Boundary between an acronym and a following word: `XMLParser` → `XML_Parser`.
static ACRONYM_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("invalid key pattern")
});

/// Boundary between a lowercase/digit run and an uppercase letter.
static CAMEL_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z0-9])([A-Z])").expect("invalid key pattern")
});

static UNDERSCORE_RUNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_+").expect("invalid key pattern")
});

/// Convert a raw field name to its canonical snake_case form.
///
/// Dots and any other non-alphanumeric characters become underscores, so
/// `meta.x` and `meta_x` collapse onto the same canonical field.
pub fn canonical_key(name: &str) -> String {
    let s = NON_ALNUM.replace_all(name, "_");
    let s = ACRONYM_BOUNDARY.replace_all(&s, "${1}_${2}");
    let s = CAMEL_BOUNDARY.replace_all(&s, "${1}_${2}");
    let s = s.to_ascii_lowercase();
    let s = UNDERSCORE_RUNS.replace_all(&s, "_");
    s.trim_matches('_').to_owned()
}

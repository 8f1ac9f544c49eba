use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

// The well-known join keys adapters are expected to surface, with tolerant
// separators between name and value (`=`, `:`, `-`, `_`). Names themselves may
// be written with `_`, `-` or nothing between the words; the canonical form
// uses underscores.
static JOIN_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?ix)
        \b(request[_-]?id|trace[_-]?id|session[_-]?id|correlation[_-]?id|span[_-]?id)
        \s*[=:_-]\s*
        "?([A-Za-z0-9][A-Za-z0-9._-]*)"?
        "#,
    )
    .expect("join key regex is well-formed")
});

fn canonical(name: &str) -> String {
    let lower = name.to_ascii_lowercase().replace('-', "_");
    if lower.contains('_') {
        lower
    } else {
        // "requestid" -> "request_id"
        let split = lower.len() - 2;
        format!("{}_{}", &lower[..split], &lower[split..])
    }
}

/// Scan a raw log message for the common join-key patterns.
///
/// Adapters call this once per event so that all sources extract keys the same
/// way; the engine itself never requires any particular key to be present.
/// The first occurrence of each key wins.
pub fn scan_join_keys(message: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for cap in JOIN_KEY_RE.captures_iter(message) {
        let name = canonical(&cap[1]);
        out.entry(name).or_insert_with(|| cap[2].to_owned());
    }
    out
}

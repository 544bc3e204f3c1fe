//! Run identifiers and filesystem-safe name components.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use crate::error::{Result, StoreError};

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-zA-Z0-9_.-]+").expect("static regex")
});

const MAX_COMPONENT_LEN: usize = 128;

/// Replace runs of unsafe characters with `_` and trim leading/trailing `._-`.
/// Returns an empty string when nothing usable remains.
pub fn safe_component(raw: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(raw, "_");
    let trimmed = replaced.trim_matches(|c| c == '.' || c == '_' || c == '-');
    trimmed.chars().take(MAX_COMPONENT_LEN).collect()
}

/// `<prefix>_<YYYYmmdd_HHMMSS>_<8 hex>`, UTC.
pub fn new_run_id(prefix: &str) -> String {
    let prefix = match safe_component(prefix) {
        p if p.is_empty() => "run".to_string(),
        p => p,
    };
    let ts = Utc::now().format("%Y%m%d_%H%M%S");
    let rand = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{ts}_{}", &rand[..8])
}

/// Validate a caller-supplied run id. Ids must already be safe: silently
/// rewriting them would let two distinct ids address one directory.
pub fn normalize_run_id(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || safe_component(trimmed) != trimmed {
        return Err(StoreError::InvalidRunId(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_component() {
        assert_eq!(safe_component("design #1/ A"), "design_1_A");
        assert_eq!(safe_component("..hidden"), "hidden");
        assert_eq!(safe_component("///"), "");
    }

    #[test]
    fn test_new_run_id_shape() {
        let id = new_run_id("pipe line");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts[0], "pipe");
        assert_eq!(parts[1], "line");
        assert_eq!(parts[2].len(), 8);
        assert_eq!(parts[3].len(), 6);
        assert_eq!(parts[4].len(), 8);
        assert!(new_run_id("").starts_with("run_"));
    }

    #[test]
    fn test_normalize_run_id_rejects_unsafe() {
        assert_eq!(normalize_run_id(" run_1 ").unwrap(), "run_1");
        assert!(normalize_run_id("../etc").is_err());
        assert!(normalize_run_id("a/b").is_err());
        assert!(normalize_run_id("..").is_err());
        assert!(normalize_run_id("").is_err());
    }
}

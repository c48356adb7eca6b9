//! The glob mini-language of AuthorizationPolicy string fields
//!
//! Not to be confused with `StringMatch` used by VirtualService routing: there
//! is no regex here, only presence, prefix, suffix and exact matching.

/// Match `value` against an AuthorizationPolicy pattern.
///
/// Rules, first match wins:
/// - `*` matches any non-empty value
/// - `abc*` matches values starting with `abc`
/// - `*abc` matches values ending with `abc`
/// - anything else must equal the value exactly
pub fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return !value.is_empty();
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return value.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return value.ends_with(suffix);
    }
    pattern == value
}

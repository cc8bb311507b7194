//! Node-name pattern expansion: `prefix[lo-hi]` → the enumerated host list.
//!
//! Grammar (spec §4.A): a bracket expression expands to `prefix%0Nd` for
//! `lo..=hi`, where `N` is the zero-padded width of `lo` as written. A
//! backslash before `[` or `]` is a literal bracket, not the start/end of a
//! range. Anything else inside brackets — missing hyphen, non-numeric
//! bounds, `lo > hi` — is `invalid-name`.

use crate::error::{ClusterError, ClusterResult};

/// Expand a single hostlist pattern into its component node names, in order.
pub fn expand(pattern: &str) -> ClusterResult<Vec<String>> {
    let bytes = pattern.as_bytes();
    let mut prefix = String::new();
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() && (bytes[i + 1] == b'[' || bytes[i + 1] == b']') => {
                prefix.push(bytes[i + 1] as char);
                i += 2;
            }
            b'[' => {
                let close = pattern[i..].find(']').map(|p| p + i).ok_or_else(|| {
                    ClusterError::InvalidInput(format!("invalid-name: unclosed '[' in {pattern}"))
                })?;
                if close != bytes.len() - 1 {
                    return Err(ClusterError::InvalidInput(format!(
                        "invalid-name: trailing characters after ']' in {pattern}"
                    )));
                }
                let body = &pattern[i + 1..close];
                return expand_range(&prefix, body, pattern);
            }
            c => {
                prefix.push(c as char);
                i += 1;
            }
        }
    }
    // No bracket expression: the pattern is a single literal host name.
    Ok(vec![prefix])
}

fn expand_range(prefix: &str, body: &str, original: &str) -> ClusterResult<Vec<String>> {
    let (lo_str, hi_str) = body.split_once('-').ok_or_else(|| {
        ClusterError::InvalidInput(format!("invalid-name: missing '-' in range of {original}"))
    })?;

    if lo_str.is_empty() || hi_str.is_empty() || !lo_str.bytes().all(|b| b.is_ascii_digit())
        || !hi_str.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(ClusterError::InvalidInput(format!(
            "invalid-name: non-numeric bound in {original}"
        )));
    }

    let width = lo_str.len();
    let lo: u64 = lo_str
        .parse()
        .map_err(|_| ClusterError::InvalidInput(format!("invalid-name: bad lo in {original}")))?;
    let hi: u64 = hi_str
        .parse()
        .map_err(|_| ClusterError::InvalidInput(format!("invalid-name: bad hi in {original}")))?;

    if lo > hi {
        return Err(ClusterError::InvalidInput(format!(
            "invalid-name: lo {lo} overflows past hi {hi} in {original}"
        )));
    }

    Ok((lo..=hi)
        .map(|n| format!("{prefix}{n:0width$}"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_zero_padded_range() {
        let names = expand("compute[008-011]").unwrap();
        assert_eq!(names, vec!["compute008", "compute009", "compute010", "compute011"]);
    }

    #[test]
    fn single_host_with_no_brackets() {
        assert_eq!(expand("lx42").unwrap(), vec!["lx42"]);
    }

    #[test]
    fn escaped_bracket_is_literal() {
        assert_eq!(expand("weird\\[name\\]").unwrap(), vec!["weird[name]"]);
    }

    #[test]
    fn missing_hyphen_fails() {
        assert!(expand("lx[0008]").is_err());
    }

    #[test]
    fn lo_greater_than_hi_fails() {
        assert!(expand("lx[9-1]").is_err());
    }

    #[test]
    fn non_numeric_bound_fails() {
        assert!(expand("lx[a-9]").is_err());
    }

    #[test]
    fn width_follows_lo_literal_width() {
        let names = expand("lx[0-3]").unwrap();
        assert_eq!(names, vec!["lx0", "lx1", "lx2", "lx3"]);
    }
}

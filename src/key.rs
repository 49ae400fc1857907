//! Composite key building.
//!
//! Joins the values produced by the key extractors into the lookup key
//! used to address stored response variants. Cardinality is fixed by the
//! endpoint's component count: components that yielded nothing keep an
//! empty placeholder so the delimiter count never varies.

use crate::config::KeyGeneratingStrategy;

/// Delimiter between key components. Stored `data_key` values use the
/// same delimiter and cardinality.
pub const KEY_DELIMITER: &str = "/";

/// Build the composite key from extracted component values.
pub fn build(values: &[Option<String>], strategy: KeyGeneratingStrategy) -> String {
    match strategy {
        KeyGeneratingStrategy::Concat => values
            .iter()
            .map(|v| v.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join(KEY_DELIMITER),
    }
}

/// The wildcard form of a composite key: identical cardinality, every
/// component blank. Matches endpoint-wide default variants.
pub fn wildcard(key: &str) -> String {
    key.split(KEY_DELIMITER)
        .map(|_| "")
        .collect::<Vec<_>>()
        .join(KEY_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_joins_with_delimiter() {
        let values = vec![Some("42".to_string()), Some("acme".to_string())];
        assert_eq!(build(&values, KeyGeneratingStrategy::Concat), "42/acme");
    }

    #[test]
    fn test_build_preserves_empty_placeholders() {
        let values = vec![Some("42".to_string()), None, Some("x".to_string())];
        assert_eq!(build(&values, KeyGeneratingStrategy::Concat), "42//x");
    }

    #[test]
    fn test_cardinality_is_stable_when_nothing_extracts() {
        let values = vec![None, None, None];
        assert_eq!(build(&values, KeyGeneratingStrategy::Concat), "//");
    }

    #[test]
    fn test_single_component() {
        let values = vec![Some("42".to_string())];
        assert_eq!(build(&values, KeyGeneratingStrategy::Concat), "42");
        assert_eq!(build(&[None], KeyGeneratingStrategy::Concat), "");
    }

    #[test]
    fn test_wildcard_keeps_delimiter_count() {
        assert_eq!(wildcard("42/acme"), "/");
        assert_eq!(wildcard("a/b/c"), "//");
        assert_eq!(wildcard("42"), "");
        assert_eq!(wildcard(""), "");
    }

    #[test]
    fn test_all_empty_key_equals_its_own_wildcard() {
        let values = vec![None, None];
        let key = build(&values, KeyGeneratingStrategy::Concat);
        assert_eq!(key, wildcard(&key));
    }
}

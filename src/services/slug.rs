//! URL slug generation for course titles

/// Maximum slug length in characters
pub const MAX_SLUG_LENGTH: usize = 80;

/// Turn a title into a lowercase, hyphen-separated slug.
///
/// ASCII letters and digits are kept, non-ASCII letters are kept as-is,
/// everything else becomes a single hyphen. Leading and trailing hyphens are
/// removed.
pub fn generate_slug(title: &str) -> String {
    let mut result = String::new();
    let mut prev_hyphen = false;

    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || (!c.is_ascii() && c.is_alphanumeric()) {
            result.push(c);
            prev_hyphen = false;
        } else if !prev_hyphen && !result.is_empty() {
            result.push('-');
            prev_hyphen = true;
        }

        if result.chars().count() >= MAX_SLUG_LENGTH {
            break;
        }
    }

    result.trim_end_matches('-').to_string()
}

/// A slug is valid when it is what `generate_slug` would produce for itself
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty() && generate_slug(slug) == slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generate_slug() {
        assert_eq!(generate_slug("Rust for Beginners"), "rust-for-beginners");
        assert_eq!(generate_slug("  C++ & Rust: Interop!  "), "c-rust-interop");
        assert_eq!(generate_slug("Café Crème"), "café-crème");
        assert_eq!(generate_slug("!!!"), "");
    }

    #[test]
    fn test_is_valid_slug() {
        assert!(is_valid_slug("rust-101"));
        assert!(!is_valid_slug("Rust 101"));
        assert!(!is_valid_slug("-rust"));
        assert!(!is_valid_slug(""));
    }

    proptest! {
        #[test]
        fn property_slug_has_no_edge_or_double_hyphens(title in ".{0,120}") {
            let slug = generate_slug(&title);
            prop_assert!(!slug.starts_with('-'));
            prop_assert!(!slug.ends_with('-'));
            prop_assert!(!slug.contains("--"));
            prop_assert!(slug.chars().count() <= MAX_SLUG_LENGTH);
        }

        #[test]
        fn property_slug_is_idempotent(title in "[a-zA-Z0-9 _.,!-]{0,60}") {
            let slug = generate_slug(&title);
            prop_assert_eq!(generate_slug(&slug), slug);
        }
    }
}

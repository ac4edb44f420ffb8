//! Small helpers shared across the engine: identifier validation, column
//! case conversion, and case-insensitive affix stripping used by the
//! trimming SQL nodes.

/// Validates whether a string is a valid SQL identifier.
///
/// A valid identifier must:
/// - Be non-empty
/// - Start with an alphabetic character or underscore
/// - Contain only alphanumeric characters or underscores
#[must_use]
pub fn is_valid_ident(name: &str) -> bool {
    !name.is_empty()
        && name.starts_with(|c: char| c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Converts a `snake_case` (or `SCREAMING_SNAKE`) column name to
/// `lowerCamelCase`. Characters following an underscore are upcased, all
/// others are downcased; underscores themselves are dropped.
#[must_use]
pub fn camel_case(column: &str) -> String {
    let mut out = String::with_capacity(column.len());
    let mut upper_next = false;
    for c in column.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

pub trait StripAffixIgnoreAsciiCase {
    fn strip_prefix_ignore_ascii_case(&self, prefix: &str) -> Option<&str>;
    fn strip_suffix_ignore_ascii_case(&self, suffix: &str) -> Option<&str>;
}

impl<T: AsRef<str> + ?Sized> StripAffixIgnoreAsciiCase for T {
    fn strip_prefix_ignore_ascii_case(&self, prefix: &str) -> Option<&str> {
        let s = self.as_ref();
        s.get(..prefix.len())
            .filter(|head| head.eq_ignore_ascii_case(prefix))
            .map(|_| &s[prefix.len()..])
    }

    fn strip_suffix_ignore_ascii_case(&self, suffix: &str) -> Option<&str> {
        let s = self.as_ref();
        s.len()
            .checked_sub(suffix.len())
            .and_then(|cut| s.get(cut..).map(|tail| (cut, tail)))
            .filter(|(_, tail)| tail.eq_ignore_ascii_case(suffix))
            .map(|(cut, _)| &s[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_ident() {
        assert!(is_valid_ident("users"));
        assert!(is_valid_ident("_tmp_2"));
        assert!(!is_valid_ident(""));
        assert!(!is_valid_ident("2fast"));
        assert!(!is_valid_ident("users; DROP TABLE"));
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("author_id"), "authorId");
        assert_eq!(camel_case("NAME"), "name");
        assert_eq!(camel_case("created_at_ts"), "createdAtTs");
        assert_eq!(camel_case("plain"), "plain");
    }

    #[test]
    fn test_strip_affix() {
        assert_eq!("AND id=1".strip_prefix_ignore_ascii_case("and "), Some("id=1"));
        assert_eq!("and id=1".strip_prefix_ignore_ascii_case("AND "), Some("id=1"));
        assert_eq!("OR id=1".strip_prefix_ignore_ascii_case("AND "), None);
        assert_eq!("a = 1,".strip_suffix_ignore_ascii_case(","), Some("a = 1"));
        assert_eq!("short".strip_prefix_ignore_ascii_case("much longer"), None);
    }
}

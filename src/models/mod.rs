pub mod message;
pub mod notification;
pub mod user;

/// Length limit of the `VARCHAR(255)` text columns.
pub const VARCHAR_MAX: usize = 255;

/// Cut `s` to at most `max` characters without splitting a character.
pub fn truncate_chars(mut s: String, max: usize) -> String {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_keeps_short_strings() {
        assert_eq!(truncate_chars("Printer".into(), 255), "Printer");
        assert_eq!(truncate_chars(String::new(), 3), "");
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let s = "äöü".repeat(100);
        let cut = truncate_chars(s, VARCHAR_MAX);
        assert_eq!(cut.chars().count(), VARCHAR_MAX);
        assert!(cut.len() > VARCHAR_MAX);
    }

    #[test]
    fn test_truncate_exact_limit_is_untouched() {
        let s = "x".repeat(VARCHAR_MAX);
        assert_eq!(truncate_chars(s.clone(), VARCHAR_MAX), s);
    }
}

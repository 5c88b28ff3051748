use regex::Regex;
use std::sync::LazyLock;

static ISSUE_KEY: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9]*-[0-9]+$").ok());

/// Returns true when `key` looks like a remote issue key (`PROJ-123`, `AB2-7`).
///
/// The project part starts with an uppercase ASCII letter and continues with
/// uppercase letters or digits; the number part is one or more digits.
#[must_use]
pub fn is_valid_issue_key(key: &str) -> bool {
    ISSUE_KEY.as_ref().is_some_and(|re| re.is_match(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_conventional_keys() {
        assert!(is_valid_issue_key("PROJ-123"));
        assert!(is_valid_issue_key("A-1"));
        assert!(is_valid_issue_key("EGISZREMD-9021"));
        assert!(is_valid_issue_key("AB2C-7"));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(!is_valid_issue_key(""));
        assert!(!is_valid_issue_key("proj-123"));
        assert!(!is_valid_issue_key("2PROJ-1"));
        assert!(!is_valid_issue_key("PROJ-"));
        assert!(!is_valid_issue_key("PROJ123"));
        assert!(!is_valid_issue_key("PROJ-12a"));
        assert!(!is_valid_issue_key(" PROJ-1"));
    }
}

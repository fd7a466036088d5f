//! Sanitization of user-controlled strings before they reach log fields.
//!
//! Annotation values and API error messages flow into structured log
//! output; stripping control characters keeps a hostile value from
//! injecting fake log lines or terminal escapes.

/// Drop non-printable characters (including newlines and ANSI escapes).
pub fn for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}

/// Sanitize an error's rendered message.
pub fn error_message(err: &dyn std::error::Error) -> String {
    for_logging(&err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_plain_text() {
        assert_eq!(for_logging("10Gi at 85%"), "10Gi at 85%");
    }

    #[test]
    fn strips_newlines_and_escapes() {
        assert_eq!(
            for_logging("value\ninjected=\"true\"\r\x1b[31m"),
            "valueinjected=\"true\"[31m"
        );
    }

    #[test]
    fn keeps_unicode() {
        assert_eq!(for_logging("naïve-claim"), "naïve-claim");
    }
}

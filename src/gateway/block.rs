use regex::RegexSet;
use std::sync::OnceLock;

/// Status codes treated as an upstream block on their own, per SPEC_FULL.md §4.F.
const BLOCK_STATUSES: &[u16] = &[403, 407, 429, 503];

const BODY_SNIFF_LIMIT: usize = 5 * 1024;

const LOCATION_PATTERNS: &[&str] = &["/cdn-cgi/challenge", "/challenge", "captcha", "recaptcha"];

fn body_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)cloudflare",
            r"(?i)captcha",
            r"(?i)access denied",
            r"(?i)blocked",
            r"(?i)unusual traffic",
            r"(?i)rate limit",
            r"(?i)banned",
            r"(?i)forbidden",
        ])
        .expect("block detection body patterns must compile")
    })
}

/// Classifies a response as blocked per the status/body/Location rules. Body
/// is sniffed only up to the first 5 KB, matching the upstream spec.
pub fn is_blocked(status: u16, body: &str, location: Option<&str>) -> bool {
    if BLOCK_STATUSES.contains(&status) {
        return true;
    }

    let mut sniff_len = body.len().min(BODY_SNIFF_LIMIT);
    while sniff_len > 0 && !body.is_char_boundary(sniff_len) {
        sniff_len -= 1;
    }
    let sniffed = &body[..sniff_len];
    if body_patterns().is_match(sniffed) {
        return true;
    }

    if let Some(loc) = location {
        let lower = loc.to_lowercase();
        if LOCATION_PATTERNS.iter().any(|p| lower.contains(p)) {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_status_codes_are_detected() {
        for status in [403, 407, 429, 503] {
            assert!(is_blocked(status, "hello", None));
        }
        assert!(!is_blocked(200, "hello", None));
    }

    #[test]
    fn captcha_body_is_detected_case_insensitively() {
        assert!(is_blocked(200, "Please solve the captcha", None));
        assert!(!is_blocked(200, "hello", None));
    }

    #[test]
    fn body_sniff_window_is_capped_at_five_kilobytes() {
        let mut body = "a".repeat(6000);
        body.push_str("captcha");
        assert!(!is_blocked(200, &body, None));
    }

    #[test]
    fn location_header_patterns_are_detected() {
        assert!(is_blocked(302, "", Some("https://example.com/cdn-cgi/challenge")));
        assert!(is_blocked(302, "", Some("https://example.com/recaptcha/v2")));
        assert!(!is_blocked(302, "", Some("https://example.com/login")));
    }
}

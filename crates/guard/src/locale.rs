//! Locale negotiation
//!
//! Parses `Accept-Language` per RFC 9110 §12.5.4, filters to the
//! supported set and picks the highest-quality match. An explicit
//! override (`X-User-Locale` header or `?locale=`) wins when it is in
//! the supported set; otherwise it is ignored. Invalid tags are skipped.

/// Locale negotiator over a fixed supported set
#[derive(Debug, Clone)]
pub struct LocaleNegotiator {
    supported: Vec<String>,
    default: String,
}

impl LocaleNegotiator {
    pub fn new(supported: Vec<String>, default: impl Into<String>) -> Self {
        Self { supported, default: default.into() }
    }

    pub fn default_locale(&self) -> &str {
        &self.default
    }

    pub fn supported(&self) -> &[String] {
        &self.supported
    }

    /// Whether a tag is in the supported set (case-insensitive)
    pub fn is_supported(&self, tag: &str) -> bool {
        self.supported.iter().any(|s| s.eq_ignore_ascii_case(tag))
    }

    /// Negotiate the locale for a request
    pub fn negotiate(
        &self,
        accept_language: Option<&str>,
        override_locale: Option<&str>,
    ) -> String {
        if let Some(tag) = override_locale {
            if let Some(supported) = self.canonical(tag) {
                return supported;
            }
            tracing::debug!(locale = tag, "Locale override not supported, ignoring");
        }

        if let Some(header) = accept_language {
            for (tag, _q) in parse_accept_language(header) {
                if tag == "*" {
                    return self.default.clone();
                }
                if let Some(supported) = self.canonical(&tag) {
                    return supported;
                }
                // Language-only tags match the first supported region
                // variant, e.g. `de` -> `de-DE`.
                if !tag.contains('-') {
                    if let Some(supported) = self
                        .supported
                        .iter()
                        .find(|s| s.to_ascii_lowercase().starts_with(&format!("{}-", tag)))
                    {
                        return supported.clone();
                    }
                }
            }
        }

        self.default.clone()
    }

    /// Supported-set spelling of a tag, if present
    fn canonical(&self, tag: &str) -> Option<String> {
        self.supported
            .iter()
            .find(|s| s.eq_ignore_ascii_case(tag))
            .cloned()
    }
}

/// Parse an Accept-Language header into `(tag, q)` pairs, best first
///
/// Malformed entries and out-of-range q-values are dropped.
pub fn parse_accept_language(header: &str) -> Vec<(String, f32)> {
    let mut tags: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.trim().split(';');
            let tag = parts.next()?.trim();
            if tag.is_empty() || !is_valid_tag(tag) {
                return None;
            }

            let mut quality = 1.0f32;
            for param in parts {
                let param = param.trim();
                if let Some(value) = param.strip_prefix("q=") {
                    quality = value.trim().parse().ok()?;
                }
            }
            if !(0.0..=1.0).contains(&quality) {
                return None;
            }
            Some((tag.to_ascii_lowercase(), quality))
        })
        .collect();

    // Stable sort keeps header order for equal qualities.
    tags.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    tags.retain(|(_, q)| *q > 0.0);
    tags
}

/// BCP-47-shaped check: alphanumeric subtags joined by hyphens, or `*`
fn is_valid_tag(tag: &str) -> bool {
    if tag == "*" {
        return true;
    }
    if tag.len() > 35 {
        return false;
    }
    tag.split('-').all(|subtag| {
        !subtag.is_empty() && subtag.len() <= 8 && subtag.chars().all(|c| c.is_ascii_alphanumeric())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiator() -> LocaleNegotiator {
        LocaleNegotiator::new(
            vec![
                "en-US".to_string(),
                "en-GB".to_string(),
                "de-DE".to_string(),
                "fr-FR".to_string(),
            ],
            "en-US",
        )
    }

    #[test]
    fn test_quality_ordering() {
        let parsed = parse_accept_language("fr-FR;q=0.8, de-DE;q=0.9, en-US;q=0.7");
        assert_eq!(parsed[0].0, "de-de");
        assert_eq!(parsed[1].0, "fr-fr");
        assert_eq!(parsed[2].0, "en-us");
    }

    #[test]
    fn test_negotiate_picks_highest_supported() {
        let locale = negotiator().negotiate(Some("ja-JP, de-DE;q=0.9, en-US;q=0.5"), None);
        assert_eq!(locale, "de-DE");
    }

    #[test]
    fn test_language_prefix_match() {
        let locale = negotiator().negotiate(Some("de"), None);
        assert_eq!(locale, "de-DE");
    }

    #[test]
    fn test_override_in_supported_set_wins() {
        let locale = negotiator().negotiate(Some("de-DE"), Some("fr-FR"));
        assert_eq!(locale, "fr-FR");
    }

    #[test]
    fn test_override_outside_supported_set_ignored() {
        let locale = negotiator().negotiate(Some("de-DE"), Some("xx-XX"));
        assert_eq!(locale, "de-DE");
    }

    #[test]
    fn test_invalid_tags_skipped() {
        let parsed = parse_accept_language("en_US, de-DE, !!!, en-US;q=banana");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "de-de");
    }

    #[test]
    fn test_wildcard_and_fallback() {
        assert_eq!(negotiator().negotiate(Some("*"), None), "en-US");
        assert_eq!(negotiator().negotiate(Some("ja-JP, ko-KR"), None), "en-US");
        assert_eq!(negotiator().negotiate(None, None), "en-US");
    }

    #[test]
    fn test_zero_quality_excluded() {
        let parsed = parse_accept_language("de-DE;q=0, en-US;q=0.5");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, "en-us");
    }

    #[test]
    fn test_case_insensitive_support_lookup() {
        let locale = negotiator().negotiate(Some("DE-de"), None);
        assert_eq!(locale, "de-DE");
    }
}

//! Parameterised reference lookups.
//!
//! A probe names the record family to search and a set of alternative
//! matchers; it matches when any text column of any non-excluded record in
//! that family satisfies any matcher. Backends narrow candidate rows in SQL
//! and confirm every row with [`Matcher::matches`], so all dialects share the
//! same semantics.

use regex::Regex;

use crate::model::MediaId;

/// Record family a probe searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSource {
    /// Featured-image metadata of other, non-trashed posts
    Thumbnail,
    /// Body and summary of other, non-trashed, eligible posts
    PostContent,
    /// Metadata values of other, non-trashed posts
    PostMeta,
    /// Term metadata values
    TermMeta,
    /// Site-wide options (internal sweep records excluded)
    Options,
    /// Comment bodies not attached to the excluded post
    Comments,
}

/// One way a stored text can reference a media object.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// The whole value equals the text
    Exact(String),
    /// The value contains the text, ignoring case
    Contains(String),
    /// The value contains `needle` and matches `pattern`
    Pattern { needle: String, pattern: Regex },
}

impl Matcher {
    /// Literal text SQL can pre-filter on.
    pub fn needle(&self) -> &str {
        match self {
            Matcher::Exact(text) | Matcher::Contains(text) => text,
            Matcher::Pattern { needle, .. } => needle,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Matcher::Exact(_))
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Exact(text) => value == text,
            Matcher::Contains(text) => value.to_lowercase().contains(&text.to_lowercase()),
            Matcher::Pattern { needle, pattern } => {
                value.contains(needle.as_str()) && pattern.is_match(value)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceProbe {
    pub source: ReferenceSource,
    pub matchers: Vec<Matcher>,
}

impl ReferenceProbe {
    pub fn new(source: ReferenceSource) -> Self {
        Self {
            source,
            matchers: Vec::new(),
        }
    }

    pub fn with(mut self, matcher: Matcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Add a substring matcher for each present text, skipping empty ones.
    pub fn with_substrings<I, S>(mut self, texts: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        for text in texts.into_iter().flatten() {
            let text = text.into();
            if !text.is_empty() {
                self.matchers.push(Matcher::Contains(text));
            }
        }
        self
    }

    /// Whether any matcher accepts any of the given column values.
    pub fn matches_any<'a>(&self, values: impl IntoIterator<Item = Option<&'a str>>) -> bool {
        values
            .into_iter()
            .flatten()
            .any(|value| self.matchers.iter().any(|m| m.matches(value)))
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

/// Regex accepting `id` only as a whole number: digits may not touch it on
/// either side, so 12 does not match inside 120 or 512.
pub fn numeric_token_pattern(id: MediaId) -> Result<Regex, regex::Error> {
    Regex::new(&format!("(?:^|[^0-9]){id}(?:[^0-9]|$)"))
}

/// Exact value or boundary-delimited numeric token.
pub fn numeric_id_matchers(id: MediaId) -> Result<Vec<Matcher>, regex::Error> {
    let digits = id.to_string();
    Ok(vec![
        Matcher::Exact(digits.clone()),
        Matcher::Pattern {
            needle: digits,
            pattern: numeric_token_pattern(id)?,
        },
    ])
}

/// Escape `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len() + 2);
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_boundary() {
        let probe = ReferenceProbe {
            source: ReferenceSource::PostMeta,
            matchers: numeric_id_matchers(12).unwrap(),
        };

        assert!(probe.matches_any([Some("12")]));
        assert!(probe.matches_any([Some("id:12,")]));
        assert!(probe.matches_any([Some("a:1:{i:0;i:12;}")]));
        assert!(probe.matches_any([Some("[3,12]")]));

        assert!(!probe.matches_any([Some("120")]));
        assert!(!probe.matches_any([Some("512")]));
        assert!(!probe.matches_any([Some("1212")]));
        assert!(!probe.matches_any([None]));
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let matcher = Matcher::Contains("Cat.JPG".to_string());
        assert!(matcher.matches("<img src=\"/uploads/cat.jpg\">"));
        assert!(!matcher.matches("<img src=\"/uploads/dog.jpg\">"));
    }

    #[test]
    fn test_contains_folds_non_ascii_case() {
        // PostgreSQL's LOWER() folds these too, so its matches must confirm
        let matcher = Matcher::Contains("/uploads/Ärger-Über.jpg".to_string());
        assert!(matcher.matches("see /uploads/ärger-über.jpg"));
        assert!(matcher.matches("SEE /UPLOADS/ÄRGER-ÜBER.JPG"));
        assert!(!matcher.matches("see /uploads/arger-uber.jpg"));
    }

    #[test]
    fn test_with_substrings_skips_missing_and_empty() {
        let probe = ReferenceProbe::new(ReferenceSource::Options)
            .with_substrings([Some("https://x/a.png"), None, Some("")]);
        assert_eq!(probe.matchers.len(), 1);
        assert_eq!(probe.matchers[0].needle(), "https://x/a.png");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("my_file%1.jpg"), "my\\_file\\%1.jpg");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
        assert_eq!(escape_like("plain"), "plain");
    }
}

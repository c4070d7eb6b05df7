use imgup_core::Record;

/// Characters accepted as "any sequence" in a search pattern.
const WILDCARDS: [char; 2] = ['*', '%'];

/// Escape character used in the generated SQL `LIKE` patterns.
pub const LIKE_ESCAPE: char = '\\';

/// A search pattern over a text field.
///
/// `*` and `%` both match any sequence of characters. A pattern without
/// a wildcard matches anywhere in the field, so `Mario` behaves like
/// `*Mario*`. Matching ignores ASCII case. Every other character, `_`
/// included, is literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
}

impl Pattern {
    /// Build a pattern from user input.
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The pattern as supplied.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn has_wildcard(&self) -> bool {
        self.raw.contains(WILDCARDS)
    }

    /// Test `value` against the pattern.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        let pattern = self.raw.to_ascii_lowercase();
        let value = value.to_ascii_lowercase();

        if !self.has_wildcard() {
            return value.contains(&pattern);
        }

        let parts: Vec<&str> = pattern.split(WILDCARDS).collect();
        let [first, middle @ .., last] = parts.as_slice() else {
            return value.contains(&pattern);
        };
        let Some(mut remaining) = value.strip_prefix(first) else {
            return false;
        };

        for part in middle {
            match remaining.find(part) {
                Some(pos) => remaining = &remaining[pos + part.len()..],
                None => return false,
            }
        }

        remaining.ends_with(last)
    }

    /// Render the pattern for a SQL `LIKE ... ESCAPE '\'` clause.
    #[must_use]
    pub fn to_like(&self) -> String {
        let mut out = String::with_capacity(self.raw.len() + 2);
        let substring = !self.has_wildcard();

        if substring {
            out.push('%');
        }
        for c in self.raw.chars() {
            match c {
                c if WILDCARDS.contains(&c) => out.push('%'),
                '_' | LIKE_ESCAPE => {
                    out.push(LIKE_ESCAPE);
                    out.push(c);
                }
                c => out.push(c),
            }
        }
        if substring {
            out.push('%');
        }
        out
    }
}

impl From<&str> for Pattern {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Pattern {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Title and author filters for a search. An absent filter matches every
/// record; when both are present a record must match both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Pattern applied to the record title.
    pub title: Option<Pattern>,
    /// Pattern applied to the record author.
    pub author: Option<Pattern>,
}

impl SearchFilter {
    /// A filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict results to titles matching `pattern`.
    #[must_use]
    pub fn with_title(mut self, pattern: impl Into<Pattern>) -> Self {
        self.title = Some(pattern.into());
        self
    }

    /// Restrict results to authors matching `pattern`.
    #[must_use]
    pub fn with_author(mut self, pattern: impl Into<Pattern>) -> Self {
        self.author = Some(pattern.into());
        self
    }

    /// Returns `true` if neither field is filtered.
    #[must_use]
    pub fn is_unfiltered(&self) -> bool {
        self.title.is_none() && self.author.is_none()
    }

    /// Test a record against both filters. Visibility is not considered.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.title.as_ref().is_none_or(|p| p.matches(&record.title))
            && self.author.as_ref().is_none_or(|p| p.matches(&record.author))
    }

    /// `LIKE` pattern for the title column; `%` when unfiltered.
    #[must_use]
    pub fn title_like(&self) -> String {
        self.title.as_ref().map_or_else(|| "%".to_owned(), Pattern::to_like)
    }

    /// `LIKE` pattern for the author column; `%` when unfiltered.
    #[must_use]
    pub fn author_like(&self) -> String {
        self.author.as_ref().map_or_else(|| "%".to_owned(), Pattern::to_like)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_substring() {
        let p = Pattern::new("Mario");
        assert!(p.matches("Mario"));
        assert!(p.matches("Super Mario Bros"));
        assert!(!p.matches("Luigi"));
    }

    #[test]
    fn matching_ignores_ascii_case() {
        let p = Pattern::new("mario");
        assert!(p.matches("MARIO"));
        assert!(p.matches("Super Mario"));
    }

    #[test]
    fn empty_pattern_matches_everything() {
        assert!(Pattern::new("").matches(""));
        assert!(Pattern::new("").matches("anything"));
    }

    #[test]
    fn wildcards_anchor_the_ends() {
        let p = Pattern::new("Super*");
        assert!(p.matches("Super Mario"));
        assert!(!p.matches("The Super Mario"));

        let p = Pattern::new("*Mario");
        assert!(p.matches("Super Mario"));
        assert!(!p.matches("Mario Kart"));

        let p = Pattern::new("S%o");
        assert!(p.matches("Super Mario"));
        assert!(!p.matches("Super Luigi"));
    }

    #[test]
    fn middle_parts_must_appear_in_order() {
        let p = Pattern::new("*a*b*");
        assert!(p.matches("xaxbx"));
        assert!(!p.matches("xbxax"));
    }

    #[test]
    fn overlapping_prefix_and_suffix() {
        let p = Pattern::new("ab*ba");
        assert!(p.matches("abba"));
        assert!(p.matches("ab-ba"));
        assert!(!p.matches("aba"));
    }

    #[test]
    fn lone_wildcard_matches_everything() {
        assert!(Pattern::new("*").matches(""));
        assert!(Pattern::new("%").matches("whatever"));
    }

    #[test]
    fn underscore_is_literal() {
        let p = Pattern::new("a_c");
        assert!(p.matches("a_c"));
        assert!(!p.matches("abc"));
    }

    #[test]
    fn like_rendering() {
        assert_eq!(Pattern::new("Mario").to_like(), "%Mario%");
        assert_eq!(Pattern::new("Super*").to_like(), "Super%");
        assert_eq!(Pattern::new("a%b").to_like(), "a%b");
        assert_eq!(Pattern::new("a_b").to_like(), "%a\\_b%");
        assert_eq!(Pattern::new("a\\b").to_like(), "%a\\\\b%");
    }

    #[test]
    fn filter_defaults_to_match_all() {
        let f = SearchFilter::new();
        assert!(f.is_unfiltered());
        assert_eq!(f.title_like(), "%");
        assert_eq!(f.author_like(), "%");
    }

    #[test]
    fn filter_requires_both_fields() {
        let rec = imgup_core::NewRecord::new(&b"x"[..])
            .with_title("Super Mario")
            .with_author("Mario")
            .to_record("id".into(), chrono::Utc::now());

        assert!(SearchFilter::new().with_author("Mario").matches(&rec));
        assert!(
            SearchFilter::new()
                .with_title("Super")
                .with_author("Mario")
                .matches(&rec)
        );
        assert!(
            !SearchFilter::new()
                .with_title("Super")
                .with_author("Luigi")
                .matches(&rec)
        );
    }
}

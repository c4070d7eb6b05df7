use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::lifetime::Lifetime;

/// Title stored when the uploader leaves it blank.
pub const DEFAULT_TITLE: &str = "Untitled";

/// Author stored when the uploader leaves it blank.
pub const DEFAULT_AUTHOR: &str = "Anonymous";

/// A stored upload.
///
/// Records are immutable once inserted: the store only creates, reads,
/// lists and expires them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Server-assigned public identifier. Holding it is enough to fetch the
    /// record, whatever its visibility.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Display author.
    pub author: String,
    /// Raw uploaded content. Never empty.
    pub data: Bytes,
    /// Original file name, independent of `id`.
    pub filename: String,
    /// When the store accepted the record.
    pub created_at: DateTime<Utc>,
    /// Whether the record appears in listings and search results.
    pub visible: bool,
    /// Retention window in seconds, counted from `created_at`.
    pub duration: u64,
}

impl Record {
    /// Size of the stored content in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the record holds no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The instant at which the record becomes eligible for sweeping.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        let secs = i64::try_from(self.duration).unwrap_or(i64::MAX);
        chrono::TimeDelta::try_seconds(secs)
            .and_then(|d| self.created_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns `true` once `now - created_at >= duration`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Whole seconds left before expiry, saturating at zero.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> u64 {
        let left = self.expires_at().signed_duration_since(now).num_seconds();
        u64::try_from(left).unwrap_or(0)
    }
}

/// A record as submitted by an uploader, before the store assigns its id
/// and creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    /// Requested title; blank falls back to [`DEFAULT_TITLE`].
    pub title: Option<String>,
    /// Requested author; blank falls back to [`DEFAULT_AUTHOR`].
    pub author: Option<String>,
    /// Uploaded content.
    pub data: Bytes,
    /// Original file name.
    pub filename: String,
    /// Whether the record should be listed publicly.
    pub visible: bool,
    /// Retention window in seconds.
    pub duration: u64,
}

impl NewRecord {
    /// Create a visible record holding `data`, kept for one day.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            title: None,
            author: None,
            data: data.into(),
            filename: String::new(),
            visible: true,
            duration: Lifetime::default().seconds(),
        }
    }

    /// Set the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Set the original file name.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Set whether the record is listed publicly.
    #[must_use]
    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Set the retention window in seconds.
    #[must_use]
    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration = seconds;
        self
    }

    /// Set the retention window from a named preset.
    #[must_use]
    pub fn with_lifetime(self, lifetime: Lifetime) -> Self {
        self.with_duration(lifetime.seconds())
    }

    /// The title that will be stored.
    #[must_use]
    pub fn effective_title(&self) -> &str {
        non_blank(self.title.as_deref()).unwrap_or(DEFAULT_TITLE)
    }

    /// The author that will be stored.
    #[must_use]
    pub fn effective_author(&self) -> &str {
        non_blank(self.author.as_deref()).unwrap_or(DEFAULT_AUTHOR)
    }

    /// Build the stored record with the given id and creation time.
    #[must_use]
    pub fn to_record(&self, id: String, created_at: DateTime<Utc>) -> Record {
        Record {
            id,
            title: self.effective_title().to_owned(),
            author: self.effective_author().to_owned(),
            data: self.data.clone(),
            filename: self.filename.clone(),
            created_at,
            visible: self.visible,
            duration: self.duration,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn new_record_defaults() {
        let rec = NewRecord::new(&b"PNG..."[..]);
        assert!(rec.visible);
        assert_eq!(rec.duration, 86_400);
        assert_eq!(rec.effective_title(), "Untitled");
        assert_eq!(rec.effective_author(), "Anonymous");
    }

    #[test]
    fn blank_fields_fall_back() {
        let rec = NewRecord::new(&b"x"[..])
            .with_title("   ")
            .with_author("");
        assert_eq!(rec.effective_title(), DEFAULT_TITLE);
        assert_eq!(rec.effective_author(), DEFAULT_AUTHOR);
    }

    #[test]
    fn to_record_copies_fields() {
        let new = NewRecord::new(&b"PNG..."[..])
            .with_title("t1")
            .with_author("a1")
            .with_filename("image.png")
            .with_visible(false)
            .with_lifetime(Lifetime::Hour);
        let rec = new.to_record("abc".into(), at(1_000));

        assert_eq!(rec.id, "abc");
        assert_eq!(rec.title, "t1");
        assert_eq!(rec.author, "a1");
        assert_eq!(rec.data.as_ref(), b"PNG...");
        assert_eq!(rec.filename, "image.png");
        assert_eq!(rec.created_at, at(1_000));
        assert!(!rec.visible);
        assert_eq!(rec.duration, 3600);
        assert_eq!(rec.len(), 6);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let rec = NewRecord::new(&b"x"[..])
            .with_duration(10)
            .to_record("id".into(), at(100));

        assert_eq!(rec.expires_at(), at(110));
        assert!(!rec.is_expired(at(109)));
        assert!(rec.is_expired(at(110)));
        assert!(rec.is_expired(at(500)));
    }

    #[test]
    fn remaining_saturates() {
        let rec = NewRecord::new(&b"x"[..])
            .with_duration(3600)
            .to_record("id".into(), at(0));

        assert_eq!(rec.remaining(at(0)), 3600);
        assert_eq!(rec.remaining(at(3000)), 600);
        assert_eq!(rec.remaining(at(7200)), 0);
    }

    #[test]
    fn huge_duration_never_expires() {
        let rec = NewRecord::new(&b"x"[..])
            .with_duration(u64::MAX)
            .to_record("id".into(), at(0));
        assert!(!rec.is_expired(at(4_000_000_000)));
    }
}

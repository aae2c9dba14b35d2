//! Lesson request and content types.
//!
//! A [`ContentRequest`] identifies one piece of lesson content. Its
//! [`ContentKey`] is the deterministic string every cache tier is keyed by.

use crate::{ValidationError, NstResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace prefix shared by every content key.
pub const CONTENT_KEY_PREFIX: &str = "nst_content";

// ============================================================================
// SELECTION ENUMS
// ============================================================================

/// Examination board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Board {
    #[serde(rename = "CBSE")]
    Cbse,
    #[serde(rename = "BSEB")]
    Bseb,
}

impl Board {
    pub fn as_str(&self) -> &'static str {
        match self {
            Board::Cbse => "CBSE",
            Board::Bseb => "BSEB",
        }
    }

    /// Language lessons are generated in unless the student overrides it.
    pub fn default_language(&self) -> Language {
        match self {
            Board::Bseb => Language::Hindi,
            Board::Cbse => Language::English,
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream selected by senior secondary students.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stream {
    Science,
    Commerce,
    Arts,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Science => "Science",
            Stream::Commerce => "Commerce",
            Stream::Arts => "Arts",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of lesson content requested for a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Notes,
    PremiumNotes,
    Mcq,
    Video,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Notes => "NOTES",
            ContentType::PremiumNotes => "PREMIUM_NOTES",
            ContentType::Mcq => "MCQ",
            ContentType::Video => "VIDEO",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language of generated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    English,
    Hindi,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Hindi => "Hindi",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CLASS LEVEL
// ============================================================================

/// School class, 6 through 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClassLevel(u8);

impl ClassLevel {
    pub const MIN: u8 = 6;
    pub const MAX: u8 = 12;

    pub fn new(level: u8) -> Result<Self, ValidationError> {
        if (Self::MIN..=Self::MAX).contains(&level) {
            Ok(Self(level))
        } else {
            Err(ValidationError::InvalidValue {
                field: "class_level".to_string(),
                reason: format!("{} is outside {}..={}", level, Self::MIN, Self::MAX),
            })
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// Classes 11 and 12 are split by stream.
    pub fn requires_stream(&self) -> bool {
        self.0 >= 11
    }
}

impl fmt::Display for ClassLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClassLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = s
            .trim()
            .parse::<u8>()
            .map_err(|_| ValidationError::InvalidValue {
                field: "class_level".to_string(),
                reason: format!("'{}' is not a class number", s),
            })?;
        Self::new(level)
    }
}

impl TryFrom<String> for ClassLevel {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClassLevel> for String {
    fn from(level: ClassLevel) -> Self {
        level.to_string()
    }
}

// ============================================================================
// CHAPTER
// ============================================================================

/// A chapter within a subject, as listed by the generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Chapter {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
        }
    }
}

// ============================================================================
// CONTENT KEY
// ============================================================================

/// Deterministic composite identifier for a lesson request.
///
/// Format: `nst_content_{BOARD}_{CLASS}[-{STREAM}]_{SUBJECT}_{CHAPTER}_{TYPE}`.
/// The stream segment only appears for classes 11 and 12.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    /// Wrap an already-built key string (e.g. one read back from storage).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// CONTENT REQUEST
// ============================================================================

/// A validated lesson request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRequest {
    pub board: Board,
    pub class_level: ClassLevel,
    /// Only ever `Some` for classes that require a stream.
    pub stream: Option<Stream>,
    pub subject: String,
    pub chapter: Chapter,
    pub language: Language,
    pub content_type: ContentType,
}

impl ContentRequest {
    /// Build a request, defaulting the language from the board.
    ///
    /// A stream is required for classes 11/12 and discarded for the rest.
    pub fn new(
        board: Board,
        class_level: ClassLevel,
        stream: Option<Stream>,
        subject: impl Into<String>,
        chapter: Chapter,
        content_type: ContentType,
    ) -> NstResult<Self> {
        let subject = subject.into();
        if subject.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "subject".to_string(),
            }
            .into());
        }
        if chapter.id.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "chapter.id".to_string(),
            }
            .into());
        }

        let stream = if class_level.requires_stream() {
            Some(stream.ok_or_else(|| ValidationError::RequiredFieldMissing {
                field: "stream".to_string(),
            })?)
        } else {
            None
        };

        Ok(Self {
            board,
            class_level,
            stream,
            subject,
            chapter,
            language: board.default_language(),
            content_type,
        })
    }

    /// Override the generation language.
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Compute the cache key for this request.
    ///
    /// Language is not part of the key: content is shared per board.
    pub fn key(&self) -> ContentKey {
        let stream_segment = match self.stream {
            Some(stream) if self.class_level.requires_stream() => format!("-{}", stream),
            _ => String::new(),
        };
        ContentKey(format!(
            "{}_{}_{}{}_{}_{}_{}",
            CONTENT_KEY_PREFIX,
            self.board,
            self.class_level,
            stream_segment,
            self.subject,
            self.chapter.id,
            self.content_type
        ))
    }
}

// ============================================================================
// CHAPTER QUERY
// ============================================================================

/// Selection used to list the chapters of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterQuery {
    pub board: Board,
    pub class_level: ClassLevel,
    pub stream: Option<Stream>,
    pub subject: String,
    pub language: Language,
}

impl ChapterQuery {
    /// Build a query in the board's default language. The stream is dropped
    /// for classes that have none.
    pub fn new(
        board: Board,
        class_level: ClassLevel,
        stream: Option<Stream>,
        subject: impl Into<String>,
    ) -> NstResult<Self> {
        let subject = subject.into();
        if subject.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "subject".to_string(),
            }
            .into());
        }
        Ok(Self {
            board,
            class_level,
            stream: stream.filter(|_| class_level.requires_stream()),
            subject,
            language: board.default_language(),
        })
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }
}

// ============================================================================
// LESSON CONTENT
// ============================================================================

/// Opaque generated lesson payload (notes, MCQs, video links, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LessonContent(serde_json::Value);

impl LessonContent {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Title carried by the payload, if any.
    pub fn title(&self) -> Option<&str> {
        self.0.get("title").and_then(|t| t.as_str())
    }

    /// Premium when a premium link is attached, otherwise the payload's own flag.
    pub fn is_premium(&self) -> bool {
        let has_link = |field: &str| {
            self.0
                .get(field)
                .map(|v| !v.is_null() && v.as_str() != Some(""))
                .unwrap_or(false)
        };
        if has_link("premiumLink") || has_link("premiumVideoLink") {
            return true;
        }
        self.0
            .get("premium")
            .and_then(|p| p.as_bool())
            .unwrap_or(false)
    }
}

impl From<serde_json::Value> for LessonContent {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NstError;
    use serde_json::json;

    fn class(level: u8) -> ClassLevel {
        ClassLevel::new(level).unwrap()
    }

    #[test]
    fn test_key_without_stream() {
        let req = ContentRequest::new(
            Board::Cbse,
            class(10),
            None,
            "Science",
            Chapter::new("ch-3", "Metals"),
            ContentType::Notes,
        )
        .unwrap();
        assert_eq!(req.key().as_str(), "nst_content_CBSE_10_Science_ch-3_NOTES");
    }

    #[test]
    fn test_key_with_stream_for_senior_classes() {
        let req = ContentRequest::new(
            Board::Bseb,
            class(12),
            Some(Stream::Science),
            "Physics",
            Chapter::new("7", "Optics"),
            ContentType::Mcq,
        )
        .unwrap();
        assert_eq!(req.key().as_str(), "nst_content_BSEB_12-Science_Physics_7_MCQ");
        assert_eq!(req.language, Language::Hindi);
    }

    #[test]
    fn test_stream_ignored_below_eleven() {
        let with = ContentRequest::new(
            Board::Cbse,
            class(9),
            Some(Stream::Arts),
            "History",
            Chapter::new("1", "Revolution"),
            ContentType::Notes,
        )
        .unwrap();
        let without = ContentRequest::new(
            Board::Cbse,
            class(9),
            None,
            "History",
            Chapter::new("1", "Revolution"),
            ContentType::Notes,
        )
        .unwrap();
        assert_eq!(with.key(), without.key());
        assert!(with.stream.is_none());
    }

    #[test]
    fn test_missing_stream_for_senior_class_is_rejected() {
        let err = ContentRequest::new(
            Board::Cbse,
            class(11),
            None,
            "Accounts",
            Chapter::new("2", "Ledger"),
            ContentType::Notes,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            NstError::Validation(ValidationError::RequiredFieldMissing { ref field }) if field == "stream"
        ));
    }

    #[test]
    fn test_empty_subject_rejected() {
        let err = ContentRequest::new(
            Board::Cbse,
            class(8),
            None,
            "  ",
            Chapter::new("2", "x"),
            ContentType::Notes,
        )
        .unwrap_err();
        assert!(matches!(err, NstError::Validation(_)));
    }

    #[test]
    fn test_language_does_not_change_key() {
        let req = ContentRequest::new(
            Board::Cbse,
            class(7),
            None,
            "Maths",
            Chapter::new("4", "Fractions"),
            ContentType::Notes,
        )
        .unwrap();
        let hindi = req.clone().with_language(Language::Hindi);
        assert_eq!(req.key(), hindi.key());
    }

    #[test]
    fn test_class_level_bounds_and_serde() {
        assert!(ClassLevel::new(5).is_err());
        assert!(ClassLevel::new(13).is_err());
        assert!("abc".parse::<ClassLevel>().is_err());

        let parsed: ClassLevel = serde_json::from_value(json!("11")).unwrap();
        assert_eq!(parsed.get(), 11);
        assert!(parsed.requires_stream());
        assert_eq!(serde_json::to_value(parsed).unwrap(), json!("11"));
    }

    #[test]
    fn test_chapter_query_drops_stream_for_junior_classes() {
        let query = ChapterQuery::new(Board::Bseb, class(8), Some(Stream::Science), "Hindi").unwrap();
        assert!(query.stream.is_none());
        assert_eq!(query.language, Language::Hindi);

        let senior = ChapterQuery::new(Board::Cbse, class(12), Some(Stream::Commerce), "Economics").unwrap();
        assert_eq!(senior.stream, Some(Stream::Commerce));
    }

    #[test]
    fn test_lesson_content_premium_detection() {
        let linked = LessonContent::new(json!({"premiumVideoLink": "https://v"}));
        assert!(linked.is_premium());

        let flagged = LessonContent::new(json!({"premium": true}));
        assert!(flagged.is_premium());

        let empty_link = LessonContent::new(json!({"premiumLink": ""}));
        assert!(!empty_link.is_premium());

        let plain = LessonContent::new(json!({"title": "Metals"}));
        assert!(!plain.is_premium());
        assert_eq!(plain.title(), Some("Metals"));
    }
}

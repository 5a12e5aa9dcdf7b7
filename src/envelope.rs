//! Content envelopes - one normalized shape for quotes, reviews and posts.
//!
//! ```text
//! ┌──────────────────────────── ContentEnvelope ───────────────────────────┐
//! │  id · created_at · likes · is_liked · is_saved · author · book?        │
//! │  ┌──────────────────────────── Payload ─────────────────────────────┐  │
//! │  │  Quote { text }  │  Review { text, rating? }  │  Post { title?, text } │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The kind is derived from the payload variant, so the two can never
//! disagree. Identity is always the pair `(kind, id)`: ids are only unique
//! within a kind.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// The content kinds the feed can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Quote,
    Review,
    Post,
}

impl ContentKind {
    pub const ALL: [ContentKind; 3] = [ContentKind::Quote, ContentKind::Review, ContentKind::Post];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Quote => "quote",
            ContentKind::Review => "review",
            ContentKind::Post => "post",
        }
    }

    /// REST collection segment for this kind (`quotes`, `reviews`, `posts`).
    pub fn collection(&self) -> &'static str {
        match self {
            ContentKind::Quote => "quotes",
            ContentKind::Review => "reviews",
            ContentKind::Post => "posts",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quote" | "quotes" => Ok(ContentKind::Quote),
            "review" | "reviews" => Ok(ContentKind::Review),
            "post" | "posts" => Ok(ContentKind::Post),
            other => Err(DecodeError::UnknownKind(other.to_string())),
        }
    }
}

/// Canonical string form of a backend identifier.
///
/// Backends send numeric ids for some kinds and string ids for others;
/// both end up here as strings so comparisons never mix types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_json(field: &'static str, value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Ok(ContentId(s.trim().to_string())),
            Value::String(_) => Err(DecodeError::invalid(field, "empty string")),
            Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    Ok(ContentId(v.to_string()))
                } else if let Some(v) = n.as_i64() {
                    Ok(ContentId(v.to_string()))
                } else {
                    // i64::MIN as f64 is exact, i64::MAX as f64 rounds up to 2^63
                    const LOWER: f64 = i64::MIN as f64;
                    const UPPER: f64 = i64::MAX as f64;
                    match n.as_f64() {
                        Some(f) if f.fract() != 0.0 || !f.is_finite() => {
                            Err(DecodeError::invalid(field, format!("non-integral id {}", n)))
                        }
                        Some(f) if (LOWER..UPPER).contains(&f) => Ok(ContentId(format!("{}", f as i64))),
                        _ => Err(DecodeError::invalid(field, format!("id {} outside integer range", n))),
                    }
                }
            }
            Value::Null => Err(DecodeError::MissingField(field)),
            other => Err(DecodeError::invalid(field, format!("expected string or number, found {}", type_name(other)))),
        }
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(value: &str) -> Self {
        ContentId(value.to_string())
    }
}

impl From<String> for ContentId {
    fn from(value: String) -> Self {
        ContentId(value)
    }
}

impl From<u64> for ContentId {
    fn from(value: u64) -> Self {
        ContentId(value.to_string())
    }
}

/// Primary key of an envelope: `(kind, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentKey {
    pub kind: ContentKind,
    pub id: ContentId,
}

impl ContentKey {
    pub fn new(kind: ContentKind, id: impl Into<ContentId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Minimal author summary denormalized onto each item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSummary {
    pub id: ContentId,
    pub display_name: String,
    pub avatar: Option<String>,
}

/// Minimal book summary carried by quotes and reviews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRef {
    pub id: ContentId,
    pub title: String,
    pub author: Option<String>,
    pub cover: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotePayload {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPayload {
    pub text: String,
    /// Star rating in `1..=5`; `None` when the reviewer gave none.
    pub rating: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPayload {
    pub title: Option<String>,
    pub text: String,
}

/// Kind-specific body of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    Quote(QuotePayload),
    Review(ReviewPayload),
    Post(PostPayload),
}

impl Payload {
    pub fn kind(&self) -> ContentKind {
        match self {
            Payload::Quote(_) => ContentKind::Quote,
            Payload::Review(_) => ContentKind::Review,
            Payload::Post(_) => ContentKind::Post,
        }
    }

    /// The main body text regardless of kind.
    pub fn text(&self) -> &str {
        match self {
            Payload::Quote(quote) => &quote.text,
            Payload::Review(review) => &review.text,
            Payload::Post(post) => &post.text,
        }
    }
}

/// A change to the viewer-facing interaction fields of one envelope.
///
/// Only `likes`, `is_liked` and `is_saved` are addressable, so a patch cannot
/// alter an envelope's identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionPatch {
    pub likes: Option<u32>,
    pub is_liked: Option<bool>,
    pub is_saved: Option<bool>,
}

impl InteractionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn likes(mut self, likes: u32) -> Self {
        self.likes = Some(likes);
        self
    }

    pub fn liked(mut self, liked: bool) -> Self {
        self.is_liked = Some(liked);
        self
    }

    pub fn saved(mut self, saved: bool) -> Self {
        self.is_saved = Some(saved);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.likes.is_none() && self.is_liked.is_none() && self.is_saved.is_none()
    }
}

/// One normalized feed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEnvelope {
    pub id: ContentId,
    pub created_at: DateTime<Utc>,
    pub likes: u32,
    pub is_liked: bool,
    pub is_saved: bool,
    pub author: AuthorSummary,
    pub book: Option<BookRef>,
    pub payload: Payload,
}

impl ContentEnvelope {
    pub fn kind(&self) -> ContentKind {
        self.payload.kind()
    }

    pub fn key(&self) -> ContentKey {
        ContentKey::new(self.kind(), self.id.clone())
    }

    /// Whether this envelope is the one addressed by `(kind, id)`.
    pub fn is(&self, kind: ContentKind, id: &ContentId) -> bool {
        self.kind() == kind && &self.id == id
    }

    /// Current interaction fields as a fully populated patch.
    pub fn interaction(&self) -> InteractionPatch {
        InteractionPatch {
            likes: Some(self.likes),
            is_liked: Some(self.is_liked),
            is_saved: Some(self.is_saved),
        }
    }

    /// Apply a patch in place. Returns whether any field changed.
    pub fn apply(&mut self, patch: &InteractionPatch) -> bool {
        let before = self.interaction();
        if let Some(likes) = patch.likes {
            self.likes = likes;
        }
        if let Some(liked) = patch.is_liked {
            self.is_liked = liked;
        }
        if let Some(saved) = patch.is_saved {
            self.is_saved = saved;
        }
        before != self.interaction()
    }

    /// Normalize one raw backend item.
    ///
    /// The kind comes from the `type` annotation (older endpoints use
    /// `source`). Optional fields decode to `None`; missing required fields
    /// name the field in the error.
    pub fn from_json(value: &Value) -> Result<Self, DecodeError> {
        let obj = value
            .as_object()
            .ok_or_else(|| DecodeError::NotAnObject(type_name(value)))?;

        let kind_value =
            field(obj, &["type", "source"]).ok_or(DecodeError::MissingField("type"))?;
        let kind: ContentKind = kind_value
            .as_str()
            .ok_or_else(|| DecodeError::invalid("type", "expected a string"))?
            .parse()?;

        let id = ContentId::from_json("id", field(obj, &["id"]).unwrap_or(&Value::Null))?;
        let created_at = timestamp(
            field(obj, &["createdAt", "created_at"])
                .ok_or(DecodeError::MissingField("createdAt"))?,
        )?;
        let likes = match field(obj, &["likes", "likesCount", "likes_count"]) {
            Some(v) => count("likes", v)?,
            None => 0,
        };
        let is_liked = flag("isLiked", field(obj, &["isLiked", "is_liked", "liked"]))?;
        let is_saved = flag("isSaved", field(obj, &["isSaved", "is_saved", "saved"]))?;

        let author = author(
            field(obj, &["user", "author"]).ok_or(DecodeError::MissingField("user"))?,
        )?;
        let book = match field(obj, &["book"]) {
            Some(v) => Some(book(v)?),
            None => None,
        };

        let payload = match kind {
            ContentKind::Quote => Payload::Quote(QuotePayload {
                text: required_text(obj, "text", &["text", "quote", "content"])?,
            }),
            ContentKind::Review => Payload::Review(ReviewPayload {
                text: required_text(obj, "text", &["text", "review", "content"])?,
                rating: rating(field(obj, &["rating"]))?,
            }),
            ContentKind::Post => Payload::Post(PostPayload {
                title: optional_text(field(obj, &["title"])),
                text: required_text(obj, "text", &["text", "content", "body"])?,
            }),
        };

        Ok(ContentEnvelope {
            id,
            created_at,
            likes,
            is_liked,
            is_saved,
            author,
            book,
            payload,
        })
    }
}

// ============================================================================
// Raw JSON helpers
// ============================================================================

/// First non-null value under any of `names`.
fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .find(|v| !v.is_null())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn timestamp(value: &Value) -> Result<DateTime<Utc>, DecodeError> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DecodeError::invalid("createdAt", e.to_string())),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| DecodeError::invalid("createdAt", format!("bad epoch millis {}", n))),
        other => Err(DecodeError::invalid(
            "createdAt",
            format!("expected string or number, found {}", type_name(other)),
        )),
    }
}

fn count(name: &'static str, value: &Value) -> Result<u32, DecodeError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v < 0 => Err(DecodeError::invalid(name, format!("negative count {}", v))),
        Some(v) => u32::try_from(v).map_err(|_| DecodeError::invalid(name, "count overflows u32")),
        None => Err(DecodeError::invalid(name, "expected an integer")),
    }
}

fn flag(name: &'static str, value: Option<&Value>) -> Result<bool, DecodeError> {
    match value {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) if n.as_u64() == Some(0) => Ok(false),
        Some(Value::Number(n)) if n.as_u64() == Some(1) => Ok(true),
        Some(other) => Err(DecodeError::invalid(
            name,
            format!("expected a boolean, found {}", type_name(other)),
        )),
    }
}

fn optional_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required_text(
    obj: &Map<String, Value>,
    name: &'static str,
    aliases: &[&str],
) -> Result<String, DecodeError> {
    match field(obj, aliases) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(DecodeError::invalid(
            name,
            format!("expected a string, found {}", type_name(other)),
        )),
        None => Err(DecodeError::MissingField(name)),
    }
}

fn rating(value: Option<&Value>) -> Result<Option<u8>, DecodeError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let n = value
        .as_f64()
        .ok_or_else(|| DecodeError::invalid("rating", "expected a number"))?;
    // 0 is what some endpoints send for "not rated"
    if n == 0.0 {
        return Ok(None);
    }
    if !(1.0..=5.0).contains(&n) {
        return Err(DecodeError::invalid("rating", format!("{} outside 1..=5", n)));
    }
    Ok(Some(n.round() as u8))
}

fn author(value: &Value) -> Result<AuthorSummary, DecodeError> {
    let obj = value
        .as_object()
        .ok_or_else(|| DecodeError::invalid("user", "expected an object"))?;
    let id = ContentId::from_json("user.id", field(obj, &["id", "_id"]).unwrap_or(&Value::Null))?;
    let display_name = optional_text(field(obj, &["displayName", "name", "username"]))
        .ok_or(DecodeError::MissingField("user.name"))?;
    Ok(AuthorSummary {
        id,
        display_name,
        avatar: optional_text(field(obj, &["avatar", "avatarUrl", "image"])),
    })
}

fn book(value: &Value) -> Result<BookRef, DecodeError> {
    let obj = value
        .as_object()
        .ok_or_else(|| DecodeError::invalid("book", "expected an object"))?;
    let id = ContentId::from_json("book.id", field(obj, &["id", "_id"]).unwrap_or(&Value::Null))?;
    let title = optional_text(field(obj, &["title"])).ok_or(DecodeError::MissingField("book.title"))?;
    Ok(BookRef {
        id,
        title,
        author: optional_text(field(obj, &["author"])),
        cover: optional_text(field(obj, &["cover", "coverUrl", "image"])),
    })
}

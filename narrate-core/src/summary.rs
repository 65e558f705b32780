use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Article as extracted by the backend. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "deserialize_publish_date")]
    pub publish_date: Option<DateTime<Utc>>,
}

/// Spoken summary of one article, with the relative path of its audio file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub article: Article,
    pub summary: String,
    pub audio_path: String,
}

impl Summary {
    /// Identity of the summary inside a collection.
    pub fn identity(&self) -> &str {
        &self.article.url
    }
}

/// Summaries keyed by article URL, as returned by `GET /summaries`.
///
/// Ordered map: iteration order is the deterministic "fetch order" used to
/// break ties between equal publish dates.
pub type SummaryCollection = BTreeMap<String, Summary>;

/// Articles keyed by URL, as returned by `GET /articles`.
pub type ArticleCollection = BTreeMap<String, Article>;

/// Ordered sequence of summaries for one day, newest first.
pub type PlaybackQueue = Vec<Summary>;

// The backend writes `datetime.isoformat()`, which has no offset for naive
// datetimes, and `null` when extraction found no date.
fn deserialize_publish_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_publish_date))
}

/// Parse a publish timestamp; naive values are read as UTC.
pub fn parse_publish_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

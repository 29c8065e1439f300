use chrono::{DateTime, SecondsFormat, Utc};
use harvest_core::{Error, Result};
use serde::Deserialize;
use std::fmt;

/// Layout of `created_at` once its `Mon, ` weekday prefix is removed. The full
/// value looks like `Mon, 02 Jan 2006 15:04:05 -0000`; the weekday name is
/// required but not checked against the date.
pub const CREATED_AT_FORMAT: &str = "%d %b %Y %H:%M:%S %z";

/// Message id used as the paging bookmark. Lower ids are further back in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(pub u64);

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One page of the stream as decoded from JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub more: bool,
    #[serde(default)]
    pub since: Option<u64>,
    #[serde(default)]
    pub max: Option<u64>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub sentiment: Option<SentimentTag>,
    #[serde(default)]
    pub total_likes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentimentTag {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Cursor bounds of a page. `since` is the newest id, `max` the oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBounds {
    pub since: Cursor,
    pub max: Cursor,
}

impl Page {
    /// Bounds as supplied by the origin, or derived from the first and last
    /// message when either is missing. `None` for an empty page.
    pub fn bounds(&self) -> Option<PageBounds> {
        let supplied = match (self.since, self.max) {
            (Some(since), Some(max)) if since != 0 && max != 0 => Some(PageBounds {
                since: Cursor(since),
                max: Cursor(max),
            }),
            _ => None,
        };

        supplied.or_else(|| {
            let first = self.messages.first()?;
            let last = self.messages.last()?;
            Some(PageBounds {
                since: Cursor(first.id),
                max: Cursor(last.id),
            })
        })
    }
}

/// Sentiment label as persisted. Names other than the two well-known ones are
/// kept exactly as the origin spelled them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
    Other(String),
}

impl Sentiment {
    pub fn label(&self) -> &str {
        match self {
            Sentiment::Bullish => "Bullish",
            Sentiment::Bearish => "Bearish",
            Sentiment::Neutral => "Neutral",
            Sentiment::Other(name) => name,
        }
    }

    /// Neutral only when the tag or its name is absent or blank.
    fn from_tag(tag: Option<&SentimentTag>) -> Self {
        match tag.and_then(|t| t.name.as_deref()) {
            None => Sentiment::Neutral,
            Some(name) if name.trim().is_empty() => Sentiment::Neutral,
            Some("Bullish") => Sentiment::Bullish,
            Some("Bearish") => Sentiment::Bearish,
            Some(name) => Sentiment::Other(name.to_string()),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A message ready for the sink: timestamp parsed, body flattened to one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub body: String,
    pub sentiment: Sentiment,
    pub likes: u64,
}

impl Record {
    pub fn created_at_rfc3339(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl TryFrom<&Message> for Record {
    type Error = Error;

    fn try_from(message: &Message) -> Result<Self> {
        Ok(Record {
            id: message.id,
            created_at: parse_created_at(message.id, message.created_at.as_deref())?,
            body: sanitize_body(message.body.as_deref().unwrap_or_default()),
            sentiment: Sentiment::from_tag(message.sentiment.as_ref()),
            likes: message.total_likes.unwrap_or_default(),
        })
    }
}

pub fn parse_created_at(message_id: u64, raw: Option<&str>) -> Result<DateTime<Utc>> {
    let value = raw.ok_or_else(|| Error::Timestamp {
        message_id,
        value: String::new(),
        details: "created_at is missing".to_string(),
    })?;

    let dated = value
        .trim()
        .split_once(", ")
        .filter(|(day, _)| day.len() == 3 && day.chars().all(|c| c.is_ascii_alphabetic()))
        .map(|(_, rest)| rest)
        .ok_or_else(|| Error::Timestamp {
            message_id,
            value: value.to_string(),
            details: "missing weekday prefix".to_string(),
        })?;

    DateTime::parse_from_str(dated, CREATED_AT_FORMAT)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Timestamp {
            message_id,
            value: value.to_string(),
            details: e.to_string(),
        })
}

/// Flattens a body onto one tabular line: line breaks become a literal `\n`
/// and tabs become a space.
pub fn sanitize_body(body: &str) -> String {
    body.replace("\r\n", "\\n")
        .replace(['\r', '\n'], "\\n")
        .replace('\t', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn message(id: u64) -> Message {
        Message {
            id,
            body: None,
            created_at: Some("Sun, 05 Jan 2020 10:00:00 -0000".into()),
            sentiment: None,
            total_likes: None,
        }
    }

    #[test]
    fn parses_origin_timestamp_format() {
        let ts = parse_created_at(1, Some("Mon, 02 Jan 2006 15:04:05 -0000")).unwrap();
        assert_eq!(
            ts.to_rfc3339_opts(SecondsFormat::Secs, true),
            "2006-01-02T15:04:05Z"
        );
    }

    #[test]
    fn normalises_offsets_to_utc() {
        let ts = parse_created_at(1, Some("Mon, 02 Jan 2006 15:04:05 +0200")).unwrap();
        assert_eq!(
            ts.to_rfc3339_opts(SecondsFormat::Secs, true),
            "2006-01-02T13:04:05Z"
        );
    }

    #[test]
    fn missing_or_garbled_timestamp_is_an_error() {
        assert!(matches!(
            parse_created_at(7, None),
            Err(Error::Timestamp { message_id: 7, .. })
        ));
        assert!(matches!(
            parse_created_at(8, Some("2006-01-02 15:04:05")),
            Err(Error::Timestamp { message_id: 8, .. })
        ));
    }

    #[test]
    fn sanitizes_tabs_and_newlines() {
        assert_eq!(sanitize_body("hello\tworld\nfoo"), "hello world\\nfoo");
        assert_eq!(sanitize_body("a\r\nb\rc"), "a\\nb\\nc");
    }

    #[test]
    fn absent_sentiment_defaults_to_neutral() {
        let mut msg = message(1);
        assert_eq!(Record::try_from(&msg).unwrap().sentiment, Sentiment::Neutral);

        msg.sentiment = Some(SentimentTag {
            class: None,
            name: None,
        });
        assert_eq!(Record::try_from(&msg).unwrap().sentiment.label(), "Neutral");

        msg.sentiment = Some(SentimentTag {
            class: Some("bearish".into()),
            name: Some("Bearish".into()),
        });
        assert_eq!(Record::try_from(&msg).unwrap().sentiment, Sentiment::Bearish);
    }

    #[test]
    fn unfamiliar_sentiment_names_are_kept_verbatim() {
        let mut msg = message(1);
        msg.sentiment = Some(SentimentTag {
            class: Some("hold".into()),
            name: Some("Hold".into()),
        });
        let record = Record::try_from(&msg).unwrap();
        assert_eq!(record.sentiment, Sentiment::Other("Hold".into()));
        assert_eq!(record.sentiment.label(), "Hold");

        msg.sentiment = Some(SentimentTag {
            class: None,
            name: Some("  ".into()),
        });
        assert_eq!(Record::try_from(&msg).unwrap().sentiment, Sentiment::Neutral);
    }

    #[test]
    fn weekday_name_is_not_checked_against_the_date() {
        // 2 Jan 2006 was a Monday.
        let ts = parse_created_at(1, Some("Fri, 02 Jan 2006 15:04:05 -0000")).unwrap();
        assert_eq!(
            ts.to_rfc3339_opts(SecondsFormat::Secs, true),
            "2006-01-02T15:04:05Z"
        );
        assert!(matches!(
            parse_created_at(2, Some("02 Jan 2006 15:04:05 -0000")),
            Err(Error::Timestamp { message_id: 2, .. })
        ));
    }

    #[test]
    fn decodes_page_with_null_sentiment() {
        let json = r#"{
            "more": true,
            "since": 30,
            "max": 28,
            "messages": [
                {"id": 30, "body": "up", "created_at": "Sun, 05 Jan 2020 10:00:00 -0000",
                 "sentiment": {"class": "bullish", "name": "Bullish"}, "total_likes": 3},
                {"id": 28, "body": "flat", "created_at": "Sat, 04 Jan 2020 10:00:00 -0000",
                 "sentiment": null, "total_likes": 0}
            ]
        }"#;
        let page: Page = serde_json::from_str(json).unwrap();
        assert!(page.more);
        assert_eq!(page.messages.len(), 2);
        assert!(page.messages[1].sentiment.is_none());
        assert_eq!(
            page.bounds(),
            Some(PageBounds {
                since: Cursor(30),
                max: Cursor(28)
            })
        );
    }

    #[test]
    fn derives_bounds_when_origin_omits_them() {
        let page = Page {
            more: true,
            since: Some(0),
            max: None,
            messages: vec![message(50), message(49), message(41)],
        };
        assert_eq!(
            page.bounds(),
            Some(PageBounds {
                since: Cursor(50),
                max: Cursor(41)
            })
        );

        let empty = Page {
            more: false,
            since: None,
            max: None,
            messages: vec![],
        };
        assert_eq!(empty.bounds(), None);
    }

    proptest! {
        #[test]
        fn sanitized_body_is_single_line(body in any::<String>()) {
            let clean = sanitize_body(&body);
            prop_assert!(!clean.contains('\n'));
            prop_assert!(!clean.contains('\r'));
            prop_assert!(!clean.contains('\t'));
        }
    }
}

//! Field path resolution against an event.

use std::borrow::Cow;

use chrono::SecondsFormat;
use comply_core::Event;
use serde_json::Value;

/// Event envelope attributes addressable as `event.<name>`.
pub const EVENT_ATTRS: &[&str] = &["id", "type", "source", "subject", "timestamp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAttr {
    Id,
    Type,
    Source,
    Subject,
    Timestamp,
}

/// Parsed dotted path.
///
/// `event.<attr>` addresses the envelope, `detail.<a.b>` or a bare `<a.b>`
/// addresses the detail map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPath {
    Event(EventAttr),
    Detail(Vec<String>),
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("field path must not be empty".to_string());
        }
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(format!("field path '{}' has an empty segment", raw));
        }

        match segments.as_slice() {
            ["event", attr] => {
                let attr = match *attr {
                    "id" => EventAttr::Id,
                    "type" => EventAttr::Type,
                    "source" => EventAttr::Source,
                    "subject" => EventAttr::Subject,
                    "timestamp" => EventAttr::Timestamp,
                    other => return Err(format!("unknown event attribute '{}'", other)),
                };
                Ok(FieldPath::Event(attr))
            }
            ["event", ..] => Err(format!(
                "event attributes are not nested: '{}'",
                raw
            )),
            ["detail"] => Err("'detail' must be followed by a key".to_string()),
            ["detail", rest @ ..] => Ok(FieldPath::Detail(
                rest.iter().map(|s| s.to_string()).collect(),
            )),
            all => Ok(FieldPath::Detail(all.iter().map(|s| s.to_string()).collect())),
        }
    }

    /// Value at this path, or `None` when the event does not carry it.
    pub fn resolve<'e>(&self, event: &'e Event) -> Option<Cow<'e, Value>> {
        match self {
            FieldPath::Event(attr) => Some(Cow::Owned(match attr {
                EventAttr::Id => Value::String(event.id.to_string()),
                EventAttr::Type => Value::String(event.event_type.clone()),
                EventAttr::Source => Value::String(event.source.clone()),
                EventAttr::Subject => Value::String(event.subject.clone()),
                EventAttr::Timestamp => Value::String(
                    event
                        .timestamp
                        .to_rfc3339_opts(SecondsFormat::Micros, true),
                ),
            })),
            FieldPath::Detail(segments) => {
                let (first, rest) = segments.split_first()?;
                let mut current = event.detail.get(first)?;
                for segment in rest {
                    current = match current {
                        Value::Object(map) => map.get(segment)?,
                        Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                        _ => return None,
                    };
                }
                Some(Cow::Borrowed(current))
            }
        }
    }
}

//! JSON encoding of event sequences
//!
//! A sequence is an array of records, one per event:
//!
//! ```json
//! [
//!   {"timestamp": 0.0, "type": "key_press", "data": {"key": "a"}},
//!   {"timestamp": 0.1, "type": "mouse_click",
//!    "data": {"x": 10, "y": 10, "button": "left", "pressed": true}}
//! ]
//! ```
//!
//! Decoding also accepts the type-specific fields directly on the record when
//! there is no `data` object. Unknown fields are ignored. Coordinates may be
//! fractional; they are rounded to the nearest pixel.

use crate::error::{Error, Result};
use crate::events::{Button, Event, EventKind, EventSequence, Key};
use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

const MOUSE_MOVE: &str = "mouse_move";
const MOUSE_CLICK: &str = "mouse_click";
const MOUSE_SCROLL: &str = "mouse_scroll";
const KEY_PRESS: &str = "key_press";
const KEY_RELEASE: &str = "key_release";

/// Compact single-line JSON
pub fn encode(seq: &EventSequence) -> String {
    // Serializing owned strings and numbers into a String can't fail
    serde_json::to_string(seq).unwrap_or_default()
}

/// Indented JSON, what gets written to disk
pub fn encode_pretty(seq: &EventSequence) -> String {
    serde_json::to_string_pretty(seq).unwrap_or_default()
}

pub fn decode(text: &str) -> Result<EventSequence> {
    let records: Vec<RawRecord> =
        serde_json::from_str(text).map_err(|e| Error::malformed(None, e.to_string()))?;
    from_records(records)
}

pub fn decode_slice(bytes: &[u8]) -> Result<EventSequence> {
    let records: Vec<RawRecord> =
        serde_json::from_slice(bytes).map_err(|e| Error::malformed(None, e.to_string()))?;
    from_records(records)
}

fn from_records(records: Vec<RawRecord>) -> Result<EventSequence> {
    records
        .into_iter()
        .enumerate()
        .map(|(i, r)| r.into_event().map_err(|reason| Error::malformed(Some(i), reason)))
        .collect::<Result<Vec<_>>>()
        .map(EventSequence::new)
}

// ============================================================================
// Encoding
// ============================================================================

#[derive(Serialize)]
struct Record<'a> {
    timestamp: f64,
    #[serde(rename = "type")]
    tag: &'static str,
    data: Data<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Data<'a> {
    Move {
        x: i32,
        y: i32,
    },
    Click {
        x: i32,
        y: i32,
        button: Button,
        pressed: bool,
    },
    Scroll {
        x: i32,
        y: i32,
        dx: i32,
        dy: i32,
    },
    Key {
        key: &'a Key,
    },
}

impl<'a> Record<'a> {
    fn from_event(e: &'a Event) -> Self {
        let (tag, data) = match &e.kind {
            EventKind::PointerMove { x, y } => (MOUSE_MOVE, Data::Move { x: *x, y: *y }),
            EventKind::PointerButton {
                x,
                y,
                button,
                pressed,
            } => (
                MOUSE_CLICK,
                Data::Click {
                    x: *x,
                    y: *y,
                    button: *button,
                    pressed: *pressed,
                },
            ),
            EventKind::PointerScroll { x, y, dx, dy } => (
                MOUSE_SCROLL,
                Data::Scroll {
                    x: *x,
                    y: *y,
                    dx: *dx,
                    dy: *dy,
                },
            ),
            EventKind::KeyDown { key } => (KEY_PRESS, Data::Key { key }),
            EventKind::KeyUp { key } => (KEY_RELEASE, Data::Key { key }),
        };
        Self {
            timestamp: e.timestamp,
            tag,
            data,
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        if s.is_empty() {
            return Err(D::Error::custom("empty key identifier"));
        }
        Ok(Key::parse(&s))
    }
}

impl Serialize for EventSequence {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(self.len()))?;
        for e in self.iter() {
            seq.serialize_element(&Record::from_event(e))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for EventSequence {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let records = Vec::<RawRecord>::deserialize(d)?;
        from_records(records).map_err(D::Error::custom)
    }
}

// ============================================================================
// Decoding
// ============================================================================

#[derive(Deserialize)]
struct RawRecord {
    timestamp: Option<Value>,
    #[serde(rename = "type")]
    tag: Option<Value>,
    data: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl RawRecord {
    fn into_event(self) -> std::result::Result<Event, String> {
        let timestamp = match &self.timestamp {
            None | Some(Value::Null) => return Err("missing field `timestamp`".into()),
            Some(v) => v
                .as_f64()
                .filter(|t| t.is_finite() && *t >= 0.0)
                .ok_or_else(|| format!("timestamp {} is not a finite non-negative number", v))?,
        };

        let tag = match &self.tag {
            Some(Value::String(s)) => s.as_str(),
            Some(other) => return Err(format!("event type {} is not a string", other)),
            None => return Err("missing field `type`".into()),
        };

        let kind = match tag {
            MOUSE_MOVE => EventKind::PointerMove {
                x: self.coord("x")?,
                y: self.coord("y")?,
            },
            MOUSE_CLICK => EventKind::PointerButton {
                x: self.coord("x")?,
                y: self.coord("y")?,
                button: self.button()?,
                pressed: self.flag("pressed")?,
            },
            MOUSE_SCROLL => EventKind::PointerScroll {
                x: self.coord("x")?,
                y: self.coord("y")?,
                dx: self.coord("dx")?,
                dy: self.coord("dy")?,
            },
            KEY_PRESS => EventKind::KeyDown { key: self.key()? },
            KEY_RELEASE => EventKind::KeyUp { key: self.key()? },
            other => return Err(format!("unknown event type {:?}", other)),
        };

        Ok(Event { timestamp, kind })
    }

    /// Type-specific fields live under `data`, or on the record itself
    fn field(&self, name: &str) -> std::result::Result<&Value, String> {
        let nested = match &self.data {
            Some(Value::Object(map)) => map.get(name),
            Some(Value::Null) | None => None,
            Some(other) => return Err(format!("`data` must be an object, got {}", other)),
        };
        nested
            .or_else(|| self.rest.get(name))
            .filter(|v| !v.is_null())
            .ok_or_else(|| format!("missing field `{}`", name))
    }

    fn coord(&self, name: &str) -> std::result::Result<i32, String> {
        let v = self.field(name)?;
        if let Some(i) = v.as_i64() {
            return i32::try_from(i).map_err(|_| format!("`{}` out of range: {}", name, i));
        }
        let f = v
            .as_f64()
            .ok_or_else(|| format!("`{}` must be a number, got {}", name, v))?;
        let r = f.round();
        if r >= i32::MIN as f64 && r <= i32::MAX as f64 {
            Ok(r as i32)
        } else {
            Err(format!("`{}` out of range: {}", name, f))
        }
    }

    fn flag(&self, name: &str) -> std::result::Result<bool, String> {
        let v = self.field(name)?;
        v.as_bool()
            .ok_or_else(|| format!("`{}` must be a boolean, got {}", name, v))
    }

    fn button(&self) -> std::result::Result<Button, String> {
        let v = self.field("button")?;
        let name = v
            .as_str()
            .ok_or_else(|| format!("`button` must be a string, got {}", v))?;
        // Captures from some input layers spell buttons as `Button.left`
        let name = name.strip_prefix("Button.").unwrap_or(name);
        Button::from_name(name).ok_or_else(|| format!("unknown button {:?}", name))
    }

    fn key(&self) -> std::result::Result<Key, String> {
        let v = self.field("key")?;
        match v.as_str() {
            Some("") => Err("empty key identifier".into()),
            Some(s) => Ok(Key::parse(s)),
            None => Err(format!("`key` must be a string, got {}", v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NamedKey;

    fn sample() -> EventSequence {
        EventSequence::new(vec![
            Event::new(0.0, EventKind::KeyDown { key: Key::Char('a') }),
            Event::new(0.05, EventKind::KeyUp { key: Key::Char('a') }),
            Event::new(0.1, EventKind::PointerMove { x: 10, y: 10 }),
            Event::new(
                0.123456789,
                EventKind::PointerButton {
                    x: 10,
                    y: 10,
                    button: Button::Right,
                    pressed: true,
                },
            ),
            Event::new(
                0.2,
                EventKind::PointerScroll {
                    x: 10,
                    y: 10,
                    dx: 0,
                    dy: -3,
                },
            ),
            Event::new(0.3, EventKind::KeyDown { key: Key::Named(NamedKey::Shift) }),
            Event::new(0.3, EventKind::KeyUp { key: Key::parse("launch_app2") }),
        ])
    }

    #[test]
    fn round_trip() {
        let seq = sample();
        assert_eq!(decode(&encode(&seq)).unwrap(), seq);
        assert_eq!(decode(&encode_pretty(&seq)).unwrap(), seq);
        assert_eq!(decode_slice(encode(&seq).as_bytes()).unwrap(), seq);
    }

    #[test]
    fn keys_from_text_round_trip() {
        let seq: EventSequence = ["shift", "Key.enter", "x", "hyper_9"]
            .into_iter()
            .map(|name| Event::new(0.0, EventKind::KeyDown { key: Key::parse(name) }))
            .collect();
        assert_eq!(decode(&encode(&seq)).unwrap(), seq);
    }

    #[test]
    fn empty_round_trip() {
        let seq = EventSequence::empty();
        assert_eq!(encode(&seq), "[]");
        assert_eq!(decode("[]").unwrap(), seq);
    }

    #[test]
    fn record_layout() {
        let seq = EventSequence::new(vec![Event::new(
            0.5,
            EventKind::PointerButton {
                x: 1,
                y: 2,
                button: Button::Left,
                pressed: false,
            },
        )]);
        let v: Value = serde_json::from_str(&encode(&seq)).unwrap();
        assert_eq!(
            v,
            serde_json::json!([{
                "timestamp": 0.5,
                "type": "mouse_click",
                "data": {"x": 1, "y": 2, "button": "left", "pressed": false}
            }])
        );
    }

    #[test]
    fn missing_timestamp_is_malformed() {
        let err = decode(r#"[{"type": "mouse_move", "data": {"x": 1, "y": 2}}]"#).unwrap_err();
        match err {
            Error::MalformedEvent { record, reason } => {
                assert_eq!(record, Some(0));
                assert!(reason.contains("timestamp"), "{}", reason);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_timestamps_are_malformed() {
        for ts in ["-1", "\"soon\"", "null"] {
            let text = format!(
                r#"[{{"timestamp": {}, "type": "key_press", "data": {{"key": "a"}}}}]"#,
                ts
            );
            assert!(
                matches!(decode(&text), Err(Error::MalformedEvent { .. })),
                "timestamp {ts} accepted"
            );
        }
    }

    #[test]
    fn missing_type_specific_field_is_malformed() {
        let err = decode(r#"[{"timestamp": 0, "type": "mouse_click", "data": {"x": 1, "y": 2, "pressed": true}}]"#)
            .unwrap_err();
        assert!(err.to_string().contains("button"), "{err}");
    }

    #[test]
    fn unknown_button_is_malformed() {
        let text = r#"[{"timestamp": 0, "type": "mouse_click",
            "data": {"x": 1, "y": 2, "button": "x2", "pressed": true}}]"#;
        assert!(matches!(decode(text), Err(Error::MalformedEvent { .. })));
    }

    #[test]
    fn unknown_type_is_malformed() {
        let text = r#"[{"timestamp": 0, "type": "teleport", "data": {}}]"#;
        assert!(matches!(decode(text), Err(Error::MalformedEvent { record: Some(0), .. })));
    }

    #[test]
    fn unknown_key_name_is_preserved() {
        let seq = decode(r#"[{"timestamp": 0, "type": "key_press", "data": {"key": "brightness_up"}}]"#)
            .unwrap();
        assert_eq!(
            seq.events()[0].kind,
            EventKind::KeyDown {
                key: Key::parse("brightness_up")
            }
        );
        assert!(encode(&seq).contains("brightness_up"));
    }

    #[test]
    fn flat_records_and_extra_fields() {
        let text = r#"[
            {"timestamp": 1.5, "type": "mouse_move", "x": 3, "y": 4, "note": "ignored"},
            {"timestamp": 2, "type": "key_press", "data": {"key": "Key.enter", "extra": 1}}
        ]"#;
        let seq = decode(text).unwrap();
        assert_eq!(seq.events()[0].kind, EventKind::PointerMove { x: 3, y: 4 });
        assert_eq!(
            seq.events()[1].kind,
            EventKind::KeyDown {
                key: Key::Named(NamedKey::Enter)
            }
        );
    }

    #[test]
    fn fractional_coordinates_round() {
        let seq = decode(r#"[{"timestamp": 0, "type": "mouse_move", "data": {"x": 10.6, "y": -2.2}}]"#)
            .unwrap();
        assert_eq!(seq.events()[0].kind, EventKind::PointerMove { x: 11, y: -2 });
    }

    #[test]
    fn not_an_array_is_malformed() {
        assert!(matches!(
            decode(r#"{"timestamp": 0}"#),
            Err(Error::MalformedEvent { record: None, .. })
        ));
    }
}

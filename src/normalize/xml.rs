//! XML response decoding
//!
//! Converts an XML document into a `serde_json::Value` so XML and JSON
//! connectors share the same field accessors. Repeated elements become
//! arrays; elements named in the connector's `ArrayFields` allowlist are
//! arrays even when they occur once, because a list endpoint that happens to
//! return a single ticket must still iterate as a list.

use crate::{DeskportError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Key holding an element's text when it also has attributes or children
pub const TEXT_KEY: &str = "#text";

/// Element names that are always decoded as arrays
#[derive(Debug, Clone, Copy)]
pub struct ArrayFields(pub &'static [&'static str]);

impl ArrayFields {
    pub const NONE: ArrayFields = ArrayFields(&[]);

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(&name)
    }
}

struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Frame {
    fn new(name: String) -> Self {
        Self {
            name,
            fields: Map::new(),
            text: String::new(),
        }
    }

    fn open(e: &BytesStart) -> Result<Self> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut frame = Frame::new(name);
        for attr in e.attributes() {
            let attr = attr.map_err(|e| DeskportError::Xml(format!("Invalid attribute: {}", e)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| DeskportError::Xml(format!("Invalid attribute value: {}", e)))?;
            frame.fields.insert(key, Value::String(value.into_owned()));
        }
        Ok(frame)
    }

    fn into_value(self) -> (String, Value) {
        let text = self.text.trim();
        if self.fields.is_empty() {
            return (self.name, Value::String(text.to_string()));
        }
        let mut fields = self.fields;
        if !text.is_empty() {
            fields.insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
        }
        (self.name, Value::Object(fields))
    }
}

fn insert_child(parent: &mut Map<String, Value>, name: String, value: Value, arrays: &ArrayFields) {
    let always_array = arrays.contains(&name);
    match parent.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None if always_array => {
            parent.insert(name, Value::Array(vec![value]));
        }
        None => {
            parent.insert(name, value);
        }
    }
}

fn resolve_entity(name: &str) -> Option<String> {
    if let Some(code) = name.strip_prefix('#') {
        let parsed = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        return parsed.and_then(char::from_u32).map(String::from);
    }
    quick_xml::escape::resolve_predefined_entity(name).map(String::from)
}

/// Decode an XML document, with the root element as the single top-level key
pub fn xml_to_value(xml: &str, arrays: &ArrayFields) -> Result<Value> {
    // Text is trimmed per element in `into_value`, not per event: entity
    // references split text into several events.
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<Frame> = vec![Frame::new(String::new())];

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => stack.push(Frame::open(e)?),
            Ok(Event::Empty(ref e)) => {
                let (name, value) = Frame::open(e)?.into_value();
                if let Some(parent) = stack.last_mut() {
                    insert_child(&mut parent.fields, name, value, arrays);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(DeskportError::Xml("Unbalanced closing tag".to_string()));
                }
                if let Some(frame) = stack.pop() {
                    let (name, value) = frame.into_value();
                    if let Some(parent) = stack.last_mut() {
                        insert_child(&mut parent.fields, name, value, arrays);
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .decode()
                    .map_err(|e| DeskportError::Xml(format!("Invalid text: {}", e)))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::GeneralRef(ref e)) => {
                let name = e
                    .decode()
                    .map_err(|e| DeskportError::Xml(format!("Invalid entity: {}", e)))?;
                let resolved = resolve_entity(&name).unwrap_or_else(|| format!("&{};", name));
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&resolved);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DeskportError::Xml(format!(
                    "Error at position {}: {}",
                    reader.error_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(DeskportError::Xml("Unexpected end of document".to_string()));
    }
    let root = stack.pop().map(|f| f.fields).unwrap_or_default();
    Ok(Value::Object(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARRAYS: ArrayFields = ArrayFields(&["ticket", "post"]);

    #[test]
    fn test_singleton_allowlisted_element_is_array() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <tickets><ticket id="7"><subject>Hello</subject></ticket></tickets>"#;
        let value = xml_to_value(xml, &ARRAYS).unwrap();
        let tickets = value["tickets"]["ticket"].as_array().unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0]["id"], "7");
        assert_eq!(tickets[0]["subject"], "Hello");
    }

    #[test]
    fn test_repeated_element_without_allowlist_is_array() {
        let xml = "<users><user><id>1</id></user><user><id>2</id></user></users>";
        let value = xml_to_value(xml, &ArrayFields::NONE).unwrap();
        assert_eq!(value["users"]["user"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_singleton_without_allowlist_stays_object() {
        let xml = "<users><user><id>1</id></user></users>";
        let value = xml_to_value(xml, &ArrayFields::NONE).unwrap();
        assert!(value["users"]["user"].is_object());
    }

    #[test]
    fn test_cdata_entities_and_text_with_attributes() {
        let xml = r#"<notes><note id="3" creatorstaffname="Sam">Call &amp; check &#65;<![CDATA[ <b>now</b>]]></note></notes>"#;
        let value = xml_to_value(xml, &ArrayFields(&["note"])).unwrap();
        let note = &value["notes"]["note"][0];
        assert_eq!(note["id"], "3");
        assert_eq!(note["creatorstaffname"], "Sam");
        assert_eq!(note[TEXT_KEY], "Call & check A <b>now</b>");
    }

    #[test]
    fn test_empty_container() {
        let value = xml_to_value("<tickets></tickets>", &ARRAYS).unwrap();
        assert_eq!(value["tickets"], "");
        assert!(value["tickets"].get("ticket").is_none());
    }

    #[test]
    fn test_malformed_xml() {
        assert!(xml_to_value("<tickets><ticket></tickets>", &ARRAYS).is_err());
    }
}

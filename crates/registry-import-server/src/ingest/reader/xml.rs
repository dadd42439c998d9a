//! XML reader for server-side files
//!
//! Each child element of the document root is one row. Leaf children become
//! keys with their text as value; children that contain elements become
//! embedded JSON blobs, with repeated names collected into arrays:
//!
//! ```xml
//! <units>
//!   <unit>
//!     <StatId>100</StatId>
//!     <Activities>
//!       <Activity><ActivityYear>2020</ActivityYear></Activity>
//!     </Activities>
//!   </unit>
//! </units>
//! ```
//!
//! yields `StatId = "100"` and `Activities = {"Activity":{"ActivityYear":"2020"}}`.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};

use super::{spawn_blocking_reader, ReaderError, RowStream};
use crate::ingest::types::RawRow;

pub fn rows(path: String) -> RowStream {
    spawn_blocking_reader(move |emit| {
        let file = File::open(&path)?;
        parse(BufReader::new(file), &mut |row| emit(Ok(row)))
    })
}

enum Node {
    Text(String),
    Element(Vec<(String, Node)>),
}

impl Node {
    fn into_value(self) -> Value {
        match self {
            Node::Text(text) => Value::String(text),
            Node::Element(children) => {
                let mut map = Map::new();
                for (name, child) in children {
                    let value = child.into_value();
                    match map.get_mut(&name) {
                        Some(Value::Array(items)) => items.push(value),
                        Some(existing) => {
                            let first = existing.take();
                            *existing = Value::Array(vec![first, value]);
                        },
                        None => {
                            map.insert(name, value);
                        },
                    }
                }
                Value::Object(map)
            },
        }
    }
}

struct Frame {
    name: String,
    text: String,
    children: Vec<(String, Node)>,
}

impl Frame {
    fn new(name: String) -> Self {
        Self {
            name,
            text: String::new(),
            children: Vec::new(),
        }
    }

    fn into_node(self) -> (String, Node) {
        let node = if self.children.is_empty() {
            Node::Text(self.text.trim().to_string())
        } else {
            Node::Element(self.children)
        };
        (self.name, node)
    }
}

fn row_from(children: Vec<(String, Node)>) -> RawRow {
    children
        .into_iter()
        .map(|(name, node)| match node {
            Node::Text(text) => (name, text),
            element => (name, element.into_value().to_string()),
        })
        .collect()
}

fn xml_error(e: impl std::fmt::Display) -> ReaderError {
    ReaderError::Xml(e.to_string())
}

pub fn parse<R: BufRead>(input: R, emit: &mut dyn FnMut(RawRow) -> bool) -> Result<(), ReaderError> {
    let mut reader = Reader::from_reader(input);

    let mut stack: Vec<Frame> = Vec::new();
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(xml_error)?;
        let mut closed = None;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push(Frame::new(name));
            },
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                closed = Some(Frame::new(name));
            },
            Event::End(_) => closed = stack.pop(),
            Event::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&text));
                }
            },
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data));
                }
            },
            Event::GeneralRef(reference) => {
                let resolved = match reference.resolve_char_ref().map_err(xml_error)? {
                    Some(ch) => ch.to_string(),
                    None => {
                        let name = String::from_utf8_lossy(&reference).into_owned();
                        quick_xml::escape::resolve_predefined_entity(&name)
                            .map(str::to_string)
                            .unwrap_or_default()
                    },
                };
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&resolved);
                }
            },
            Event::Eof => break,
            _ => {},
        }
        buf.clear();

        let Some(frame) = closed else {
            continue;
        };
        match stack.len() {
            // document root closed
            0 => break,
            // a row closed
            1 => {
                let (_, node) = frame.into_node();
                let row = match node {
                    Node::Element(children) => row_from(children),
                    Node::Text(_) => continue,
                };
                if row.is_blank() {
                    continue;
                }
                if !emit(row) {
                    break;
                }
            },
            _ => {
                let child = frame.into_node();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(child);
                }
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(input: &str) -> Vec<RawRow> {
        let mut rows = Vec::new();
        parse(input.as_bytes(), &mut |row: RawRow| {
            rows.push(row);
            true
        })
        .unwrap();
        rows
    }

    #[test]
    fn test_leaf_children_become_keys() {
        let rows = collect(
            r#"<?xml version="1.0"?>
            <units>
              <unit><StatId>100</StatId><Name>Alpha &amp; Co</Name></unit>
              <unit><StatId>200</StatId><Name/></unit>
            </units>"#,
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Name"), Some("Alpha & Co"));
        assert_eq!(rows[1].get("StatId"), Some("200"));
        assert_eq!(rows[1].get("Name"), Some(""));
    }

    #[test]
    fn test_nested_elements_become_json_blobs() {
        let rows = collect(
            r#"<units><unit>
                 <StatId>100</StatId>
                 <Address><AddressPart1>Main st</AddressPart1></Address>
                 <Persons>
                   <Person><GivenName>Aida</GivenName></Person>
                   <Person><GivenName>Bakyt</GivenName></Person>
                 </Persons>
               </unit></units>"#,
        );
        assert_eq!(rows.len(), 1);

        let address: Value = serde_json::from_str(rows[0].get("Address").unwrap()).unwrap();
        assert_eq!(address["AddressPart1"], "Main st");

        let persons: Value = serde_json::from_str(rows[0].get("Persons").unwrap()).unwrap();
        assert_eq!(persons["Person"][1]["GivenName"], "Bakyt");
    }

    #[test]
    fn test_empty_rows_are_skipped() {
        let rows = collect("<units><unit/><unit><a> </a></unit><unit><a>1</a></unit></units>");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_malformed_document() {
        let result = parse("<units><unit></units>".as_bytes(), &mut |_: RawRow| true);
        assert!(matches!(result, Err(ReaderError::Xml(_))));
    }
}

use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::Result;

/// A fully materialised XML element. Schema and dataset documents are small
/// enough (one page of rows, one schema) that a tree is simpler than
/// streaming all the way through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    /// Attribute lookup by local name (namespace prefixes are ignored).
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Depth-first search for the first element with this local name, including `self`.
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }
}

/// Reads a whole document and returns its root element.
/// An empty document yields an empty element named "".
pub fn parse_document(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => stack.push(open_element(&e)),
            Event::Empty(e) => {
                let element = open_element(&e);
                close_element(&mut stack, &mut root, element);
            }
            Event::Text(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::CData(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::GeneralRef(e) => {
                if let Some(top) = stack.last_mut() {
                    let entity = String::from_utf8_lossy(&e).into_owned();
                    push_entity(&mut top.text, &entity);
                }
            }
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    close_element(&mut stack, &mut root, element);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(root.unwrap_or_default())
}

fn open_element(e: &BytesStart<'_>) -> XmlElement {
    let name = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
    let attributes = e
        .attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let raw = String::from_utf8_lossy(&attr.value).into_owned();
            let value = unescape(&raw).map(|v| v.into_owned()).unwrap_or(raw);
            (key, value)
        })
        .collect();
    XmlElement {
        name,
        attributes,
        ..Default::default()
    }
}

fn close_element(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn push_entity(text: &mut String, entity: &str) {
    if let Some(code) = entity.strip_prefix('#') {
        let parsed = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        if let Some(ch) = parsed.and_then(char::from_u32) {
            text.push(ch);
            return;
        }
    } else if let Some(resolved) = resolve_predefined_entity(entity) {
        text.push_str(resolved);
        return;
    }
    text.push('&');
    text.push_str(entity);
    text.push(';');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_tree_with_attributes_and_text() {
        let doc = parse_document(
            r#"<xs:schema xmlns:xs="x"><xs:element name="A" type="xs:string"/><b>t &amp; u</b></xs:schema>"#,
        )
        .unwrap();
        assert_eq!(doc.name, "schema");
        assert_eq!(doc.children.len(), 2);
        assert_eq!(doc.children[0].attr("name"), Some("A"));
        assert_eq!(doc.children[0].attr("type"), Some("xs:string"));
        assert_eq!(doc.children[1].text, "t & u");
    }

    #[test]
    fn char_references_are_resolved() {
        let doc = parse_document("<a>&#65;&#x42;</a>").unwrap();
        assert_eq!(doc.text, "AB");
    }

    #[test]
    fn find_searches_depth_first() {
        let doc = parse_document("<r><x><Dataset name='d'/></x></r>").unwrap();
        assert_eq!(doc.find("Dataset").and_then(|d| d.attr("name")), Some("d"));
        assert!(doc.find("missing").is_none());
    }
}

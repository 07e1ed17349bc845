//! Minimal owned element tree for package index and manifest documents.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::status::FirmwareError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Element {
    pub name: String,
    attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
}

impl Element {
    /// Parse a document and return its root element.
    pub fn parse(text: &str) -> Result<Element, FirmwareError> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => stack.push(Element::from_start(&e)?),
                Ok(Event::Empty(e)) => {
                    let element = Element::from_start(&e)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Ok(Event::End(_)) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| FirmwareError::invalid("unbalanced XML"))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Ok(Event::Eof) => break,
                Err(err) => return Err(FirmwareError::invalid(format!("xml: {err}"))),
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(FirmwareError::invalid("unterminated XML element"));
        }
        root.ok_or_else(|| FirmwareError::invalid("empty XML document"))
    }

    fn from_start(event: &BytesStart<'_>) -> Result<Element, FirmwareError> {
        let mut attrs = Vec::new();
        for attr in event.attributes() {
            let attr = attr.map_err(|err| FirmwareError::invalid(format!("xml: {err}")))?;
            let value = attr
                .unescape_value()
                .map_err(|err| FirmwareError::invalid(format!("xml: {err}")))?;
            attrs.push((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                value.into_owned(),
            ));
        }
        Ok(Element {
            name: String::from_utf8_lossy(event.name().as_ref()).into_owned(),
            attrs,
            children: Vec::new(),
        })
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attributes in document order.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Attribute parsed with [`parse_number`].
    pub fn number_attr(&self, key: &str) -> Option<u32> {
        self.attr(key).and_then(parse_number)
    }
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), FirmwareError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(FirmwareError::invalid("multiple XML root elements")),
    }
    Ok(())
}

/// `0x`-prefixed hexadecimal or plain decimal.
pub(crate) fn parse_number(text: &str) -> Option<u32> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

//! Minimal namespace-resolving element tree.
//!
//! The whole capability document is held in memory. Element names are stored
//! as `(namespace URI, local name)`, so lookups never depend on the prefix a
//! server picked.

use std::borrow::Cow;

use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use tracing::debug;

use crate::error::MalformedXml;

/// Deepest element nesting accepted by [`XmlDocument::parse`]. The tree's
/// derived `Drop`, `Clone` and `PartialEq` recurse once per level.
pub const MAX_DEPTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    namespace: Option<String>,
    local_name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// True when the element has exactly this namespace (`None` = no
    /// namespace) and local name.
    pub fn is(&self, namespace: Option<&str>, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == namespace
    }

    /// Attribute value by local name; prefixes on attributes are ignored.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == local_name)
            .map(|(_, value)| value.as_str())
    }

    /// Trimmed character data directly inside this element.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// First direct child with the given name.
    pub fn child(&self, namespace: Option<&str>, local_name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(namespace, local_name))
    }

    /// All elements below this one in document order, excluding `self`.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    pub fn find_all<'a>(
        &'a self,
        namespace: Option<&'a str>,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.descendants()
            .filter(move |e| e.is(namespace, local_name))
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    root: Element,
}

impl XmlDocument {
    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Parses a complete document. Anything that is not a single well-formed
    /// root element with resolvable prefixes is rejected, as is nesting
    /// deeper than [`MAX_DEPTH`].
    ///
    /// Text is decoded according to the encoding in the XML declaration (or
    /// BOM), falling back to UTF-8.
    pub fn parse(bytes: &[u8]) -> Result<Self, MalformedXml> {
        let mut reader = NsReader::from_reader(bytes);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            // Updated by the reader once it has seen the declaration.
            let decoder = reader.decoder();
            match reader.read_resolved_event_into(&mut buf) {
                Ok((ns, Event::Start(start))) => {
                    let namespace = owned_namespace(ns, decoder)?;
                    if stack.is_empty() && root.is_some() {
                        return Err(MalformedXml("more than one root element".to_string()));
                    }
                    if stack.len() >= MAX_DEPTH {
                        return Err(MalformedXml(format!(
                            "elements nested deeper than {} levels",
                            MAX_DEPTH
                        )));
                    }
                    stack.push(open_element(namespace, &start, decoder)?);
                }
                Ok((ns, Event::Empty(start))) => {
                    let namespace = owned_namespace(ns, decoder)?;
                    let element = open_element(namespace, &start, decoder)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Ok((_, Event::End(_))) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| MalformedXml("unmatched end tag".to_string()))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Ok((_, Event::Text(text))) => {
                    let value = text
                        .unescape()
                        .map_err(|e| MalformedXml(format!("bad character data: {}", e)))?;
                    push_text(&mut stack, &value)?;
                }
                Ok((_, Event::CData(data))) => {
                    let value = data
                        .decode()
                        .map_err(|e| MalformedXml(format!("bad CDATA section: {}", e)))?;
                    push_text(&mut stack, &value)?;
                }
                Ok((_, Event::Eof)) => break,
                Ok(_) => {}
                Err(e) => return Err(MalformedXml(e.to_string())),
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(MalformedXml(format!(
                "document ended with {} unclosed element(s)",
                stack.len()
            )));
        }

        let root = root.ok_or_else(|| MalformedXml("document has no root element".to_string()))?;
        debug!(
            "Parsed XML document with root <{}> ({} descendant elements)",
            root.local_name,
            root.descendants().count()
        );
        Ok(Self { root })
    }
}

fn decode_name(decoder: Decoder, bytes: &[u8]) -> Result<String, MalformedXml> {
    decoder
        .decode(bytes)
        .map(Cow::into_owned)
        .map_err(|e| MalformedXml(format!("undecodable name: {}", e)))
}

fn owned_namespace(ns: ResolveResult<'_>, decoder: Decoder) -> Result<Option<String>, MalformedXml> {
    match ns {
        ResolveResult::Bound(Namespace(uri)) => decode_name(decoder, uri).map(Some),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(MalformedXml(format!(
            "unbound namespace prefix '{}'",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

fn open_element(
    namespace: Option<String>,
    start: &BytesStart<'_>,
    decoder: Decoder,
) -> Result<Element, MalformedXml> {
    let local_name = decode_name(decoder, start.local_name().as_ref())?;

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| MalformedXml(format!("bad attribute on <{}>: {}", local_name, e)))?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = decode_name(decoder, attr.key.local_name().as_ref())?;
        let value: Cow<'_, str> = attr
            .decode_and_unescape_value(decoder)
            .map_err(|e| MalformedXml(format!("bad attribute value on <{}>: {}", local_name, e)))?;
        attributes.push((key, value.into_owned()));
    }

    Ok(Element {
        namespace,
        local_name,
        attributes,
        text: String::new(),
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), MalformedXml> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(MalformedXml("more than one root element".to_string())),
    }
    Ok(())
}

fn push_text(stack: &mut [Element], value: &str) -> Result<(), MalformedXml> {
    match stack.last_mut() {
        Some(current) => {
            if !current.text.is_empty() {
                current.text.push(' ');
            }
            current.text.push_str(value);
            Ok(())
        }
        None if value.trim().is_empty() => Ok(()),
        None => Err(MalformedXml("character data outside the root element".to_string())),
    }
}

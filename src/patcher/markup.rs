//! Editable tree for the container's markup file.
//!
//! The tree keeps everything a reader of the file could observe: attribute
//! order, self-closing elements, whitespace text, comments, and the leading
//! declaration. Reading and writing go through `quick-xml`.

use crate::error::PatchError;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
    DocType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
    pub self_closing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupDocument {
    pub declaration: Option<Declaration>,
    pub prolog: Vec<Node>,
    pub root: Element,
    pub epilog: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
            self_closing: true,
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Overwrites in place so the attribute keeps its position; new keys go last.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key.to_string(), value)),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|el| el.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|el| el.name == name)
    }

    pub fn child_with_attr(&self, name: &str, key: &str, value: &str) -> Option<&Element> {
        self.elements()
            .find(|el| el.name == name && el.attr(key) == Some(value))
    }

    pub fn child_with_attr_mut(
        &mut self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Option<&mut Element> {
        self.elements_mut()
            .find(|el| el.name == name && el.attr(key) == Some(value))
    }

    pub fn push_child(&mut self, child: Element) {
        self.self_closing = false;
        self.children.push(Node::Element(child));
    }

    /// Drops every child node, leaving an empty element.
    pub fn clear_children(&mut self) {
        self.children.clear();
    }

    /// Inserts `child` right after the last element child named like it,
    /// copying the whitespace that precedes that sibling. Without such a
    /// sibling the child is appended at the end, before trailing whitespace.
    pub fn insert_after_last_named(&mut self, child: Element) {
        self.self_closing = false;
        let last_same = self
            .children
            .iter()
            .rposition(|node| matches!(node, Node::Element(el) if el.name == child.name));

        let Some(index) = last_same else {
            let tail_ws = matches!(self.children.last(), Some(Node::Text(t)) if t.trim().is_empty());
            let at = if tail_ws {
                self.children.len() - 1
            } else {
                self.children.len()
            };
            let indent = self.leading_indent(at);
            let mut insert = Vec::with_capacity(2);
            if let Some(indent) = indent {
                insert.push(Node::Text(indent));
            }
            insert.push(Node::Element(child));
            self.children.splice(at..at, insert);
            return;
        };

        let indent = match index.checked_sub(1).map(|i| &self.children[i]) {
            Some(Node::Text(t)) if t.trim().is_empty() => Some(t.clone()),
            _ => None,
        };
        let mut insert = Vec::with_capacity(2);
        if let Some(indent) = indent {
            insert.push(Node::Text(indent));
        }
        insert.push(Node::Element(child));
        self.children.splice(index + 1..index + 1, insert);
    }

    fn leading_indent(&self, before: usize) -> Option<String> {
        self.children[..before]
            .iter()
            .rev()
            .find_map(|node| match node {
                Node::Text(t) if t.trim().is_empty() => Some(t.clone()),
                _ => None,
            })
    }
}

fn utf8(bytes: &[u8], what: &str) -> Result<String, PatchError> {
    std::str::from_utf8(bytes)
        .map(ToOwned::to_owned)
        .map_err(|err| PatchError::MalformedDocument(format!("{what} is not valid UTF-8: {err}")))
}

fn xml_err(err: quick_xml::Error, reader_pos: usize) -> PatchError {
    PatchError::MalformedDocument(format!("{err} (at byte {reader_pos})"))
}

fn element_from_start(start: &BytesStart<'_>, self_closing: bool) -> Result<Element, PatchError> {
    let name = utf8(start.name().as_ref(), "element name")?;
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| {
            PatchError::MalformedDocument(format!("bad attribute on <{name}>: {err}"))
        })?;
        let key = utf8(attr.key.as_ref(), "attribute name")?;
        let value = attr
            .unescape_value()
            .map_err(|err| PatchError::MalformedDocument(format!("bad value for {key}: {err}")))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        name,
        attrs,
        children: Vec::new(),
        self_closing,
    })
}

struct TreeBuilder {
    declaration: Option<Declaration>,
    prolog: Vec<Node>,
    root: Option<Element>,
    epilog: Vec<Node>,
    stack: Vec<Element>,
}

impl TreeBuilder {
    fn attach(&mut self, node: Node) -> Result<(), PatchError> {
        if let Some(parent) = self.stack.last_mut() {
            parent.children.push(node);
            return Ok(());
        }
        match node {
            Node::Element(el) => {
                if self.root.is_some() {
                    return Err(PatchError::MalformedDocument(format!(
                        "second root element <{}>",
                        el.name
                    )));
                }
                self.root = Some(el);
            }
            other if self.root.is_none() => self.prolog.push(other),
            other => self.epilog.push(other),
        }
        Ok(())
    }
}

/// Parses markup text into an editable tree.
pub fn parse(text: &str) -> Result<MarkupDocument, PatchError> {
    let mut reader = Reader::from_str(text);
    let mut builder = TreeBuilder {
        declaration: None,
        prolog: Vec::new(),
        root: None,
        epilog: Vec::new(),
        stack: Vec::new(),
    };

    loop {
        let event = reader
            .read_event()
            .map_err(|err| xml_err(err, reader.buffer_position()))?;
        match event {
            Event::Decl(decl) => {
                let version = decl
                    .version()
                    .map_err(|err| xml_err(err, reader.buffer_position()))?;
                let encoding = match decl.encoding() {
                    Some(raw) => Some(utf8(
                        &raw.map_err(|err| xml_err(err, reader.buffer_position()))?,
                        "declared encoding",
                    )?),
                    None => None,
                };
                if let Some(enc) = &encoding
                    && !enc.eq_ignore_ascii_case("utf-8")
                    && !enc.eq_ignore_ascii_case("utf8")
                {
                    return Err(PatchError::MalformedDocument(format!(
                        "unsupported encoding `{enc}`"
                    )));
                }
                let standalone = match decl.standalone() {
                    Some(raw) => Some(utf8(
                        &raw.map_err(|err| xml_err(err, reader.buffer_position()))?,
                        "standalone flag",
                    )?),
                    None => None,
                };
                builder.declaration = Some(Declaration {
                    version: utf8(&version, "declared version")?,
                    encoding,
                    standalone,
                });
            }
            Event::Start(start) => {
                let el = element_from_start(&start, false)?;
                builder.stack.push(el);
            }
            Event::Empty(start) => {
                let el = element_from_start(&start, true)?;
                builder.attach(Node::Element(el))?;
            }
            Event::End(end) => {
                let Some(el) = builder.stack.pop() else {
                    return Err(PatchError::MalformedDocument(format!(
                        "unexpected closing tag </{}>",
                        String::from_utf8_lossy(end.name().as_ref())
                    )));
                };
                builder.attach(Node::Element(el))?;
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map_err(|err| xml_err(err, reader.buffer_position()))?
                    .into_owned();
                builder.attach(Node::Text(value))?;
            }
            Event::CData(data) => {
                builder.attach(Node::CData(utf8(&data, "CDATA section")?))?;
            }
            Event::Comment(comment) => {
                builder.attach(Node::Comment(utf8(&comment, "comment")?))?;
            }
            Event::PI(pi) => {
                builder.attach(Node::ProcessingInstruction(utf8(&pi, "processing instruction")?))?;
            }
            Event::DocType(doctype) => {
                builder.attach(Node::DocType(utf8(&doctype, "doctype")?))?;
            }
            Event::Eof => break,
        }
    }

    if let Some(open) = builder.stack.last() {
        return Err(PatchError::MalformedDocument(format!(
            "element <{}> is never closed",
            open.name
        )));
    }
    let Some(root) = builder.root else {
        return Err(PatchError::MalformedDocument(
            "document has no root element".to_string(),
        ));
    };

    Ok(MarkupDocument {
        declaration: builder.declaration,
        prolog: builder.prolog,
        root,
        epilog: builder.epilog,
    })
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(ch),
        }
    }
    out
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), PatchError> {
    writer
        .write_event(event)
        .map_err(|err| PatchError::MalformedDocument(format!("failed to write markup: {err}")))
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &Node) -> Result<(), PatchError> {
    match node {
        Node::Element(el) => write_element(writer, el),
        Node::Text(text) => write_event(
            writer,
            Event::Text(BytesText::from_escaped(escape_text(text))),
        ),
        Node::CData(data) => write_event(writer, Event::CData(BytesCData::new(data.as_str()))),
        Node::Comment(raw) => write_event(
            writer,
            Event::Comment(BytesText::from_escaped(raw.as_str())),
        ),
        Node::ProcessingInstruction(raw) => {
            write_event(writer, Event::PI(BytesText::from_escaped(raw.as_str())))
        }
        Node::DocType(raw) => write_event(
            writer,
            Event::DocType(BytesText::from_escaped(raw.as_str())),
        ),
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, el: &Element) -> Result<(), PatchError> {
    let mut start = BytesStart::new(el.name.as_str());
    for (key, value) in &el.attrs {
        start.push_attribute(Attribute {
            key: QName(key.as_bytes()),
            value: Cow::Owned(escape_attr(value).into_bytes()),
        });
    }

    if el.children.is_empty() && el.self_closing {
        return write_event(writer, Event::Empty(start));
    }

    write_event(writer, Event::Start(start))?;
    for child in &el.children {
        write_node(writer, child)?;
    }
    write_event(writer, Event::End(BytesEnd::new(el.name.as_str())))
}

/// Writes the tree back out, declaration first when the source had one.
pub fn serialize(doc: &MarkupDocument) -> Result<Vec<u8>, PatchError> {
    let mut writer = Writer::new(Vec::new());
    if let Some(decl) = &doc.declaration {
        write_event(
            &mut writer,
            Event::Decl(BytesDecl::new(
                decl.version.as_str(),
                decl.encoding.as_deref(),
                decl.standalone.as_deref(),
            )),
        )?;
    }
    for node in &doc.prolog {
        write_node(&mut writer, node)?;
    }
    write_element(&mut writer, &doc.root)?;
    for node in &doc.epilog {
        write_node(&mut writer, node)?;
    }
    Ok(writer.into_inner())
}

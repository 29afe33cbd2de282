//! Intermediate document tree shared by all metadata schemas.
//!
//! Parsing goes XML → [`XmlNode`] through a namespace-aware quick-xml reader;
//! serialization goes `buildContent` → [`XmlNode`] → [`write_tree`]. Nothing
//! else in the crate touches XML events directly.

use std::io::{BufRead, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use quick_xml::Writer;

use crate::error::{MffError, Result};

pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Empty,
    Text(String),
    Children(Vec<XmlNode>),
}

/// One element: local name, resolved namespace, attributes and either text or children
#[derive(Debug, Clone, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub content: NodeContent,
}

impl XmlNode {
    pub fn new(name: &str) -> Self {
        XmlNode {
            name: name.to_string(),
            namespace: None,
            attributes: Vec::new(),
            content: NodeContent::Empty,
        }
    }

    pub fn text(name: &str, text: impl Into<String>) -> Self {
        let mut node = XmlNode::new(name);
        node.content = NodeContent::Text(text.into());
        node
    }

    pub fn parent(name: &str, children: Vec<XmlNode>) -> Self {
        let mut node = XmlNode::new(name);
        if !children.is_empty() {
            node.content = NodeContent::Children(children);
        }
        node
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.push((key.to_string(), value.into()));
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// `{namespace}name`, the registry lookup key
    pub fn qualified_tag(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{{{}}}{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    pub fn children(&self) -> &[XmlNode] {
        match &self.content {
            NodeContent::Children(children) => children,
            _ => &[],
        }
    }

    pub fn text_content(&self) -> Option<&str> {
        match &self.content {
            NodeContent::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        self.children().iter().find(|c| c.name == name)
    }

    pub fn find_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children().iter().filter(move |c| c.name == name)
    }

    /// Required child element
    pub fn child(&self, name: &str) -> Result<&XmlNode> {
        self.find(name).ok_or_else(|| {
            MffError::InvalidFormat(format!("<{}> has no <{}> element", self.name, name))
        })
    }

    /// Text of a required child element; empty elements yield ""
    pub fn child_text(&self, name: &str) -> Result<&str> {
        Ok(self.child(name)?.text_content().unwrap_or(""))
    }

    pub fn find_text(&self, name: &str) -> Option<&str> {
        self.find(name).and_then(|c| c.text_content())
    }
}

struct PartialNode {
    node: XmlNode,
    text: String,
    children: Vec<XmlNode>,
}

impl PartialNode {
    fn finish(self) -> XmlNode {
        let mut node = self.node;
        let text = self.text.trim();
        node.content = if !self.children.is_empty() {
            NodeContent::Children(self.children)
        } else if !text.is_empty() {
            NodeContent::Text(text.to_string())
        } else {
            NodeContent::Empty
        };
        node
    }
}

fn namespace_of(resolved: ResolveResult) -> Option<String> {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) => Some(String::from_utf8_lossy(ns).into_owned()),
        _ => None,
    }
}

fn start_node(namespace: Option<String>, e: &BytesStart) -> Result<XmlNode> {
    let mut node = XmlNode::new(&String::from_utf8_lossy(e.local_name().as_ref()));
    node.namespace = namespace;
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        // 命名空间声明不算属性
        if attr.key.as_ref().starts_with(b"xmlns") {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn attach(stack: &mut [PartialNode], root: &mut Option<XmlNode>, node: XmlNode) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => {
            return Err(MffError::InvalidFormat(format!(
                "second root element <{}>",
                node.name
            )))
        }
    }
    Ok(())
}

/// Parse a whole document into a tree rooted at its single root element
pub fn parse_tree<R: BufRead>(source: R) -> Result<XmlNode> {
    let mut reader = NsReader::from_reader(source);
    let mut buf = Vec::new();
    let mut stack: Vec<PartialNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        buf.clear();
        let (resolved, event) = reader.read_resolved_event_into(&mut buf)?;
        let namespace = namespace_of(resolved);
        match event {
            Event::Start(ref e) => {
                let node = start_node(namespace, e)?;
                stack.push(PartialNode { node, text: String::new(), children: Vec::new() });
            }
            Event::Empty(ref e) => {
                let node = start_node(namespace, e)?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(ref t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(ref c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(c));
                }
            }
            Event::End(_) => {
                let partial = stack
                    .pop()
                    .ok_or_else(|| MffError::InvalidFormat("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, partial.finish())?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(MffError::InvalidFormat("document ended inside an element".to_string()));
    }
    root.ok_or_else(|| MffError::InvalidFormat("document has no root element".to_string()))
}

pub fn parse_str(text: &str) -> Result<XmlNode> {
    parse_tree(text.as_bytes())
}

/// Write `root` as a complete, standalone XML document
pub fn write_tree<W: Write>(sink: W, root: &XmlNode) -> Result<()> {
    let mut writer = Writer::new_with_indent(sink, b' ', 4);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    write_node(&mut writer, root, None)?;
    Ok(())
}

fn write_node<W: Write>(
    writer: &mut Writer<W>,
    node: &XmlNode,
    parent_ns: Option<&str>,
) -> Result<()> {
    let mut start = BytesStart::new(node.name.as_str());
    let ns = node.namespace.as_deref().or(parent_ns);
    if let Some(own) = node.namespace.as_deref() {
        if parent_ns != Some(own) {
            start.push_attribute(("xmlns", own));
        }
    }
    for (key, value) in &node.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    match &node.content {
        NodeContent::Empty => {
            writer.write_event(Event::Empty(start))?;
        }
        NodeContent::Text(text) => {
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new(node.name.as_str())))?;
        }
        NodeContent::Children(children) => {
            writer.write_event(Event::Start(start))?;
            for child in children {
                write_node(writer, child, ns)?;
            }
            writer.write_event(Event::End(BytesEnd::new(node.name.as_str())))?;
        }
    }
    Ok(())
}

pub fn to_xml_string(root: &XmlNode) -> Result<String> {
    let mut out = Vec::new();
    write_tree(&mut out, root)?;
    String::from_utf8(out).map_err(|e| MffError::InvalidFormat(e.to_string()))
}

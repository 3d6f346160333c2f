//! Minimal XML element tree.
//!
//! Envelopes are built as [`Element`] trees and rendered to text; responses
//! are parsed back into the same tree. Lookups go by *local* name so a
//! `ShellId` is found whether the server wrote `rsp:ShellId`, `w:ShellId`
//! or a bare `ShellId`. Only the subset of XML that WS-Management servers
//! emit is supported: no DTDs, no external entities.

use crate::error::{Result, WinRmError};

/// A node in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Nested element.
    Element(Element),
    /// Character data (already unescaped).
    Text(String),
}

/// An XML element with its qualified name, attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written, e.g. `rsp:Shell`.
    pub name: String,
    /// Attributes in document order, with qualified names.
    pub attributes: Vec<(String, String)>,
    /// Child nodes in document order.
    pub children: Vec<Node>,
}

impl Element {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Add an attribute.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Add a text child.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Add an element child.
    pub fn child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Append an element child in place.
    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    /// Attribute value by local name. Namespace declarations are skipped.
    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .filter(|(name, _)| name != "xmlns" && !name.starts_with("xmlns:"))
            .find(|(name, _)| local_part(name) == local)
            .map(|(_, value)| value.as_str())
    }

    /// Direct element children.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First direct child with the given local name.
    pub fn child_named(&self, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.local_name() == local)
    }

    /// All descendants (not including `self`) in document order.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        let mut stack: Vec<&Element> = self.elements().collect();
        stack.reverse();
        while let Some(element) = stack.pop() {
            out.push(element);
            let mut kids: Vec<&Element> = element.elements().collect();
            kids.reverse();
            stack.extend(kids);
        }
        out
    }

    /// First descendant with the given local name.
    pub fn find(&self, local: &str) -> Option<&Element> {
        self.descendants()
            .into_iter()
            .find(|e| e.local_name() == local)
    }

    /// Every descendant with the given local name.
    pub fn find_all(&self, local: &str) -> Vec<&Element> {
        self.descendants()
            .into_iter()
            .filter(|e| e.local_name() == local)
            .collect()
    }

    /// Concatenated text of this element and all its descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Serialize to a string.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape(value));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                Node::Element(e) => e.write_to(out),
                Node::Text(t) => out.push_str(&escape(t)),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn local_part(name: &str) -> &str {
    name.split_once(':').map_or(name, |(_, local)| local)
}

fn collect_text(element: &Element, out: &mut String) {
    for node in &element.children {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => collect_text(e, out),
        }
    }
}

/// Escape special characters for XML text and attribute values.
pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn unescape(s: &str) -> Result<String> {
    if !s.contains('&') {
        return Ok(s.to_string());
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .ok_or_else(|| malformed("unterminated entity reference"))?;
        let entity = &after[..semi];
        match entity {
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "amp" => out.push('&'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                let ch = code
                    .and_then(char::from_u32)
                    .ok_or_else(|| malformed(&format!("unknown entity &{};", entity)))?;
                out.push(ch);
            }
        }
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Deepest element nesting [`parse`] accepts.
pub const MAX_DEPTH: usize = 256;

fn malformed(message: &str) -> WinRmError {
    WinRmError::Protocol(format!("malformed XML: {}", message))
}

/// Parse a document into its root element.
pub fn parse(input: &str) -> Result<Element> {
    let mut parser = Parser {
        src: input,
        pos: 0,
        depth: 0,
    };
    parser.skip_prolog()?;
    let root = parser.element()?;
    parser.skip_prolog()?;
    if parser.pos < parser.src.len() {
        return Err(malformed("trailing content after root element"));
    }
    Ok(root)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(malformed(&format!("expected {:?} at offset {}", token, self.pos)))
        }
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn skip_past(&mut self, terminator: &str) -> Result<&'a str> {
        let rest = self.rest();
        let end = rest
            .find(terminator)
            .ok_or_else(|| malformed(&format!("missing {:?}", terminator)))?;
        self.pos += end + terminator.len();
        Ok(&rest[..end])
    }

    /// Skip whitespace, XML declarations, processing instructions, comments and doctypes.
    fn skip_prolog(&mut self) -> Result<()> {
        loop {
            self.skip_ws();
            if self.eat("<?") {
                self.skip_past("?>")?;
            } else if self.eat("<!--") {
                self.skip_past("-->")?;
            } else if self.eat("<!DOCTYPE") {
                self.skip_past(">")?;
            } else {
                return Ok(());
            }
        }
    }

    fn name(&mut self) -> Result<String> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '/' | '>' | '='))
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(malformed(&format!("expected a name at offset {}", self.pos)));
        }
        self.pos += end;
        Ok(rest[..end].to_string())
    }

    fn element(&mut self) -> Result<Element> {
        self.expect("<")?;
        let mut element = Element::new(self.name()?);

        loop {
            self.skip_ws();
            if self.eat("/>") {
                return Ok(element);
            }
            if self.eat(">") {
                break;
            }
            let key = self.name()?;
            self.skip_ws();
            self.expect("=")?;
            self.skip_ws();
            let quote = if self.eat("\"") {
                "\""
            } else if self.eat("'") {
                "'"
            } else {
                return Err(malformed(&format!("unquoted attribute {}", key)));
            };
            let raw = self.skip_past(quote)?;
            element.attributes.push((key, unescape(raw)?));
        }

        loop {
            if self.rest().is_empty() {
                return Err(malformed(&format!("unclosed element <{}>", element.name)));
            }
            if self.eat("</") {
                let closing = self.name()?;
                if closing != element.name {
                    return Err(malformed(&format!(
                        "mismatched closing tag </{}> for <{}>",
                        closing, element.name
                    )));
                }
                self.skip_ws();
                self.expect(">")?;
                return Ok(element);
            } else if self.eat("<!--") {
                self.skip_past("-->")?;
            } else if self.eat("<![CDATA[") {
                let data = self.skip_past("]]>")?;
                element.children.push(Node::Text(data.to_string()));
            } else if self.eat("<?") {
                self.skip_past("?>")?;
            } else if self.rest().starts_with('<') {
                if self.depth >= MAX_DEPTH {
                    return Err(malformed("element nesting too deep"));
                }
                self.depth += 1;
                let child = self.element();
                self.depth -= 1;
                element.children.push(Node::Element(child?));
            } else {
                let rest = self.rest();
                let end = rest.find('<').unwrap_or(rest.len());
                let raw = &rest[..end];
                self.pos += end;
                if !raw.trim().is_empty() {
                    element.children.push(Node::Text(unescape(raw)?));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_nested() {
        let element = Element::new("rsp:CommandLine")
            .child(Element::new("rsp:Command").text("echo <hi> & bye"))
            .child(Element::new("rsp:Empty"));

        assert_eq!(
            element.render(),
            "<rsp:CommandLine><rsp:Command>echo &lt;hi&gt; &amp; bye</rsp:Command><rsp:Empty/></rsp:CommandLine>"
        );
    }

    #[test]
    fn test_render_escapes_attributes() {
        let element = Element::new("w:Option").attr("Name", "a\"b").text("TRUE");
        assert_eq!(element.render(), "<w:Option Name=\"a&quot;b\">TRUE</w:Option>");
    }

    #[test]
    fn test_parse_ignores_prefix_on_lookup() {
        let doc = r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:x="urn:x">
  <s:Body>
    <x:ResourceCreated><x:ShellId>abc-123</x:ShellId></x:ResourceCreated>
  </s:Body>
</s:Envelope>"#;

        let root = parse(doc).unwrap();
        assert_eq!(root.local_name(), "Envelope");
        assert_eq!(root.find("ShellId").unwrap().text_content(), "abc-123");
        assert_eq!(root.attribute("s"), None);
    }

    #[test]
    fn test_parse_rejects_excessive_nesting() {
        for depth in [MAX_DEPTH + 1, 2_000, 200_000] {
            let doc = format!(
                "<s:Envelope><s:Body>{}{}</s:Body></s:Envelope>",
                "<a>".repeat(depth),
                "</a>".repeat(depth)
            );
            assert!(matches!(
                parse(&doc),
                Err(WinRmError::Protocol(msg)) if msg.contains("nesting too deep")
            ));
        }
    }

    #[test]
    fn test_parse_accepts_nesting_at_limit() {
        let doc = format!("<r>{}{}</r>", "<a>".repeat(MAX_DEPTH), "</a>".repeat(MAX_DEPTH));
        assert!(parse(&doc).is_ok());
    }

    #[test]
    fn test_parse_attributes_and_entities() {
        let root = parse(
            "<a:Stream Name='stdout' CommandId=\"C1\">x &amp; y &#65;&#x42;</a:Stream>",
        )
        .unwrap();
        assert_eq!(root.attribute("Name"), Some("stdout"));
        assert_eq!(root.attribute("CommandId"), Some("C1"));
        assert_eq!(root.text_content(), "x & y AB");
    }

    #[test]
    fn test_parse_self_closing_and_comments() {
        let root = parse("<r><!-- note --><a/><b x=\"1\" /><![CDATA[<raw>]]></r>").unwrap();
        let names: Vec<_> = root.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(root.text_content(), "<raw>");
    }

    #[test]
    fn test_descendants_document_order() {
        let root = parse("<r><a><b/></a><c/></r>").unwrap();
        let names: Vec<_> = root.descendants().iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(root.find_all("b").len(), 1);
    }

    #[test]
    fn test_parse_rejects_mismatched_tags() {
        assert!(matches!(parse("<a><b></a></b>"), Err(WinRmError::Protocol(_))));
        assert!(matches!(parse("<a>"), Err(WinRmError::Protocol(_))));
        assert!(matches!(parse("<a/><b/>"), Err(WinRmError::Protocol(_))));
    }

    #[test]
    fn test_render_then_parse() {
        let element = Element::new("rsp:Variable").attr("Name", "PATH").text("C:\\a;C:\\b");
        let parsed = parse(&element.render()).unwrap();
        assert_eq!(parsed, element);
    }
}

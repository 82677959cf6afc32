//! Canonical XML tree for fiscal documents
//!
//! Every piece of XML this engine produces (documents, cancellation events,
//! signature blocks) is built as an [`XmlElement`] tree and serialized by one
//! writer that always emits the canonical form. Signature digests are
//! computed over the same bytes that go on the wire, so a document never has
//! a "pretty" form and a "canonical" form that can drift apart.
//!
//! ## Canonical form
//!
//! The writer implements the subset of Exclusive XML Canonicalization that
//! the documents produced here need:
//!
//! - no XML declaration, no insignificant whitespace
//! - empty elements use explicit end tags (`<a></a>`, never `<a/>`)
//! - namespace declarations come first (default `xmlns`, then prefixed
//!   declarations sorted by prefix), followed by attributes sorted by name
//! - a namespace declaration identical to one already in scope is omitted
//! - text escapes `&`, `<`, `>` and carriage returns; attribute values
//!   escape `&`, `<`, `"`, tab, newline and carriage return
//!
//! Serializing a subtree on its own renders the subtree's own namespace
//! declarations even when a parent would normally carry them, which is what
//! digest computation over a referenced element requires.

// =============================================================================
// Tree Types
// =============================================================================

/// A node in the XML tree: either a nested element or a text run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An XML element with namespace declarations, attributes, and children.
///
/// Construction is builder-style and consuming, which keeps deeply nested
/// document layouts readable:
///
/// ```
/// use fisco_engine::xml::XmlElement;
///
/// let ide = XmlElement::new("ide")
///     .child(XmlElement::leaf("cUF", "35"))
///     .child(XmlElement::leaf("mod", "65"));
/// assert_eq!(ide.canonicalize(), "<ide><cUF>35</cUF><mod>65</mod></ide>");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    /// Namespace declarations on this element. `None` is the default
    /// namespace (`xmlns="..."`), `Some(p)` a prefixed one (`xmlns:p="..."`).
    namespaces: Vec<(Option<String>, String)>,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Shorthand for an element containing only text.
    pub fn leaf(name: impl Into<String>, text: impl Into<String>) -> Self {
        XmlElement::new(name).text(text)
    }

    /// Declares the default namespace (`xmlns="uri"`) on this element.
    pub fn default_namespace(mut self, uri: impl Into<String>) -> Self {
        self.namespaces.push((None, uri.into()));
        self
    }

    /// Declares a prefixed namespace (`xmlns:prefix="uri"`) on this element.
    pub fn namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.push((Some(prefix.into()), uri.into()));
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn child(mut self, element: XmlElement) -> Self {
        self.children.push(XmlNode::Element(element));
        self
    }

    /// Appends the element if present; absent optional blocks render nothing.
    pub fn child_opt(mut self, element: Option<XmlElement>) -> Self {
        if let Some(element) = element {
            self.children.push(XmlNode::Element(element));
        }
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    /// Non-consuming append, for callers that assemble a tree in stages
    /// (the signer attaches its `Signature` block this way).
    pub fn push_child(&mut self, element: XmlElement) {
        self.children.push(XmlNode::Element(element));
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// First direct child element with the given name.
    pub fn child_named(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find_map(|node| match node {
            XmlNode::Element(el) if el.name == name => Some(el),
            _ => None,
        })
    }

    /// First element with the given name anywhere below this one,
    /// depth-first. Includes this element itself.
    pub fn descendant_named(&self, name: &str) -> Option<&XmlElement> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|node| match node {
            XmlNode::Element(el) => el.descendant_named(name),
            XmlNode::Text(_) => None,
        })
    }

    /// Concatenated direct text children.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let XmlNode::Text(text) = node {
                out.push_str(text);
            }
        }
        out
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Serializes this element (and everything below it) in canonical form.
    pub fn canonicalize(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out, &[]);
        out
    }

    fn write_canonical(&self, out: &mut String, in_scope: &[(Option<String>, String)]) {
        out.push('<');
        out.push_str(&self.name);

        // Namespace declarations: default first, then by prefix. Identical
        // declarations already made by an ancestor are not repeated.
        let mut declared: Vec<&(Option<String>, String)> = self
            .namespaces
            .iter()
            .filter(|decl| !in_scope.contains(decl))
            .collect();
        declared.sort_by(|a, b| a.0.cmp(&b.0));
        for (prefix, uri) in &declared {
            match prefix {
                None => out.push_str(" xmlns=\""),
                Some(p) => {
                    out.push_str(" xmlns:");
                    out.push_str(p);
                    out.push_str("=\"");
                }
            }
            out.push_str(&escape_attribute(uri));
            out.push('"');
        }

        let mut attributes: Vec<&(String, String)> = self.attributes.iter().collect();
        attributes.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attribute(value));
            out.push('"');
        }
        out.push('>');

        let mut scope: Vec<(Option<String>, String)> = in_scope.to_vec();
        scope.extend(self.namespaces.iter().cloned());
        for node in &self.children {
            match node {
                XmlNode::Element(el) => el.write_canonical(out, &scope),
                XmlNode::Text(text) => out.push_str(&escape_text(text)),
            }
        }

        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

// =============================================================================
// Escaping
// =============================================================================

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
    out
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_renders_name_and_text() {
        assert_eq!(XmlElement::leaf("cUF", "35").canonicalize(), "<cUF>35</cUF>");
    }

    #[test]
    fn empty_element_uses_explicit_end_tag() {
        assert_eq!(XmlElement::new("xJust").canonicalize(), "<xJust></xJust>");
    }

    #[test]
    fn attributes_are_sorted_by_name() {
        let el = XmlElement::new("infNFe")
            .attr("versao", "4.00")
            .attr("Id", "NFe123");
        assert_eq!(
            el.canonicalize(),
            "<infNFe Id=\"NFe123\" versao=\"4.00\"></infNFe>"
        );
    }

    #[test]
    fn namespace_declarations_precede_attributes() {
        let el = XmlElement::new("infNFe")
            .attr("Id", "NFe123")
            .default_namespace("http://www.portalfiscal.inf.br/nfe");
        assert_eq!(
            el.canonicalize(),
            "<infNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" Id=\"NFe123\"></infNFe>"
        );
    }

    #[test]
    fn default_namespace_sorts_before_prefixed() {
        let el = XmlElement::new("root")
            .namespace("ds", "http://www.w3.org/2000/09/xmldsig#")
            .default_namespace("http://example.com/a");
        assert_eq!(
            el.canonicalize(),
            "<root xmlns=\"http://example.com/a\" \
             xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\"></root>"
        );
    }

    #[test]
    fn redundant_declaration_is_suppressed_inside_parent() {
        let uri = "http://www.portalfiscal.inf.br/nfe";
        let inner = XmlElement::new("infNFe")
            .default_namespace(uri)
            .attr("Id", "NFe123");
        let outer = XmlElement::new("NFe").default_namespace(uri).child(inner.clone());

        // Inside the parent the child's identical declaration disappears.
        assert_eq!(
            outer.canonicalize(),
            format!("<NFe xmlns=\"{uri}\"><infNFe Id=\"NFe123\"></infNFe></NFe>")
        );
        // Serialized alone, the subtree still carries its namespace.
        assert_eq!(
            inner.canonicalize(),
            format!("<infNFe xmlns=\"{uri}\" Id=\"NFe123\"></infNFe>")
        );
    }

    #[test]
    fn different_namespace_is_not_suppressed() {
        let signature =
            XmlElement::new("Signature").default_namespace("http://www.w3.org/2000/09/xmldsig#");
        let doc = XmlElement::new("NFe")
            .default_namespace("http://www.portalfiscal.inf.br/nfe")
            .child(signature);
        assert!(doc
            .canonicalize()
            .contains("<Signature xmlns=\"http://www.w3.org/2000/09/xmldsig#\">"));
    }

    #[test]
    fn text_escapes_markup_characters() {
        let el = XmlElement::leaf("xNome", "Mercearia & Cia <Ltda> \r ok");
        assert_eq!(
            el.canonicalize(),
            "<xNome>Mercearia &amp; Cia &lt;Ltda&gt; &#xD; ok</xNome>"
        );
    }

    #[test]
    fn attribute_escapes_quotes_and_whitespace_controls() {
        let el = XmlElement::new("detEvento").attr("nota", "a\"b\tc\nd\re & f > g");
        assert_eq!(
            el.canonicalize(),
            "<detEvento nota=\"a&quot;b&#x9;c&#xA;d&#xD;e &amp; f > g\"></detEvento>"
        );
    }

    #[test]
    fn child_lookup_helpers() {
        let doc = XmlElement::new("NFe").child(
            XmlElement::new("infNFe").attr("Id", "NFe9").child(
                XmlElement::new("ide")
                    .child(XmlElement::leaf("cUF", "35"))
                    .child(XmlElement::leaf("mod", "65")),
            ),
        );

        assert!(doc.child_named("infNFe").is_some());
        assert!(doc.child_named("ide").is_none());

        let ide = doc.descendant_named("ide");
        assert!(ide.is_some());
        let cuf = doc.descendant_named("cUF");
        assert_eq!(cuf.map(|el| el.text_content()), Some("35".to_string()));
        assert_eq!(
            doc.descendant_named("infNFe").and_then(|el| el.attribute("Id")),
            Some("NFe9")
        );
    }

    #[test]
    fn mixed_content_preserves_order() {
        let el = XmlElement::new("p")
            .text("a")
            .child(XmlElement::leaf("b", "x"))
            .text("c");
        assert_eq!(el.canonicalize(), "<p>a<b>x</b>c</p>");
    }
}

//! Path-style queries over Atom feed pages.
//!
//! A page is parsed once into an index of element spans (byte ranges into the
//! original text). Queries select elements by namespace URI and local name,
//! fragments are slices of the original text and deletions cut spans out, so
//! everything outside the selected or deleted nodes is preserved byte for byte.
//!
//! Selectors are a small XPath subset:
//!
//! ```text
//! //atom:entry/api:object/@id
//! //api:page[@position='next']/@href
//! /atom:feed/atom:link[@rel='next']
//! ```
//!
//! `/` is the child axis, `//` the descendant axis, `[@name='value']` an
//! attribute predicate and a trailing `@name` selects attribute values.
//! Unprefixed names and `atom:` bind to the Atom namespace, `api:` to the
//! configured API namespace.

use std::borrow::Cow;
use std::ops::Range;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use thiserror::Error;

pub const ATOM_NAMESPACE: &str = "http://www.w3.org/2005/Atom";
pub const DEFAULT_API_NAMESPACE: &str = "http://www.symplectic.co.uk/publications/api";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XmlError {
    #[error("malformed xml near byte {position}: {message}")]
    Malformed { position: u64, message: String },
    #[error("document is not valid utf-8: {0}")]
    Encoding(String),
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
}

/// Namespace URIs the selector prefixes bind to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlNamespaces {
    pub atom: String,
    pub api: String,
}

impl Default for XmlNamespaces {
    fn default() -> Self {
        Self {
            atom: ATOM_NAMESPACE.to_string(),
            api: DEFAULT_API_NAMESPACE.to_string(),
        }
    }
}

impl XmlNamespaces {
    pub fn with_api(api: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            ..Self::default()
        }
    }

    fn bind(&self, prefix: Option<&str>) -> Option<&str> {
        match prefix {
            None | Some("atom") => Some(&self.atom),
            Some("api") => Some(&self.api),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    namespace: String,
    local: String,
    predicates: Vec<(String, String)>,
}

/// A parsed selector, bound to concrete namespace URIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    steps: Vec<Step>,
    attribute: Option<String>,
}

impl Selector {
    pub fn parse(selector: &str, namespaces: &XmlNamespaces) -> Result<Self, XmlError> {
        let invalid = |message: &str| XmlError::Selector {
            selector: selector.to_string(),
            message: message.to_string(),
        };

        let mut steps = Vec::new();
        let mut attribute = None;
        let mut rest = selector.trim();
        while !rest.is_empty() {
            if attribute.is_some() {
                return Err(invalid("attribute must be the last step"));
            }
            let axis = if let Some(stripped) = rest.strip_prefix("//") {
                rest = stripped;
                Axis::Descendant
            } else if let Some(stripped) = rest.strip_prefix('/') {
                rest = stripped;
                Axis::Child
            } else {
                return Err(invalid("expected '/' or '//'"));
            };

            let end = step_end(rest);
            let token = &rest[..end];
            rest = &rest[end..];

            if let Some(name) = token.strip_prefix('@') {
                if axis != Axis::Child || !is_name(name) {
                    return Err(invalid("bad attribute step"));
                }
                attribute = Some(name.to_string());
                continue;
            }

            let (name, predicates) = match token.find('[') {
                Some(open) => {
                    let predicates =
                        parse_predicates(&token[open..]).ok_or_else(|| invalid("bad predicate"))?;
                    (&token[..open], predicates)
                }
                None => (token, Vec::new()),
            };
            let (prefix, local) = match name.split_once(':') {
                Some((prefix, local)) => (Some(prefix), local),
                None => (None, name),
            };
            if !is_name(local) {
                return Err(invalid("bad element name"));
            }
            let namespace = namespaces
                .bind(prefix)
                .ok_or_else(|| invalid("unknown namespace prefix"))?;
            steps.push(Step {
                axis,
                namespace: namespace.to_string(),
                local: local.to_string(),
                predicates,
            });
        }

        if steps.is_empty() {
            return Err(invalid("no element step"));
        }
        Ok(Self { steps, attribute })
    }

    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    fn matches(&self, doc: &XmlDocument, index: usize) -> bool {
        self.matches_step(doc, index, self.steps.len() - 1)
    }

    fn matches_step(&self, doc: &XmlDocument, index: usize, step_index: usize) -> bool {
        let step = &self.steps[step_index];
        let node = &doc.nodes[index];
        let node_matches = node.namespace.as_deref() == Some(step.namespace.as_str())
            && node.local == step.local
            && step
                .predicates
                .iter()
                .all(|(name, value)| node.attribute(name) == Some(value.as_str()));
        if !node_matches {
            return false;
        }
        if step_index == 0 {
            return match step.axis {
                Axis::Child => node.parent.is_none(),
                Axis::Descendant => true,
            };
        }
        match step.axis {
            Axis::Child => node
                .parent
                .is_some_and(|parent| self.matches_step(doc, parent, step_index - 1)),
            Axis::Descendant => {
                let mut ancestor = node.parent;
                while let Some(current) = ancestor {
                    if self.matches_step(doc, current, step_index - 1) {
                        return true;
                    }
                    ancestor = doc.nodes[current].parent;
                }
                false
            }
        }
    }
}

/// End of the current step: the next `/` outside brackets and quotes.
fn step_end(rest: &str) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (offset, c) in rest.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '/') if depth == 0 => return offset,
            _ => {}
        }
    }
    rest.len()
}

fn parse_predicates(mut text: &str) -> Option<Vec<(String, String)>> {
    let mut predicates = Vec::new();
    while !text.is_empty() {
        let inner = text.strip_prefix("[@")?;
        let (name, after_name) = inner.split_once('=')?;
        let quote = after_name.chars().next().filter(|c| *c == '\'' || *c == '"')?;
        let after_quote = &after_name[1..];
        let close = after_quote.find(quote)?;
        let value = &after_quote[..close];
        text = after_quote[close + 1..].strip_prefix(']')?;
        let name = name.trim();
        if !is_name(name) {
            return None;
        }
        predicates.push((name.to_string(), value.to_string()));
    }
    Some(predicates)
}

fn is_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

#[derive(Debug, Clone)]
struct ElementNode {
    qualified: String,
    namespace: Option<String>,
    local: String,
    attributes: Vec<(String, String)>,
    start: usize,
    end: usize,
    parent: Option<usize>,
}

impl ElementNode {
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// A parsed feed page.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    text: String,
    nodes: Vec<ElementNode>,
    namespaces: XmlNamespaces,
}

impl XmlDocument {
    pub fn parse(text: impl Into<String>, namespaces: XmlNamespaces) -> Result<Self, XmlError> {
        let mut text = text.into();
        if text.starts_with('\u{feff}') {
            text.drain(..'\u{feff}'.len_utf8());
        }
        let nodes = index_elements(&text)?;
        Ok(Self {
            text,
            nodes,
            namespaces,
        })
    }

    pub fn from_bytes(bytes: &[u8], namespaces: XmlNamespaces) -> Result<Self, XmlError> {
        let text = std::str::from_utf8(bytes).map_err(|err| XmlError::Encoding(err.to_string()))?;
        Self::parse(text, namespaces)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn namespaces(&self) -> &XmlNamespaces {
        &self.namespaces
    }

    pub fn root(&self) -> Element<'_> {
        Element { doc: self, index: 0 }
    }

    pub fn selector(&self, selector: &str) -> Result<Selector, XmlError> {
        Selector::parse(selector, &self.namespaces)
    }

    /// Elements matched by an element selector, in document order.
    pub fn select(&self, selector: &str) -> Result<Vec<Element<'_>>, XmlError> {
        let parsed = self.selector(selector)?;
        if parsed.attribute().is_some() {
            return Err(XmlError::Selector {
                selector: selector.to_string(),
                message: "expected an element selector".to_string(),
            });
        }
        Ok(self.matching(&parsed).collect())
    }

    /// Attribute values matched by a selector ending in `@name`.
    pub fn select_values(&self, selector: &str) -> Result<Vec<String>, XmlError> {
        let parsed = self.selector(selector)?;
        let attribute = parsed.attribute().ok_or_else(|| XmlError::Selector {
            selector: selector.to_string(),
            message: "expected a trailing @attribute".to_string(),
        })?;
        Ok(self
            .matching(&parsed)
            .filter_map(|element| element.attribute(attribute))
            .map(str::to_string)
            .collect())
    }

    /// Verbatim source text of every matched element.
    pub fn select_fragments(&self, selector: &str) -> Result<Vec<&str>, XmlError> {
        Ok(self
            .select(selector)?
            .into_iter()
            .map(|element| element.fragment())
            .collect())
    }

    /// Copy of the document without the elements matched by any selector.
    pub fn delete_nodes(&self, selectors: &[&str]) -> Result<String, XmlError> {
        let mut doomed = Vec::new();
        for selector in selectors {
            doomed.extend(self.select(selector)?);
        }
        Ok(self.without_elements(doomed))
    }

    /// Copy of the document with the given elements cut out.
    ///
    /// An element alone on its line takes its indentation and line break with
    /// it. Nested and repeated elements are handled.
    pub fn without_elements<'a, I>(&'a self, elements: I) -> String
    where
        I: IntoIterator<Item = Element<'a>>,
    {
        let mut spans: Vec<Range<usize>> = elements
            .into_iter()
            .map(|element| self.removal_span(element.index))
            .collect();
        spans.sort_by_key(|span| (span.start, std::cmp::Reverse(span.end)));

        let mut output = String::with_capacity(self.text.len());
        let mut cursor = 0;
        for span in spans {
            if span.start < cursor {
                continue;
            }
            output.push_str(&self.text[cursor..span.start]);
            cursor = span.end;
        }
        output.push_str(&self.text[cursor..]);
        output
    }

    fn matching<'s, 'q>(
        &'s self,
        selector: &'q Selector,
    ) -> impl Iterator<Item = Element<'s>> + 'q
    where
        's: 'q,
    {
        (0..self.nodes.len())
            .filter(move |&index| selector.matches(self, index))
            .map(move |index| Element { doc: self, index })
    }

    fn removal_span(&self, index: usize) -> Range<usize> {
        let node = &self.nodes[index];
        let bytes = self.text.as_bytes();
        let mut start = node.start;
        while start > 0 && matches!(bytes[start - 1], b' ' | b'\t') {
            start -= 1;
        }
        if start > 0 && bytes[start - 1] == b'\n' {
            start -= 1;
            if start > 0 && bytes[start - 1] == b'\r' {
                start -= 1;
            }
        } else {
            start = node.start;
        }
        start..node.end
    }
}

/// Handle to one element of a parsed document.
#[derive(Debug, Clone, Copy)]
pub struct Element<'a> {
    doc: &'a XmlDocument,
    index: usize,
}

impl<'a> Element<'a> {
    fn node(&self) -> &'a ElementNode {
        &self.doc.nodes[self.index]
    }

    pub fn local_name(&self) -> &'a str {
        &self.node().local
    }

    pub fn namespace(&self) -> Option<&'a str> {
        self.node().namespace.as_deref()
    }

    /// True when the element has the given namespace URI and local name.
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.namespace() == Some(namespace) && self.local_name() == local
    }

    pub fn attribute(&self, name: &str) -> Option<&'a str> {
        self.node().attribute(name)
    }

    pub fn span(&self) -> Range<usize> {
        let node = self.node();
        node.start..node.end
    }

    pub fn fragment(&self) -> &'a str {
        &self.doc.text[self.span()]
    }

    pub fn parent(&self) -> Option<Element<'a>> {
        self.node().parent.map(|index| Element {
            doc: self.doc,
            index,
        })
    }

    /// Nearest ancestor with the given namespace URI and local name.
    pub fn ancestor(&self, namespace: &str, local: &str) -> Option<Element<'a>> {
        let mut current = self.parent();
        while let Some(element) = current {
            if element.is(namespace, local) {
                return Some(element);
            }
            current = element.parent();
        }
        None
    }

    /// Every element nested inside this one, in document order.
    pub fn descendants(&self) -> impl Iterator<Item = Element<'a>> + 'a {
        let doc = self.doc;
        let end = self.node().end;
        (self.index + 1..doc.nodes.len())
            .take_while(move |&index| doc.nodes[index].start < end)
            .map(move |index| Element { doc, index })
    }

    /// The element's source text made standalone: namespace declarations
    /// inherited from its ancestors are copied onto its start tag.
    pub fn standalone_fragment(&self) -> String {
        let node = self.node();
        let mut declarations: Vec<(&str, &str)> = Vec::new();
        let mut ancestor = node.parent;
        while let Some(index) = ancestor {
            let parent = &self.doc.nodes[index];
            for (key, value) in &parent.attributes {
                let is_declaration = key == "xmlns" || key.starts_with("xmlns:");
                let shadowed = node.attribute(key).is_some()
                    || declarations.iter().any(|(seen, _)| seen == key);
                if is_declaration && !shadowed {
                    declarations.push((key, value));
                }
            }
            ancestor = parent.parent;
        }

        let fragment = self.fragment();
        if declarations.is_empty() {
            return fragment.to_string();
        }
        // Declarations go right after `<qualified-name`.
        let insert_at = 1 + node.qualified.len();
        let mut output = String::with_capacity(fragment.len() + 64 * declarations.len());
        output.push_str(&fragment[..insert_at]);
        for (key, value) in declarations {
            output.push(' ');
            output.push_str(key);
            output.push_str("=\"");
            output.push_str(&escape(value));
            output.push('"');
        }
        output.push_str(&fragment[insert_at..]);
        output
    }
}

fn index_elements(text: &str) -> Result<Vec<ElementNode>, XmlError> {
    let mut reader = NsReader::from_str(text);
    let mut nodes: Vec<ElementNode> = Vec::new();
    let mut open: Vec<usize> = Vec::new();

    loop {
        let start = reader.buffer_position() as usize;
        let (resolved, event) = match reader.read_resolved_event() {
            Ok(pair) => pair,
            Err(err) => return Err(malformed(start, err.to_string())),
        };
        let namespace = match resolved {
            ResolveResult::Bound(Namespace(uri)) => {
                Some(String::from_utf8_lossy(uri).into_owned())
            }
            _ => None,
        };
        let end = reader.buffer_position() as usize;

        let opens_element = matches!(event, Event::Start(_) | Event::Empty(_));
        if opens_element && open.is_empty() && !nodes.is_empty() {
            return Err(malformed(start, "content after the root element"));
        }

        match event {
            Event::Start(tag) => {
                let node = element_node(&tag, namespace, start, open.last().copied())?;
                nodes.push(node);
                open.push(nodes.len() - 1);
            }
            Event::Empty(tag) => {
                let mut node = element_node(&tag, namespace, start, open.last().copied())?;
                node.end = end;
                nodes.push(node);
            }
            Event::End(_) => match open.pop() {
                Some(index) => nodes[index].end = end,
                None => return Err(malformed(start, "unexpected closing tag")),
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(&index) = open.last() {
        return Err(malformed(
            text.len(),
            format!("unclosed element <{}>", nodes[index].qualified),
        ));
    }
    if nodes.is_empty() {
        return Err(malformed(0, "no root element"));
    }
    Ok(nodes)
}

fn element_node(
    tag: &BytesStart<'_>,
    namespace: Option<String>,
    start: usize,
    parent: Option<usize>,
) -> Result<ElementNode, XmlError> {
    let mut attributes = Vec::new();
    for attribute in tag.attributes() {
        let attribute = attribute.map_err(|err| malformed(start, err.to_string()))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value: Cow<'_, str> = attribute
            .unescape_value()
            .map_err(|err| malformed(start, err.to_string()))?;
        attributes.push((key, value.into_owned()));
    }
    Ok(ElementNode {
        qualified: String::from_utf8_lossy(tag.name().as_ref()).into_owned(),
        namespace,
        local: String::from_utf8_lossy(tag.local_name().as_ref()).into_owned(),
        attributes,
        start,
        end: start,
        parent,
    })
}

fn malformed(position: usize, message: impl Into<String>) -> XmlError {
    XmlError::Malformed {
        position: position as u64,
        message: message.into(),
    }
}

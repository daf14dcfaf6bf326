//! Minimal XML/HTML DOM over `quick-xml`.
//!
//! Builds an element tree, answers a subset of XPath (`/a/b`, `//item`,
//! `items/item`, `*`), and converts elements into JSON values so XML items
//! flow through the same mapper as JSON ones:
//!
//! ```text
//! <item id="3"><name>A</name></item>  =>  {"@id": "3", "name": "A"}
//! ```

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// HTML elements that never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

/// Parse `body` into its root element.
///
/// In `html` mode end-tag names are not checked, void elements are closed
/// implicitly, and a parse error stops the parse while keeping what was
/// built so far. In XML mode any parse error is returned, including
/// elements still open at the end of input.
pub fn parse(body: &str, html: bool) -> Result<Element, String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    if html {
        reader.config_mut().check_end_names = false;
    }

    // Synthetic document node; its children are top-level elements.
    let mut stack: Vec<Element> = vec![Element::default()];
    let mut errors = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let element = start_element(&e);
                if html && VOID_ELEMENTS.contains(&element.name.to_ascii_lowercase().as_str()) {
                    push_child(&mut stack, element);
                } else {
                    stack.push(element);
                }
            }
            Ok(Event::Empty(e)) => push_child(&mut stack, start_element(&e)),
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                close_element(&mut stack, &name, html);
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                append_text(&mut stack, &text);
            }
            Ok(Event::CData(c)) => {
                append_text(&mut stack, &String::from_utf8_lossy(&c));
            }
            Ok(Event::Eof) => {
                if !html {
                    if let Some(open) = stack.get(1..).and_then(<[Element]>::last) {
                        return Err(format!("unclosed element <{}> at end of input", open.name));
                    }
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if !html {
                    return Err(format!("at position {}: {}", reader.buffer_position(), e));
                }
                errors += 1;
                break;
            }
        }
    }

    if errors > 0 {
        tracing::debug!(errors, "html parse stopped early");
    }

    while stack.len() > 1 {
        if let Some(open) = stack.pop() {
            push_child(&mut stack, open);
        }
    }

    let document = stack.pop().unwrap_or_default();
    let mut roots = document.children.into_iter();
    match (roots.next(), roots.next()) {
        (Some(root), None) => Ok(root),
        (Some(first), Some(second)) if html => {
            // fragments get a wrapping root
            let mut children = vec![first, second];
            children.extend(roots);
            Ok(Element {
                name: "html".to_string(),
                children,
                ..Default::default()
            })
        }
        (Some(_), Some(_)) => Err("multiple root elements".to_string()),
        (None, _) => Err("empty input".to_string()),
    }
}

fn start_element(e: &BytesStart<'_>) -> Element {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let attributes = e
        .attributes()
        .flatten()
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
            let value = a
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned());
            (key, value)
        })
        .collect();
    Element {
        name,
        attributes,
        ..Default::default()
    }
}

fn push_child(stack: &mut [Element], child: Element) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(child);
    }
}

fn append_text(stack: &mut [Element], text: &str) {
    if let Some(current) = stack.last_mut() {
        if !current.text.is_empty() {
            current.text.push(' ');
        }
        current.text.push_str(text);
    }
}

fn close_element(stack: &mut Vec<Element>, name: &str, html: bool) {
    let position = stack
        .iter()
        .skip(1)
        .rposition(|e| {
            if html {
                e.name.eq_ignore_ascii_case(name)
            } else {
                e.name == name
            }
        })
        .map(|p| p + 1);

    // stray end tags are ignored
    let Some(position) = position else {
        return;
    };
    while stack.len() > position {
        if let Some(open) = stack.pop() {
            push_child(stack, open);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

impl Element {
    /// Evaluate an XPath subset against this element as document root.
    ///
    /// Absolute paths start at the document (so `/feed/entry` names the
    /// root first); relative paths start at the root element.
    pub fn select(&self, xpath: &str) -> Vec<&Element> {
        let xpath = xpath.trim();
        let steps = parse_steps(xpath);
        if !xpath.starts_with('/') {
            return walk(vec![self], &steps);
        }

        let Some(((axis, name), rest)) = steps.split_first() else {
            return vec![self];
        };
        let mut context = Vec::new();
        if name_matches(self, name) {
            context.push(self);
        }
        if *axis == Axis::Descendant {
            collect_descendants(self, name, &mut context);
        }
        walk(context, rest)
    }

    /// Child elements used as items when no item path is configured.
    pub fn items(&self) -> Vec<&Element> {
        self.children.iter().collect()
    }

    /// Convert into a JSON value.
    ///
    /// Leaves without attributes become strings; anything else becomes an
    /// object with `@attr` keys, child names (repeated names collect into
    /// arrays), and `#text`.
    pub fn to_value(&self) -> Value {
        if self.attributes.is_empty() && self.children.is_empty() {
            return Value::String(self.text.clone());
        }
        let mut map = Map::new();
        for (key, value) in &self.attributes {
            map.insert(format!("@{}", key), Value::String(value.clone()));
        }
        for child in &self.children {
            let value = child.to_value();
            match map.get_mut(&child.name) {
                Some(Value::Array(existing)) => existing.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(child.name.clone(), value);
                }
            }
        }
        if !self.text.is_empty() {
            map.insert("#text".to_string(), Value::String(self.text.clone()));
        }
        Value::Object(map)
    }
}

fn parse_steps(xpath: &str) -> Vec<(Axis, String)> {
    let mut steps = Vec::new();
    let mut axis = Axis::Child;
    let mut rest = xpath;
    while !rest.is_empty() {
        if let Some(r) = rest.strip_prefix("//") {
            axis = Axis::Descendant;
            rest = r;
            continue;
        }
        if let Some(r) = rest.strip_prefix('/') {
            rest = r;
            continue;
        }
        let end = rest.find('/').unwrap_or(rest.len());
        let name = &rest[..end];
        if !name.is_empty() && name != "." {
            steps.push((axis, name.to_string()));
        }
        axis = Axis::Child;
        rest = &rest[end..];
    }
    steps
}

fn walk<'a>(mut context: Vec<&'a Element>, steps: &[(Axis, String)]) -> Vec<&'a Element> {
    for (axis, name) in steps {
        let mut next = Vec::new();
        for element in &context {
            match axis {
                Axis::Child => next.extend(element.children.iter().filter(|c| name_matches(c, name))),
                Axis::Descendant => collect_descendants(element, name, &mut next),
            }
        }
        context = next;
    }
    context
}

fn collect_descendants<'a>(element: &'a Element, name: &str, out: &mut Vec<&'a Element>) {
    for child in &element.children {
        if name_matches(child, name) {
            out.push(child);
        }
        collect_descendants(child, name, out);
    }
}

fn name_matches(element: &Element, name: &str) -> bool {
    name == "*" || element.name == name
}

//! Minimal element tree used for headless mounting
//!
//! Elements live in an arena owned by one [`Document`]; handles are plain
//! indices, so a document never outlives the render context that created it.

use indexmap::IndexMap;

/// Handle to an element in a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(usize);

#[derive(Debug, Clone)]
enum Child {
    Element(ElementId),
    Text(String),
}

#[derive(Debug, Clone)]
struct Element {
    tag: String,
    attributes: IndexMap<String, String>,
    children: Vec<Child>,
}

const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "input", "link", "meta"];

#[derive(Debug, Clone, Default)]
pub struct Document {
    elements: Vec<Element>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_element(&mut self, tag: &str) -> ElementId {
        self.elements.push(Element {
            tag: tag.to_string(),
            attributes: IndexMap::new(),
            children: Vec::new(),
        });
        ElementId(self.elements.len() - 1)
    }

    pub fn set_attribute(&mut self, id: ElementId, name: &str, value: impl Into<String>) {
        self.elements[id.0]
            .attributes
            .insert(name.to_string(), value.into());
    }

    pub fn attribute(&self, id: ElementId, name: &str) -> Option<&str> {
        self.elements[id.0].attributes.get(name).map(String::as_str)
    }

    pub fn tag(&self, id: ElementId) -> &str {
        &self.elements[id.0].tag
    }

    pub fn append_child(&mut self, parent: ElementId, child: ElementId) {
        self.elements[parent.0].children.push(Child::Element(child));
    }

    pub fn append_text(&mut self, parent: ElementId, text: impl Into<String>) {
        self.elements[parent.0].children.push(Child::Text(text.into()));
    }

    /// Create an element and append it to `parent`
    pub fn append_new(&mut self, parent: ElementId, tag: &str) -> ElementId {
        let child = self.create_element(tag);
        self.append_child(parent, child);
        child
    }

    pub fn clear_children(&mut self, id: ElementId) {
        self.elements[id.0].children.clear();
    }

    /// Child elements of `id`, skipping text
    pub fn children(&self, id: ElementId) -> Vec<ElementId> {
        self.elements[id.0]
            .children
            .iter()
            .filter_map(|child| match child {
                Child::Element(element) => Some(*element),
                Child::Text(_) => None,
            })
            .collect()
    }

    /// Serialize the subtree rooted at `id`
    pub fn to_html(&self, id: ElementId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    fn write_html(&self, id: ElementId, out: &mut String) {
        let element = &self.elements[id.0];
        out.push('<');
        out.push_str(&element.tag);
        for (name, value) in &element.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape(value, true));
            out.push('"');
        }
        out.push('>');

        if VOID_ELEMENTS.contains(&element.tag.as_str()) {
            return;
        }

        for child in &element.children {
            match child {
                Child::Element(child) => self.write_html(*child, out),
                Child::Text(text) => out.push_str(&escape(text, false)),
            }
        }
        out.push_str("</");
        out.push_str(&element.tag);
        out.push('>');
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

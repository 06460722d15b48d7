//! Owned UI hierarchy snapshot.
//!
//! Nodes live in an arena in document (preorder) order, so comparing
//! [`NodeId`]s compares document positions.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone)]
pub struct Node {
    pub tag: String,
    attrs: Vec<(String, String)>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub covered: bool,
}

impl Node {
    /// Raw attribute as captured; `covered` is not stored here.
    pub fn raw_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_widget(&self) -> bool {
        self.tag == "node"
    }

    pub fn flag(&self, name: &str) -> bool {
        self.raw_attr(name) == Some("true")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HierarchyError {
    #[error("hierarchy is not well-formed XML: {0}")]
    Xml(#[from] roxmltree::Error),
}

#[derive(Debug, Clone)]
pub struct Hierarchy {
    nodes: Vec<Node>,
}

impl Hierarchy {
    pub fn parse(xml: &str) -> Result<Self, HierarchyError> {
        let doc = roxmltree::Document::parse(xml)?;
        let mut nodes = Vec::new();
        push_element(&mut nodes, doc.root_element(), None);
        Ok(Self { nodes })
    }

    /// The document's root element, usually `<hierarchy>`.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Attribute lookup as queries see it. Widgets always carry a
    /// `covered` attribute reflecting the last occlusion pass.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        let node = self.node(id);
        if name == "covered" && node.is_widget() {
            return Some(if node.covered { "true" } else { "false" });
        }
        node.raw_attr(name)
    }

    /// All strict descendants of `id`, in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(id).children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.node(next).children.iter().rev().copied());
        }
        out
    }

    pub fn following_siblings(&self, id: NodeId) -> &[NodeId] {
        let siblings = self.siblings(id);
        match siblings.iter().position(|s| *s == id) {
            Some(at) => &siblings[at + 1..],
            None => &[],
        }
    }

    pub fn preceding_siblings(&self, id: NodeId) -> &[NodeId] {
        let siblings = self.siblings(id);
        match siblings.iter().position(|s| *s == id) {
            Some(at) => &siblings[..at],
            None => &[],
        }
    }

    fn siblings(&self, id: NodeId) -> &[NodeId] {
        match self.node(id).parent {
            Some(parent) => &self.node(parent).children,
            None => &[],
        }
    }

    pub fn reset_coverage(&mut self) {
        for node in &mut self.nodes {
            node.covered = false;
        }
    }

    /// Serialize back to XML with the derived `covered` attribute, for
    /// diagnostics.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version='1.0' encoding='UTF-8'?>\n");
        if !self.nodes.is_empty() {
            self.write_node(&mut out, self.root(), 0);
        }
        out
    }

    fn write_node(&self, out: &mut String, id: NodeId, depth: usize) {
        let node = self.node(id);
        let indent = "  ".repeat(depth);
        let _ = write!(out, "{indent}<{}", node.tag);
        for (k, v) in &node.attrs {
            let _ = write!(out, " {k}=\"{}\"", escape(v));
        }
        if node.is_widget() {
            let _ = write!(out, " covered=\"{}\"", node.covered);
        }
        if node.children.is_empty() {
            out.push_str("/>\n");
            return;
        }
        out.push_str(">\n");
        for child in &node.children {
            self.write_node(out, *child, depth + 1);
        }
        let _ = writeln!(out, "{indent}</{}>", node.tag);
    }
}

fn push_element(nodes: &mut Vec<Node>, elem: roxmltree::Node<'_, '_>, parent: Option<NodeId>) -> NodeId {
    let id = NodeId(nodes.len());
    nodes.push(Node {
        tag: elem.tag_name().name().to_string(),
        attrs: elem
            .attributes()
            .filter(|a| a.name() != "covered")
            .map(|a| (a.name().to_string(), a.value().to_string()))
            .collect(),
        parent,
        children: Vec::new(),
        covered: false,
    });
    for child in elem.children().filter(roxmltree::Node::is_element) {
        let child_id = push_element(nodes, child, Some(id));
        nodes[id.0].children.push(child_id);
    }
    id
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<hierarchy rotation="0">
        <node index="0" class="a" bounds="[0,0][10,10]">
            <node index="0" class="b"/>
            <node index="1" class="c"><node index="0" class="d"/></node>
        </node>
    </hierarchy>"#;

    fn class(h: &Hierarchy, id: NodeId) -> &str {
        h.attr(id, "class").unwrap()
    }

    #[test]
    fn test_document_order_ids() {
        let h = Hierarchy::parse(XML).unwrap();
        let classes: Vec<_> = h.descendants(h.root()).into_iter().map(|id| class(&h, id)).collect();
        assert_eq!(classes, vec!["a", "b", "c", "d"]);
        assert_eq!(h.node(h.root()).tag, "hierarchy");
    }

    #[test]
    fn test_siblings() {
        let h = Hierarchy::parse(XML).unwrap();
        let b = NodeId(2);
        let c = NodeId(3);
        assert_eq!(h.following_siblings(b), &[c]);
        assert_eq!(h.preceding_siblings(c), &[b]);
        assert!(h.preceding_siblings(b).is_empty());
    }

    #[test]
    fn test_covered_is_derived() {
        let mut h = Hierarchy::parse(r#"<hierarchy><node covered="true"/></hierarchy>"#).unwrap();
        assert_eq!(h.attr(NodeId(1), "covered"), Some("false"));
        h.node_mut(NodeId(1)).covered = true;
        assert_eq!(h.attr(NodeId(1), "covered"), Some("true"));
        assert_eq!(h.attr(h.root(), "covered"), None);
    }

    #[test]
    fn test_to_xml_reparses() {
        let h = Hierarchy::parse(XML).unwrap();
        let again = Hierarchy::parse(&h.to_xml()).unwrap();
        assert_eq!(again.len(), h.len());
    }

    #[test]
    fn test_malformed_xml() {
        assert!(Hierarchy::parse("<hierarchy>").is_err());
    }
}

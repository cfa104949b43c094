//! Visual composition: a labeled element hierarchy plus a free-text spatial
//! description.
//!
//! The hierarchy is stored as an arena. Nodes refer to their parent and
//! children by [`NodeId`], so renames, insertions and subtree removals are
//! plain index updates. On the wire (and in exports) the tree uses the nested
//! form `[{"id": "person", "children": [...]}]`.

use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Handle to a node inside one [`ElementTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct ElementNode {
    label: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Nested wire representation of one element and its descendants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn leaf(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            children: Vec::new(),
        }
    }

    pub fn branch(id: impl Into<String>, children: Vec<ElementSpec>) -> Self {
        Self {
            id: id.into(),
            children,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ElementSpec>", into = "Vec<ElementSpec>")]
pub struct ElementTree {
    // Removed nodes leave a `None` slot so outstanding ids never alias.
    nodes: Vec<Option<ElementNode>>,
    roots: Vec<NodeId>,
}

impl ElementTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_specs(specs: &[ElementSpec]) -> Self {
        let mut tree = Self::new();
        let mut pending: Vec<(Option<NodeId>, &ElementSpec)> =
            specs.iter().rev().map(|spec| (None, spec)).collect();
        while let Some((parent, spec)) = pending.pop() {
            let id = tree.push_node(parent, spec.id.clone());
            pending.extend(spec.children.iter().rev().map(|child| (Some(id), child)));
        }
        tree
    }

    #[must_use]
    pub fn to_specs(&self) -> Vec<ElementSpec> {
        self.roots.iter().filter_map(|root| self.spec_of(*root)).collect()
    }

    fn spec_of(&self, id: NodeId) -> Option<ElementSpec> {
        let node = self.node(id)?;
        Some(ElementSpec {
            id: node.label.clone(),
            children: node
                .children
                .iter()
                .filter_map(|child| self.spec_of(*child))
                .collect(),
        })
    }

    fn node(&self, id: NodeId) -> Option<&ElementNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut ElementNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    fn push_node(&mut self, parent: Option<NodeId>, label: String) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(ElementNode {
            label,
            parent,
            children: Vec::new(),
        }));
        match parent {
            Some(parent) => {
                if let Some(parent_node) = self.node_mut(parent) {
                    parent_node.children.push(id);
                }
            }
            None => self.roots.push(id),
        }
        id
    }

    /// Appends a new element under `parent`, or as a new root when `None`.
    ///
    /// # Errors
    /// Fails when the label is blank or the parent no longer exists.
    pub fn add(&mut self, parent: Option<NodeId>, label: impl Into<String>) -> Result<NodeId, StageError> {
        let label = normalize_label(label.into())?;
        if let Some(parent) = parent {
            if self.node(parent).is_none() {
                return Err(StageError::validation("parent element does not exist"));
            }
        }
        Ok(self.push_node(parent, label))
    }

    /// # Errors
    /// Fails when the label is blank or the element no longer exists.
    pub fn rename(&mut self, id: NodeId, label: impl Into<String>) -> Result<(), StageError> {
        let label = normalize_label(label.into())?;
        let node = self
            .node_mut(id)
            .ok_or_else(|| StageError::validation("element does not exist"))?;
        node.label = label;
        Ok(())
    }

    /// Removes an element together with all of its descendants and returns how
    /// many nodes were dropped.
    ///
    /// # Errors
    /// Fails when the element no longer exists.
    pub fn remove(&mut self, id: NodeId) -> Result<usize, StageError> {
        let parent = self
            .node(id)
            .ok_or_else(|| StageError::validation("element does not exist"))?
            .parent;
        match parent {
            Some(parent) => {
                if let Some(parent_node) = self.node_mut(parent) {
                    parent_node.children.retain(|sibling| *sibling != id);
                }
            }
            None => self.roots.retain(|root| *root != id),
        }

        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(current.0).and_then(Option::take) {
                stack.extend(node.children);
                removed += 1;
            }
        }
        Ok(removed)
    }

    #[must_use]
    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|node| node.label.as_str())
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Depth-first, pre-order walk yielding each live node with its depth.
    #[must_use]
    pub fn walk(&self) -> Vec<(NodeId, usize)> {
        let mut visited = Vec::with_capacity(self.len());
        let mut stack: Vec<(NodeId, usize)> = self.roots.iter().rev().map(|id| (*id, 0)).collect();
        while let Some((id, depth)) = stack.pop() {
            visited.push((id, depth));
            stack.extend(self.children(id).iter().rev().map(|child| (*child, depth + 1)));
        }
        visited
    }

    /// First node (in walk order) carrying `label`.
    #[must_use]
    pub fn find(&self, label: &str) -> Option<NodeId> {
        self.walk()
            .into_iter()
            .map(|(id, _)| id)
            .find(|id| self.label(*id) == Some(label))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl PartialEq for ElementTree {
    fn eq(&self, other: &Self) -> bool {
        self.to_specs() == other.to_specs()
    }
}

impl From<Vec<ElementSpec>> for ElementTree {
    fn from(specs: Vec<ElementSpec>) -> Self {
        Self::from_specs(&specs)
    }
}

impl From<ElementTree> for Vec<ElementSpec> {
    fn from(tree: ElementTree) -> Self {
        tree.to_specs()
    }
}

fn normalize_label(label: String) -> Result<String, StageError> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(StageError::validation("element label must not be blank"));
    }
    Ok(trimmed.to_string())
}

/// Output of the composition stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Composition {
    #[serde(default)]
    pub elements: ElementTree,
    #[serde(default, rename = "prompt")]
    pub spatial_prompt: String,
}

impl Composition {
    pub fn new(elements: ElementTree, spatial_prompt: impl Into<String>) -> Self {
        Self {
            elements,
            spatial_prompt: spatial_prompt.into(),
        }
    }

    /// Whether there is anything for the renderer to draw from.
    #[must_use]
    pub fn is_renderable(&self) -> bool {
        !self.elements.is_empty() || !self.spatial_prompt.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ElementTree {
        ElementTree::from_specs(&[
            ElementSpec::branch(
                "person",
                vec![ElementSpec::leaf("head"), ElementSpec::leaf("hand")],
            ),
            ElementSpec::leaf("glass"),
        ])
    }

    #[test]
    fn nested_specs_round_trip_through_the_arena() {
        let tree = sample();
        assert_eq!(tree.len(), 4);
        let labels: Vec<_> = tree
            .walk()
            .into_iter()
            .map(|(id, depth)| (tree.label(id).unwrap_or_default().to_string(), depth))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("person".to_string(), 0),
                ("head".to_string(), 1),
                ("hand".to_string(), 1),
                ("glass".to_string(), 0),
            ]
        );

        let value = serde_json::to_value(&tree).expect("tree serializes");
        assert_eq!(
            value,
            json!([
                {"id": "person", "children": [{"id": "head"}, {"id": "hand"}]},
                {"id": "glass"}
            ])
        );
    }

    #[test]
    fn add_and_rename_update_in_place() {
        let mut tree = sample();
        let hand = tree.find("hand").expect("hand exists");
        let cup = tree.add(Some(hand), " cup ").expect("child added");
        assert_eq!(tree.parent(cup), Some(hand));
        assert_eq!(tree.label(cup), Some("cup"));

        tree.rename(cup, "water glass").expect("rename succeeds");
        assert_eq!(tree.find("water glass"), Some(cup));
        assert!(tree.rename(cup, "  ").is_err());

        let sun = tree.add(None, "sun").expect("root added");
        assert_eq!(tree.roots().last(), Some(&sun));
    }

    #[test]
    fn remove_drops_whole_subtree_and_keeps_ids_stable() {
        let mut tree = sample();
        let person = tree.find("person").expect("person exists");
        let glass = tree.find("glass").expect("glass exists");

        assert_eq!(tree.remove(person).expect("remove succeeds"), 3);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.roots(), &[glass]);
        assert_eq!(tree.label(glass), Some("glass"));
        assert!(tree.find("head").is_none());
        assert!(tree.remove(person).is_err());
        assert!(tree.add(Some(person), "ghost").is_err());
    }

    #[test]
    fn equality_ignores_arena_layout() {
        let mut edited = sample();
        let glass = edited.find("glass").expect("glass exists");
        edited.remove(glass).expect("remove succeeds");
        edited.add(None, "glass").expect("re-add succeeds");
        assert_eq!(edited, sample());
    }

    #[test]
    fn composition_uses_prompt_key_on_the_wire() {
        let composition: Composition = serde_json::from_value(json!({
            "elements": [{"id": "person"}],
            "prompt": "a person holding a glass"
        }))
        .expect("composition parses");
        assert_eq!(composition.spatial_prompt, "a person holding a glass");
        assert!(composition.is_renderable());
        assert!(!Composition::default().is_renderable());
    }
}

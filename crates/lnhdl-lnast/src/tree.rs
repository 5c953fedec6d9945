//! Append-only arena tree with per-tree string interning
//!
//! Nodes are addressed by stable integer ids. Children keep insertion
//! order and are never removed or reordered; lowering only ever appends.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::node::{LnastNode, LnastNodeType, LnastToken};

/// Handle into a tree's string pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StringId(pub u32);

/// Stable id of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LnastIndex(pub u32);

/// Interned string pool owned by one LNAST
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StringPool {
    strings: Vec<String>,
    index: HashMap<String, StringId>,
}

impl StringPool {
    fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = StringId(self.strings.len() as u32);
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), id);
        id
    }

    fn resolve(&self, id: StringId) -> &str {
        &self.strings[id.0 as usize]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeEntry {
    node: LnastNode,
    parent: Option<LnastIndex>,
    first_child: Option<LnastIndex>,
    last_child: Option<LnastIndex>,
    next_sibling: Option<LnastIndex>,
}

/// One LNAST: arena of nodes plus the string pool they reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lnast {
    module_name: String,
    source: String,
    pool: StringPool,
    arena: Vec<TreeEntry>,
    root: Option<LnastIndex>,
}

impl Lnast {
    pub fn new(module_name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            source: source.into(),
            pool: StringPool::default(),
            arena: Vec::new(),
            root: None,
        }
    }

    /// Name of the module this tree was lowered from
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Source file the module came from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Intern a string, returning a handle stable for the tree's lifetime
    pub fn add_string(&mut self, s: &str) -> StringId {
        self.pool.intern(s)
    }

    /// Resolve an interned handle
    pub fn get_string(&self, id: StringId) -> &str {
        self.pool.resolve(id)
    }

    /// Install the root node. May only be called once.
    ///
    /// # Panics
    /// Panics if a root is already set.
    pub fn set_root(&mut self, node: LnastNode) -> LnastIndex {
        assert!(self.root.is_none(), "LNAST root already set");
        let idx = self.push(node, None);
        self.root = Some(idx);
        idx
    }

    /// The root node id.
    ///
    /// # Panics
    /// Panics if no root has been set.
    pub fn get_root(&self) -> LnastIndex {
        self.root.expect("LNAST has no root")
    }

    /// Append `node` as the last child of `parent`
    pub fn add_child(&mut self, parent: LnastIndex, node: LnastNode) -> LnastIndex {
        let idx = self.push(node, Some(parent));
        let entry = &mut self.arena[parent.0 as usize];
        match entry.last_child {
            None => {
                entry.first_child = Some(idx);
                entry.last_child = Some(idx);
            }
            Some(last) => {
                entry.last_child = Some(idx);
                self.arena[last.0 as usize].next_sibling = Some(idx);
            }
        }
        idx
    }

    /// Intern `text` and append a node of `node_type` carrying it
    ///
    /// For `ref`/`const` the text is the leaf's identity; for internal
    /// nodes it is a debug label and may be empty.
    pub fn append(&mut self, parent: LnastIndex, node_type: LnastNodeType, text: &str) -> LnastIndex {
        let sid = self.add_string(text);
        self.add_child(parent, LnastNode::new(node_type, LnastToken::synthetic(sid)))
    }

    pub fn get_data(&self, idx: LnastIndex) -> &LnastNode {
        &self.arena[idx.0 as usize].node
    }

    /// The node's token text ("" for unnamed internal nodes)
    pub fn get_name(&self, idx: LnastIndex) -> &str {
        self.pool.resolve(self.arena[idx.0 as usize].node.token.text)
    }

    pub fn get_parent(&self, idx: LnastIndex) -> Option<LnastIndex> {
        self.arena[idx.0 as usize].parent
    }

    pub fn get_first_child(&self, idx: LnastIndex) -> Option<LnastIndex> {
        self.arena[idx.0 as usize].first_child
    }

    pub fn get_sibling_next(&self, idx: LnastIndex) -> Option<LnastIndex> {
        self.arena[idx.0 as usize].next_sibling
    }

    pub fn has_single_child(&self, idx: LnastIndex) -> bool {
        let entry = &self.arena[idx.0 as usize];
        entry.first_child.is_some() && entry.first_child == entry.last_child
    }

    pub fn child_count(&self, idx: LnastIndex) -> usize {
        self.children(idx).count()
    }

    /// Ordered children of `parent`
    pub fn children(&self, parent: LnastIndex) -> Children<'_> {
        Children {
            tree: self,
            cur: self.get_first_child(parent),
        }
    }

    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Indented preorder text dump, for debugging and golden tests
    pub fn dump(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.dump_node(root, 0, &mut out);
        }
        out
    }

    fn dump_node(&self, idx: LnastIndex, depth: usize, out: &mut String) {
        let node = self.get_data(idx);
        let name = self.get_name(idx);
        for _ in 0..depth {
            out.push_str("  ");
        }
        if name.is_empty() {
            let _ = writeln!(out, "{}", node.node_type.as_str());
        } else {
            let _ = writeln!(out, "{} {}", node.node_type.as_str(), name);
        }
        let mut child = self.get_first_child(idx);
        while let Some(c) = child {
            self.dump_node(c, depth + 1, out);
            child = self.get_sibling_next(c);
        }
    }

    fn push(&mut self, node: LnastNode, parent: Option<LnastIndex>) -> LnastIndex {
        let idx = LnastIndex(self.arena.len() as u32);
        self.arena.push(TreeEntry {
            node,
            parent,
            first_child: None,
            last_child: None,
            next_sibling: None,
        });
        idx
    }
}

impl fmt::Display for Lnast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump())
    }
}

/// Iterator over a node's children in insertion order
pub struct Children<'a> {
    tree: &'a Lnast,
    cur: Option<LnastIndex>,
}

impl Iterator for Children<'_> {
    type Item = LnastIndex;

    fn next(&mut self) -> Option<LnastIndex> {
        let cur = self.cur?;
        self.cur = self.tree.get_sibling_next(cur);
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn top_node(ln: &mut Lnast) -> LnastNode {
        let sid = ln.add_string("top");
        LnastNode::new(LnastNodeType::Top, LnastToken::synthetic(sid))
    }

    #[test]
    fn interning_is_stable() {
        let mut ln = Lnast::new("m", "m.fir");
        let a = ln.add_string("foo");
        let b = ln.add_string("bar");
        let c = ln.add_string("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(ln.get_string(a), "foo");
        assert_eq!(ln.get_string(b), "bar");
    }

    #[test]
    fn children_preserve_insertion_order() {
        let mut ln = Lnast::new("m", "m.fir");
        let node = top_node(&mut ln);
        let root = ln.set_root(node);
        let stmts = ln.append(root, LnastNodeType::Stmts, "SEQ0");
        ln.append(stmts, LnastNodeType::Ref, "a");
        ln.append(stmts, LnastNodeType::Ref, "b");
        ln.append(stmts, LnastNodeType::Ref, "c");

        let names: Vec<&str> = ln.children(stmts).map(|c| ln.get_name(c)).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(!ln.has_single_child(stmts));
        assert!(ln.has_single_child(root));
    }

    #[test]
    fn sibling_walk_matches_children_iter() {
        let mut ln = Lnast::new("m", "m.fir");
        let node = top_node(&mut ln);
        let root = ln.set_root(node);
        let asg = ln.append(root, LnastNodeType::Assign, "");
        let lhs = ln.append(asg, LnastNodeType::Ref, "x");
        let rhs = ln.append(asg, LnastNodeType::Const, "1");

        assert_eq!(ln.get_first_child(asg), Some(lhs));
        assert_eq!(ln.get_sibling_next(lhs), Some(rhs));
        assert_eq!(ln.get_sibling_next(rhs), None);
        assert_eq!(ln.get_parent(lhs), Some(asg));
    }

    #[test]
    fn dump_is_indented_preorder() {
        let mut ln = Lnast::new("m", "m.fir");
        let node = top_node(&mut ln);
        let root = ln.set_root(node);
        let stmts = ln.append(root, LnastNodeType::Stmts, "SEQ0");
        let asg = ln.append(stmts, LnastNodeType::Assign, "");
        ln.append(asg, LnastNodeType::Ref, "%out");
        ln.append(asg, LnastNodeType::Const, "3");

        let dump = ln.dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "top top");
        assert_eq!(lines[1], "  stmts SEQ0");
        assert_eq!(lines[2], "    assign");
        assert_eq!(lines[3], "      ref %out");
        assert_eq!(lines[4], "      const 3");
    }
}

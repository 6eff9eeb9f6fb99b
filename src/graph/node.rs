//! The node graph: one node per top-level declaration-unit.
//!
//! Naming follows the partition-file conventions: the first defined
//! entity's name, `(Recv).Method` for concrete methods, and a synthetic
//! `kind$file.seq` for units that define nothing referable (init
//! functions, blank bindings).
//!
//! Besides use-edges, every concrete method gets an edge from its
//! receiver's named type, so a type and its methods land in one strongly
//! connected component and can never be pulled into different clusters.

use std::collections::{BTreeSet, HashMap};

use crate::provider::{DeclUnit, Package, SourceFile, UseTarget};
use crate::types::{ClusterId, EntityId, NodeId, ScId};

/// A top-level declaration-unit of the analyzed package.
#[derive(Debug)]
pub struct Node {
    /// Zero-based ordinal, lexical order across files.
    pub id: NodeId,
    /// Unique name, as used in the partition file.
    pub name: String,
    /// Index of the owning source file.
    pub file: usize,
    /// Index of the declaration-unit within that file.
    pub decl: usize,
    /// Entities this node defines, in source order; blanks omitted.
    pub objects: Vec<EntityId>,
    /// Receiver named type, iff this is a concrete method declaration.
    pub recv: Option<String>,
    pub succs: BTreeSet<NodeId>,
    pub preds: BTreeSet<NodeId>,
    /// Scnode containing this node, once the condenser has run.
    pub scnode: Option<ScId>,
    /// Cluster owning this node, once the partition is finalized.
    pub cluster: Option<ClusterId>,
}

impl Node {
    /// Display label: the name, plus a count when the unit defines more
    /// than one entity (const groups mostly).
    pub fn label(&self) -> String {
        if self.objects.len() > 1 {
            format!("{} + {}", self.name, self.objects.len() - 1)
        } else {
            self.name.clone()
        }
    }

    /// 1 when any defined entity is exported; used to order scnode labels.
    pub fn exportedness(&self, pkg: &Package) -> i32 {
        self.objects
            .iter()
            .any(|&e| pkg.entity(e).exported())
            .into()
    }
}

/// The dependency graph over declaration-units.
#[derive(Debug)]
pub struct NodeGraph {
    pub nodes: Vec<Node>,
    /// Reverse map for every definition, including fields and interface
    /// methods: entity → defining node.
    pub by_entity: HashMap<EntityId, NodeId>,
}

impl NodeGraph {
    pub fn build(pkg: &Package) -> NodeGraph {
        let mut graph = NodeGraph {
            nodes: Vec::new(),
            by_entity: HashMap::new(),
        };

        // Pass 1: create nodes and the entity→node map.
        for (fi, file) in pkg.files.iter().enumerate() {
            let stem = file.base.trim_end_matches(".go");
            let mut seq = 0usize;
            for (di, decl) in file.decls.iter().enumerate() {
                let id = graph.nodes.len();
                let name = node_name(pkg, decl, stem, &mut seq);
                for def in decl.defs.iter().chain(&decl.extra_defs) {
                    graph.by_entity.insert(def.entity, id);
                }
                graph.nodes.push(Node {
                    id,
                    name,
                    file: fi,
                    decl: di,
                    objects: decl.defs.iter().map(|d| d.entity).collect(),
                    recv: decl.recv.as_ref().map(|r| r.base.clone()),
                    succs: BTreeSet::new(),
                    preds: BTreeSet::new(),
                    scnode: None,
                    cluster: None,
                });
            }
        }

        // Pass 2: use-edges, plus the receiver-type → method edges.
        for id in 0..graph.nodes.len() {
            let decl = graph.decl(pkg, id);
            let targets: Vec<NodeId> = decl
                .uses
                .iter()
                .filter_map(|u| match u.target {
                    UseTarget::Entity(e) => graph.by_entity.get(&e).copied(),
                    UseTarget::Import(_) => None,
                })
                .collect();
            for to in targets {
                graph.add_edge(id, to);
            }

            let recv_node = graph.nodes[id]
                .recv
                .as_ref()
                .and_then(|base| pkg.scope.get(base))
                .and_then(|e| graph.by_entity.get(e))
                .copied();
            if let Some(t) = recv_node {
                graph.add_edge(t, id);
            }
        }

        graph
    }

    /// Add an edge, suppressing self-edges.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if from == to {
            return;
        }
        self.nodes[from].succs.insert(to);
        self.nodes[to].preds.insert(from);
    }

    /// The declaration-unit backing a node.
    pub fn decl<'p>(&self, pkg: &'p Package, id: NodeId) -> &'p DeclUnit {
        let node = &self.nodes[id];
        &pkg.files[node.file].decls[node.decl]
    }

    pub fn file<'p>(&self, pkg: &'p Package, id: NodeId) -> &'p SourceFile {
        &pkg.files[self.nodes[id].file]
    }
}

fn node_name(pkg: &Package, decl: &DeclUnit, stem: &str, seq: &mut usize) -> String {
    match decl.defs.first() {
        Some(def) => {
            let name = &pkg.entity(def.entity).name;
            match &decl.recv {
                Some(r) => format!("({}).{}", r.display, name),
                None => name.clone(),
            }
        }
        None => {
            // e.g. "func$alg.3" for the third anonymous unit in alg.go
            *seq += 1;
            format!("{}${}.{}", decl.kind.label(), stem, seq)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Package;

    fn graph_of(src: &str) -> (Package, NodeGraph) {
        let pkg = Package::load_sources(&[("t.go", src)]).unwrap();
        let graph = NodeGraph::build(&pkg);
        (pkg, graph)
    }

    fn find(graph: &NodeGraph, name: &str) -> NodeId {
        graph
            .nodes
            .iter()
            .find(|n| n.name == name)
            .unwrap_or_else(|| panic!("no node named {name}"))
            .id
    }

    #[test]
    fn simple_call_edge() {
        let (_, g) = graph_of("package p\n\nfunc A() { B() }\n\nfunc B() {}\n");
        let (a, b) = (find(&g, "A"), find(&g, "B"));
        assert!(g.nodes[a].succs.contains(&b));
        assert!(g.nodes[b].preds.contains(&a));
    }

    #[test]
    fn self_edges_suppressed() {
        let (_, g) = graph_of("package p\n\nfunc F() { F() }\n");
        let f = find(&g, "F");
        assert!(g.nodes[f].succs.is_empty());
        assert!(g.nodes[f].preds.is_empty());
    }

    #[test]
    fn edges_well_formed() {
        let (_, g) = graph_of(
            "package p\n\nvar x int\n\nvar y = x\n\nfunc f() int { return y }\n",
        );
        for n in &g.nodes {
            for &s in &n.succs {
                assert_ne!(s, n.id, "self-edge on {}", n.name);
                assert!(s < g.nodes.len());
                assert!(g.nodes[s].preds.contains(&n.id));
            }
        }
        let (x, y, f) = (find(&g, "x"), find(&g, "y"), find(&g, "f"));
        assert!(g.nodes[y].succs.contains(&x));
        assert!(g.nodes[f].succs.contains(&y));
    }

    #[test]
    fn method_edges_both_ways() {
        let (_, g) = graph_of("package p\n\ntype T int\n\nfunc (T) m() {}\n");
        let (t, m) = (find(&g, "T"), find(&g, "(T).m"));
        // receiver-type → method (structural) and method → type (use)
        assert!(g.nodes[t].succs.contains(&m));
        assert!(g.nodes[m].succs.contains(&t));
    }

    #[test]
    fn method_node_name_keeps_pointer() {
        let (_, g) = graph_of("package p\n\ntype T int\n\nfunc (t *T) M() {}\n");
        find(&g, "(*T).M");
    }

    #[test]
    fn synthetic_names_count_per_file() {
        let (_, g) = graph_of(
            "package p\n\nfunc init() {}\n\nvar _ = 1\n\nfunc init() {}\n",
        );
        let names: Vec<_> = g.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["func$t.1", "var$t.2", "func$t.3"]);
    }

    #[test]
    fn const_group_is_one_node_with_label() {
        let (pkg, g) = graph_of("package p\n\nconst ( a, b = 0, 1; c = 0 )\n");
        assert_eq!(g.nodes.len(), 1);
        assert_eq!(g.nodes[0].name, "a");
        assert_eq!(g.nodes[0].label(), "a + 2");
        assert_eq!(g.nodes[0].exportedness(&pkg), 0);
    }

    #[test]
    fn every_unit_covered_once() {
        let (pkg, g) = graph_of(
            "package p\n\nvar (\n\ta = 0\n\tb = 0\n)\n\nfunc F() {}\n",
        );
        let total: usize = pkg.files.iter().map(|f| f.decls.len()).sum();
        assert_eq!(g.nodes.len(), total);
        assert_eq!(g.nodes.len(), 3);
    }
}

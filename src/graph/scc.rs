//! The strong-component graph and the optional fusion pass.
//!
//! Scnodes condense the node graph's strongly connected components into
//! an acyclic graph (Kosaraju, via petgraph; Tarjan is overkill here).
//! With fusion enabled, every scnode with exactly one predecessor is
//! folded into that predecessor, provided both carry the same cluster
//! tag; the loop conserves predecessor counts of survivors, so the
//! result is order-invariant. Either way the scnode graph stays acyclic.

use std::collections::BTreeSet;

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::graph::NodeGraph;
use crate::provider::Package;
use crate::types::{ClusterId, NodeId, ScId};

/// Maximum number of lines in a rendered scnode label.
const MAX_LABEL_LINES: usize = 8;

/// A vertex of the condensed graph: an SCC of the node graph, optionally
/// fused with sole-predecessor tributaries sharing its cluster.
#[derive(Debug)]
pub struct ScNode {
    pub id: ScId,
    pub nodes: BTreeSet<NodeId>,
    pub succs: BTreeSet<ScId>,
    pub preds: BTreeSet<ScId>,
    pub cluster: Option<ClusterId>,
}

impl ScNode {
    /// Fused-away scnodes stay in the arena as empty shells.
    pub fn is_alive(&self) -> bool {
        !self.nodes.is_empty()
    }
}

/// The condensed, acyclic graph over scnodes.
#[derive(Debug)]
pub struct ScGraph {
    pub scnodes: Vec<ScNode>,
}

impl ScGraph {
    /// Condense the node graph; assigns every node's scnode pointer.
    pub fn build(graph: &mut NodeGraph, fuse: bool) -> ScGraph {
        let mut di: DiGraph<NodeId, ()> = DiGraph::with_capacity(graph.nodes.len(), 0);
        for node in &graph.nodes {
            di.add_node(node.id); // NodeIndex i == NodeId i
        }
        for node in &graph.nodes {
            for &succ in &node.succs {
                di.add_edge(NodeIndex::new(node.id), NodeIndex::new(succ), ());
            }
        }

        let mut scnodes = Vec::new();
        for component in kosaraju_scc(&di) {
            let id = scnodes.len();
            let mut members = BTreeSet::new();
            for idx in component {
                members.insert(idx.index());
                graph.nodes[idx.index()].scnode = Some(id);
            }
            let cluster = members
                .first()
                .and_then(|&n| graph.nodes[n].cluster);
            scnodes.push(ScNode {
                id,
                nodes: members,
                succs: BTreeSet::new(),
                preds: BTreeSet::new(),
                cluster,
            });
        }

        // Project node edges onto scnodes, discarding self-edges.
        for id in 0..scnodes.len() {
            let mut succs = BTreeSet::new();
            let mut preds = BTreeSet::new();
            for &n in &scnodes[id].nodes {
                for &s in &graph.nodes[n].succs {
                    let sc = graph.nodes[s].scnode.unwrap();
                    if sc != id {
                        succs.insert(sc);
                    }
                }
                for &p in &graph.nodes[n].preds {
                    let sc = graph.nodes[p].scnode.unwrap();
                    if sc != id {
                        preds.insert(sc);
                    }
                }
            }
            scnodes[id].succs = succs;
            scnodes[id].preds = preds;
        }

        let mut scgraph = ScGraph { scnodes };
        if fuse {
            scgraph.fuse(graph);
        }
        scgraph
    }

    /// Scnodes that survived fusion.
    pub fn iter(&self) -> impl Iterator<Item = &ScNode> {
        self.scnodes.iter().filter(|s| s.is_alive())
    }

    pub fn alive_count(&self) -> usize {
        self.iter().count()
    }

    /// Fold each single-predecessor scnode into that predecessor when
    /// both carry the same cluster tag; iterate to a fixed point.
    fn fuse(&mut self, graph: &mut NodeGraph) {
        loop {
            let mut changed = false;
            for b in 0..self.scnodes.len() {
                if !self.scnodes[b].is_alive() || self.scnodes[b].preds.len() != 1 {
                    continue;
                }
                let a = *self.scnodes[b].preds.first().unwrap();
                if self.scnodes[a].cluster != self.scnodes[b].cluster {
                    // never fuse across clusters
                    continue;
                }
                changed = true;

                let nodes = std::mem::take(&mut self.scnodes[b].nodes);
                let succs = std::mem::take(&mut self.scnodes[b].succs);
                self.scnodes[b].preds.clear();
                self.scnodes[a].succs.remove(&b);

                for &n in &nodes {
                    graph.nodes[n].scnode = Some(a);
                }
                self.scnodes[a].nodes.extend(nodes);

                for c in succs {
                    self.scnodes[a].succs.insert(c);
                    self.scnodes[c].preds.remove(&b);
                    self.scnodes[c].preds.insert(a);
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Multi-line label: members ordered by exportedness then in-degree,
    /// capped at `MAX_LABEL_LINES` with a `+ N more` tail.
    pub fn label(&self, sc: &ScNode, pkg: &Package, graph: &NodeGraph) -> String {
        let mut order: Vec<NodeId> = sc.nodes.iter().copied().collect();
        order.sort_by(|&a, &b| {
            let na = &graph.nodes[a];
            let nb = &graph.nodes[b];
            nb.exportedness(pkg)
                .cmp(&na.exportedness(pkg))
                .then(nb.preds.len().cmp(&na.preds.len()))
                .then(na.name.cmp(&nb.name))
        });

        let mut label = String::new();
        for (i, &n) in order.iter().enumerate() {
            if i > 0 {
                label.push('\n');
            }
            if i == MAX_LABEL_LINES - 1 && order.len() > MAX_LABEL_LINES {
                label.push_str(&format!("+ {} more", order.len() - i));
                break;
            }
            label.push_str(&graph.nodes[n].label());
        }
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Package;

    fn build(src: &str, fuse: bool) -> (Package, NodeGraph, ScGraph) {
        let pkg = Package::load_sources(&[("t.go", src)]).unwrap();
        let mut graph = NodeGraph::build(&pkg);
        let sc = ScGraph::build(&mut graph, fuse);
        (pkg, graph, sc)
    }

    fn sc_of(graph: &NodeGraph, name: &str) -> ScId {
        graph
            .nodes
            .iter()
            .find(|n| n.name == name)
            .and_then(|n| n.scnode)
            .unwrap()
    }

    #[test]
    fn mutual_recursion_one_scc() {
        let (_, g, sc) = build(
            "package p\n\nfunc A() { B() }\n\nfunc B() { A() }\n\nfunc C() {}\n",
            false,
        );
        assert_eq!(sc_of(&g, "A"), sc_of(&g, "B"));
        assert_ne!(sc_of(&g, "A"), sc_of(&g, "C"));
        assert_eq!(sc.alive_count(), 2);
    }

    #[test]
    fn type_and_methods_share_scc() {
        let (_, g, _) = build(
            "package p\n\ntype T int\n\nfunc (T) m() {}\n\nfunc f(t T) { t.m() }\n",
            false,
        );
        assert_eq!(sc_of(&g, "T"), sc_of(&g, "(T).m"));
        assert_ne!(sc_of(&g, "f"), sc_of(&g, "T"));
    }

    #[test]
    fn scgraph_is_acyclic() {
        let (_, g, sc) = build(
            concat!(
                "package p\n\nfunc A() { B(); C() }\n\nfunc B() { C() }\n\n",
                "func C() { D() }\n\nfunc D() { C() }\n",
            ),
            false,
        );
        // reachability must be antisymmetric
        for s in sc.iter() {
            let mut stack: Vec<ScId> = s.succs.iter().copied().collect();
            let mut seen = BTreeSet::new();
            while let Some(t) = stack.pop() {
                assert_ne!(t, s.id, "cycle through scnode {}", s.id);
                if seen.insert(t) {
                    stack.extend(sc.scnodes[t].succs.iter().copied());
                }
            }
        }
        assert!(g.nodes.iter().all(|n| n.scnode.is_some()));
    }

    #[test]
    fn fusion_collapses_tributaries() {
        // A → B, A → C; B and C have A as sole predecessor.
        let src = "package p\n\nfunc A() { B(); C() }\n\nfunc B() {}\n\nfunc C() {}\n";
        let (_, _, plain) = build(src, false);
        assert_eq!(plain.alive_count(), 3);

        let (_, g, fused) = build(src, true);
        assert_eq!(fused.alive_count(), 1);
        let only = fused.iter().next().unwrap();
        assert_eq!(only.nodes.len(), 3);
        assert!(g.nodes.iter().all(|n| n.scnode == Some(only.id)));
        assert!(only.succs.is_empty() && only.preds.is_empty());
    }

    #[test]
    fn fusion_respects_clusters() {
        let src = "package p\n\nfunc A() { B() }\n\nfunc B() {}\n";
        let pkg = Package::load_sources(&[("t.go", src)]).unwrap();
        let mut graph = NodeGraph::build(&pkg);
        graph.nodes[0].cluster = Some(1);
        graph.nodes[1].cluster = Some(0);
        let sc = ScGraph::build(&mut graph, true);
        assert_eq!(sc.alive_count(), 2, "cross-cluster fuse must be refused");
    }

    #[test]
    fn fusion_is_deterministic() {
        let src = concat!(
            "package p\n\nfunc A() { B(); C() }\n\nfunc B() { D() }\n\n",
            "func C() { D() }\n\nfunc D() {}\n",
        );
        let (_, g1, s1) = build(src, true);
        let (_, g2, s2) = build(src, true);
        let part1: Vec<_> = g1.nodes.iter().map(|n| n.scnode).collect();
        let part2: Vec<_> = g2.nodes.iter().map(|n| n.scnode).collect();
        assert_eq!(part1, part2);
        assert_eq!(s1.alive_count(), s2.alive_count());
    }

    #[test]
    fn label_caps_lines() {
        let mut src = String::from("package p\n\n");
        // ten mutually recursive functions → one big SCC
        for i in 0..10 {
            src.push_str(&format!("func f{}() {{ f{}() }}\n\n", i, (i + 1) % 10));
        }
        let (pkg, g, sc) = build(&src, false);
        let big = sc.iter().next().unwrap();
        assert_eq!(big.nodes.len(), 10);
        let label = sc.label(big, &pkg, &g);
        assert_eq!(label.lines().count(), MAX_LABEL_LINES);
        assert!(label.ends_with("+ 3 more"));
    }
}

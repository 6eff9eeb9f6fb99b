//! Clusters and the partition file.
//!
//! The partition file is line-based: `#` comments, blank lines, `=` lines
//! opening a stanza with an import path, and one root node name per line.
//! Stanzas must be declared bottom-up (leaf clusters first). When a
//! stanza closes, the cluster claims every node transitively reachable
//! from its roots that nobody claimed before; after the last stanza, the
//! synthesized `residue` cluster takes whatever is left.

use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use crate::diag;
use crate::graph::{NodeGraph, ScGraph};
use crate::provider::Package;
use crate::types::{ClusterId, NodeId};

/// Import path of the implicit terminal cluster.
pub const RESIDUE: &str = "residue";

/// A prospective output subpackage.
#[derive(Debug)]
pub struct Cluster {
    /// Serial order in the partition file; a valid topological order of
    /// the cluster graph when the file is well-formed.
    pub id: ClusterId,
    /// Declared import path, e.g. `mypkg/internal/util`.
    pub import_path: String,
    /// Local import name used inside other clusters, e.g. `_util`.
    /// Safe-but-ugly beats clever-and-colliding.
    pub local_name: String,
    pub nodes: BTreeSet<NodeId>,
}

impl Cluster {
    fn new(id: ClusterId, import_path: &str) -> Cluster {
        let base = import_path.rsplit('/').next().unwrap_or(import_path);
        Cluster {
            id,
            import_path: import_path.to_string(),
            local_name: format!("_{base}"),
            nodes: BTreeSet::new(),
        }
    }

    /// Last path component; names the output directory's package.
    pub fn package_name(&self) -> &str {
        self.import_path.rsplit('/').next().unwrap_or(&self.import_path)
    }
}

/// The ordered cluster list; index == ClusterId.
#[derive(Debug, Default)]
pub struct Partition {
    pub clusters: Vec<Cluster>,
}

impl Partition {
    pub fn empty() -> Partition {
        Partition::default()
    }

    /// Load the partition file and claim nodes cluster by cluster.
    pub fn load(path: &Path, graph: &mut NodeGraph) -> Result<Partition> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading cluster file {}", path.display()))?;
        Ok(Self::parse(&text, &path.display().to_string(), graph))
    }

    /// Parse partition text; `filename` is for diagnostics only.
    /// Structural oddities warn and are skipped, never fatal.
    pub fn parse(text: &str, filename: &str, graph: &mut NodeGraph) -> Partition {
        let by_name: std::collections::HashMap<String, NodeId> = graph
            .nodes
            .iter()
            .map(|n| (n.name.clone(), n.id))
            .collect();

        let mut seen_paths: HashSet<String> = HashSet::from([RESIDUE.to_string()]);
        let mut partition = Partition::empty();
        // None both before the first header and inside an ignored stanza.
        let mut current: Option<ClusterId> = None;
        let mut ignoring = false;

        for (i, raw) in text.lines().enumerate() {
            let linenum = i + 1;
            let mut line = raw;
            if let Some(hash) = line.find('#') {
                line = &line[..hash];
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix('=') {
                if let Some(c) = current.take() {
                    partition.finalize(c, graph);
                }
                ignoring = false;
                let import_path = rest.trim();
                if !seen_paths.insert(import_path.to_string()) {
                    diag::warn_at(
                        filename,
                        linenum,
                        &format!("duplicate cluster name: {import_path}; ignoring"),
                    );
                    ignoring = true;
                    continue;
                }
                let id = partition.clusters.len();
                partition.clusters.push(Cluster::new(id, import_path));
                current = Some(id);
                continue;
            }

            if ignoring {
                continue; // roots of a duplicate stanza
            }
            let Some(c) = current else {
                diag::warn_at(filename, linenum, "node before '=' cluster marker; ignoring");
                continue;
            };

            match by_name.get(line) {
                None => diag::warn_at(
                    filename,
                    linenum,
                    &format!("can't find node {line:?}; ignoring"),
                ),
                Some(&n) => match graph.nodes[n].cluster {
                    Some(prev) => diag::warn_at(
                        filename,
                        linenum,
                        &format!(
                            "node {:?} appears in clusters {:?} and {:?}; ignoring",
                            line,
                            partition.clusters[prev].import_path,
                            partition.clusters[c].import_path
                        ),
                    ),
                    None => {
                        graph.nodes[n].cluster = Some(c);
                        partition.clusters[c].nodes.insert(n);
                    }
                },
            }
        }
        if let Some(c) = current {
            partition.finalize(c, graph);
        }

        partition
    }

    /// Close a stanza: flood-fill from the explicitly listed roots along
    /// successor edges, claiming every still-unclaimed node.
    fn finalize(&mut self, c: ClusterId, graph: &mut NodeGraph) {
        let mut stack: Vec<NodeId> = self.clusters[c].nodes.iter().copied().collect();
        while let Some(n) = stack.pop() {
            let succs: Vec<NodeId> = graph.nodes[n].succs.iter().copied().collect();
            for s in succs {
                if graph.nodes[s].cluster.is_none() {
                    graph.nodes[s].cluster = Some(c);
                    self.clusters[c].nodes.insert(s);
                    stack.push(s);
                }
            }
        }
    }

    /// Append the implicit terminal cluster holding every unclaimed node.
    /// The residue is empty exactly when the decomposition is complete;
    /// an empty residue is not appended.
    pub fn add_residue(&mut self, graph: &mut NodeGraph) {
        let id = self.clusters.len();
        let mut residue = Cluster::new(id, RESIDUE);
        for node in graph.nodes.iter_mut() {
            if node.cluster.is_none() {
                node.cluster = Some(id);
                residue.nodes.insert(node.id);
            }
        }
        if !residue.nodes.is_empty() {
            self.clusters.push(residue);
        }
    }

    /// Successor clusters of `c`, derived through the scnode graph.
    /// Feeds the renderer and acyclicity sanity checks.
    pub fn successors(
        &self,
        c: ClusterId,
        graph: &NodeGraph,
        scgraph: &ScGraph,
    ) -> BTreeSet<ClusterId> {
        let mut scnodes = BTreeSet::new();
        for &n in &self.clusters[c].nodes {
            if let Some(sc) = graph.nodes[n].scnode {
                scnodes.insert(sc);
            }
        }
        let mut succs = BTreeSet::new();
        for &sc in &scnodes {
            for &s in &scgraph.scnodes[sc].succs {
                match scgraph.scnodes[s].cluster {
                    Some(other) if other != c => {
                        succs.insert(other);
                    }
                    _ => {}
                }
            }
        }
        succs
    }

    /// Emit the partition in the cluster-file grammar, with source
    /// locations as trailing comments. Feeding the output back as a
    /// cluster file reproduces the same partition.
    pub fn print(
        &self,
        pkg: &Package,
        graph: &NodeGraph,
        cluster_file: &str,
    ) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Package: {:?}", pkg.root.display().to_string());
        let _ = writeln!(out, "# Initial cluster file: {cluster_file:?}");
        let _ = writeln!(
            out,
            "# {} nodes in {} clusters",
            graph.nodes.len(),
            self.clusters.len()
        );
        for c in &self.clusters {
            let _ = writeln!(out);
            let _ = writeln!(out, "= {}", c.import_path);
            let mut lines: Vec<String> = c
                .nodes
                .iter()
                .map(|&n| {
                    let node = &graph.nodes[n];
                    let file = graph.file(pkg, n);
                    let decl = graph.decl(pkg, n);
                    // Concrete-method nodes are commented out: they cannot
                    // be listed as roots and follow their receiver anyway.
                    let comment = if node.recv.is_some() { "# " } else { "" };
                    format!("{}{:<40}# {}:{}", comment, node.name, file.base, decl.line)
                })
                .collect();
            lines.sort();
            for line in lines {
                let _ = writeln!(out, "{line}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeGraph;
    use crate::provider::Package;

    const SRC: &str = concat!(
        "package p\n\n",
        "func A() { B() }\n\n",
        "func B() { C() }\n\n",
        "func C() {}\n\n",
        "func D() {}\n",
    );

    fn setup() -> (Package, NodeGraph) {
        let pkg = Package::load_sources(&[("t.go", SRC)]).unwrap();
        let graph = NodeGraph::build(&pkg);
        (pkg, graph)
    }

    fn cluster_of<'p>(p: &'p Partition, graph: &NodeGraph, name: &str) -> &'p str {
        let node = graph.nodes.iter().find(|n| n.name == name).unwrap();
        &p.clusters[node.cluster.unwrap()].import_path
    }

    #[test]
    fn flood_fill_claims_reachable() {
        let (_, mut graph) = setup();
        let mut p = Partition::parse("= pkg/internal/core\nB\n", "test", &mut graph);
        p.add_residue(&mut graph);

        assert_eq!(cluster_of(&p, &graph, "B"), "pkg/internal/core");
        assert_eq!(cluster_of(&p, &graph, "C"), "pkg/internal/core");
        assert_eq!(cluster_of(&p, &graph, "A"), RESIDUE);
        assert_eq!(cluster_of(&p, &graph, "D"), RESIDUE);
    }

    #[test]
    fn earlier_cluster_wins() {
        let (_, mut graph) = setup();
        let text = "= low\nC\n= high\nB\n";
        let mut p = Partition::parse(text, "test", &mut graph);
        p.add_residue(&mut graph);

        // C was claimed by `low` first; `high` floods through B but
        // leaves C alone.
        assert_eq!(cluster_of(&p, &graph, "C"), "low");
        assert_eq!(cluster_of(&p, &graph, "B"), "high");
    }

    #[test]
    fn every_node_gets_exactly_one_cluster() {
        let (_, mut graph) = setup();
        let mut p = Partition::parse("= core\nB\n", "test", &mut graph);
        p.add_residue(&mut graph);
        for node in &graph.nodes {
            let c = node.cluster.expect("unassigned node");
            assert!(p.clusters[c].nodes.contains(&node.id));
            let owners = p
                .clusters
                .iter()
                .filter(|cl| cl.nodes.contains(&node.id))
                .count();
            assert_eq!(owners, 1);
        }
    }

    #[test]
    fn unknown_and_duplicate_roots_ignored() {
        let (_, mut graph) = setup();
        let text = "= core\nNoSuchNode\nB\nB\n";
        let mut p = Partition::parse(text, "test", &mut graph);
        p.add_residue(&mut graph);
        assert_eq!(p.clusters[0].import_path, "core");
        assert_eq!(cluster_of(&p, &graph, "B"), "core");
    }

    #[test]
    fn duplicate_stanza_dropped_wholesale() {
        let (_, mut graph) = setup();
        let text = "= core\nC\n= core\nD\n";
        let mut p = Partition::parse(text, "test", &mut graph);
        p.add_residue(&mut graph);
        assert_eq!(p.clusters.len(), 2); // core + residue
        assert_eq!(cluster_of(&p, &graph, "D"), RESIDUE);
    }

    #[test]
    fn residue_skipped_when_empty() {
        let (_, mut graph) = setup();
        let mut p = Partition::parse("= all\nA\nD\n", "test", &mut graph);
        p.add_residue(&mut graph);
        assert_eq!(p.clusters.len(), 1);
        assert_eq!(p.clusters[0].import_path, "all");
    }

    #[test]
    fn comments_and_blanks_stripped() {
        let (_, mut graph) = setup();
        let text = "# leading comment\n\n= core   # trailing\nB   # root\n\n";
        let mut p = Partition::parse(text, "test", &mut graph);
        p.add_residue(&mut graph);
        assert_eq!(p.clusters[0].import_path, "core");
        assert_eq!(cluster_of(&p, &graph, "B"), "core");
    }

    #[test]
    fn local_name_is_underscore_base() {
        let c = Cluster::new(0, "pkg/internal/core");
        assert_eq!(c.local_name, "_core");
        assert_eq!(c.package_name(), "core");
    }

    #[test]
    fn print_round_trips() {
        let (pkg, mut graph) = setup();
        let mut p = Partition::parse("= pkg/core\nB\n", "test", &mut graph);
        p.add_residue(&mut graph);
        let printed = p.print(&pkg, &graph, "test");

        // Feed the printed partition back into a fresh graph.
        let mut graph2 = NodeGraph::build(&pkg);
        let mut p2 = Partition::parse(&printed, "round", &mut graph2);
        p2.add_residue(&mut graph2);

        assert_eq!(p.clusters.len(), p2.clusters.len());
        for (a, b) in p.clusters.iter().zip(&p2.clusters) {
            assert_eq!(a.import_path, b.import_path);
            assert_eq!(a.nodes, b.nodes);
        }
    }

    #[test]
    fn cluster_order_is_topological() {
        use crate::graph::ScGraph;
        let (_, mut graph) = setup();
        // bottom-up: C (leaf) first, then B, with A and D in the residue
        let mut p = Partition::parse("= c\nC\n= b\nB\n", "test", &mut graph);
        p.add_residue(&mut graph);
        let scgraph = ScGraph::build(&mut graph, false);

        for c in &p.clusters {
            for succ in p.successors(c.id, &graph, &scgraph) {
                assert!(
                    succ < c.id,
                    "cluster {} depends on later cluster {}",
                    c.import_path,
                    p.clusters[succ].import_path
                );
            }
        }
    }

    #[test]
    fn method_follows_receiver_cluster() {
        let src = concat!(
            "package p\n\ntype T int\n\nfunc (T) m() {}\n\n",
            "func f(t T) { t.m() }\n",
        );
        let pkg = Package::load_sources(&[("t.go", src)]).unwrap();
        let mut graph = NodeGraph::build(&pkg);
        let mut p = Partition::parse("= core\nT\n", "test", &mut graph);
        p.add_residue(&mut graph);

        assert_eq!(cluster_of(&p, &graph, "T"), "core");
        assert_eq!(cluster_of(&p, &graph, "(T).m"), "core");
        assert_eq!(cluster_of(&p, &graph, "f"), RESIDUE);
    }
}

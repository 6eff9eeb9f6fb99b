//! DOT emission and SVG rendering of the three graph levels.
//!
//! `clusters.dot/.svg` shows the cluster DAG (green); each cluster links
//! to `clusterN.dot/.svg`, its scnode DAG, where singleton scnodes
//! (light purple) link to godoc and plural ones (light blue) link to
//! `sccN.dot/.svg`, the cyclic portion of the node graph they condense.
//!
//! The external renderer is an opaque subprocess; its failures warn and
//! never corrupt analysis output. The `.dot` files always remain.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};

use crate::diag;
use crate::graph::{NodeGraph, Partition, ScGraph};
use crate::provider::Package;
use crate::types::{ClusterId, NodeId, ScId};

const CLUSTER_FILL: &str = "#e0ffe0";
const SINGLETON_FILL: &str = "#f0e0ff";
const MULTI_FILL: &str = "#e0f0ff";

pub struct Renderer<'a> {
    pkg: &'a Package,
    graph: &'a NodeGraph,
    scgraph: &'a ScGraph,
    partition: &'a Partition,
    graphdir: PathBuf,
    godoc: String,
    dot_missing: bool,
}

impl<'a> Renderer<'a> {
    pub fn new(
        pkg: &'a Package,
        graph: &'a NodeGraph,
        scgraph: &'a ScGraph,
        partition: &'a Partition,
        graphdir: &Path,
        godoc: &str,
    ) -> Renderer<'a> {
        Renderer {
            pkg,
            graph,
            scgraph,
            partition,
            graphdir: graphdir.to_path_buf(),
            godoc: godoc.trim_end_matches('/').to_string(),
            dot_missing: false,
        }
    }

    /// Render every graph level into the graph directory.
    pub fn render(&mut self) -> Result<()> {
        eprintln!("Rendering graphs");
        std::fs::create_dir_all(&self.graphdir)
            .with_context(|| format!("creating {}", self.graphdir.display()))?;

        self.write_clusters()?;
        self.run_dot("clusters.dot", "clusters.svg");

        eprintln!(
            "\nRun:\n\t% browser {}",
            self.graphdir.join("clusters.svg").display()
        );
        Ok(())
    }

    /// The cluster DAG, plus all subgraphs.
    fn write_clusters(&mut self) -> Result<()> {
        let mut out = String::new();
        out.push_str("digraph clusters {\n");
        let _ = writeln!(
            out,
            "  node [shape=\"box\",style=\"rounded,filled\",fillcolor={}];",
            quote(CLUSTER_FILL)
        );
        out.push_str("  edge [arrowhead=\"open\"];\n");
        out.push_str("  labelloc=\"t\"; label=\"All clusters\\n\\n\";\n");

        for id in 0..self.partition.clusters.len() {
            let base = format!("cluster{id}");
            let import_path = self.partition.clusters[id].import_path.clone();
            let _ = writeln!(
                out,
                "  n{} [URL={},label={}];",
                id,
                quote(&format!("{base}.svg")),
                quote(&import_path.replace('/', "/\n")),
            );
            for succ in self.partition.successors(id, self.graph, self.scgraph) {
                let _ = writeln!(out, "  n{id} -> n{succ};");
            }

            self.write_scnodes(id, &format!("{base}.dot"))?;
            self.run_dot(&format!("{base}.dot"), &format!("{base}.svg"));
        }
        out.push_str("}\n");
        self.write_dot_file("clusters.dot", &out)
    }

    /// The scnode DAG of one cluster, plus its non-trivial SCC subgraphs.
    fn write_scnodes(&mut self, cluster: ClusterId, dotfile: &str) -> Result<()> {
        let mut out = String::new();
        out.push_str("digraph scgraph {\n");
        out.push_str("  graph [rankdir=LR];\n");
        out.push_str("  edge [arrowhead=\"open\"];\n");
        let _ = writeln!(
            out,
            "  labelloc=\"t\"; label={};",
            quote(&format!(
                "Cluster: {}\n\n",
                self.partition.clusters[cluster].import_path
            ))
        );
        out.push_str("  node [shape=\"box\",style=filled];\n");

        let members: Vec<ScId> = self
            .scgraph
            .iter()
            .filter(|s| s.cluster == Some(cluster))
            .map(|s| s.id)
            .collect();
        for id in members {
            let (url, color) = if self.scgraph.scnodes[id].nodes.len() == 1 {
                let only = *self.scgraph.scnodes[id].nodes.first().unwrap();
                (self.godoc_url(only), SINGLETON_FILL)
            } else {
                let base = format!("scc{id}");
                self.write_nodes(id, &format!("{base}.dot"))?;
                self.run_dot(&format!("{base}.dot"), &format!("{base}.svg"));
                (format!("{base}.svg"), MULTI_FILL)
            };

            let sc = &self.scgraph.scnodes[id];
            let _ = writeln!(
                out,
                "  n{} [fillcolor={},URL={},label={}];",
                id,
                quote(color),
                quote(&url),
                quote(&self.scgraph.label(sc, self.pkg, self.graph)),
            );
            for &succ in &sc.succs {
                // inter-cluster edges would drown the picture
                if self.scgraph.scnodes[succ].cluster == Some(cluster) {
                    let _ = writeln!(out, "  n{id} -> n{succ};");
                }
            }
        }
        out.push_str("}\n");
        self.write_dot_file(dotfile, &out)
    }

    /// The node graph of one non-trivial SCC.
    fn write_nodes(&self, sc_id: ScId, dotfile: &str) -> Result<()> {
        let sc = &self.scgraph.scnodes[sc_id];
        let mut out = String::new();
        out.push_str("digraph scgraph {\n");
        out.push_str("  edge [arrowhead=\"open\"];\n");
        let _ = writeln!(
            out,
            "  labelloc=\"t\"; label={};",
            quote(&format!(
                "Strongly connected component: {}\n\n",
                self.scgraph.label(sc, self.pkg, self.graph)
            ))
        );
        let _ = writeln!(
            out,
            "  node [shape=\"box\",style=filled,fillcolor={}];",
            quote(SINGLETON_FILL)
        );

        for &n in &sc.nodes {
            let node = &self.graph.nodes[n];
            let _ = writeln!(
                out,
                "  n{} [URL={},label={}];",
                n,
                quote(&self.godoc_url(n)),
                quote(&node.label()),
            );
            for &succ in &node.succs {
                if sc.nodes.contains(&succ) {
                    let _ = writeln!(out, "  n{n} -> n{succ};");
                }
            }
        }
        out.push_str("}\n");
        self.write_dot_file(dotfile, &out)
    }

    /// godoc hyperlink for a node: file, selection span, line anchor.
    fn godoc_url(&self, n: NodeId) -> String {
        let file = self.graph.file(self.pkg, n);
        let decl = self.graph.decl(self.pkg, n);
        let sel = decl.selection();
        format!(
            "{}/{}?s={}:{}#L{}",
            self.godoc, file.base, sel.start, sel.end, decl.line
        )
    }

    fn write_dot_file(&self, name: &str, content: &str) -> Result<()> {
        let path = self.graphdir.join(name);
        std::fs::write(&path, content).with_context(|| format!("writing {}", path.display()))
    }

    /// Shell out to `dot -Tsvg`. A missing binary warns once and stops
    /// further attempts; per-file failures warn and continue.
    fn run_dot(&mut self, dotfile: &str, svgfile: &str) {
        if self.dot_missing {
            return;
        }
        let dot = self.graphdir.join(dotfile);
        let svg = self.graphdir.join(svgfile);
        match Command::new("dot").arg("-Tsvg").arg(&dot).arg("-o").arg(&svg).status() {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.dot_missing = true;
                diag::warn("graphviz 'dot' not found; .dot files written without SVG renderings");
            }
            Err(e) => diag::warn(&format!("running dot on {}: {e}", dot.display())),
            Ok(status) if !status.success() => {
                diag::warn(&format!("dot failed on {}: {status}", dot.display()))
            }
            Ok(_) => {}
        }
    }
}

/// Graphviz double-quoted string: escape backslashes and quotes, encode
/// newlines as `\n` so they become label line breaks.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

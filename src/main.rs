//! unravel CLI - split a monolithic Go package into subpackages.
//!
//! Orchestrates the full pipeline:
//!
//! 1. Load: parse and name-resolve the package (tree-sitter)
//! 2. Node graph: one node per top-level declaration-unit
//! 3. Partition: cluster file → flood fill → residue
//! 4. Optionally print the partition, render graphs, or rewrite
//!
//! Fatal errors print `unravel: <err>` and exit 1; warnings go to stderr
//! and never change the exit code.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use unravel::config::Config;
use unravel::graph::{NodeGraph, Partition, ScGraph};
use unravel::provider::Package;
use unravel::render::Renderer;
use unravel::rewrite;

/// Analyze and split a Go package into dependency-ordered subpackages.
///
/// unravel builds the dependency graph over a package's top-level
/// declarations, condenses its strongly connected components, and applies
/// the partition described by a clusters file. The residue cluster holds
/// whatever the partition does not claim; decompose iteratively until it
/// is empty.
///
/// Examples:
///   unravel ./pkg                                # analyze only
///   unravel --clusters pkg.clusters --print ./pkg
///   unravel --clusters pkg.clusters --graphdir out --fuse ./pkg
///   unravel --clusters pkg.clusters --outdir /tmp/split ./pkg
#[derive(Parser, Debug)]
#[command(name = "unravel")]
#[command(version)]
#[command(about, long_about = None)]
pub struct Cli {
    /// Directory containing the Go package to analyze
    #[arg(value_name = "PACKAGE_DIR")]
    pub package: PathBuf,

    /// Load cluster definitions from this partition file
    ///
    /// Stanzas must be declared bottom-up: leaf clusters first. Each
    /// stanza opens with `= <import-path>` followed by root node names,
    /// one per line.
    #[arg(short, long, value_name = "PATH")]
    pub clusters: Option<PathBuf>,

    /// Print the computed partition to stdout, in cluster-file grammar
    ///
    /// Source locations appear as trailing comments; the output can be
    /// fed back through --clusters and reproduces the same partition.
    #[arg(short, long)]
    pub print: bool,

    /// Render SVG graphs of clusters, scnodes and non-trivial SCCs here
    #[arg(long, value_name = "DIR")]
    pub graphdir: Option<PathBuf>,

    /// Base URL for godoc links embedded in rendered graphs
    #[arg(long, value_name = "URL")]
    pub godoc: Option<String>,

    /// Fuse each single-predecessor scnode into its sole predecessor
    ///
    /// Reduces clutter in big graphs; fused scnodes are no longer true
    /// SCCs but the scnode graph stays acyclic.
    #[arg(long)]
    pub fuse: bool,

    /// Enable rewriting: write each cluster under DIR/<import-path>
    #[arg(short, long, value_name = "DIR")]
    pub outdir: Option<PathBuf>,

    /// Show stage-by-stage progress on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("unravel: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(&cli.package);
    let godoc = cli
        .godoc
        .clone()
        .or_else(|| config.godoc.clone())
        .unwrap_or_else(|| "http://localhost:6060".to_string());
    let fuse = cli.fuse || config.fuse.unwrap_or(false);

    if cli.verbose {
        eprintln!("unravel v{}", env!("CARGO_PKG_VERSION"));
        eprintln!("{}", config.display_summary());
    }

    // ── Stage 1: load and resolve the package ──────────────────────────
    let pkg = Package::load(&cli.package, &config)?;
    if cli.verbose {
        eprintln!(
            "Loaded package {} ({} files)",
            pkg.name,
            pkg.files.len()
        );
    }

    // ── Stage 2: node graph ────────────────────────────────────────────
    let mut graph = NodeGraph::build(&pkg);
    if cli.verbose {
        let edges: usize = graph.nodes.iter().map(|n| n.succs.len()).sum();
        eprintln!("Built node graph: {} nodes, {} edges", graph.nodes.len(), edges);
    }

    // ── Stage 3: partition ─────────────────────────────────────────────
    let mut partition = match &cli.clusters {
        Some(path) => Partition::load(path, &mut graph)?,
        None => Partition::empty(),
    };
    partition.add_residue(&mut graph);
    if cli.verbose {
        eprintln!("Partitioned into {} clusters", partition.clusters.len());
    }

    // ── Stage 4: outputs ───────────────────────────────────────────────
    if cli.print {
        let cluster_file = cli
            .clusters
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        print!("{}", partition.print(&pkg, &graph, &cluster_file));
    }

    if let Some(graphdir) = &cli.graphdir {
        let scgraph = ScGraph::build(&mut graph, fuse);
        if cli.verbose {
            eprintln!(
                "Condensed into {} scnodes (fuse: {})",
                scgraph.alive_count(),
                fuse
            );
        }
        Renderer::new(&pkg, &graph, &scgraph, &partition, graphdir, &godoc).render()?;
    }

    if let Some(outdir) = &cli.outdir {
        rewrite::rewrite(&pkg, &graph, &partition, outdir)?;
    }

    Ok(())
}

//! The refactoring rewriter, steps 1–5: export computation, selectable
//! detection, scope conflicts, reference qualification, defining-ident
//! updates. Everything is expressed as byte-span edits against the
//! original sources; the splitter (steps 6–8) applies them chunk by
//! chunk while distributing declarations to cluster output files.
//!
//! The rename table and per-cluster scopes are single-writer sequential
//! structures owned by the planner; nothing else mutates them.

pub mod split;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use anyhow::Result;

use crate::diag;
use crate::graph::{NodeGraph, Partition};
use crate::provider::{EntityKind, Package, UseTarget};
use crate::types::{ClusterId, EntityId, NodeId, Span};

/// One identifier replacement in a source file.
#[derive(Debug, Clone)]
pub struct Edit {
    pub span: Span,
    pub text: String,
}

/// An import dependency of a node (and, unioned, of an output file).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImportKey {
    /// Pre-existing import carried over from the original file.
    Pkg { name: String, path: String },
    /// New dependency on a sibling cluster.
    Cluster(ClusterId),
}

/// Everything steps 1–5 decide; input to the splitter and to tests.
#[derive(Debug, Default)]
pub struct RewritePlan {
    /// Entity → replacement name.
    pub rename: HashMap<EntityId, String>,
    /// Node must be visible to other clusters.
    pub must_export: Vec<bool>,
    /// Per-node import sets.
    pub node_imports: Vec<BTreeSet<ImportKey>>,
    /// Per-file identifier edits, sorted by start offset.
    pub edits: Vec<Vec<Edit>>,
    /// Cluster-order violations found during qualification: (from, to)
    /// with `to` declared at or after `from`. Rewrite proceeds anyway.
    pub back_edges: BTreeSet<(ClusterId, ClusterId)>,
}

/// Run the whole rewriter against `outdir`.
pub fn rewrite(
    pkg: &Package,
    graph: &NodeGraph,
    partition: &Partition,
    outdir: &Path,
) -> Result<()> {
    let plan = plan(pkg, graph, partition);
    let files = split::split(pkg, graph, partition, &plan)?;
    split::write(partition, &files, outdir)
}

/// Steps 1–5; pure planning, no I/O.
pub fn plan(pkg: &Package, graph: &NodeGraph, partition: &Partition) -> RewritePlan {
    let mut planner = Planner {
        pkg,
        graph,
        partition,
        plan: RewritePlan {
            rename: HashMap::new(),
            must_export: vec![false; graph.nodes.len()],
            node_imports: vec![BTreeSet::new(); graph.nodes.len()],
            edits: vec![Vec::new(); pkg.files.len()],
            back_edges: BTreeSet::new(),
        },
    };
    planner.compute_exports();
    planner.detect_selectables();
    planner.resolve_conflicts();
    planner.qualify_references();
    planner.update_definitions();

    for edits in &mut planner.plan.edits {
        edits.sort_by_key(|e| e.span.start);
        debug_assert!(edits
            .windows(2)
            .all(|w| w[0].span.end <= w[1].span.start));
    }
    planner.plan
}

struct Planner<'a> {
    pkg: &'a Package,
    graph: &'a NodeGraph,
    partition: &'a Partition,
    plan: RewritePlan,
}

impl<'a> Planner<'a> {
    fn cluster_of(&self, n: NodeId) -> ClusterId {
        self.graph.nodes[n]
            .cluster
            .expect("rewriter requires a finalized partition")
    }

    /// Step 1: the heads of cluster-spanning edges must become exported.
    fn compute_exports(&mut self) {
        for node in &self.graph.nodes {
            let from = self.cluster_of(node.id);
            for &succ in &node.succs {
                if self.cluster_of(succ) == from || self.plan.must_export[succ] {
                    continue;
                }
                self.plan.must_export[succ] = true;
                for &e in &self.graph.nodes[succ].objects {
                    let entity = self.pkg.entity(e);
                    if entity.is_package_level() && !entity.exported() {
                        self.plan
                            .rename
                            .entry(e)
                            .or_insert_with(|| exported_name(&entity.name));
                    }
                }
            }
        }
    }

    /// Step 2: cross-cluster references to fields and methods cannot be
    /// rewritten automatically; warn so the output is not silently wrong.
    fn detect_selectables(&mut self) {
        let mut warned: HashSet<EntityId> = HashSet::new();
        for node in &self.graph.nodes {
            let from = self.cluster_of(node.id);
            for site in &self.graph.decl(self.pkg, node.id).uses {
                let UseTarget::Entity(e) = site.target else {
                    continue;
                };
                let entity = self.pkg.entity(e);
                if !entity.is_selectable() || entity.exported() {
                    continue;
                }
                let Some(&owner) = self.graph.by_entity.get(&e) else {
                    continue;
                };
                if self.cluster_of(owner) != from && warned.insert(e) {
                    let kind = match entity.kind {
                        EntityKind::Field => "field",
                        _ => "method",
                    };
                    diag::warn(&format!(
                        "cross-cluster reference to unexported {} {:?}; export it by hand",
                        kind, entity.name
                    ));
                }
            }
        }
    }

    /// Step 3: within each cluster, post-rename names must be unique.
    /// The policy is crude but monotone: the later declaration (source
    /// order) keeps gaining `X` prefixes until the collision is gone.
    fn resolve_conflicts(&mut self) {
        for cluster in &self.partition.clusters {
            let mut scope: HashMap<String, NodeId> = HashMap::new();
            for &n in &cluster.nodes {
                let objects = self.graph.nodes[n].objects.clone();
                for e in objects {
                    let entity = self.pkg.entity(e);
                    if !entity.is_package_level() {
                        continue;
                    }
                    let mut name = self
                        .plan
                        .rename
                        .get(&e)
                        .cloned()
                        .unwrap_or_else(|| entity.name.clone());
                    if scope.contains_key(&name) {
                        let file = self.graph.file(self.pkg, n);
                        let decl = self.graph.decl(self.pkg, n);
                        diag::warn_at(
                            &file.base,
                            decl.line,
                            &format!(
                                "exporting {} conflicts with {} in cluster {}; adding 'X' prefix",
                                entity.name, name, cluster.import_path
                            ),
                        );
                        while scope.contains_key(&name) {
                            name = format!("X{name}");
                        }
                        self.plan.rename.insert(e, name.clone());
                    }
                    scope.insert(name, n);
                }
            }
        }
    }

    /// Step 4: qualify inter-cluster references and collect imports.
    fn qualify_references(&mut self) {
        for node in &self.graph.nodes {
            let from = self.cluster_of(node.id);
            let file_idx = node.file;
            for site in &self.graph.decl(self.pkg, node.id).uses {
                match site.target {
                    UseTarget::Import(i) => {
                        let import = &self.pkg.files[file_idx].imports[i];
                        self.plan.node_imports[node.id].insert(ImportKey::Pkg {
                            name: import.name.clone(),
                            path: import.path.clone(),
                        });
                    }
                    UseTarget::Entity(e) => {
                        let entity = self.pkg.entity(e);
                        if entity.is_selectable() {
                            continue;
                        }
                        let Some(&owner) = self.graph.by_entity.get(&e) else {
                            continue;
                        };
                        let to = self.cluster_of(owner);
                        let name = self
                            .plan
                            .rename
                            .get(&e)
                            .cloned()
                            .unwrap_or_else(|| entity.name.clone());
                        if to != from {
                            if to >= from && self.plan.back_edges.insert((from, to)) {
                                diag::warn(&format!(
                                    "cluster {} depends on {}, which is declared later; \
                                     cluster order is not topological",
                                    self.partition.clusters[from].import_path,
                                    self.partition.clusters[to].import_path,
                                ));
                            }
                            let local = &self.partition.clusters[to].local_name;
                            self.plan.edits[file_idx].push(Edit {
                                span: site.span,
                                text: format!("{local}.{name}"),
                            });
                            self.plan.node_imports[node.id].insert(ImportKey::Cluster(to));
                        } else if name != entity.name {
                            self.plan.edits[file_idx].push(Edit {
                                span: site.span,
                                text: name,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Step 5: rewrite the defining identifiers of renamed entities.
    fn update_definitions(&mut self) {
        for node in &self.graph.nodes {
            for def in &self.graph.decl(self.pkg, node.id).defs {
                if let Some(new) = self.plan.rename.get(&def.entity) {
                    self.plan.edits[node.file].push(Edit {
                        span: def.span,
                        text: new.clone(),
                    });
                }
            }
        }
    }
}

/// The exported replacement for an unexported name: strip leading
/// underscores, upper-case the first remaining code point, and prepend
/// `X` when that code point is not a letter.
pub fn exported_name(name: &str) -> String {
    let stripped = name.trim_start_matches('_');
    let mut chars = stripped.chars();
    match chars.next() {
        None => "X".to_string(),
        Some(first) => {
            let mut out: String = first.to_uppercase().collect();
            out.push_str(chars.as_str());
            if !first.is_alphabetic() {
                out.insert(0, 'X');
            }
            out
        }
    }
}

//! Steps 6–8: file splitting, import materialization, write-out.
//!
//! Each source file is consumed front to back, one declaration-unit at a
//! time. A chunk is the original text from the previous emitted offset
//! through the unit's final newline, with the plan's identifier edits
//! applied in place; it lands in the output file keyed by the owning
//! cluster and the source basename. Grouped `var (...)`/`type (...)`
//! declarations distributed across clusters get the group opening
//! replayed per receiving file and a closing `)` on every transition out.
//!
//! All text operations are newline-terminated, the same discipline as
//! the offsets recorded by the provider.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};

use super::{Edit, ImportKey, RewritePlan};
use crate::diag;
use crate::graph::{NodeGraph, Partition};
use crate::provider::Package;
use crate::types::ClusterId;

/// One rewritten output file, before formatting.
#[derive(Debug)]
pub struct OutFile {
    pub cluster: ClusterId,
    pub base: String,
    pub content: String,
}

#[derive(Debug, Default)]
struct Buffer {
    head: String,
    body: String,
    imports: BTreeSet<ImportKey>,
    /// Open grouped declaration, keyed by (file index, group id), so the
    /// closing `)` is emitted on the next transition or at flush.
    open_group: Option<(usize, usize)>,
}

/// Steps 6 and 7: split every source file into per-cluster output files
/// and materialize their import blocks. Pure; the only failure is the
/// node-count invariant, which is a programmer error.
pub fn split(
    pkg: &Package,
    graph: &NodeGraph,
    partition: &Partition,
    plan: &RewritePlan,
) -> Result<Vec<OutFile>> {
    let mut buffers: BTreeMap<(ClusterId, String), Buffer> = BTreeMap::new();
    let mut node_id = 0usize;

    for (fi, file) in pkg.files.iter().enumerate() {
        let text = &file.text;
        let edits = &plan.edits[fi];
        let mut offset = file.header_end;
        let mut enter_group_text = String::new();

        for decl in &file.decls {
            let id = node_id;
            node_id += 1;
            let cluster = graph.nodes[id]
                .cluster
                .expect("splitter requires a finalized partition");

            let buffer = buffers
                .entry((cluster, file.base.clone()))
                .or_default();
            buffer.imports.extend(plan.node_imports[id].iter().cloned());

            // First declaration for this output file: seed the head with
            // the pre-package comment block and a fresh package clause.
            if buffer.head.is_empty() {
                buffer.head.push_str(&text[..file.head_end]);
                buffer.head.push_str(&format!(
                    "package {}\n\n",
                    partition.clusters[cluster].package_name()
                ));
            }

            match decl.group {
                None => {
                    if buffer.open_group.is_some() {
                        buffer.body.push_str(")\n");
                        buffer.open_group = None;
                    }
                }
                Some(group) => {
                    if group.first {
                        // Capture preceding whitespace plus the "var ("
                        // line once; replay it per receiving cluster.
                        let lparen_end = with_newline(text, group.lparen);
                        enter_group_text = apply_edits(text, edits, offset, lparen_end);
                        offset = lparen_end;
                    }
                    if buffer.open_group != Some((fi, group.id)) {
                        if buffer.open_group.is_some() {
                            buffer.body.push_str(")\n");
                        }
                        buffer.body.push_str(&enter_group_text);
                        buffer.open_group = Some((fi, group.id));
                    }
                }
            }

            // Chunks are newline-terminated; a group spec sharing its
            // line with the previous spec (never produced by gofmt) has
            // already been emitted with it, hence the max.
            let end = with_newline(text, decl.span.end).max(offset);
            buffer.body.push_str(&apply_edits(text, edits, offset, end));
            offset = end;

            if let Some(group) = decl.group {
                if group.last {
                    // consume the source's own closing paren
                    offset = with_newline(text, group.rparen);
                }
            }
        }
    }

    if node_id != graph.nodes.len() {
        bail!(
            "internal error: split {} declarations for {} nodes",
            node_id,
            graph.nodes.len()
        );
    }

    let mut files = Vec::with_capacity(buffers.len());
    for ((cluster, base), mut buffer) in buffers {
        if buffer.open_group.is_some() {
            buffer.body.push_str(")\n");
        }
        if !buffer.imports.is_empty() {
            let mut lines: Vec<String> = buffer
                .imports
                .iter()
                .map(|key| import_line(key, partition))
                .collect();
            lines.sort();
            buffer.head.push_str("import (\n");
            for line in lines {
                buffer.head.push_str(&line);
            }
            buffer.head.push_str(")\n");
        }
        files.push(OutFile {
            cluster,
            base,
            content: format!("{}{}", buffer.head, buffer.body),
        });
    }
    Ok(files)
}

/// Step 8: create the cluster directories and write every output file
/// through gofmt, plus one `dummy.s` linker hint per directory. I/O
/// errors are reported per path and unioned into one failure.
pub fn write(partition: &Partition, files: &[OutFile], outdir: &Path) -> Result<()> {
    eprintln!("Writing refactored output...");
    let mut failed = false;
    let mut gofmt_missing = false;

    for cluster in &partition.clusters {
        let dir = outdir.join(&cluster.import_path);
        eprint!("\t{}", dir.display());
        if let Err(e) = std::fs::create_dir_all(&dir) {
            eprintln!(": {e}");
            failed = true;
            continue;
        }
        if let Err(e) = std::fs::write(dir.join("dummy.s"), "") {
            eprint!(": dummy.s: {e}");
            failed = true;
        }
        for file in files.iter().filter(|f| f.cluster == cluster.id) {
            match gofmt(&file.content, &mut gofmt_missing) {
                Ok(formatted) => {
                    if let Err(e) = std::fs::write(dir.join(&file.base), formatted) {
                        eprint!(": {}: {e}", file.base);
                        failed = true;
                    }
                }
                Err(e) => {
                    eprint!(": {}: {e}", file.base);
                    failed = true;
                }
            }
        }
        eprintln!();
    }

    if failed {
        bail!("there were I/O errors");
    }
    Ok(())
}

/// Run content through gofmt. Rejection is an error (the rewrite produced
/// something unparsable); a missing gofmt binary only warns, once, and
/// the content passes through unformatted.
fn gofmt(content: &str, missing: &mut bool) -> Result<String> {
    if *missing {
        return Ok(content.to_string());
    }
    let mut child = match Command::new("gofmt")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            *missing = true;
            diag::warn("gofmt not found; writing unformatted output");
            return Ok(content.to_string());
        }
        Err(e) => return Err(e).context("spawning gofmt"),
    };
    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(content.as_bytes())
        .context("writing to gofmt")?;
    let output = child.wait_with_output().context("waiting for gofmt")?;
    if !output.status.success() {
        bail!(
            "gofmt rejected output: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    String::from_utf8(output.stdout).context("gofmt produced non-UTF-8 output")
}

fn import_line(key: &ImportKey, partition: &Partition) -> String {
    match key {
        ImportKey::Pkg { name, path } => {
            // The name prefix is omitted when it matches the last path
            // segment, the way hand-written imports read.
            if name == crate::provider::last_segment(path) {
                format!("\t\"{path}\"\n")
            } else {
                format!("\t{name} \"{path}\"\n")
            }
        }
        ImportKey::Cluster(c) => {
            let cluster = &partition.clusters[*c];
            format!("\t{} \"{}\"\n", cluster.local_name, cluster.import_path)
        }
    }
}

/// Splice `edits` falling inside `[start, end)` into that slice of text.
/// Edits are sorted and never straddle chunk boundaries: identifiers
/// live strictly inside declaration spans.
fn apply_edits(text: &str, edits: &[Edit], start: usize, end: usize) -> String {
    let mut out = String::with_capacity(end - start);
    let mut cursor = start;
    for edit in edits {
        if edit.span.end <= start || edit.span.start >= end {
            continue;
        }
        out.push_str(&text[cursor..edit.span.start]);
        out.push_str(&edit.text);
        cursor = edit.span.end;
    }
    out.push_str(&text[cursor..end]);
    out
}

fn with_newline(text: &str, i: usize) -> usize {
    crate::provider::with_newline(text, i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeGraph, Partition, RESIDUE};
    use crate::provider::Package;
    use crate::rewrite::plan;

    fn split_sources(
        sources: &[(&str, &str)],
        clusters: &str,
    ) -> (Partition, Vec<OutFile>) {
        let pkg = Package::load_sources(sources).unwrap();
        let mut graph = NodeGraph::build(&pkg);
        let mut partition = Partition::parse(clusters, "test", &mut graph);
        partition.add_residue(&mut graph);
        let plan = plan(&pkg, &graph, &partition);
        let files = split(&pkg, &graph, &partition, &plan).unwrap();
        (partition, files)
    }

    fn file<'f>(files: &'f [OutFile], partition: &Partition, cluster: &str, base: &str) -> &'f OutFile {
        let id = partition
            .clusters
            .iter()
            .find(|c| c.import_path == cluster)
            .unwrap()
            .id;
        files
            .iter()
            .find(|f| f.cluster == id && f.base == base)
            .unwrap_or_else(|| panic!("no output {cluster}/{base}"))
    }

    #[test]
    fn residue_only_keeps_bodies_intact() {
        // No partition file: one output package, bodies unchanged.
        let src = "// Package doc.\npackage demo\n\nfunc A() { B() }\n\nfunc B() {}\n";
        let (partition, files) = split_sources(&[("d.go", src)], "");
        assert_eq!(files.len(), 1);
        let out = file(&files, &partition, RESIDUE, "d.go");
        // The extra blank line after the package clause is the original
        // one; gofmt collapses it at write time.
        assert_eq!(
            out.content,
            "// Package doc.\npackage residue\n\n\nfunc A() { B() }\n\nfunc B() {}\n"
        );
    }

    #[test]
    fn split_qualifies_and_imports() {
        // B moves to pkg/internal/core; A follows it through _core.
        let src = "package demo\n\nfunc A() { B() }\n\nfunc B() {}\n";
        let (partition, files) = split_sources(&[("d.go", src)], "= pkg/internal/core\nB\n");
        assert_eq!(files.len(), 2);

        let core = file(&files, &partition, "pkg/internal/core", "d.go");
        assert!(core.content.starts_with("package core\n"));
        assert!(core.content.contains("func B() {}"));
        assert!(!core.content.contains("import"));

        let residue = file(&files, &partition, RESIDUE, "d.go");
        assert!(residue.content.starts_with("package residue\n"));
        assert!(residue.content.contains("import (\n\t_core \"pkg/internal/core\"\n)\n"));
        assert!(residue.content.contains("func A() { _core.B() }"));
    }

    #[test]
    fn forced_export_renames_everywhere() {
        // b moves alone and becomes B at both ends.
        let src = "package demo\n\nfunc A() { b() }\n\nfunc b() {}\n";
        let (partition, files) = split_sources(&[("d.go", src)], "= pkg/core\nb\n");
        let core = file(&files, &partition, "pkg/core", "d.go");
        assert!(core.content.contains("func B() {}"));
        assert!(!core.content.contains("func b()"));
        let residue = file(&files, &partition, RESIDUE, "d.go");
        assert!(residue.content.contains("_core.B()"));
    }

    #[test]
    fn grouped_var_reopens_per_cluster() {
        // A group split across clusters opens and closes an
        // independent block in each output file.
        let src = "package demo\n\nvar (\n\ta = 0\n\tb = 0\n)\n\nfunc UseA() { _ = a }\n";
        let (partition, files) = split_sources(&[("d.go", src)], "= pkg/bee\nb\n");

        let bee = file(&files, &partition, "pkg/bee", "d.go");
        assert!(bee.content.contains("var (\n\tb = 0\n)\n"));

        let residue = file(&files, &partition, RESIDUE, "d.go");
        assert!(residue.content.contains("var (\n\ta = 0\n)\n"));
        assert!(residue.content.contains("func UseA()"));
    }

    #[test]
    fn group_wholly_owned_stays_one_block() {
        let src = "package demo\n\nvar (\n\ta = 0\n\tb = a\n)\n";
        let (partition, files) = split_sources(&[("d.go", src)], "");
        let out = file(&files, &partition, RESIDUE, "d.go");
        assert!(out.content.contains("var (\n\ta = 0\n\tb = a\n)\n"));
        // exactly one opening
        assert_eq!(out.content.matches("var (").count(), 1);
    }

    #[test]
    fn existing_imports_follow_their_nodes() {
        let src = concat!(
            "package demo\n\nimport \"fmt\"\n\n",
            "func Log() { fmt.Println() }\n\nfunc Quiet() {}\n",
        );
        let (partition, files) = split_sources(&[("d.go", src)], "= pkg/log\nLog\n");
        let log = file(&files, &partition, "pkg/log", "d.go");
        assert!(log.content.contains("import (\n\t\"fmt\"\n)\n"));
        let residue = file(&files, &partition, RESIDUE, "d.go");
        assert!(!residue.content.contains("fmt"));
    }

    #[test]
    fn aliased_import_keeps_prefix() {
        let src = concat!(
            "package demo\n\nimport osexec \"os/exec\"\n\n",
            "func Run() { osexec.Command(\"true\") }\n",
        );
        let (partition, files) = split_sources(&[("d.go", src)], "");
        let out = file(&files, &partition, RESIDUE, "d.go");
        assert!(out.content.contains("\tosexec \"os/exec\"\n"));
    }

    #[test]
    fn one_output_per_contributing_file() {
        let (partition, files) = split_sources(
            &[
                ("a.go", "package demo\n\nfunc A() {}\n"),
                ("b.go", "package demo\n\nfunc B() {}\n"),
            ],
            "= pkg/onlya\nA\n",
        );
        // a.go contributes only to only-a; b.go only to the residue.
        assert_eq!(files.len(), 2);
        assert!(file(&files, &partition, "pkg/onlya", "a.go").content.contains("func A"));
        assert!(file(&files, &partition, RESIDUE, "b.go").content.contains("func B"));
    }

    #[test]
    fn write_creates_tree_and_dummy() {
        let src = "package demo\n\nfunc A() { B() }\n\nfunc B() {}\n";
        let pkg = Package::load_sources(&[("d.go", src)]).unwrap();
        let mut graph = NodeGraph::build(&pkg);
        let mut partition = Partition::parse("= pkg/core\nB\n", "test", &mut graph);
        partition.add_residue(&mut graph);
        let plan = plan(&pkg, &graph, &partition);
        let files = split(&pkg, &graph, &partition, &plan).unwrap();

        let outdir = tempfile::tempdir().unwrap();
        write(&partition, &files, outdir.path()).unwrap();

        let core = outdir.path().join("pkg/core");
        assert!(core.join("d.go").is_file());
        assert!(core.join("dummy.s").is_file());
        let residue = outdir.path().join(RESIDUE);
        assert!(residue.join("d.go").is_file());
        assert!(residue.join("dummy.s").is_file());

        let text = std::fs::read_to_string(residue.join("d.go")).unwrap();
        assert!(text.contains("_core.B()"));
    }

    #[test]
    fn chunk_count_matches_node_count() {
        // The splitter must emit exactly one chunk per node.
        let src = concat!(
            "package demo\n\nconst ( a = 0; b = 1 )\n\n",
            "var (\n\tx = a\n\ty = b\n)\n\nfunc F() {}\n",
        );
        let pkg = Package::load_sources(&[("d.go", src)]).unwrap();
        let mut graph = NodeGraph::build(&pkg);
        let mut partition = Partition::parse("", "test", &mut graph);
        partition.add_residue(&mut graph);
        let plan = plan(&pkg, &graph, &partition);
        assert!(split(&pkg, &graph, &partition, &plan).is_ok());
        assert_eq!(graph.nodes.len(), 4);
    }
}

//! Tree-sitter scanning: files into declaration-units and definitions.
//!
//! Granularity rules:
//! - `func`/method declarations: one unit each;
//! - a whole `const` declaration: one unit, however many specs;
//! - grouped `var (...)`/`type (...)`: one unit per spec;
//! - ungrouped `var`/`type`: one unit for the declaration.
//!
//! The same `for_each_decl_unit` walk is reused by the resolver and by the
//! file splitter's bookkeeping, so the i-th visited unit always lines up
//! with the i-th recorded one.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use once_cell::sync::Lazy;
use tree_sitter::{Language, Node, Parser, Tree};

use super::{
    Arena, DeclKind, DeclUnit, DefSite, EntityKind, GroupRef, Import, Receiver, SourceFile,
};
use crate::types::Span;

static GO: Lazy<Language> = Lazy::new(|| tree_sitter_go::LANGUAGE.into());

pub(crate) fn new_parser() -> Result<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&GO)
        .map_err(|e| anyhow!("loading Go grammar: {e}"))?;
    Ok(parser)
}

/// A declaration-unit as it appears in the tree, before definition and
/// use extraction.
pub(crate) struct Unit<'t> {
    pub syntax: Node<'t>,
    pub kind: DeclKind,
    pub group: Option<GroupRef>,
}

/// Visit every declaration-unit of a file in source order.
pub(crate) fn for_each_decl_unit<'t>(root: Node<'t>, mut f: impl FnMut(Unit<'t>)) {
    let mut cursor = root.walk();
    let mut group_seq = 0usize;
    for decl in root.named_children(&mut cursor) {
        match decl.kind() {
            "function_declaration" | "method_declaration" => f(Unit {
                syntax: decl,
                kind: DeclKind::Func,
                group: None,
            }),
            "const_declaration" => f(Unit {
                syntax: decl,
                kind: DeclKind::Const,
                group: None,
            }),
            "var_declaration" | "type_declaration" => {
                let kind = if decl.kind() == "var_declaration" {
                    DeclKind::Var
                } else {
                    DeclKind::Type
                };
                match group_parens(decl) {
                    Some((lparen, rparen)) => {
                        let id = group_seq;
                        group_seq += 1;
                        let specs = spec_children(decl);
                        let last = specs.len().saturating_sub(1);
                        for (i, spec) in specs.into_iter().enumerate() {
                            f(Unit {
                                syntax: spec,
                                kind,
                                group: Some(GroupRef {
                                    id,
                                    first: i == 0,
                                    last: i == last,
                                    lparen,
                                    rparen,
                                }),
                            });
                        }
                    }
                    None => f(Unit {
                        syntax: decl,
                        kind,
                        group: None,
                    }),
                }
            }
            _ => {} // package clause, imports, comments
        }
    }
}

/// Paren offsets of a grouped declaration, or None when ungrouped.
fn group_parens(decl: Node) -> Option<(usize, usize)> {
    let mut cursor = decl.walk();
    let mut lparen = None;
    let mut rparen = None;
    for child in decl.children(&mut cursor) {
        match child.kind() {
            "(" => lparen = Some(child.start_byte()),
            ")" => rparen = Some(child.start_byte()),
            _ => {}
        }
    }
    Some((lparen?, rparen?))
}

/// The spec children of a grouped var/type declaration, in order.
fn spec_children(decl: Node) -> Vec<Node> {
    let mut cursor = decl.walk();
    decl.named_children(&mut cursor)
        .filter(|c| matches!(c.kind(), "var_spec" | "type_spec" | "type_alias"))
        .collect()
}

pub(crate) fn scan_file(
    tree: &Tree,
    text: String,
    path: PathBuf,
    arena: &mut Arena,
) -> Result<SourceFile> {
    let root = tree.root_node();
    let src = text.as_str();

    let clause = find_child(root, "package_clause")
        .ok_or_else(|| anyhow!("{}: missing package clause", path.display()))?;
    let package_name = find_child(clause, "package_identifier")
        .map(|n| node_text(n, src).to_string())
        .ok_or_else(|| anyhow!("{}: unnamed package clause", path.display()))?;

    // The splitter's starting offset: past the package clause and every
    // import declaration, extended to the next newline.
    let mut header_end = clause.end_byte();
    let mut imports = Vec::new();
    {
        let mut cursor = root.walk();
        for decl in root.named_children(&mut cursor) {
            if decl.kind() == "import_declaration" {
                header_end = header_end.max(decl.end_byte());
                collect_imports(decl, src, &mut imports);
            }
        }
    }
    header_end = with_newline(src, header_end);

    let base = path
        .file_name()
        .and_then(|b| b.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string());

    let mut decls = Vec::new();
    let mut err = None;
    for_each_decl_unit(root, |unit| {
        if err.is_some() {
            return;
        }
        match scan_unit(&unit, src, arena) {
            Ok(decl) => decls.push(decl),
            Err(e) => err = Some(e),
        }
    });
    if let Some(e) = err {
        bail!("{}: {}", path.display(), e);
    }

    Ok(SourceFile {
        path,
        base,
        head_end: clause.start_byte(),
        header_end,
        package_name,
        imports,
        decls,
        text,
    })
}

fn scan_unit(unit: &Unit, src: &str, arena: &mut Arena) -> Result<DeclUnit> {
    let syntax = unit.syntax;
    let mut defs = Vec::new();
    let mut recv = None;

    match syntax.kind() {
        "function_declaration" => {
            if let Some(name) = syntax.child_by_field_name("name") {
                let text = node_text(name, src);
                // init functions and blank funcs declare nothing referable.
                if text != "init" && text != "_" {
                    defs.push(DefSite {
                        entity: arena.add(text, EntityKind::Func),
                        span: span_of(name),
                    });
                }
            }
        }
        "method_declaration" => {
            let receiver = method_receiver(syntax, src)
                .ok_or_else(|| anyhow!("method declaration without receiver type"))?;
            if let Some(name) = syntax.child_by_field_name("name") {
                let text = node_text(name, src);
                if text != "_" {
                    defs.push(DefSite {
                        entity: arena.add(
                            text,
                            EntityKind::Method {
                                recv: receiver.display.clone(),
                            },
                        ),
                        span: span_of(name),
                    });
                }
            }
            recv = Some(receiver);
        }
        "const_declaration" => {
            let mut cursor = syntax.walk();
            for spec in syntax.named_children(&mut cursor) {
                if spec.kind() == "const_spec" {
                    collect_spec_names(spec, src, EntityKind::Const, arena, &mut defs);
                }
            }
        }
        "var_declaration" => {
            let mut cursor = syntax.walk();
            for spec in syntax.named_children(&mut cursor) {
                if spec.kind() == "var_spec" {
                    collect_spec_names(spec, src, EntityKind::Var, arena, &mut defs);
                }
            }
        }
        "var_spec" => collect_spec_names(syntax, src, EntityKind::Var, arena, &mut defs),
        "type_declaration" => {
            let mut cursor = syntax.walk();
            for spec in syntax.named_children(&mut cursor) {
                if matches!(spec.kind(), "type_spec" | "type_alias") {
                    collect_spec_names(spec, src, EntityKind::Type, arena, &mut defs);
                }
            }
        }
        "type_spec" | "type_alias" => {
            collect_spec_names(syntax, src, EntityKind::Type, arena, &mut defs)
        }
        other => bail!("unexpected declaration-unit kind {other:?}"),
    }

    let mut extra_defs = Vec::new();
    collect_selectable_defs(syntax, src, arena, &mut extra_defs);

    Ok(DeclUnit {
        kind: unit.kind,
        span: span_of(syntax),
        line: syntax.start_position().row + 1,
        group: unit.group,
        defs,
        extra_defs,
        uses: Vec::new(), // filled by the resolver
        recv,
    })
}

/// Names declared by one const/var/type spec; blanks omitted.
fn collect_spec_names(
    spec: Node,
    src: &str,
    kind: EntityKind,
    arena: &mut Arena,
    defs: &mut Vec<DefSite>,
) {
    let mut cursor = spec.walk();
    for name in spec.children_by_field_name("name", &mut cursor) {
        let text = node_text(name, src);
        if text == "_" {
            continue;
        }
        defs.push(DefSite {
            entity: arena.add(text, kind.clone()),
            span: span_of(name),
        });
    }
}

/// Struct fields and interface methods anywhere inside the unit. They are
/// not node objects, but the entity→node map must know which unit owns
/// them so cross-cluster selector references can be detected.
fn collect_selectable_defs(node: Node, src: &str, arena: &mut Arena, out: &mut Vec<DefSite>) {
    match node.kind() {
        "field_declaration" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let text = node_text(name, src);
                if text != "_" {
                    out.push(DefSite {
                        entity: arena.add(text, EntityKind::Field),
                        span: span_of(name),
                    });
                }
            }
            if let Some(ty) = node.child_by_field_name("type") {
                collect_selectable_defs(ty, src, arena, out);
            }
            return;
        }
        "method_elem" | "method_spec" => {
            if let Some(name) = node.child_by_field_name("name") {
                out.push(DefSite {
                    entity: arena.add(node_text(name, src), EntityKind::IfaceMethod),
                    span: span_of(name),
                });
            }
            return;
        }
        _ => {}
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_selectable_defs(child, src, arena, out);
    }
}

/// Receiver of a method declaration: display text (e.g. `*T`) and the
/// underlying named type (`T`).
fn method_receiver(decl: Node, src: &str) -> Option<Receiver> {
    let list = decl.child_by_field_name("receiver")?;
    let mut cursor = list.walk();
    let param = list
        .named_children(&mut cursor)
        .find(|c| c.kind() == "parameter_declaration")?;
    let ty = param.child_by_field_name("type")?;
    let display = node_text(ty, src).to_string();
    let base = base_type_name(ty, src)?;
    Some(Receiver { display, base })
}

/// Peel pointers and type arguments down to the receiver's named type.
fn base_type_name(ty: Node, src: &str) -> Option<String> {
    match ty.kind() {
        "pointer_type" | "parenthesized_type" => {
            let mut cursor = ty.walk();
            let inner = ty.named_children(&mut cursor).next()?;
            base_type_name(inner, src)
        }
        "generic_type" => base_type_name(ty.child_by_field_name("type")?, src),
        "type_identifier" => Some(node_text(ty, src).to_string()),
        _ => None,
    }
}

fn collect_imports(decl: Node, src: &str, out: &mut Vec<Import>) {
    let mut cursor = decl.walk();
    let mut specs = Vec::new();
    for child in decl.named_children(&mut cursor) {
        match child.kind() {
            "import_spec" => specs.push(child),
            "import_spec_list" => {
                let mut inner = child.walk();
                specs.extend(
                    child
                        .named_children(&mut inner)
                        .filter(|c| c.kind() == "import_spec"),
                );
            }
            _ => {}
        }
    }
    for spec in specs {
        let Some(path_node) = spec.child_by_field_name("path") else {
            continue;
        };
        let path = node_text(path_node, src)
            .trim_matches(|c| c == '"' || c == '`')
            .to_string();
        let name = match spec.child_by_field_name("name") {
            // Dot and blank imports contribute no referable name.
            Some(n) if matches!(node_text(n, src), "." | "_") => continue,
            Some(n) => node_text(n, src).to_string(),
            None => last_segment(&path).to_string(),
        };
        out.push(Import { name, path });
    }
}

pub(crate) fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Advance `i` just past the next newline, the way all splitter text
/// operations are newline-terminated.
pub(crate) fn with_newline(src: &str, mut i: usize) -> usize {
    let bytes = src.as_bytes();
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            return i + 1;
        }
        i += 1;
    }
    i
}

pub(crate) fn span_of(node: Node) -> Span {
    Span::new(node.start_byte(), node.end_byte())
}

pub(crate) fn node_text<'s>(node: Node, src: &'s str) -> &'s str {
    &src[node.start_byte()..node.end_byte()]
}

fn find_child<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|c| c.kind() == kind);
    match found {
        Some(n) => Some(n),
        None => {
            // package_identifier sits one level down in the clause
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if let Some(n) = find_child(child, kind) {
                    return Some(n);
                }
            }
            None
        }
    }
}

//! The syntax provider: parsed, name-resolved Go packages.
//!
//! Everything downstream (node graph, partition, rewriter) consumes the
//! types in this module and never touches a tree-sitter node. The provider
//! parses each `.go` file of one package directory, segments it into
//! declaration-units, builds the entity arena, and attaches definition and
//! use maps with byte spans so the rewriter can edit identifiers in place.
//!
//! Resolution is lexical: a scope stack handles locals, and selector
//! references (`x.f`) fall back to unique-name matching against the
//! package's fields and methods. That is deliberately the same trick the
//! call-graph resolvers in this family of tools use when no type checker
//! is available; ambiguous names are skipped rather than guessed.

mod parse;
mod resolve;

pub(crate) use parse::{last_segment, with_newline};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ignore::WalkBuilder;

use crate::config::Config;
use crate::types::{EntityId, Span};

/// What a definition names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Const,
    Var,
    Type,
    Func,
    /// Concrete method; `recv` is the receiver type as written, e.g. `*T`.
    Method { recv: String },
    /// Struct field, wherever the struct type literal appears.
    Field,
    /// Method named inside an interface type.
    IfaceMethod,
}

/// A named definition produced by the provider.
#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
}

impl Entity {
    /// Go exportedness: the name starts with an upper-case code point.
    pub fn exported(&self) -> bool {
        self.name.chars().next().is_some_and(|c| c.is_uppercase())
    }

    /// Package-level entities live in the package scope and can be
    /// renamed/qualified; fields and methods cannot.
    pub fn is_package_level(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::Const | EntityKind::Var | EntityKind::Type | EntityKind::Func
        )
    }

    /// Fields and methods: reachable only through a selector.
    pub fn is_selectable(&self) -> bool {
        !self.is_package_level()
    }
}

/// One import of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Local name: the alias if present, else the last path segment.
    pub name: String,
    /// Import path without quotes.
    pub path: String,
}

/// Syntactic kind of a declaration-unit, used for synthetic node names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Func,
    Var,
    Const,
    Type,
}

impl DeclKind {
    pub fn label(self) -> &'static str {
        match self {
            DeclKind::Func => "func",
            DeclKind::Var => "var",
            DeclKind::Const => "const",
            DeclKind::Type => "type",
        }
    }
}

/// Membership of a declaration-unit in a grouped `var (...)`/`type (...)`
/// declaration. The splitter uses the paren offsets to replay the group
/// opening per cluster and to consume the closing paren.
#[derive(Debug, Clone, Copy)]
pub struct GroupRef {
    /// Per-file group ordinal; two specs share a group iff ids match.
    pub id: usize,
    pub first: bool,
    pub last: bool,
    /// Byte offset of the `(` token.
    pub lparen: usize,
    /// Byte offset of the `)` token.
    pub rparen: usize,
}

/// A defining identifier occurrence.
#[derive(Debug, Clone, Copy)]
pub struct DefSite {
    pub entity: EntityId,
    pub span: Span,
}

/// What a use-identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseTarget {
    /// An entity of the analyzed package.
    Entity(EntityId),
    /// An imported package name; the index points into the file's imports.
    Import(usize),
}

/// A referring identifier occurrence.
#[derive(Debug, Clone, Copy)]
pub struct UseSite {
    pub span: Span,
    pub target: UseTarget,
}

/// Receiver of a concrete method declaration.
#[derive(Debug, Clone)]
pub struct Receiver {
    /// Receiver type as written, minus the parameter name, e.g. `*T`.
    pub display: String,
    /// The underlying named type, e.g. `T`.
    pub base: String,
}

/// One declaration-unit: a function or method declaration, a whole const
/// declaration, or a single spec of a grouped var/type declaration.
#[derive(Debug, Clone)]
pub struct DeclUnit {
    pub kind: DeclKind,
    pub span: Span,
    /// 1-based source line of the unit's start.
    pub line: usize,
    pub group: Option<GroupRef>,
    /// Package-level and concrete-method definitions, in source order,
    /// blanks omitted.
    pub defs: Vec<DefSite>,
    /// Fields and interface methods defined inside this unit. They never
    /// become node objects but the entity→node map must know their owner.
    pub extra_defs: Vec<DefSite>,
    pub uses: Vec<UseSite>,
    pub recv: Option<Receiver>,
}

impl DeclUnit {
    /// Span to highlight in godoc links: the first defining identifier,
    /// or the declaration keyword for anonymous units.
    pub fn selection(&self) -> Span {
        match self.defs.first() {
            Some(def) => def.span,
            None => Span::new(self.span.start, self.span.start + self.kind.label().len()),
        }
    }
}

/// One parsed source file of the package.
#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Basename, e.g. `alg.go`.
    pub base: String,
    pub text: String,
    pub package_name: String,
    /// Byte offset of the `package` keyword; everything before it is the
    /// pre-package comment block copied into each output file.
    pub head_end: usize,
    /// Offset just past the package clause and any import declarations,
    /// extended to the following newline. The splitter starts here.
    pub header_end: usize,
    pub imports: Vec<Import>,
    pub decls: Vec<DeclUnit>,
}

/// A parsed, name-resolved package.
#[derive(Debug)]
pub struct Package {
    pub name: String,
    pub root: PathBuf,
    pub files: Vec<SourceFile>,
    pub entities: Vec<Entity>,
    /// Package scope: name → entity, consts/vars/types/funcs only.
    pub scope: HashMap<String, EntityId>,
}

impl Package {
    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id]
    }

    /// Load and resolve the package in `dir`.
    pub fn load(dir: &Path, config: &Config) -> Result<Package> {
        let paths = discover(dir, config)?;
        if paths.is_empty() {
            bail!("no Go source files in {}", dir.display());
        }
        let mut inputs = Vec::with_capacity(paths.len());
        for path in paths {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            inputs.push((path, text));
        }
        build(dir.to_path_buf(), inputs)
    }

    /// Build a package from in-memory sources; the backbone of the test
    /// suite. `files` is a list of (basename, source) pairs.
    pub fn load_sources(files: &[(&str, &str)]) -> Result<Package> {
        let inputs = files
            .iter()
            .map(|&(base, text)| (PathBuf::from(base), text.to_string()))
            .collect();
        build(PathBuf::from("."), inputs)
    }
}

/// Entity arena plus the name indexes resolution needs.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    pub entities: Vec<Entity>,
    /// Package scope: name → entity, for consts/vars/types/funcs.
    pub package_scope: HashMap<String, EntityId>,
    /// Selector candidates: name → all field/method entities so named.
    pub selectables: HashMap<String, Vec<EntityId>>,
    /// Struct-field names, for the composite-literal key policy.
    pub field_names: std::collections::HashSet<String>,
}

impl Arena {
    pub(crate) fn add(&mut self, name: &str, kind: EntityKind) -> EntityId {
        let id = self.entities.len();
        match kind {
            EntityKind::Const | EntityKind::Var | EntityKind::Type | EntityKind::Func => {
                self.package_scope.insert(name.to_string(), id);
            }
            EntityKind::Method { .. } | EntityKind::IfaceMethod => {
                self.selectables.entry(name.to_string()).or_default().push(id);
            }
            EntityKind::Field => {
                self.selectables.entry(name.to_string()).or_default().push(id);
                self.field_names.insert(name.to_string());
            }
        }
        self.entities.push(Entity {
            name: name.to_string(),
            kind,
        });
        id
    }
}

fn build(root: PathBuf, inputs: Vec<(PathBuf, String)>) -> Result<Package> {
    let mut parser = parse::new_parser()?;
    let mut arena = Arena::default();
    let mut files = Vec::with_capacity(inputs.len());
    let mut trees = Vec::with_capacity(inputs.len());

    // Pass 1: parse every file and collect definitions, building the
    // entity arena as we go. Trees are kept alive for the second pass.
    for (path, text) in inputs {
        let tree = parser
            .parse(&text, None)
            .with_context(|| format!("parsing {}", path.display()))?;
        if tree.root_node().has_error() {
            bail!("syntax errors in {}", path.display());
        }
        let file = parse::scan_file(&tree, text, path, &mut arena)?;
        files.push(file);
        trees.push(tree);
    }

    let name = files[0].package_name.clone();
    for file in &files[1..] {
        if file.package_name != name {
            bail!(
                "package name mismatch: {} declares {:?}, {} declares {:?}",
                files[0].base,
                name,
                file.base,
                file.package_name
            );
        }
    }

    // Pass 2: resolve uses now that the whole package scope is known.
    for (file, tree) in files.iter_mut().zip(&trees) {
        resolve::resolve_file(tree.root_node(), file, &arena);
    }

    Ok(Package {
        name,
        root,
        files,
        entities: arena.entities,
        scope: arena.package_scope,
    })
}

/// Find the package's `.go` files: depth-1 walk of the directory, skipping
/// test files and config-excluded basenames. The `ignore` walker keeps
/// editor droppings and gitignored generated files out of the analysis.
fn discover(dir: &Path, config: &Config) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }
    let mut paths = Vec::new();
    for entry in WalkBuilder::new(dir)
        .max_depth(Some(1))
        .require_git(false)
        .follow_links(false)
        .build()
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(base) = path.file_name().and_then(|b| b.to_str()) else {
            continue;
        };
        if !base.ends_with(".go") || base.ends_with("_test.go") || config.excludes(base) {
            continue;
        }
        paths.push(path.to_path_buf());
    }
    paths.sort();
    Ok(paths)
}

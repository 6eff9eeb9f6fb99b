//! Lexical use resolution.
//!
//! Walks each declaration-unit with a scope stack and classifies every
//! identifier occurrence: local (skipped), imported package name,
//! package-level entity, or unresolved (skipped). Selector fields resolve
//! by unique name match against the package's fields and methods.
//!
//! Scoping is block-sequential: a local is visible from its declaration
//! onward, so `x := x` resolves the right-hand side to the outer `x`.

use std::collections::HashMap;

use tree_sitter::Node;

use super::parse::{for_each_decl_unit, node_text, span_of, Unit};
use super::{Arena, SourceFile, UseSite, UseTarget};

pub(crate) fn resolve_file(root: Node, file: &mut SourceFile, arena: &Arena) {
    let imports: HashMap<String, usize> = file
        .imports
        .iter()
        .enumerate()
        .map(|(i, imp)| (imp.name.clone(), i))
        .collect();

    let mut all_uses: Vec<Vec<UseSite>> = Vec::with_capacity(file.decls.len());
    for_each_decl_unit(root, |unit| {
        let mut resolver = Resolver {
            src: &file.text,
            arena,
            imports: &imports,
            scopes: Vec::new(),
            uses: Vec::new(),
        };
        resolver.resolve_unit(&unit);
        all_uses.push(resolver.uses);
    });

    debug_assert_eq!(all_uses.len(), file.decls.len());
    for (decl, uses) in file.decls.iter_mut().zip(all_uses) {
        decl.uses = uses;
    }
}

struct Resolver<'a> {
    src: &'a str,
    arena: &'a Arena,
    imports: &'a HashMap<String, usize>,
    scopes: Vec<Vec<String>>,
    uses: Vec<UseSite>,
}

impl<'a> Resolver<'a> {
    fn resolve_unit(&mut self, unit: &Unit) {
        let syntax = unit.syntax;
        match syntax.kind() {
            "function_declaration" | "method_declaration" => {
                self.push();
                if let Some(tp) = syntax.child_by_field_name("type_parameters") {
                    self.declare_names_of(tp);
                    self.walk(tp);
                }
                if let Some(recv) = syntax.child_by_field_name("receiver") {
                    self.declare_names_of(recv);
                    self.walk(recv); // receiver type is a use of the named type
                }
                if let Some(params) = syntax.child_by_field_name("parameters") {
                    self.declare_names_of(params);
                    self.walk(params);
                }
                if let Some(result) = syntax.child_by_field_name("result") {
                    if result.kind() == "parameter_list" {
                        self.declare_names_of(result);
                    }
                    self.walk(result);
                }
                if let Some(body) = syntax.child_by_field_name("body") {
                    self.walk(body);
                }
                self.pop();
            }
            "const_declaration" | "var_declaration" => {
                let mut cursor = syntax.walk();
                for spec in syntax.named_children(&mut cursor) {
                    if matches!(spec.kind(), "const_spec" | "var_spec") {
                        self.walk_spec_rhs(spec);
                    }
                }
            }
            "var_spec" => self.walk_spec_rhs(syntax),
            "type_declaration" => {
                let mut cursor = syntax.walk();
                for spec in syntax.named_children(&mut cursor) {
                    if matches!(spec.kind(), "type_spec" | "type_alias") {
                        self.resolve_type_spec(spec);
                    }
                }
            }
            "type_spec" | "type_alias" => self.resolve_type_spec(syntax),
            _ => {}
        }
    }

    /// Type and value of a const/var spec; the names are definitions.
    fn walk_spec_rhs(&mut self, spec: Node) {
        if let Some(ty) = spec.child_by_field_name("type") {
            self.walk(ty);
        }
        if let Some(value) = spec.child_by_field_name("value") {
            self.walk(value);
        }
    }

    fn resolve_type_spec(&mut self, spec: Node) {
        self.push();
        if let Some(tp) = spec.child_by_field_name("type_parameters") {
            self.declare_names_of(tp);
            self.walk(tp);
        }
        if let Some(ty) = spec.child_by_field_name("type") {
            self.walk(ty);
        }
        self.pop();
    }

    fn walk(&mut self, node: Node) {
        match node.kind() {
            "identifier" | "type_identifier" => self.resolve_plain(node),

            // Resolved only through the constructs that own them.
            "field_identifier" | "package_identifier" | "blank_identifier" | "label_name" => {}

            "comment" | "interpreted_string_literal" | "raw_string_literal" | "rune_literal"
            | "int_literal" | "float_literal" | "imaginary_literal" | "import_declaration" => {}

            "selector_expression" => self.walk_selector(node),

            "qualified_type" => {
                if let Some(pkg) = node.child_by_field_name("package") {
                    self.resolve_pkg_ident(pkg);
                }
            }

            "keyed_element" => self.walk_keyed_element(node),

            "block" => {
                self.push();
                self.walk_children(node);
                self.pop();
            }

            "func_literal" => {
                self.push();
                if let Some(params) = node.child_by_field_name("parameters") {
                    self.declare_names_of(params);
                    self.walk(params);
                }
                if let Some(result) = node.child_by_field_name("result") {
                    if result.kind() == "parameter_list" {
                        self.declare_names_of(result);
                    }
                    self.walk(result);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk(body);
                }
                self.pop();
            }

            "short_var_declaration" | "range_clause" | "receive_statement" => {
                self.walk_assignish(node)
            }

            // Local declarations: right-hand sides first, then the names
            // come into scope.
            "var_declaration" | "const_declaration" => {
                let mut cursor = node.walk();
                let specs: Vec<Node> = node
                    .named_children(&mut cursor)
                    .filter(|c| matches!(c.kind(), "var_spec" | "const_spec"))
                    .collect();
                for spec in specs {
                    self.walk_spec_rhs(spec);
                    self.declare_names_of(spec);
                }
            }
            "type_declaration" => {
                let mut cursor = node.walk();
                let specs: Vec<Node> = node
                    .named_children(&mut cursor)
                    .filter(|c| matches!(c.kind(), "type_spec" | "type_alias"))
                    .collect();
                for spec in specs {
                    // recursive local types may reference themselves
                    self.declare_names_of(spec);
                    self.resolve_type_spec(spec);
                }
            }

            "for_statement" | "if_statement" => {
                self.push();
                self.walk_children(node);
                self.pop();
            }

            "expression_switch_statement" | "type_switch_statement" | "select_statement" => {
                self.walk_switch(node)
            }

            "expression_case" | "type_case" | "default_case" | "communication_case" => {
                self.push();
                self.walk_children(node);
                self.pop();
            }

            // Parameter and field names are declarations, not uses; only
            // their types are walked. This also covers names inside
            // function *types*, which bind nothing.
            "parameter_declaration" | "variadic_parameter_declaration"
            | "type_parameter_declaration" | "field_declaration" => {
                if let Some(ty) = node.child_by_field_name("type") {
                    self.walk(ty);
                }
            }

            _ => self.walk_children(node),
        }
    }

    fn walk_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child);
        }
    }

    /// `x := e`, `for i, v := range e`, `case v := <-ch`: walk everything
    /// but a declared left-hand side, then bring its names into scope.
    fn walk_assignish(&mut self, node: Node) {
        let mut cursor = node.walk();
        let kids: Vec<Node> = node.children(&mut cursor).collect();

        let mut lhs: Option<usize> = None;
        let mut last_list: Option<usize> = None;
        for (i, child) in kids.iter().enumerate() {
            match child.kind() {
                ":=" => lhs = last_list,
                "expression_list" => last_list = Some(i),
                _ => {}
            }
        }

        for (i, child) in kids.iter().enumerate() {
            if Some(i) == lhs {
                continue;
            }
            if child.is_named() {
                self.walk(*child);
            }
        }
        if let Some(i) = lhs {
            self.declare_expression_list(kids[i]);
        }
    }

    /// Switch statements own a scope; a type-switch alias (`x := y.(type)`)
    /// is declared after the guard value is walked and before the cases.
    fn walk_switch(&mut self, node: Node) {
        self.push();
        let mut cursor = node.walk();
        let kids: Vec<Node> = node.children(&mut cursor).collect();

        let mut alias: Option<Node> = None;
        for (i, child) in kids.iter().enumerate() {
            if matches!(child.kind(), "expression_list" | "identifier")
                && kids.get(i + 1).map(|n| n.kind()) == Some(":=")
            {
                alias = Some(*child);
                continue;
            }
            if matches!(
                child.kind(),
                "expression_case" | "type_case" | "default_case" | "communication_case"
            ) {
                if let Some(a) = alias.take() {
                    self.declare_alias(a);
                }
                self.walk(*child);
                continue;
            }
            if child.is_named() {
                self.walk(*child);
            }
        }
        if let Some(a) = alias {
            self.declare_alias(a);
        }
        self.pop();
    }

    fn walk_selector(&mut self, node: Node) {
        let operand = node.child_by_field_name("operand");
        let field = node.child_by_field_name("field");

        let mut foreign = false;
        if let Some(op) = operand {
            if op.kind() == "identifier" {
                let name = node_text(op, self.src);
                if !self.is_local(name) {
                    if let Some(&idx) = self.imports.get(name) {
                        self.uses.push(UseSite {
                            span: span_of(op),
                            target: UseTarget::Import(idx),
                        });
                        foreign = true;
                    } else if let Some(&e) = self.arena.package_scope.get(name) {
                        self.uses.push(UseSite {
                            span: span_of(op),
                            target: UseTarget::Entity(e),
                        });
                    }
                }
            } else {
                self.walk(op);
            }
        }

        // Fields and methods of foreign packages are not ours to track.
        if foreign {
            return;
        }
        if let Some(fld) = field {
            let name = node_text(fld, self.src);
            if let Some(candidates) = self.arena.selectables.get(name) {
                if candidates.len() == 1 {
                    self.uses.push(UseSite {
                        span: span_of(fld),
                        target: UseTarget::Entity(candidates[0]),
                    });
                }
            }
        }
    }

    /// Composite-literal keys are ambiguous without types: `T{x: 1}` may
    /// mean a field name or a constant index. A bare-identifier key is
    /// treated as a use only when it names a package-level entity and
    /// cannot be a known field; everything else is skipped, because a
    /// corrupted struct literal is worse than a missed edge.
    fn walk_keyed_element(&mut self, node: Node) {
        let mut cursor = node.walk();
        let kids: Vec<Node> = node.named_children(&mut cursor).collect();
        if kids.is_empty() {
            return;
        }
        let (key, values) = kids.split_first().unwrap();
        if values.is_empty() {
            self.walk(*key);
            return;
        }

        let unwrapped = unwrap_element(*key);
        if matches!(unwrapped.kind(), "identifier") {
            let name = node_text(unwrapped, self.src);
            if !self.is_local(name) && !self.arena.field_names.contains(name) {
                if let Some(&e) = self.arena.package_scope.get(name) {
                    self.uses.push(UseSite {
                        span: span_of(unwrapped),
                        target: UseTarget::Entity(e),
                    });
                }
            }
        } else {
            self.walk(*key);
        }
        for value in values {
            self.walk(*value);
        }
    }

    fn resolve_plain(&mut self, node: Node) {
        let name = node_text(node, self.src);
        if name == "_" || self.is_local(name) {
            return;
        }
        if let Some(&idx) = self.imports.get(name) {
            self.uses.push(UseSite {
                span: span_of(node),
                target: UseTarget::Import(idx),
            });
            return;
        }
        if let Some(&e) = self.arena.package_scope.get(name) {
            self.uses.push(UseSite {
                span: span_of(node),
                target: UseTarget::Entity(e),
            });
        }
        // else: universe scope or truly unresolved; silent skip
    }

    fn resolve_pkg_ident(&mut self, node: Node) {
        let name = node_text(node, self.src);
        if self.is_local(name) {
            return;
        }
        if let Some(&idx) = self.imports.get(name) {
            self.uses.push(UseSite {
                span: span_of(node),
                target: UseTarget::Import(idx),
            });
        }
    }

    // -- scope stack -------------------------------------------------

    fn push(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str) {
        if name == "_" {
            return;
        }
        if let Some(top) = self.scopes.last_mut() {
            top.push(name.to_string());
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.iter().any(|n| n == name))
    }

    /// Declare every `name:`-field identifier of the node and of its
    /// direct children: covers specs (own name fields) as well as
    /// parameter, receiver and type-parameter lists (children's).
    fn declare_names_of(&mut self, node: Node) {
        let mut names: Vec<String> = Vec::new();
        {
            let mut cursor = node.walk();
            names.extend(
                node.children_by_field_name("name", &mut cursor)
                    .map(|n| node_text(n, self.src).to_string()),
            );
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            let mut inner = child.walk();
            names.extend(
                child
                    .children_by_field_name("name", &mut inner)
                    .map(|n| node_text(n, self.src).to_string()),
            );
        }
        for name in names {
            self.declare(&name);
        }
    }

    fn declare_expression_list(&mut self, list: Node) {
        let mut cursor = list.walk();
        let names: Vec<String> = list
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "identifier")
            .map(|n| node_text(n, self.src).to_string())
            .collect();
        for name in names {
            self.declare(&name);
        }
    }

    /// A type-switch alias: an expression list or a single identifier.
    fn declare_alias(&mut self, node: Node) {
        if node.kind() == "identifier" {
            let name = node_text(node, self.src).to_string();
            self.declare(&name);
        } else {
            self.declare_expression_list(node);
        }
    }
}

/// Peel `literal_element` wrappers off a composite-literal key.
fn unwrap_element(mut node: Node) -> Node {
    while node.kind() == "literal_element" && node.named_child_count() == 1 {
        node = node.named_child(0).unwrap();
    }
    node
}

#[cfg(test)]
mod tests {
    use crate::provider::{Package, UseTarget};

    fn uses_of<'p>(pkg: &'p Package, file: usize, decl: usize) -> Vec<&'p str> {
        pkg.files[file].decls[decl]
            .uses
            .iter()
            .filter_map(|u| match u.target {
                UseTarget::Entity(e) => Some(pkg.entity(e).name.as_str()),
                UseTarget::Import(_) => None,
            })
            .collect()
    }

    #[test]
    fn locals_shadow_package_scope() {
        let pkg = Package::load_sources(&[(
            "a.go",
            "package p\n\nvar x = 1\n\nfunc F() int {\n\tx := 2\n\treturn x\n}\n",
        )])
        .unwrap();
        // F's x is local; no use of the package-level x.
        assert!(uses_of(&pkg, 0, 1).is_empty());
    }

    #[test]
    fn sequential_scoping_sees_outer_before_decl() {
        let pkg = Package::load_sources(&[(
            "a.go",
            "package p\n\nvar x = 1\n\nfunc F() int {\n\tx := x + 1\n\treturn x\n}\n",
        )])
        .unwrap();
        // The right-hand side of `x := x + 1` refers to the package x.
        assert_eq!(uses_of(&pkg, 0, 1), ["x"]);
    }

    #[test]
    fn params_are_not_uses() {
        let pkg = Package::load_sources(&[(
            "a.go",
            "package p\n\nvar n = 0\n\nfunc F(n int) int { return n }\n",
        )])
        .unwrap();
        assert!(uses_of(&pkg, 0, 1).is_empty());
    }

    #[test]
    fn imports_resolve_and_mask_fields() {
        let pkg = Package::load_sources(&[(
            "a.go",
            "package p\n\nimport \"fmt\"\n\nfunc F() { fmt.Println(\"hi\") }\n",
        )])
        .unwrap();
        let f = &pkg.files[0].decls[0];
        assert_eq!(f.uses.len(), 1);
        assert!(matches!(f.uses[0].target, UseTarget::Import(0)));
    }

    #[test]
    fn method_call_resolves_by_unique_name() {
        let pkg = Package::load_sources(&[(
            "a.go",
            "package p\n\ntype T int\n\nfunc (T) m() {}\n\nfunc F(t T) { t.m() }\n",
        )])
        .unwrap();
        // the parameter type T is a use too; then the unique-name match
        assert_eq!(uses_of(&pkg, 0, 2), ["T", "m"]);
    }

    #[test]
    fn ambiguous_selector_skipped() {
        let pkg = Package::load_sources(&[(
            "a.go",
            concat!(
                "package p\n\ntype A int\n\ntype B int\n\n",
                "func (A) m() {}\n\nfunc (B) m() {}\n\n",
                "func F(a A) { a.m() }\n",
            ),
        )])
        .unwrap();
        // only the parameter type resolves; two methods named m tie
        assert_eq!(uses_of(&pkg, 0, 4), ["A"]);
    }

    #[test]
    fn receiver_type_is_a_use() {
        let pkg = Package::load_sources(&[(
            "a.go",
            "package p\n\ntype T int\n\nfunc (t *T) M() {}\n",
        )])
        .unwrap();
        assert_eq!(uses_of(&pkg, 0, 1), ["T"]);
    }

    #[test]
    fn struct_literal_keys_not_rewritten() {
        let pkg = Package::load_sources(&[(
            "a.go",
            concat!(
                "package p\n\ntype S struct{ n int }\n\nvar n = 1\n\n",
                "var s = S{n: 2}\n",
            ),
        )])
        .unwrap();
        // `n` is both a field and a package var; the key must be skipped.
        assert!(uses_of(&pkg, 0, 2).iter().all(|u| *u != "n"));
    }

    #[test]
    fn range_and_switch_locals() {
        let pkg = Package::load_sources(&[(
            "a.go",
            concat!(
                "package p\n\nvar v = 1\n\nfunc F(xs []int) int {\n",
                "\tfor _, v := range xs {\n\t\t_ = v\n\t}\n",
                "\treturn v\n}\n",
            ),
        )])
        .unwrap();
        // Only the final `return v` hits the package-level v.
        assert_eq!(uses_of(&pkg, 0, 1), ["v"]);
    }

    #[test]
    fn type_reference_in_var_decl() {
        let pkg = Package::load_sources(&[(
            "a.go",
            "package p\n\ntype T int\n\nvar x T\n",
        )])
        .unwrap();
        assert_eq!(uses_of(&pkg, 0, 1), ["T"]);
    }
}

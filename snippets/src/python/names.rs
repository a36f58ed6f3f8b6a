//! Static name resolution over a parsed module.
//!
//! Builds the scope tree Python uses at run time (module, function, lambda,
//! class, comprehension) and reports names that are read somewhere but bound
//! nowhere they could be found. Binding order is not checked: a name bound
//! later in the same scope counts as bound.

use std::collections::HashSet;

use tree_sitter::Node;

use super::syntax::SyntaxTree;

/// A name read without any reachable binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedName {
    pub name: String,
    /// 1-based line of the first read.
    pub line: usize,
    pub column: usize,
    /// Read inside a function or lambda body, so it only runs when called.
    pub deferred: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NameReport {
    /// Unresolved names, first occurrence only, in source order.
    pub unresolved: Vec<UnresolvedName>,
    /// Names bound at module level, in first-binding order.
    pub top_level_bindings: Vec<String>,
}

impl NameReport {
    pub fn is_unresolved(&self, name: &str) -> bool {
        self.unresolved.iter().any(|u| u.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Module,
    Function,
    Class,
    Comprehension,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    parent: Option<usize>,
    bindings: HashSet<String>,
    order: Vec<String>,
    star_import: bool,
    reads: Vec<UnresolvedName>,
}

impl Scope {
    fn new(kind: ScopeKind, parent: Option<usize>) -> Self {
        Scope {
            kind,
            parent,
            bindings: HashSet::new(),
            order: Vec::new(),
            star_import: false,
            reads: Vec::new(),
        }
    }
}

struct Resolver<'t> {
    tree: &'t SyntaxTree,
    scopes: Vec<Scope>,
}

/// Resolve every name read in `tree`.
pub fn analyze(tree: &SyntaxTree) -> NameReport {
    let mut resolver = Resolver {
        tree,
        scopes: vec![Scope::new(ScopeKind::Module, None)],
    };
    resolver.visit_children(tree.root(), 0);
    resolver.report()
}

impl<'t> Resolver<'t> {
    fn text(&self, node: Node<'t>) -> &'t str {
        self.tree.text(node)
    }

    fn push_scope(&mut self, kind: ScopeKind, parent: usize) -> usize {
        self.scopes.push(Scope::new(kind, Some(parent)));
        self.scopes.len() - 1
    }

    fn bind(&mut self, scope: usize, name: &str) {
        let s = &mut self.scopes[scope];
        if s.bindings.insert(name.to_string()) {
            s.order.push(name.to_string());
        }
    }

    fn read(&mut self, scope: usize, node: Node<'t>) {
        let pos = node.start_position();
        let name = self.text(node).to_string();
        let deferred = self.in_function(scope);
        self.scopes[scope].reads.push(UnresolvedName {
            name,
            line: pos.row + 1,
            column: pos.column + 1,
            deferred,
        });
    }

    fn in_function(&self, scope: usize) -> bool {
        let mut current = Some(scope);
        while let Some(idx) = current {
            if self.scopes[idx].kind == ScopeKind::Function {
                return true;
            }
            current = self.scopes[idx].parent;
        }
        false
    }

    /// Walrus targets bind in the nearest scope that is not a comprehension.
    fn binding_scope(&self, mut scope: usize) -> usize {
        while self.scopes[scope].kind == ScopeKind::Comprehension {
            match self.scopes[scope].parent {
                Some(p) => scope = p,
                None => break,
            }
        }
        scope
    }

    fn visit_children(&mut self, node: Node<'t>, scope: usize) {
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, scope);
        }
    }

    fn visit_field(&mut self, node: Node<'t>, field: &str, scope: usize) {
        if let Some(child) = node.child_by_field_name(field) {
            self.visit(child, scope);
        }
    }

    fn visit(&mut self, node: Node<'t>, scope: usize) {
        match node.kind() {
            "identifier" => self.read(scope, node),
            "comment" | "string_content" | "escape_sequence" => {}
            "attribute" => self.visit_field(node, "object", scope),
            "keyword_argument" => self.visit_field(node, "value", scope),
            "assignment" => {
                if let Some(left) = node.child_by_field_name("left") {
                    self.bind_target(left, scope);
                }
                self.visit_field(node, "type", scope);
                self.visit_field(node, "right", scope);
            }
            "augmented_assignment" => {
                self.visit_field(node, "left", scope);
                self.visit_field(node, "right", scope);
            }
            "named_expression" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let target = self.binding_scope(scope);
                    let text = self.text(name);
                    self.bind(target, text);
                }
                self.visit_field(node, "value", scope);
            }
            "for_statement" => {
                if let Some(left) = node.child_by_field_name("left") {
                    self.bind_target(left, scope);
                }
                self.visit_field(node, "right", scope);
                self.visit_field(node, "body", scope);
                self.visit_field(node, "alternative", scope);
            }
            "as_pattern" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
                let alias = node.child_by_field_name("alias");
                for child in children {
                    if Some(child) == alias {
                        self.bind_target(child, scope);
                    } else {
                        self.visit(child, scope);
                    }
                }
            }
            "except_clause" => self.visit_except(node, scope),
            "import_statement" => self.visit_import(node, scope),
            "import_from_statement" => self.visit_import_from(node, scope),
            "future_import_statement" => {}
            "global_statement" | "nonlocal_statement" => {
                let mut cursor = node.walk();
                let names: Vec<&str> = node
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "identifier")
                    .map(|c| self.text(c))
                    .collect();
                for name in names {
                    self.bind(scope, name);
                    if node.kind() == "global_statement" {
                        self.bind(0, name);
                    }
                }
            }
            "function_definition" => self.visit_function(node, scope),
            "lambda" => self.visit_lambda(node, scope),
            "class_definition" => self.visit_class(node, scope),
            "list_comprehension" | "set_comprehension" | "dictionary_comprehension"
            | "generator_expression" => self.visit_comprehension(node, scope),
            "case_clause" => self.visit_case(node, scope),
            _ => self.visit_children(node, scope),
        }
    }

    /// Bind every name an assignment target introduces. Attribute and
    /// subscript targets only read their object.
    fn bind_target(&mut self, node: Node<'t>, scope: usize) {
        match node.kind() {
            "identifier" => {
                let text = self.text(node);
                self.bind(scope, text);
            }
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
            | "parenthesized_expression" | "list_splat_pattern" | "list_splat"
            | "as_pattern_target" | "expression_list" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.bind_target(child, scope);
                }
            }
            _ => self.visit(node, scope),
        }
    }

    fn visit_except(&mut self, node: Node<'t>, scope: usize) {
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
        let mut after_as = false;
        for child in children {
            if child.kind() == "as" {
                after_as = true;
            } else if !child.is_named() {
                continue;
            } else if after_as {
                self.bind_target(child, scope);
                after_as = false;
            } else {
                self.visit(child, scope);
            }
        }
    }

    fn visit_import(&mut self, node: Node<'t>, scope: usize) {
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                // `import a.b.c` binds `a`.
                "dotted_name" => {
                    let text = self.text(child);
                    let head = text.split('.').next().unwrap_or(text).trim();
                    self.bind(scope, head);
                }
                "aliased_import" => self.bind_alias(child, scope),
                _ => {}
            }
        }
    }

    fn visit_import_from(&mut self, node: Node<'t>, scope: usize) {
        let module = node.child_by_field_name("module_name");
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        for child in children {
            if Some(child) == module {
                continue;
            }
            match child.kind() {
                "dotted_name" => {
                    let text = self.text(child).trim();
                    self.bind(scope, text);
                }
                "aliased_import" => self.bind_alias(child, scope),
                "wildcard_import" => self.scopes[scope].star_import = true,
                _ => {}
            }
        }
    }

    fn bind_alias(&mut self, node: Node<'t>, scope: usize) {
        if let Some(alias) = node.child_by_field_name("alias") {
            let text = self.text(alias);
            self.bind(scope, text);
        }
    }

    fn visit_function(&mut self, node: Node<'t>, scope: usize) {
        if let Some(name) = node.child_by_field_name("name") {
            let text = self.text(name);
            self.bind(scope, text);
        }
        self.visit_field(node, "return_type", scope);
        let inner = self.push_scope(ScopeKind::Function, scope);
        if let Some(params) = node.child_by_field_name("parameters") {
            self.visit_parameters(params, scope, inner);
        }
        self.visit_field(node, "body", inner);
    }

    fn visit_lambda(&mut self, node: Node<'t>, scope: usize) {
        let inner = self.push_scope(ScopeKind::Function, scope);
        if let Some(params) = node.child_by_field_name("parameters") {
            self.visit_parameters(params, scope, inner);
        }
        self.visit_field(node, "body", inner);
    }

    /// Defaults and annotations are evaluated in the enclosing scope; the
    /// parameter names bind in the function scope.
    fn visit_parameters(&mut self, params: Node<'t>, outer: usize, inner: usize) {
        let mut cursor = params.walk();
        let children: Vec<Node<'t>> = params.named_children(&mut cursor).collect();
        for param in children {
            match param.kind() {
                "identifier" => {
                    let text = self.text(param);
                    self.bind(inner, text);
                }
                "default_parameter" | "typed_default_parameter" => {
                    if let Some(name) = param.child_by_field_name("name") {
                        self.bind_parameter_name(name, inner);
                    }
                    self.visit_field(param, "type", outer);
                    self.visit_field(param, "value", outer);
                }
                "typed_parameter" => {
                    let mut c = param.walk();
                    let parts: Vec<Node<'t>> = param.named_children(&mut c).collect();
                    let ty = param.child_by_field_name("type");
                    for part in parts {
                        if Some(part) == ty {
                            self.visit(part, outer);
                        } else {
                            self.bind_parameter_name(part, inner);
                        }
                    }
                }
                "list_splat_pattern" | "dictionary_splat_pattern" | "tuple_pattern" => {
                    self.bind_parameter_name(param, inner);
                }
                _ => {}
            }
        }
    }

    fn bind_parameter_name(&mut self, node: Node<'t>, inner: usize) {
        if node.kind() == "identifier" {
            let text = self.text(node);
            self.bind(inner, text);
            return;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.bind_parameter_name(child, inner);
        }
    }

    fn visit_class(&mut self, node: Node<'t>, scope: usize) {
        if let Some(name) = node.child_by_field_name("name") {
            let text = self.text(name);
            self.bind(scope, text);
        }
        self.visit_field(node, "superclasses", scope);
        let inner = self.push_scope(ScopeKind::Class, scope);
        self.visit_field(node, "body", inner);
    }

    fn visit_comprehension(&mut self, node: Node<'t>, scope: usize) {
        let inner = self.push_scope(ScopeKind::Comprehension, scope);
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        for child in children {
            if child.kind() == "for_in_clause" {
                if let Some(left) = child.child_by_field_name("left") {
                    self.bind_target(left, inner);
                }
                self.visit_field(child, "right", inner);
            } else {
                self.visit(child, inner);
            }
        }
    }

    /// Capture patterns bind; every identifier inside a pattern is treated
    /// as a capture.
    fn visit_case(&mut self, node: Node<'t>, scope: usize) {
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        for child in children {
            if child.kind() == "case_pattern" {
                self.bind_parameter_name(child, scope);
            } else {
                self.visit(child, scope);
            }
        }
    }

    /// Whether `name` is visible from `scope`. Class scopes are only
    /// visible to their own body.
    fn resolves(&self, scope: usize, name: &str) -> bool {
        if self.scopes[scope].bindings.contains(name) {
            return true;
        }
        let mut current = self.scopes[scope].parent;
        while let Some(idx) = current {
            let s = &self.scopes[idx];
            if s.kind != ScopeKind::Class && s.bindings.contains(name) {
                return true;
            }
            current = s.parent;
        }
        BUILTINS.contains(&name)
    }

    fn suppressed(&self, scope: usize) -> bool {
        let mut current = Some(scope);
        while let Some(idx) = current {
            if self.scopes[idx].star_import {
                return true;
            }
            current = self.scopes[idx].parent;
        }
        false
    }

    fn report(self) -> NameReport {
        let mut unresolved: Vec<UnresolvedName> = Vec::new();
        for (idx, scope) in self.scopes.iter().enumerate() {
            if self.suppressed(idx) {
                continue;
            }
            for read in &scope.reads {
                if !self.resolves(idx, &read.name) {
                    unresolved.push(read.clone());
                }
            }
        }
        unresolved.sort_by_key(|u| (u.line, u.column));
        let mut seen = HashSet::new();
        unresolved.retain(|u| seen.insert(u.name.clone()));

        NameReport {
            unresolved,
            top_level_bindings: self.scopes[0].order.clone(),
        }
    }
}

/// Names available in every module without an import.
pub const BUILTINS: &[&str] = &[
    "__build_class__", "__debug__", "__doc__", "__file__", "__import__", "__loader__",
    "__name__", "__package__", "__spec__", "__builtins__", "__annotations__",
    "abs", "aiter", "all", "anext", "any", "ascii", "bin", "bool", "breakpoint", "bytearray",
    "bytes", "callable", "chr", "classmethod", "compile", "complex", "copyright", "credits",
    "delattr", "dict", "dir", "divmod", "enumerate", "eval", "exec", "exit", "filter", "float",
    "format", "frozenset", "getattr", "globals", "hasattr", "hash", "help", "hex", "id",
    "input", "int", "isinstance", "issubclass", "iter", "len", "license", "list", "locals",
    "map", "max", "memoryview", "min", "next", "object", "oct", "open", "ord", "pow", "print",
    "property", "quit", "range", "repr", "reversed", "round", "set", "setattr", "slice",
    "sorted", "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip",
    "Ellipsis", "NotImplemented", "None", "True", "False",
    "ArithmeticError", "AssertionError", "AttributeError", "BaseException",
    "BaseExceptionGroup", "BlockingIOError", "BrokenPipeError", "BufferError",
    "BytesWarning", "ChildProcessError", "ConnectionAbortedError", "ConnectionError",
    "ConnectionRefusedError", "ConnectionResetError", "DeprecationWarning", "EOFError",
    "EncodingWarning", "EnvironmentError", "Exception", "ExceptionGroup", "FileExistsError",
    "FileNotFoundError", "FloatingPointError", "FutureWarning", "GeneratorExit", "IOError",
    "ImportError", "ImportWarning", "IndentationError", "IndexError", "InterruptedError",
    "IsADirectoryError", "KeyError", "KeyboardInterrupt", "LookupError", "MemoryError",
    "ModuleNotFoundError", "NameError", "NotADirectoryError", "NotImplementedError",
    "OSError", "OverflowError", "PendingDeprecationWarning", "PermissionError",
    "ProcessLookupError", "RecursionError", "ReferenceError", "ResourceWarning",
    "RuntimeError", "RuntimeWarning", "StopAsyncIteration", "StopIteration", "SyntaxError",
    "SyntaxWarning", "SystemError", "SystemExit", "TabError", "TimeoutError", "TypeError",
    "UnboundLocalError", "UnicodeDecodeError", "UnicodeEncodeError", "UnicodeError",
    "UnicodeTranslateError", "UnicodeWarning", "UserWarning", "ValueError", "Warning",
    "ZeroDivisionError",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::python::syntax::parse;

    fn unresolved(src: &str) -> Vec<String> {
        let tree = parse(src).expect("parse failed");
        analyze(&tree).unresolved.into_iter().map(|u| u.name).collect()
    }

    #[test]
    fn reports_unbound_reads() {
        assert_eq!(unresolved("requests.get(url)\n"), vec!["requests", "url"]);
    }

    #[test]
    fn imports_and_assignments_bind() {
        let src = "import os.path\nfrom json import dumps as d\nx, (y, z) = 1, (2, 3)\nprint(os, d, x, y, z)\n";
        assert!(unresolved(src).is_empty());
    }

    #[test]
    fn attributes_and_keywords_are_not_reads() {
        assert_eq!(unresolved("obj.field(timeout=3)\n"), vec!["obj"]);
    }

    #[test]
    fn function_scopes() {
        let src = "def f(a, b=limit, *args, c: int = 2, **kw):\n    return a + b + c + inner + len(args) + len(kw)\n";
        assert_eq!(unresolved(src), vec!["limit", "inner"]);
    }

    #[test]
    fn class_scope_is_hidden_from_methods() {
        let src = "class A:\n    size = 1\n    def m(self):\n        return size\n";
        assert_eq!(unresolved(src), vec!["size"]);
    }

    #[test]
    fn comprehension_and_walrus() {
        let src = "vals = [y for x in range(3) if (y := x * 2)]\nprint(y)\n";
        assert!(unresolved(src).is_empty());
    }

    #[test]
    fn with_except_and_lambda() {
        let src = "with open('f') as fh:\n    pass\ntry:\n    pass\nexcept ValueError as err:\n    print(err, fh)\nf = lambda q: q + 1\n";
        assert!(unresolved(src).is_empty());
    }

    #[test]
    fn star_import_suppresses() {
        assert!(unresolved("from os.path import *\njoin('a', missing)\n").is_empty());
    }

    #[test]
    fn first_occurrence_only() {
        let tree = parse("x\n\nx\n").unwrap();
        let report = analyze(&tree);
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.unresolved[0].line, 1);
    }

    #[test]
    fn top_level_bindings_in_order() {
        let tree = parse("url = 'x'\nimport json\ndef go():\n    local = 1\nurl = 'y'\n").unwrap();
        let report = analyze(&tree);
        assert_eq!(report.top_level_bindings, vec!["url", "json", "go"]);
    }

    #[test]
    fn reads_in_function_bodies_are_deferred() {
        let tree = parse("def go():\n    return later\nprint(now)\nitems = [x for x in now]\n").unwrap();
        let report = analyze(&tree);
        let deferred: Vec<(&str, bool)> = report
            .unresolved
            .iter()
            .map(|u| (u.name.as_str(), u.deferred))
            .collect();
        assert_eq!(deferred, vec![("later", true), ("now", false)]);
    }

    #[test]
    fn global_statement_binds_module_name() {
        let src = "def setup():\n    global token\n    token = 'x'\nsetup()\nprint(token)\n";
        assert!(unresolved(src).is_empty());
    }
}

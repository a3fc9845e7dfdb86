use crate::error::{ChunkerError, Result};
use crate::language::Language;
use crate::strategy::ChunkProducer;
use crate::types::{ChunkProposal, ChunkSource};
use std::collections::HashMap;
use tree_sitter::{Node, Parser, Tree};

/// A called identifier and the 1-indexed line of the call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub line: usize,
    pub name: String,
}

/// Tree-sitter front end shared by the syntax-tree producer and call
/// extraction.
pub struct AstAnalyzer {
    parser: Parser,
    language: Language,
}

impl AstAnalyzer {
    /// Create new AST analyzer for a language
    pub fn new(language: Language) -> Result<Self> {
        if !language.supports_ast() {
            return Err(ChunkerError::unsupported_language(language.as_str()));
        }

        let ts_language = language.tree_sitter_language()?;
        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| ChunkerError::tree_sitter(format!("Failed to set language: {e}")))?;

        Ok(Self { parser, language })
    }

    /// Analyzer for the language implied by `path`'s extension
    pub fn for_path(path: &str) -> Result<Self> {
        Self::new(Language::from_path(path))
    }

    #[must_use]
    pub const fn language(&self) -> Language {
        self.language
    }

    fn parse(&mut self, content: &str) -> Result<Tree> {
        let tree = self
            .parser
            .parse(content, None)
            .ok_or_else(|| ChunkerError::parse("Failed to parse source code"))?;
        if tree.root_node().has_error() {
            return Err(ChunkerError::parse(format!(
                "{} source contains syntax errors",
                self.language.as_str()
            )));
        }
        Ok(tree)
    }

    /// Propose one chunk per definition, with dotted ids reflecting nesting
    /// (`file.py:Class.method`).
    pub fn propose(&mut self, content: &str, file_path: &str) -> Result<Vec<ChunkProposal>> {
        let tree = self.parse(content)?;
        let mut proposals = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        self.collect_definitions(
            content,
            file_path,
            tree.root_node(),
            "",
            &mut seen,
            &mut proposals,
        );
        Ok(proposals)
    }

    /// Every call site in `content`, in source order
    pub fn call_sites(&mut self, content: &str) -> Result<Vec<CallSite>> {
        let tree = self
            .parser
            .parse(content, None)
            .ok_or_else(|| ChunkerError::parse("Failed to parse source code"))?;
        let mut calls = Vec::new();
        self.traverse_for_calls(tree.root_node(), content, &mut calls);
        Ok(calls)
    }

    fn collect_definitions(
        &self,
        content: &str,
        file_path: &str,
        node: Node,
        prefix: &str,
        seen: &mut HashMap<String, usize>,
        proposals: &mut Vec<ChunkProposal>,
    ) {
        let mut cursor = node.walk();
        let children: Vec<_> = node.children(&mut cursor).collect();

        for child in children {
            let Some((name, body)) = self.definition(content, child) else {
                self.collect_definitions(content, file_path, child, prefix, seen, proposals);
                continue;
            };

            let mut local = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}.{name}")
            };
            let count = seen.entry(local.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                local = format!("{local}#{count}");
            }

            let (start_line, end_line) = line_bounds(child);
            proposals.push(ChunkProposal::new(
                format!("{file_path}:{local}"),
                start_line,
                end_line,
            ));

            self.collect_definitions(content, file_path, body, &local, seen, proposals);
        }
    }

    /// Name of a definition node plus the node whose children hold nested
    /// definitions. `None` for anything that does not open a chunk.
    fn definition<'t>(&self, content: &str, node: Node<'t>) -> Option<(String, Node<'t>)> {
        let kind = node.kind();
        match self.language {
            Language::Python => match kind {
                "function_definition" | "class_definition" => {
                    Some((field_text(content, node, "name")?, node))
                }
                "decorated_definition" => {
                    let inner = node.child_by_field_name("definition")?;
                    Some((field_text(content, inner, "name")?, inner))
                }
                _ => None,
            },
            Language::Rust => match kind {
                "function_item" | "function_signature_item" | "struct_item" | "enum_item"
                | "union_item" | "trait_item" | "mod_item" | "macro_definition" => {
                    Some((field_text(content, node, "name")?, node))
                }
                "impl_item" => Some((Self::extract_impl_target(content, node)?, node)),
                _ => None,
            },
            Language::JavaScript | Language::TypeScript | Language::Tsx => match kind {
                "function_declaration"
                | "generator_function_declaration"
                | "class_declaration"
                | "abstract_class_declaration"
                | "method_definition"
                | "interface_declaration"
                | "enum_declaration" => Some((field_text(content, node, "name")?, node)),
                "variable_declarator" => {
                    let value = node.child_by_field_name("value")?;
                    if matches!(
                        value.kind(),
                        "arrow_function" | "function_expression" | "function" | "class"
                    ) {
                        Some((field_text(content, node, "name")?, value))
                    } else {
                        None
                    }
                }
                _ => None,
            },
            Language::Unknown => None,
        }
    }

    /// Extract the target of an impl block (struct/trait name)
    fn extract_impl_target(content: &str, impl_node: Node) -> Option<String> {
        let target = impl_node.child_by_field_name("type")?;
        match target.kind() {
            // Simple type: impl MyStruct
            "type_identifier" | "primitive_type" => Some(node_text(content, target)),

            // Generic type: impl<T> MyStruct<T>, or qualified path: impl module::MyStruct
            "generic_type" | "scoped_type_identifier" => {
                let mut cursor = target.walk();
                let found = target
                    .children(&mut cursor)
                    .filter(|child| child.kind() == "type_identifier")
                    .last()
                    .map(|child| node_text(content, child));
                found.or_else(|| {
                    target
                        .child_by_field_name("type")
                        .map(|inner| node_text(content, inner))
                })
            }

            _ => None,
        }
    }

    fn traverse_for_calls(&self, node: Node, content: &str, calls: &mut Vec<CallSite>) {
        if self.language.call_kinds().contains(&node.kind()) {
            let callee = node
                .child_by_field_name("function")
                .or_else(|| node.child_by_field_name("macro"))
                .or_else(|| node.child_by_field_name("constructor"));
            if let Some(name) = callee.and_then(|callee| callee_name(callee, content)) {
                calls.push(CallSite {
                    line: node.start_position().row + 1,
                    name,
                });
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.traverse_for_calls(child, content, calls);
        }
    }
}

/// 1-indexed inclusive line bounds of a node.
fn line_bounds(node: Node) -> (usize, usize) {
    let start = node.start_position();
    let end = node.end_position();
    let mut end_row = end.row;
    // A node ending at column 0 stops before that line begins
    if end.column == 0 && end_row > start.row {
        end_row -= 1;
    }
    (start.row + 1, end_row + 1)
}

fn node_text(content: &str, node: Node) -> String {
    content[node.start_byte()..node.end_byte()].to_string()
}

fn field_text(content: &str, node: Node, field: &str) -> Option<String> {
    let name = node_text(content, node.child_by_field_name(field)?);
    (!name.is_empty()).then_some(name)
}

/// Last identifier segment of a callee expression (`self.a.b()` -> `b`).
fn callee_name(node: Node, content: &str) -> Option<String> {
    match node.kind() {
        "identifier" | "field_identifier" | "property_identifier" | "type_identifier" => {
            Some(node_text(content, node))
        }
        "attribute" => callee_name(node.child_by_field_name("attribute")?, content),
        "field_expression" => callee_name(node.child_by_field_name("field")?, content),
        "scoped_identifier" => callee_name(node.child_by_field_name("name")?, content),
        "member_expression" => callee_name(node.child_by_field_name("property")?, content),
        "generic_function" => callee_name(node.child_by_field_name("function")?, content),
        _ => None,
    }
}

/// Syntax-tree chunk producer
#[derive(Debug, Clone, Copy, Default)]
pub struct AstProducer;

impl ChunkProducer for AstProducer {
    fn source(&self) -> ChunkSource {
        ChunkSource::SyntaxTree
    }

    fn propose(&self, path: &str, text: &str) -> Result<Vec<ChunkProposal>> {
        AstAnalyzer::for_path(path)?.propose(text, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(proposals: &[ChunkProposal]) -> Vec<(&str, usize, usize)> {
        proposals
            .iter()
            .map(|p| (p.id.as_str(), p.start_line, p.end_line))
            .collect()
    }

    #[test]
    fn test_rust_nesting() {
        let code = r#"fn main() {
    println!("Hello");
}

struct Point {
    x: i32,
}

impl<T> Wrapper<T> {
    fn get(&self) -> i32 {
        0
    }
}
"#;
        let proposals = AstProducer.propose("test.rs", code).unwrap();
        assert_eq!(
            ids(&proposals),
            vec![
                ("test.rs:main", 1, 3),
                ("test.rs:Point", 5, 7),
                ("test.rs:Wrapper", 9, 13),
                ("test.rs:Wrapper.get", 10, 12),
            ]
        );
    }

    #[test]
    fn test_python_class_methods() {
        let code = "def hello():\n    print('Hello')\n\nclass MyClass:\n    def method(self):\n        pass\n";
        let proposals = AstProducer.propose("test.py", code).unwrap();
        assert_eq!(
            ids(&proposals),
            vec![
                ("test.py:hello", 1, 2),
                ("test.py:MyClass", 4, 6),
                ("test.py:MyClass.method", 5, 6),
            ]
        );
    }

    #[test]
    fn test_duplicate_names_get_suffix() {
        let code = "def f():\n    pass\n\ndef f():\n    pass\n";
        let proposals = AstProducer.propose("dup.py", code).unwrap();
        assert_eq!(proposals[0].id, "dup.py:f");
        assert_eq!(proposals[1].id, "dup.py:f#2");
    }

    #[test]
    fn test_typescript_class_and_arrow() {
        let code = "class Greeter {\n  greet() {\n    return 1;\n  }\n}\n\nconst add = (a: number, b: number) => {\n  return a + b;\n};\n";
        let proposals = AstProducer.propose("g.ts", code).unwrap();
        let names: Vec<&str> = proposals.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(names, vec!["g.ts:Greeter", "g.ts:Greeter.greet", "g.ts:add"]);
    }

    #[test]
    fn test_unsupported_language() {
        let err = AstProducer.propose("notes.txt", "hello").unwrap_err();
        assert!(err.is_recoverable_parse());
    }

    #[test]
    fn test_syntax_errors_are_parse_errors() {
        let err = AstProducer.propose("bad.py", "def broken(:\n").unwrap_err();
        assert!(matches!(err, ChunkerError::ParseError(_)));
    }

    #[test]
    fn test_call_sites() {
        let code = "def a():\n    b()\n    self.c(1)\n";
        let mut analyzer = AstAnalyzer::new(Language::Python).unwrap();
        let calls = analyzer.call_sites(code).unwrap();
        assert_eq!(
            calls,
            vec![
                CallSite { line: 2, name: "b".to_string() },
                CallSite { line: 3, name: "c".to_string() },
            ]
        );
    }
}

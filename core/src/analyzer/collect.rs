//! 从模块 AST 收集符号, 建出作用域树。

use crate::analyzer::scope::{
    ImportTarget, ScopeId, ScopeKind, ScopeTree, SymbolEntry, SymbolId, SymbolKind,
};
use crate::ast::{FunctionDef, ModuleNode, Stmt, StmtData, TopLevelItem};
use crate::diagnostics::{Diagnostic, DiagnosticKind};

/// 单遍扫描整个模块。重复定义不是硬错误, 发告警后让后定义的生效。
pub fn build(module: &ModuleNode) -> (ScopeTree, Vec<Diagnostic>) {
    let mut tree = ScopeTree::new(module.range);
    let mut diagnostics = Vec::new();
    let mut builder = Collector {
        tree: &mut tree,
        diagnostics: &mut diagnostics,
    };

    for item in &module.data.body {
        builder.top_level(item);
    }

    (tree, diagnostics)
}

struct Collector<'a> {
    tree: &'a mut ScopeTree,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl Collector<'_> {
    fn top_level(&mut self, item: &TopLevelItem) {
        match item {
            TopLevelItem::Function(func) => {
                self.define(
                    ScopeTree::ROOT,
                    SymbolEntry::new(&func.data.name, SymbolKind::Function, func.range)
                        .with_type(func.data.returns.clone())
                        .with_visibility(func.data.visibility),
                );
                self.function_scope(ScopeTree::ROOT, func);
            }
            TopLevelItem::Variable(decl) => {
                let kind = if decl.data.is_constant {
                    SymbolKind::Constant
                } else {
                    SymbolKind::Variable
                };
                self.define(
                    ScopeTree::ROOT,
                    SymbolEntry::new(&decl.data.name, kind, decl.data.name_range)
                        .with_type(decl.data.type_text.clone()),
                );
            }
            TopLevelItem::Struct(def) => {
                let id = self.define(
                    ScopeTree::ROOT,
                    SymbolEntry::new(&def.data.name, SymbolKind::Struct, def.range),
                );
                for field in &def.data.fields {
                    self.tree.add_child_symbol(
                        id,
                        SymbolEntry::new(&field.data.name, SymbolKind::Field, field.range)
                            .with_type(field.data.type_text.clone()),
                    );
                }
            }
            TopLevelItem::Event(def) => {
                let id = self.define(
                    ScopeTree::ROOT,
                    SymbolEntry::new(&def.data.name, SymbolKind::Event, def.range),
                );
                for field in &def.data.fields {
                    self.tree.add_child_symbol(
                        id,
                        SymbolEntry::new(&field.data.name, SymbolKind::Field, field.range)
                            .with_type(field.data.type_text.clone()),
                    );
                }
            }
            TopLevelItem::Flag(def) => {
                let id = self.define(
                    ScopeTree::ROOT,
                    SymbolEntry::new(&def.data.name, SymbolKind::Flag, def.range),
                );
                for member in &def.data.members {
                    self.tree.add_child_symbol(
                        id,
                        SymbolEntry::new(&member.data, SymbolKind::FlagMember, member.range),
                    );
                }
            }
            TopLevelItem::Interface(def) => {
                let id = self.define(
                    ScopeTree::ROOT,
                    SymbolEntry::new(&def.data.name, SymbolKind::Interface, def.range),
                );
                for func in &def.data.functions {
                    self.tree.add_child_symbol(
                        id,
                        SymbolEntry::new(&func.data.name, SymbolKind::Function, func.range)
                            .with_type(func.data.returns.clone())
                            .with_visibility(func.data.visibility),
                    );
                }
            }
            TopLevelItem::Import(import) => {
                let Some(bound) = import.data.bound_name() else {
                    log::warn!("import without a bound name at {}", import.range);
                    return;
                };
                self.define(
                    ScopeTree::ROOT,
                    SymbolEntry::new(bound, SymbolKind::ImportAlias, import.range).with_import(
                        ImportTarget {
                            segments: import.data.segments.clone(),
                            level: import.data.level,
                            resolved_hint: import.data.resolved_hint.clone(),
                        },
                    ),
                );
            }
            TopLevelItem::Statement(_) => {}
        }
    }

    /// 函数开一层作用域: 参数 + 函数体里所有局部声明 (含嵌套块里的)
    fn function_scope(&mut self, parent: ScopeId, func: &FunctionDef) {
        let scope = self
            .tree
            .push_scope(parent, ScopeKind::Function, func.range);

        for arg in &func.data.args {
            self.define(
                scope,
                SymbolEntry::new(&arg.data.name, SymbolKind::Variable, arg.range)
                    .with_type(arg.data.type_text.clone()),
            );
        }

        for stmt in &func.data.body {
            self.locals(scope, stmt);
        }
    }

    fn locals(&mut self, scope: ScopeId, stmt: &Stmt) {
        match &stmt.data {
            StmtData::LocalDecl {
                name,
                name_range,
                type_text,
                ..
            } => {
                self.define(
                    scope,
                    SymbolEntry::new(name, SymbolKind::Variable, *name_range)
                        .with_type(type_text.clone()),
                );
            }
            StmtData::For {
                target_name,
                target_range,
                target_type,
                body,
                ..
            } => {
                if !target_name.is_empty() {
                    self.define(
                        scope,
                        SymbolEntry::new(target_name, SymbolKind::Variable, *target_range)
                            .with_type(target_type.clone()),
                    );
                }
                for stmt in body {
                    self.locals(scope, stmt);
                }
            }
            StmtData::If { body, orelse, .. } => {
                for stmt in body {
                    self.locals(scope, stmt);
                }
                for stmt in orelse {
                    self.locals(scope, stmt);
                }
            }
            _ => {}
        }
    }

    fn define(&mut self, scope: ScopeId, entry: SymbolEntry) -> SymbolId {
        let name = entry.name.clone();
        let range = entry.range;
        let (id, previous) = self.tree.define(scope, entry);
        if let Some(previous) = previous {
            self.diagnostics.push(Diagnostic::warning(
                DiagnosticKind::DuplicateDefinition,
                range,
                format!("`{name}` is already defined at {previous}; this definition takes effect"),
            ));
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::scope::SymbolKind;
    use crate::ast::{
        ArgData, ExprData, FunctionDefData, ImportStmtData, ModuleData, Node, StructDefData,
        FieldDefData, VariableDeclData, Visibility,
    };
    use crate::utils::{Position, Range};

    fn module(body: Vec<TopLevelItem>) -> ModuleNode {
        Node::new(
            Range::at(1, 0, 20, 0),
            ModuleData {
                name: None,
                resolved_path: None,
                body,
            },
        )
    }

    fn state_var(name: &str, line: u32) -> TopLevelItem {
        TopLevelItem::Variable(Node::new(
            Range::at(line, 0, line, 10),
            VariableDeclData {
                name: name.into(),
                name_range: Range::at(line, 0, line, name.len() as u32),
                type_text: Some("uint256".into()),
                is_constant: false,
                is_immutable: false,
                is_public: false,
                value: None,
            },
        ))
    }

    #[test]
    fn module_symbols_and_function_locals() {
        let func = Node::new(
            Range::at(5, 0, 7, 12),
            FunctionDefData {
                name: "get".into(),
                args: vec![Node::new(
                    Range::at(5, 8, 5, 18),
                    ArgData {
                        name: "amount".into(),
                        type_text: Some("uint256".into()),
                    },
                )],
                returns: Some("uint256".into()),
                visibility: Visibility::External,
                body: vec![Node::new(
                    Range::at(6, 4, 6, 24),
                    StmtData::LocalDecl {
                        name: "y".into(),
                        name_range: Range::at(6, 4, 6, 5),
                        type_text: Some("uint256".into()),
                        value: Some(Node::new(
                            Range::at(6, 17, 6, 23),
                            ExprData::Identifier("amount".into()),
                        )),
                    },
                )],
            },
        );

        let (tree, diagnostics) =
            build(&module(vec![state_var("x", 2), TopLevelItem::Function(func)]));
        assert!(diagnostics.is_empty());

        let root_names: Vec<&str> = tree
            .scope_symbols(ScopeTree::ROOT)
            .map(|(_, s)| s.name.as_str())
            .collect();
        assert_eq!(root_names, vec!["x", "get"]);

        let inner = tree.scope_at(Position::new(6, 10));
        assert_ne!(inner, ScopeTree::ROOT);
        let amount = tree.resolve_from(inner, "amount").unwrap();
        assert_eq!(tree.symbol(amount).range, Range::at(5, 8, 5, 18));
        let y = tree.resolve_from(inner, "y").unwrap();
        assert_eq!(tree.symbol(y).range, Range::at(6, 4, 6, 5));
        // 模块层看得见状态变量
        assert!(tree.resolve_from(inner, "x").is_some());
    }

    #[test]
    fn duplicate_state_variable_warns() {
        let (tree, diagnostics) =
            build(&module(vec![state_var("x", 2), state_var("x", 3)]));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::DuplicateDefinition);
        // 后定义的生效
        let id = tree.resolve_from(ScopeTree::ROOT, "x").unwrap();
        assert_eq!(tree.symbol(id).range.start.line, 3);
    }

    #[test]
    fn struct_fields_become_members() {
        let def = TopLevelItem::Struct(Node::new(
            Range::at(2, 0, 4, 10),
            StructDefData {
                name: "Point".into(),
                fields: vec![Node::new(
                    Range::at(3, 4, 3, 14),
                    FieldDefData {
                        name: "x".into(),
                        type_text: Some("uint256".into()),
                    },
                )],
            },
        ));
        let (tree, _) = build(&module(vec![def]));
        let point = tree.resolve_from(ScopeTree::ROOT, "Point").unwrap();
        assert_eq!(tree.symbol(point).kind, SymbolKind::Struct);
        let field = tree.member(point, "x").unwrap();
        assert_eq!(tree.symbol(field).kind, SymbolKind::Field);
        // 字段不在作用域名字表里
        assert!(tree.resolve_from(ScopeTree::ROOT, "x").is_none());
    }

    #[test]
    fn import_binds_alias() {
        let import = TopLevelItem::Import(Node::new(
            Range::at(2, 0, 2, 20),
            ImportStmtData {
                segments: vec!["lib".into(), "token".into()],
                level: 0,
                alias: Some("tk".into()),
                resolved_hint: None,
            },
        ));
        let (tree, _) = build(&module(vec![import]));
        let id = tree.resolve_from(ScopeTree::ROOT, "tk").unwrap();
        let entry = tree.symbol(id);
        assert_eq!(entry.kind, SymbolKind::ImportAlias);
        assert_eq!(
            entry.import.as_ref().unwrap().segments,
            vec!["lib", "token"]
        );
        assert!(tree.resolve_from(ScopeTree::ROOT, "token").is_none());
    }
}

//! 原始 JSON AST → 内部 AST 的转换层。
//!
//! 原始树的形状随后端版本变化 (0.4 前后差异最大), 这里是唯一允许
//! 看到原始形状的地方。转换是尽力而为的: 不认识的节点降级成
//! Unknown 并记日志, 绝不因为局部的坏节点丢掉整棵树。

use crate::ast::{
    Arg, ArgData, EventDefData, Expr, ExprData, FieldDef, FieldDefData, FlagDefData, FunctionDef,
    FunctionDefData, ImportStmtData, ModuleData, ModuleNode, Node, StmtData, StructDefData,
    TopLevelItem, VariableDeclData, Visibility,
};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::environment::EnvironmentHandle;
use crate::utils::{Position, Range};
use regex::Regex;
use semver::Version;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub struct ParseOutput {
    pub module: ModuleNode,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseOutput {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            module: empty_module(),
            diagnostics: vec![Diagnostic::error(
                DiagnosticKind::Parse,
                Range::file_start(),
                message,
            )],
        }
    }
}

/// 没有可用 AST 时的占位模块 (版本解析失败、后端报错等场景)
pub fn empty_module() -> ModuleNode {
    Node::new(Range::file_start(), ModuleData::default())
}

pub struct AstAdapter {
    version: Version,
}

impl AstAdapter {
    pub fn new(version: Version) -> Self {
        Self { version }
    }

    /// 入口: 调用环境里的后端解析源码, 把结果规整成内部 AST。
    /// 后端报错时尽量从 stderr 里挖出位置信息, 变成带范围的 Parse 诊断。
    pub fn parse(&self, env: &EnvironmentHandle, source: &str, path: &Path) -> ParseOutput {
        match env.invoke_parse(source, path) {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(value) => self.convert_module(&value),
                Err(err) => ParseOutput::failure(format!("backend emitted malformed ast json: {err}")),
            },
            Err(stderr) => ParseOutput {
                module: empty_module(),
                diagnostics: vec![backend_error_diagnostic(&stderr)],
            },
        }
    }

    /// 纯转换 (测试也直接喂 JSON 走这里)
    pub fn convert_module(&self, raw: &Value) -> ParseOutput {
        let diagnostics = Vec::new();
        let mut body = Vec::new();
        for item in list(raw, "body") {
            self.convert_top(item, &mut body);
        }

        let mut range = range_of(raw);
        // 后端偶尔不给模块级的 end_lineno; 兜底撑到覆盖所有子节点
        for item in &body {
            let child = top_range(item);
            if !range.contains_range(&child) {
                range.end = range.end.max(child.end);
            }
        }

        let module = Node::new(
            range,
            ModuleData {
                name: str_field(raw, "name").map(String::from),
                resolved_path: str_field(raw, "resolved_path").map(PathBuf::from),
                body,
            },
        );
        ParseOutput {
            module,
            diagnostics,
        }
    }

    fn convert_top(&self, v: &Value, out: &mut Vec<TopLevelItem>) {
        let Some(kind) = node_type(v) else {
            log::debug!("top-level node without ast_type, skipped");
            return;
        };
        match kind {
            "FunctionDef" => out.push(TopLevelItem::Function(self.convert_function(v))),
            "VariableDecl" => out.push(TopLevelItem::Variable(self.convert_variable_decl(v))),
            "AnnAssign" => {
                // 0.4 之前模块级变量声明长这样; 新版后端不会在模块层发它
                if self.version < Version::new(0, 4, 0) {
                    if let Some(decl) = self.convert_legacy_decl(v) {
                        out.push(TopLevelItem::Variable(decl));
                        return;
                    }
                }
                out.push(TopLevelItem::Statement(Node::new(
                    range_of(v),
                    StmtData::Unknown,
                )));
            }
            "StructDef" => out.push(TopLevelItem::Struct(Node::new(
                range_of(v),
                StructDefData {
                    name: str_field(v, "name").unwrap_or_default().to_string(),
                    fields: self.convert_fields(v),
                },
            ))),
            "EventDef" => out.push(TopLevelItem::Event(Node::new(
                range_of(v),
                EventDefData {
                    name: str_field(v, "name").unwrap_or_default().to_string(),
                    fields: self.convert_fields(v),
                },
            ))),
            "FlagDef" | "EnumDef" => out.push(TopLevelItem::Flag(Node::new(
                range_of(v),
                FlagDefData {
                    name: str_field(v, "name").unwrap_or_default().to_string(),
                    members: self.convert_flag_members(v),
                },
            ))),
            "InterfaceDef" => {
                let functions = list(v, "body")
                    .iter()
                    .filter(|item| node_type(item) == Some("FunctionDef"))
                    .map(|item| self.convert_function(item))
                    .collect();
                out.push(TopLevelItem::Interface(Node::new(
                    range_of(v),
                    crate::ast::InterfaceDefData {
                        name: str_field(v, "name").unwrap_or_default().to_string(),
                        functions,
                    },
                )));
            }
            "Import" | "ImportFrom" => out.push(TopLevelItem::Import(self.convert_import(v))),
            "ImplementsDecl" | "UsesDecl" | "InitializesDecl" | "ExportsDecl" => {
                out.push(TopLevelItem::Statement(Node::new(
                    range_of(v),
                    StmtData::Unknown,
                )));
            }
            other => {
                log::debug!("unhandled top-level node type: {other}");
            }
        }
    }

    fn convert_function(&self, v: &Value) -> FunctionDef {
        let args = v
            .get("args")
            .map(|arguments| {
                list(arguments, "args")
                    .iter()
                    .map(|arg| self.convert_arg(arg))
                    .collect()
            })
            .unwrap_or_default();

        let mut visibility = Visibility::Unspecified;
        for decorator in list(v, "decorator_list") {
            match str_field(decorator, "id") {
                Some("external") => visibility = Visibility::External,
                Some("internal") => visibility = Visibility::Internal,
                Some("deploy") => visibility = Visibility::Deploy,
                _ => {}
            }
        }

        Node::new(
            range_of(v),
            FunctionDefData {
                name: str_field(v, "name").unwrap_or_default().to_string(),
                args,
                returns: v.get("returns").and_then(annotation_text),
                visibility,
                body: self.convert_body(v),
            },
        )
    }

    fn convert_arg(&self, v: &Value) -> Arg {
        Node::new(
            range_of(v),
            ArgData {
                name: str_field(v, "arg").unwrap_or_default().to_string(),
                type_text: v.get("annotation").and_then(annotation_text),
            },
        )
    }

    /// 0.4+ 的 VariableDecl: 常量性/可见性都是现成的布尔字段
    fn convert_variable_decl(&self, v: &Value) -> crate::ast::VariableDecl {
        let target = v.get("target");
        Node::new(
            range_of(v),
            VariableDeclData {
                name: target
                    .and_then(|t| str_field(t, "id"))
                    .unwrap_or_default()
                    .to_string(),
                name_range: target.map(range_of).unwrap_or_else(|| range_of(v)),
                type_text: v.get("annotation").and_then(annotation_text),
                is_constant: bool_field(v, "is_constant"),
                is_immutable: bool_field(v, "is_immutable"),
                is_public: bool_field(v, "is_public"),
                value: v.get("value").and_then(|value| self.convert_opt_expr(value)),
            },
        )
    }

    /// 旧版模块级 AnnAssign: 常量性裹在 constant(...)/immutable(...)/public(...) 里
    fn convert_legacy_decl(&self, v: &Value) -> Option<crate::ast::VariableDecl> {
        let target = v.get("target")?;
        let name = str_field(target, "id")?.to_string();
        let (is_constant, is_immutable, is_public, inner) =
            unwrap_annotation_wrappers(v.get("annotation")?);
        Some(Node::new(
            range_of(v),
            VariableDeclData {
                name,
                name_range: range_of(target),
                type_text: annotation_text(inner),
                is_constant,
                is_immutable,
                is_public,
                value: v.get("value").and_then(|value| self.convert_opt_expr(value)),
            },
        ))
    }

    fn convert_fields(&self, v: &Value) -> Vec<FieldDef> {
        list(v, "body")
            .iter()
            .filter_map(|item| {
                if node_type(item) != Some("AnnAssign") {
                    return None;
                }
                let target = item.get("target")?;
                Some(Node::new(
                    range_of(item),
                    FieldDefData {
                        name: str_field(target, "id")?.to_string(),
                        type_text: item.get("annotation").and_then(annotation_text),
                    },
                ))
            })
            .collect()
    }

    fn convert_flag_members(&self, v: &Value) -> Vec<Node<String>> {
        // flag 体是一串 Expr{value: Name}
        list(v, "body")
            .iter()
            .filter_map(|item| {
                let value = item.get("value")?;
                let name = str_field(value, "id")?;
                Some(Node::new(range_of(value), name.to_string()))
            })
            .collect()
    }

    fn convert_import(&self, v: &Value) -> crate::ast::ImportStmt {
        let mut segments: Vec<String> = Vec::new();
        if node_type(v) == Some("ImportFrom") {
            if let Some(module) = str_field(v, "module") {
                if !module.is_empty() {
                    segments.extend(module.split('.').map(String::from));
                }
            }
            if let Some(name) = str_field(v, "name") {
                segments.push(name.to_string());
            }
        } else if let Some(name) = str_field(v, "name") {
            segments.extend(name.split('.').map(String::from));
        }

        let resolved_hint = v
            .get("import_info")
            .and_then(|info| str_field(info, "resolved_path"))
            .map(PathBuf::from);

        Node::new(
            range_of(v),
            ImportStmtData {
                segments,
                level: v.get("level").and_then(Value::as_u64).unwrap_or(0) as usize,
                alias: str_field(v, "alias").map(String::from),
                resolved_hint,
            },
        )
    }

    fn convert_body(&self, v: &Value) -> Vec<crate::ast::Stmt> {
        list(v, "body")
            .iter()
            .map(|stmt| self.convert_stmt(stmt))
            .collect()
    }

    fn convert_stmt(&self, v: &Value) -> crate::ast::Stmt {
        let range = range_of(v);
        let Some(kind) = node_type(v) else {
            return Node::new(range, StmtData::Unknown);
        };
        let data = match kind {
            "Expr" => match v.get("value") {
                Some(value) => StmtData::Expr(self.convert_expr(value)),
                None => StmtData::Unknown,
            },
            "AnnAssign" => {
                let target = v.get("target");
                StmtData::LocalDecl {
                    name: target
                        .and_then(|t| str_field(t, "id"))
                        .unwrap_or_default()
                        .to_string(),
                    name_range: target.map(range_of).unwrap_or(range),
                    type_text: v.get("annotation").and_then(annotation_text),
                    value: v.get("value").and_then(|value| self.convert_opt_expr(value)),
                }
            }
            "Assign" => {
                // vyper 用单数 target, python 系的旧形状是 targets 列表
                let target = v
                    .get("target")
                    .or_else(|| list(v, "targets").first())
                    .map(|t| self.convert_expr(t));
                match (target, v.get("value")) {
                    (Some(target), Some(value)) => StmtData::Assign {
                        target,
                        value: self.convert_expr(value),
                    },
                    _ => StmtData::Unknown,
                }
            }
            "AugAssign" => match (v.get("target"), v.get("value")) {
                (Some(target), Some(value)) => StmtData::AugAssign {
                    target: self.convert_expr(target),
                    value: self.convert_expr(value),
                },
                _ => StmtData::Unknown,
            },
            "If" => StmtData::If {
                condition: v
                    .get("test")
                    .map(|t| self.convert_expr(t))
                    .unwrap_or_else(|| unknown_expr(range)),
                body: self.convert_body(v),
                orelse: list(v, "orelse")
                    .iter()
                    .map(|stmt| self.convert_stmt(stmt))
                    .collect(),
            },
            "For" => self.convert_for(v, range),
            "Return" => StmtData::Return(
                v.get("value")
                    .and_then(|value| self.convert_opt_expr(value)),
            ),
            "Assert" => StmtData::Assert {
                test: v
                    .get("test")
                    .map(|t| self.convert_expr(t))
                    .unwrap_or_else(|| unknown_expr(range)),
                msg: v.get("msg").and_then(|m| self.convert_opt_expr(m)),
            },
            "Log" => match v.get("value") {
                Some(value) => StmtData::Log(self.convert_expr(value)),
                None => StmtData::Unknown,
            },
            "Raise" => StmtData::Raise(v.get("exc").and_then(|e| self.convert_opt_expr(e))),
            "Pass" | "Break" | "Continue" => StmtData::Pass,
            other => {
                log::debug!("unhandled statement type: {other}");
                StmtData::Unknown
            }
        };
        Node::new(range, data)
    }

    fn convert_for(&self, v: &Value, range: Range) -> StmtData {
        // 0.4 的 for 目标是带类型标注的 AnnAssign, 旧版直接是 Name
        let (target_name, target_range, target_type) = match v.get("target") {
            Some(target) if node_type(target) == Some("AnnAssign") => {
                let inner = target.get("target");
                (
                    inner
                        .and_then(|t| str_field(t, "id"))
                        .unwrap_or_default()
                        .to_string(),
                    inner.map(range_of).unwrap_or_else(|| range_of(target)),
                    target.get("annotation").and_then(annotation_text),
                )
            }
            Some(target) => (
                str_field(target, "id").unwrap_or_default().to_string(),
                range_of(target),
                None,
            ),
            None => (String::new(), range, None),
        };
        StmtData::For {
            target_name,
            target_range,
            target_type,
            iter: v
                .get("iter")
                .map(|i| self.convert_expr(i))
                .unwrap_or_else(|| unknown_expr(range)),
            body: self.convert_body(v),
        }
    }

    /// JSON null 当 None 处理
    fn convert_opt_expr(&self, v: &Value) -> Option<Expr> {
        if v.is_null() {
            return None;
        }
        Some(self.convert_expr(v))
    }

    fn convert_expr(&self, v: &Value) -> Expr {
        let range = range_of(v);
        let Some(kind) = node_type(v) else {
            return unknown_expr(range);
        };
        let data = match kind {
            "Name" => ExprData::Identifier(str_field(v, "id").unwrap_or_default().to_string()),
            "Attribute" => match v.get("value") {
                Some(value) => ExprData::Attribute {
                    value: Box::new(self.convert_expr(value)),
                    attr: str_field(v, "attr").unwrap_or_default().to_string(),
                },
                None => ExprData::Unknown,
            },
            "Subscript" => {
                let index = v.get("slice").map(|slice| {
                    // 旧版套了一层 Index
                    if node_type(slice) == Some("Index") {
                        slice.get("value").unwrap_or(slice)
                    } else {
                        slice
                    }
                });
                match (v.get("value"), index) {
                    (Some(value), Some(index)) => ExprData::Subscript {
                        value: Box::new(self.convert_expr(value)),
                        index: Box::new(self.convert_expr(index)),
                    },
                    _ => ExprData::Unknown,
                }
            }
            "Call" => match v.get("func") {
                Some(func) => {
                    let mut args: Vec<Expr> = list(v, "args")
                        .iter()
                        .map(|arg| self.convert_expr(arg))
                        .collect();
                    // 关键字实参的值也要进引用扫描 (struct 构造就是一堆 keyword)
                    for keyword in list(v, "keywords") {
                        if let Some(value) = keyword.get("value") {
                            args.push(self.convert_expr(value));
                        }
                    }
                    ExprData::Call {
                        func: Box::new(self.convert_expr(func)),
                        args,
                    }
                }
                None => ExprData::Unknown,
            },
            // 0.4 把外部调用包了一层
            "StaticCall" | "ExtCall" => match v.get("value") {
                Some(value) => return self.convert_expr(value),
                None => ExprData::Unknown,
            },
            "BinOp" => match (v.get("left"), v.get("right")) {
                (Some(left), Some(right)) => ExprData::BinOp {
                    left: Box::new(self.convert_expr(left)),
                    right: Box::new(self.convert_expr(right)),
                },
                _ => ExprData::Unknown,
            },
            "BoolOp" => ExprData::BoolOp {
                values: list(v, "values")
                    .iter()
                    .map(|value| self.convert_expr(value))
                    .collect(),
            },
            "UnaryOp" => match v.get("operand") {
                Some(operand) => ExprData::UnaryOp {
                    operand: Box::new(self.convert_expr(operand)),
                },
                None => ExprData::Unknown,
            },
            "Compare" => {
                let rights: Vec<Expr> = if !list(v, "comparators").is_empty() {
                    list(v, "comparators")
                        .iter()
                        .map(|value| self.convert_expr(value))
                        .collect()
                } else {
                    v.get("right")
                        .map(|right| vec![self.convert_expr(right)])
                        .unwrap_or_default()
                };
                match v.get("left") {
                    Some(left) => ExprData::Compare {
                        left: Box::new(self.convert_expr(left)),
                        rights,
                    },
                    None => ExprData::Unknown,
                }
            }
            "Tuple" => ExprData::Tuple(self.convert_elements(v)),
            "List" => ExprData::List(self.convert_elements(v)),
            // dict 的值里可能引用常量, 键只是名字
            "Dict" => ExprData::List(
                list(v, "values")
                    .iter()
                    .map(|value| self.convert_expr(value))
                    .collect(),
            ),
            "Int" | "Decimal" | "Str" | "Bytes" | "Hex" | "NameConstant" | "Constant" => {
                ExprData::Literal
            }
            other => {
                log::debug!("unhandled expression type: {other}");
                ExprData::Unknown
            }
        };
        Node::new(range, data)
    }

    fn convert_elements(&self, v: &Value) -> Vec<Expr> {
        let elements = if !list(v, "elements").is_empty() {
            list(v, "elements")
        } else {
            list(v, "elts")
        };
        elements.iter().map(|e| self.convert_expr(e)).collect()
    }
}

// --- 原始 JSON 的读取辅助 ---

fn node_type(v: &Value) -> Option<&str> {
    v.get("ast_type")?.as_str()
}

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key)?.as_str()
}

fn bool_field(v: &Value, key: &str) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn list<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn u32_field(v: &Value, key: &str) -> Option<u32> {
    v.get(key)?.as_u64().map(|n| n as u32)
}

/// lineno 是 1 起始, col_offset 是 0 起始; end_* 缺失时退化成起点
fn range_of(v: &Value) -> Range {
    let line = u32_field(v, "lineno").unwrap_or(1).max(1);
    let col = u32_field(v, "col_offset").unwrap_or(0);
    let end_line = u32_field(v, "end_lineno").unwrap_or(line).max(line);
    let end_col = u32_field(v, "end_col_offset").unwrap_or(col);
    Range::new(Position::new(line, col), Position::new(end_line, end_col))
}

fn top_range(item: &TopLevelItem) -> Range {
    match item {
        TopLevelItem::Function(n) => n.range,
        TopLevelItem::Variable(n) => n.range,
        TopLevelItem::Struct(n) => n.range,
        TopLevelItem::Event(n) => n.range,
        TopLevelItem::Flag(n) => n.range,
        TopLevelItem::Interface(n) => n.range,
        TopLevelItem::Import(n) => n.range,
        TopLevelItem::Statement(n) => n.range,
    }
}

fn unknown_expr(range: Range) -> Expr {
    Node::new(range, ExprData::Unknown)
}

/// 把 constant(...)/immutable(...)/public(...) 一层层剥掉,
/// 返回 (is_constant, is_immutable, is_public, 真正的类型标注)
fn unwrap_annotation_wrappers(mut annotation: &Value) -> (bool, bool, bool, &Value) {
    let (mut is_constant, mut is_immutable, mut is_public) = (false, false, false);
    while node_type(annotation) == Some("Call") {
        let func_id = annotation.get("func").and_then(|f| str_field(f, "id"));
        match func_id {
            Some("constant") => is_constant = true,
            Some("immutable") => is_immutable = true,
            Some("public") => is_public = true,
            _ => break,
        }
        match list(annotation, "args").first() {
            Some(inner) => annotation = inner,
            None => break,
        }
    }
    (is_constant, is_immutable, is_public, annotation)
}

/// 类型标注渲染成文本 (只为展示, 尽力而为)
fn annotation_text(v: &Value) -> Option<String> {
    if v.is_null() {
        return None;
    }
    match node_type(v)? {
        "Name" => str_field(v, "id").map(String::from),
        "Attribute" => {
            let base = annotation_text(v.get("value")?)?;
            Some(format!("{base}.{}", str_field(v, "attr")?))
        }
        "Subscript" => {
            let base = annotation_text(v.get("value")?)?;
            let slice = v.get("slice")?;
            let index = if node_type(slice) == Some("Index") {
                slice.get("value").unwrap_or(slice)
            } else {
                slice
            };
            Some(format!(
                "{base}[{}]",
                annotation_text(index).unwrap_or_default()
            ))
        }
        "Call" => {
            let base = annotation_text(v.get("func")?)?;
            let args: Vec<String> = list(v, "args").iter().filter_map(annotation_text).collect();
            Some(format!("{base}({})", args.join(", ")))
        }
        "Tuple" => {
            let elements: Vec<String> = list(v, "elements")
                .iter()
                .chain(list(v, "elts").iter())
                .filter_map(annotation_text)
                .collect();
            Some(elements.join(", "))
        }
        "Int" => v.get("value").map(|n| n.to_string()),
        _ => None,
    }
}

// --- 后端报错文本的挖掘 ---

fn location_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"line\s+(\d+):(\d+)").unwrap())
}

fn exception_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"vyper\.exceptions\.(\w+)").unwrap())
}

/// 后端 stderr → 带位置的 Parse 诊断。
/// 挖不出位置就挂在文件开头。
pub fn backend_error_diagnostic(text: &str) -> Diagnostic {
    let range = location_regex()
        .captures(text)
        .and_then(|caps| {
            let line: u32 = caps.get(1)?.as_str().parse().ok()?;
            let col: u32 = caps.get(2)?.as_str().parse().ok()?;
            Some(Range::at(line.max(1), col, line.max(1), col + 1))
        })
        .unwrap_or_else(Range::file_start);

    let mut message = text
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("backend parse failed")
        .trim()
        .to_string();
    if let Some(caps) = exception_regex().captures(text) {
        let exception = &caps[1];
        if !message.contains(exception) {
            message = format!("{exception}: {message}");
        }
    }

    Diagnostic::error(DiagnosticKind::Parse, range, message)
}

//! 内部 AST。
//!
//! 后端 (vyper 编译器) 输出的原始树是松散的、随版本变化的 JSON;
//! 这里定义的是版本无关的封闭节点集合, 转换逻辑只存在于 `ast::adapter`,
//! 下游 (符号表 / 查询) 永远只看这套形状。

pub mod adapter;
pub mod finder;

use crate::utils::Range;
use std::path::PathBuf;

/// 所有节点的骨架: 范围 + 具体数据。
/// 子节点的范围必须嵌在父节点范围之内。
#[derive(Debug, Clone)]
pub struct Node<T> {
    pub range: Range,
    pub data: T,
}

impl<T> Node<T> {
    pub fn new(range: Range, data: T) -> Self {
        Self { range, data }
    }
}

// --- 顶级结构 ---

pub type ModuleNode = Node<ModuleData>;

#[derive(Debug, Clone, Default)]
pub struct ModuleData {
    pub name: Option<String>,
    /// 后端报告的已解析路径 (interface 文件等场景下有用)
    pub resolved_path: Option<PathBuf>,
    pub body: Vec<TopLevelItem>,
}

#[derive(Debug, Clone)]
pub enum TopLevelItem {
    Function(FunctionDef),
    Variable(VariableDecl),
    Struct(StructDef),
    Event(EventDef),
    Flag(FlagDef),
    Interface(InterfaceDef),
    Import(ImportStmt),
    /// implements / uses / exports 之类的模块级语句, 不产生符号
    Statement(Stmt),
}

/// 函数装饰器决定的可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    External,
    Internal,
    Deploy,
    Unspecified,
}

pub type FunctionDef = Node<FunctionDefData>;

#[derive(Debug, Clone)]
pub struct FunctionDefData {
    pub name: String,
    pub args: Vec<Arg>,
    pub returns: Option<String>,
    pub visibility: Visibility,
    pub body: Vec<Stmt>,
}

pub type Arg = Node<ArgData>;

#[derive(Debug, Clone)]
pub struct ArgData {
    pub name: String,
    pub type_text: Option<String>,
}

pub type VariableDecl = Node<VariableDeclData>;

#[derive(Debug, Clone)]
pub struct VariableDeclData {
    pub name: String,
    /// 声明目标标识符自身的范围 (整条声明的范围在 Node.range 上)
    pub name_range: Range,
    pub type_text: Option<String>,
    pub is_constant: bool,
    pub is_immutable: bool,
    pub is_public: bool,
    pub value: Option<Expr>,
}

pub type FieldDef = Node<FieldDefData>;

#[derive(Debug, Clone)]
pub struct FieldDefData {
    pub name: String,
    pub type_text: Option<String>,
}

pub type StructDef = Node<StructDefData>;

#[derive(Debug, Clone)]
pub struct StructDefData {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

pub type EventDef = Node<EventDefData>;

#[derive(Debug, Clone)]
pub struct EventDefData {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

pub type FlagDef = Node<FlagDefData>;

#[derive(Debug, Clone)]
pub struct FlagDefData {
    pub name: String,
    pub members: Vec<Node<String>>,
}

pub type InterfaceDef = Node<InterfaceDefData>;

#[derive(Debug, Clone)]
pub struct InterfaceDefData {
    pub name: String,
    pub functions: Vec<FunctionDef>,
}

pub type ImportStmt = Node<ImportStmtData>;

#[derive(Debug, Clone)]
pub struct ImportStmtData {
    /// 模块路径片段, `import lib.token` → ["lib", "token"]
    pub segments: Vec<String>,
    /// 相对导入的前导点数 (`from . import x` → 1)
    pub level: usize,
    pub alias: Option<String>,
    /// 后端已经解析出的目标路径 (>=0.4.1 的 import_info)
    pub resolved_hint: Option<PathBuf>,
}

impl ImportStmtData {
    /// 该 import 在当前模块里绑定的名字
    pub fn bound_name(&self) -> Option<&str> {
        if let Some(alias) = &self.alias {
            return Some(alias.as_str());
        }
        self.segments.last().map(|s| s.as_str())
    }
}

// --- 语句 ---

pub type Stmt = Node<StmtData>;

#[derive(Debug, Clone)]
pub enum StmtData {
    Expr(Expr),
    Assign {
        target: Expr,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        value: Expr,
    },
    /// 函数体内的局部变量声明 `y: uint256 = ...`
    LocalDecl {
        name: String,
        name_range: Range,
        type_text: Option<String>,
        value: Option<Expr>,
    },
    If {
        condition: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target_name: String,
        target_range: Range,
        target_type: Option<String>,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Log(Expr),
    Raise(Option<Expr>),
    Pass,
    /// 转换器不认识的语句形状: 保留范围, 不拖累兄弟节点
    Unknown,
}

// --- 表达式 ---

pub type Expr = Node<ExprData>;

#[derive(Debug, Clone)]
pub enum ExprData {
    Identifier(String),
    Attribute { value: Box<Expr>, attr: String },
    Subscript { value: Box<Expr>, index: Box<Expr> },
    Call { func: Box<Expr>, args: Vec<Expr> },
    BinOp { left: Box<Expr>, right: Box<Expr> },
    BoolOp { values: Vec<Expr> },
    UnaryOp { operand: Box<Expr> },
    Compare { left: Box<Expr>, rights: Vec<Expr> },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    /// 字面量 (数值/字符串/bytes/布尔), 导航用不到具体值
    Literal,
    Unknown,
}

impl Expr {
    /// 提取标识符链: `self.foo.bar` → ["self", "foo", "bar"], `MAX` → ["MAX"]。
    /// 中间夹了下标/调用等别的东西就不是纯链, 返回 None。
    pub fn chain(&self) -> Option<Vec<String>> {
        match &self.data {
            ExprData::Identifier(name) => Some(vec![name.clone()]),
            ExprData::Attribute { value, attr } => {
                let mut chain = value.chain()?;
                chain.push(attr.clone());
                Some(chain)
            }
            _ => None,
        }
    }
}

// --- 遍历 ---

/// 深度优先访问模块里的每一个表达式节点 (含嵌套子表达式)。
/// 引用扫描靠它。
pub fn for_each_expr<'a>(module: &'a ModuleNode, f: &mut impl FnMut(&'a Expr)) {
    for item in &module.data.body {
        match item {
            TopLevelItem::Function(func) => walk_function(func, f),
            TopLevelItem::Variable(decl) => {
                if let Some(value) = &decl.data.value {
                    walk_expr(value, f);
                }
            }
            TopLevelItem::Interface(iface) => {
                for func in &iface.data.functions {
                    walk_function(func, f);
                }
            }
            // struct/event/flag 体内的名字是声明不是引用
            TopLevelItem::Struct(_)
            | TopLevelItem::Event(_)
            | TopLevelItem::Flag(_)
            | TopLevelItem::Import(_) => {}
            TopLevelItem::Statement(stmt) => walk_stmt(stmt, f),
        }
    }
}

fn walk_function<'a>(func: &'a FunctionDef, f: &mut impl FnMut(&'a Expr)) {
    for stmt in &func.data.body {
        walk_stmt(stmt, f);
    }
}

fn walk_stmt<'a>(stmt: &'a Stmt, f: &mut impl FnMut(&'a Expr)) {
    match &stmt.data {
        StmtData::Expr(expr) | StmtData::Log(expr) => walk_expr(expr, f),
        StmtData::Assign { target, value } | StmtData::AugAssign { target, value } => {
            walk_expr(target, f);
            walk_expr(value, f);
        }
        StmtData::LocalDecl { value, .. } => {
            if let Some(value) = value {
                walk_expr(value, f);
            }
        }
        StmtData::If {
            condition,
            body,
            orelse,
        } => {
            walk_expr(condition, f);
            for s in body {
                walk_stmt(s, f);
            }
            for s in orelse {
                walk_stmt(s, f);
            }
        }
        StmtData::For { iter, body, .. } => {
            walk_expr(iter, f);
            for s in body {
                walk_stmt(s, f);
            }
        }
        StmtData::Return(value) | StmtData::Raise(value) => {
            if let Some(value) = value {
                walk_expr(value, f);
            }
        }
        StmtData::Assert { test, msg } => {
            walk_expr(test, f);
            if let Some(msg) = msg {
                walk_expr(msg, f);
            }
        }
        StmtData::Pass | StmtData::Unknown => {}
    }
}

fn walk_expr<'a>(expr: &'a Expr, f: &mut impl FnMut(&'a Expr)) {
    f(expr);
    match &expr.data {
        ExprData::Attribute { value, .. } | ExprData::UnaryOp { operand: value } => {
            walk_expr(value, f)
        }
        ExprData::Subscript { value, index } => {
            walk_expr(value, f);
            walk_expr(index, f);
        }
        ExprData::Call { func, args } => {
            walk_expr(func, f);
            for arg in args {
                walk_expr(arg, f);
            }
        }
        ExprData::BinOp { left, right } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        ExprData::Compare { left, rights } => {
            walk_expr(left, f);
            for right in rights {
                walk_expr(right, f);
            }
        }
        ExprData::BoolOp { values } | ExprData::Tuple(values) | ExprData::List(values) => {
            for value in values {
                walk_expr(value, f);
            }
        }
        ExprData::Identifier(_) | ExprData::Literal | ExprData::Unknown => {}
    }
}

//! 作用域树与符号表。
//!
//! 两层就够了: 模块作用域 + 函数作用域 (vyper 的 if/for 不开新作用域,
//! 局部声明在整个函数里可见)。符号全存在一张平表里, 作用域只持有 id。

use crate::ast::Visibility;
use crate::utils::{Position, Range};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    /// 状态变量和局部变量 (含函数参数)
    Variable,
    Constant,
    Struct,
    Event,
    Flag,
    FlagMember,
    Interface,
    Field,
    ImportAlias,
}

/// import 绑定的解析输入 (真正落到哪个文件由 session 层结合环境决定)
#[derive(Debug, Clone)]
pub struct ImportTarget {
    pub segments: Vec<String>,
    pub level: usize,
    pub resolved_hint: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub name: String,
    pub kind: SymbolKind,
    /// 跳转定义落点 (有独立名字范围的用名字范围, 否则整条声明)
    pub range: Range,
    pub scope: ScopeId,
    pub type_text: Option<String>,
    pub visibility: Visibility,
    pub import: Option<ImportTarget>,
    /// 成员符号 (struct 字段 / flag 成员 / interface 函数), 不参与名字查找,
    /// 只在跨符号的成员访问时用
    pub children: Vec<SymbolId>,
}

impl SymbolEntry {
    pub fn new(name: impl Into<String>, kind: SymbolKind, range: Range) -> Self {
        Self {
            name: name.into(),
            kind,
            range,
            scope: ScopeTree::ROOT,
            type_text: None,
            visibility: Visibility::Unspecified,
            import: None,
            children: Vec::new(),
        }
    }

    pub fn with_type(mut self, type_text: Option<String>) -> Self {
        self.type_text = type_text;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_import(mut self, target: ImportTarget) -> Self {
        self.import = Some(target);
        self
    }
}

#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub range: Range,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    /// 名字 → 符号。重名时后定义的覆盖先定义的。
    names: HashMap<String, SymbolId>,
    /// 本作用域直接定义的符号, 按声明顺序 (大纲按这个走)
    symbols: Vec<SymbolId>,
}

#[derive(Debug)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    symbols: Vec<SymbolEntry>,
}

impl ScopeTree {
    pub const ROOT: ScopeId = ScopeId(0);

    pub fn new(module_range: Range) -> Self {
        Self {
            scopes: vec![Scope {
                kind: ScopeKind::Module,
                range: module_range,
                parent: None,
                children: Vec::new(),
                names: HashMap::new(),
                symbols: Vec::new(),
            }],
            symbols: Vec::new(),
        }
    }

    pub fn push_scope(&mut self, parent: ScopeId, kind: ScopeKind, range: Range) -> ScopeId {
        if !self.scopes[parent.0 as usize].range.contains_range(&range) {
            log::warn!(
                "scope {range} is not nested in its parent {}",
                self.scopes[parent.0 as usize].range
            );
        }
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            kind,
            range,
            parent: Some(parent),
            children: Vec::new(),
            names: HashMap::new(),
            symbols: Vec::new(),
        });
        self.scopes[parent.0 as usize].children.push(id);
        id
    }

    /// 在作用域里定义一个符号。重名时返回旧符号的范围 (调用方发告警),
    /// 名字查找从此指向新符号。
    pub fn define(&mut self, scope: ScopeId, mut entry: SymbolEntry) -> (SymbolId, Option<Range>) {
        entry.scope = scope;
        let id = SymbolId(self.symbols.len() as u32);
        let name = entry.name.clone();
        self.symbols.push(entry);

        let slot = &mut self.scopes[scope.0 as usize];
        slot.symbols.push(id);
        let previous = slot
            .names
            .insert(name, id)
            .map(|old| self.symbols[old.0 as usize].range);
        (id, previous)
    }

    /// 挂一个成员符号 (不进任何作用域的名字表)
    pub fn add_child_symbol(&mut self, parent: SymbolId, mut entry: SymbolEntry) -> SymbolId {
        entry.scope = self.symbols[parent.0 as usize].scope;
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(entry);
        self.symbols[parent.0 as usize].children.push(id);
        id
    }

    pub fn symbol(&self, id: SymbolId) -> &SymbolEntry {
        &self.symbols[id.0 as usize]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    /// 包含 pos 的最内层作用域
    pub fn scope_at(&self, pos: Position) -> ScopeId {
        let mut current = Self::ROOT;
        'descend: loop {
            for &child in &self.scopes[current.0 as usize].children {
                if self.scopes[child.0 as usize].range.contains(pos) {
                    current = child;
                    continue 'descend;
                }
            }
            return current;
        }
    }

    /// 从 scope 开始逐层向外找名字 (内层遮蔽外层)
    pub fn resolve_from(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self.scopes[id.0 as usize];
            if let Some(&symbol) = scope.names.get(name) {
                return Some(symbol);
            }
            current = scope.parent;
        }
        None
    }

    /// 只查单个作用域, 不向外走 (跨模块查目标模块顶层用)
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        self.scopes[scope.0 as usize].names.get(name).copied()
    }

    /// 按声明顺序列出作用域里的符号
    pub fn scope_symbols(&self, scope: ScopeId) -> impl Iterator<Item = (SymbolId, &SymbolEntry)> {
        self.scopes[scope.0 as usize]
            .symbols
            .iter()
            .map(|&id| (id, &self.symbols[id.0 as usize]))
    }

    /// 全部符号, 含成员符号 (声明位置反查用)
    pub fn all_symbols(&self) -> impl Iterator<Item = (SymbolId, &SymbolEntry)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, entry)| (SymbolId(i as u32), entry))
    }

    /// 在符号的成员里按名字找 (struct 字段 / flag 成员 / interface 函数)
    pub fn member(&self, parent: SymbolId, name: &str) -> Option<SymbolId> {
        self.symbols[parent.0 as usize]
            .children
            .iter()
            .copied()
            .find(|&child| self.symbols[child.0 as usize].name == name)
    }
}

//! 导航查询: 跳转定义 / 找引用。
//!
//! 两者共用同一条解析路径: 光标处取标识符链, 链头在作用域里向外找,
//! 后续段落在符号成员或目标模块顶层里找。找引用就是把这条路径反过来
//! 跑在每个已加载模块的每条链上, 比对解析结果是否同一个声明。

use crate::analyzer::resolve::ImportTargetState;
use crate::analyzer::scope::{ScopeTree, SymbolId, SymbolKind};
use crate::ast::{finder, for_each_expr};
use crate::session::Module;
use crate::utils::{Position, Range};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 已加载模块的只读视图 (session 实现它; 查询逻辑不碰锁)
pub trait ModuleGraph {
    fn module_at(&self, path: &Path) -> Option<Arc<Module>>;
    fn loaded_paths(&self) -> Vec<PathBuf>;
}

/// 一次成功解析的落点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub module: PathBuf,
    pub symbol: SymbolId,
    pub range: Range,
    pub kind: SymbolKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub module: PathBuf,
    pub range: Range,
}

/// 跳转定义。解析不动 (光标不在标识符上 / 名字不存在 / import 断了)
/// 一律返回 None, 不产生诊断。
pub fn resolve_definition(
    graph: &dyn ModuleGraph,
    module: &Module,
    pos: Position,
) -> Option<ResolvedSymbol> {
    // struct/event/flag 成员行上的名字是定义本身, 不往外跳
    if finder::in_declaration_context(&module.ast, pos) {
        return None;
    }
    let hit = finder::chain_at(&module.ast, pos)?;
    resolve_chain(graph, module, &hit.chain, pos)
}

/// 找引用: 对每个已加载模块的每条标识符链重跑一遍定义解析,
/// 解析到同一个声明的就是引用。
pub fn resolve_references(
    graph: &dyn ModuleGraph,
    module: &Module,
    pos: Position,
    include_declaration: bool,
) -> Vec<Reference> {
    let Some(target) = resolve_target(graph, module, pos) else {
        return Vec::new();
    };

    let mut seen: HashSet<Reference> = HashSet::new();
    let mut results = Vec::new();

    if include_declaration {
        let declaration = Reference {
            module: target.module.clone(),
            range: target.range,
        };
        if seen.insert(declaration.clone()) {
            results.push(declaration);
        }
    }

    for path in graph.loaded_paths() {
        let Some(candidate) = graph.module_at(&path) else {
            continue;
        };
        for_each_expr(&candidate.ast, &mut |expr| {
            let Some(chain) = expr.chain() else {
                return;
            };
            if finder::in_declaration_context(&candidate.ast, expr.range.start) {
                return;
            }
            let resolved = resolve_chain(graph, &candidate, &chain, expr.range.start);
            let matches = resolved
                .map(|r| r.module == target.module && r.range == target.range)
                .unwrap_or(false);
            if matches {
                let reference = Reference {
                    module: candidate.path.clone(),
                    range: expr.range,
                };
                if seen.insert(reference.clone()) {
                    results.push(reference);
                }
            }
        });
    }

    results.sort_by(|a, b| (&a.module, a.range.start).cmp(&(&b.module, b.range.start)));
    results
}

/// 找引用的起点: 光标既可能在某次使用上, 也可能在声明本身上
fn resolve_target(
    graph: &dyn ModuleGraph,
    module: &Module,
    pos: Position,
) -> Option<ResolvedSymbol> {
    if let Some(resolved) = resolve_definition(graph, module, pos) {
        return Some(resolved);
    }
    declaration_at(module, pos)
}

/// pos 落在哪个符号的声明范围上 (取最小的那个)
fn declaration_at(module: &Module, pos: Position) -> Option<ResolvedSymbol> {
    let mut best: Option<(SymbolId, Range)> = None;
    for (id, entry) in module.scopes.all_symbols() {
        if !entry.range.contains(pos) {
            continue;
        }
        let tighter = match best {
            Some((_, range)) => range.contains_range(&entry.range),
            None => true,
        };
        if tighter {
            best = Some((id, entry.range));
        }
    }
    best.map(|(id, _)| resolved(&module.path, &module.scopes, id))
}

fn resolve_chain(
    graph: &dyn ModuleGraph,
    module: &Module,
    chain: &[String],
    pos: Position,
) -> Option<ResolvedSymbol> {
    let (first, rest) = chain.split_first()?;
    let tree = &module.scopes;

    // `self.x` 直达模块作用域, 裸 self 不指向任何声明
    if first == "self" {
        let (head, rest) = rest.split_first()?;
        let id = tree.lookup(ScopeTree::ROOT, head)?;
        let id = descend(tree, id, rest)?;
        return Some(resolved(&module.path, tree, id));
    }

    let id = tree.resolve_from(tree.scope_at(pos), first)?;
    let entry = tree.symbol(id);

    if entry.kind == SymbolKind::ImportAlias {
        // 裸别名 → 落在 import 语句上
        if rest.is_empty() {
            return Some(resolved(&module.path, tree, id));
        }
        let edge = module.imports.iter().find(|edge| edge.symbol == id)?;
        let ImportTargetState::Resolved(target_path) = &edge.target else {
            return None;
        };
        // 目标模块可能已被关掉或换掉, 每次查询时重新拿当前的
        let target = graph.module_at(target_path)?;
        let (head, tail) = rest.split_first()?;
        let target_id = target.scopes.lookup(ScopeTree::ROOT, head)?;
        let target_id = descend(&target.scopes, target_id, tail)?;
        return Some(resolved(&target.path, &target.scopes, target_id));
    }

    let id = descend(tree, id, rest)?;
    Some(resolved(&module.path, tree, id))
}

/// 沿成员符号一路往下 (Status.ACTIVE, point.x ...)
fn descend(tree: &ScopeTree, mut id: SymbolId, rest: &[String]) -> Option<SymbolId> {
    for name in rest {
        id = tree.member(id, name)?;
    }
    Some(id)
}

fn resolved(path: &Path, tree: &ScopeTree, id: SymbolId) -> ResolvedSymbol {
    let entry = tree.symbol(id);
    ResolvedSymbol {
        module: path.to_path_buf(),
        symbol: id,
        range: entry.range,
        kind: entry.kind,
        name: entry.name.clone(),
    }
}

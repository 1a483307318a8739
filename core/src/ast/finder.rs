//! 按光标位置在 AST 里定位东西。

use crate::ast::{ModuleNode, TopLevelItem, for_each_expr};
use crate::utils::Position;

/// 光标落在的标识符链及其范围。
/// range 是命中链节点的范围 (点了 `self.x` 的 x 就是整个 attribute 的范围)。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentAt {
    pub chain: Vec<String>,
    pub range: crate::utils::Range,
}

/// 找覆盖 pos 的最小链形表达式 (Identifier / Attribute 链)。
/// `a.b.c` 里点 b 命中的是 `a.b` 这层, 链即 ["a", "b"]。
pub fn chain_at(module: &ModuleNode, pos: Position) -> Option<IdentAt> {
    let mut best: Option<IdentAt> = None;
    for_each_expr(module, &mut |expr| {
        if !expr.range.contains(pos) {
            return;
        }
        let Some(chain) = expr.chain() else {
            return;
        };
        let tighter = match &best {
            Some(current) => current.range.contains_range(&expr.range),
            None => true,
        };
        if tighter {
            best = Some(IdentAt {
                chain,
                range: expr.range,
            });
        }
    });
    best
}

/// pos 是否落在声明上下文里 (struct/event/flag 的成员行)。
/// 成员行上的名字是定义本身, 不做引用解析; 头部那一行 (类型名) 不算。
pub fn in_declaration_context(module: &ModuleNode, pos: Position) -> bool {
    module.data.body.iter().any(|item| {
        let range = match item {
            TopLevelItem::Struct(n) => n.range,
            TopLevelItem::Event(n) => n.range,
            TopLevelItem::Flag(n) => n.range,
            _ => return false,
        };
        range.contains(pos) && pos.line > range.start.line
    })
}

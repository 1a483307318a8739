//! 静态分析: 从内部 AST 建作用域/符号表, 并解析 import 目标。

pub mod collect;
pub mod resolve;
pub mod scope;

pub use collect::build;
pub use scope::{
    ImportTarget, Scope, ScopeId, ScopeKind, ScopeTree, SymbolEntry, SymbolId, SymbolKind,
};

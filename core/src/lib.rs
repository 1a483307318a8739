//! natrix: vyper 合约的语言分析核心。
//!
//! 管线: 源码 → (版本 pragma → 环境) → 后端 JSON AST → 内部 AST →
//! 符号表/作用域 → 导航查询。协议层 (LSP) 在 `lsp` crate, 这里不感知
//! 任何协议细节。

pub mod analyzer;
pub mod ast;
pub mod diagnostics;
pub mod environment;
pub mod query;
pub mod session;
pub mod utils;
pub mod version;

pub use session::{Module, Session};

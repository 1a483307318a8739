use crate::utils::Range;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// 诊断的分类。
/// 版本/环境/语法错误是文档级的; import 错误挂在对应语句上;
/// 查询解析不到不算错误 (返回空结果即可), 所以这里没有它。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// 定不下来用哪个编译器版本 (没有 pragma 也没有默认配置)
    VersionResolution,
    /// 沙箱环境安装失败
    EnvironmentBuild,
    /// 语法解析失败 (可能伴随部分可用的 AST)
    Parse,
    /// import 路径解析不到文件, 或检测到循环导入
    ImportResolution,
    /// 同一作用域内重复定义同名符号 (后写的生效)
    DuplicateDefinition,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::VersionResolution => "version-resolution",
            DiagnosticKind::EnvironmentBuild => "environment-build",
            DiagnosticKind::Parse => "parse",
            DiagnosticKind::ImportResolution => "import-resolution",
            DiagnosticKind::DuplicateDefinition => "duplicate-definition",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, range: Range, message: impl Into<String>) -> Self {
        Self {
            range,
            severity: Severity::Error,
            kind,
            message: message.into(),
        }
    }

    pub fn warning(kind: DiagnosticKind, range: Range, message: impl Into<String>) -> Self {
        Self {
            range,
            severity: Severity::Warning,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.kind, self.message, self.range)
    }
}

use std::fmt;

/// 源码中的一个点位。
/// 行号从 1 开始, 列号从 0 开始 —— 与后端 AST 的 lineno/col_offset 一致。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub line: u32,
    pub col: u32,
}

impl Position {
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// 源码范围 [start, end]。
/// 端点取闭区间: 编辑器光标常落在标识符尾部, 排他端点会漏掉这种点击。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub const fn at(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            start: Position::new(start_line, start_col),
            end: Position::new(end_line, end_col),
        }
    }

    /// 文件开头的空范围 (没有更好位置时诊断挂在这里)
    pub const fn file_start() -> Self {
        Self::at(1, 0, 1, 0)
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.start <= pos && pos <= self.end
    }

    /// other 是否完整嵌在 self 之内 (子节点范围不得超出父节点)
    pub fn contains_range(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_inclusive_at_both_ends() {
        let range = Range::at(2, 4, 2, 10);
        assert!(range.contains(Position::new(2, 4)));
        assert!(range.contains(Position::new(2, 7)));
        assert!(range.contains(Position::new(2, 10)));
        assert!(!range.contains(Position::new(2, 11)));
        assert!(!range.contains(Position::new(1, 7)));
    }

    #[test]
    fn nested_range_containment() {
        let outer = Range::at(5, 0, 9, 4);
        let inner = Range::at(6, 4, 6, 20);
        assert!(outer.contains_range(&inner));
        assert!(!inner.contains_range(&outer));
    }
}

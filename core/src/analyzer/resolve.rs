//! import 目标的落盘解析: 把 `import lib.token` 变成一个具体文件路径。

use crate::analyzer::scope::{ScopeTree, SymbolId};
use crate::environment::EnvironmentHandle;
use crate::utils::Range;
use std::path::{Path, PathBuf};

/// 模块的一条出边。target 由 session 层在链接阶段填 (要看环境和磁盘)。
#[derive(Debug, Clone)]
pub struct ImportEdge {
    pub symbol: SymbolId,
    /// import 语句的范围, 解析失败的诊断挂这里
    pub range: Range,
    pub segments: Vec<String>,
    pub level: usize,
    pub target: ImportTargetState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTargetState {
    Resolved(PathBuf),
    Unresolved,
}

/// 从符号表里捞出所有 import 绑定, 出边初始都是未解析状态
pub fn collect_edges(tree: &ScopeTree) -> Vec<ImportEdge> {
    tree.scope_symbols(ScopeTree::ROOT)
        .filter_map(|(id, entry)| {
            let target = entry.import.as_ref()?;
            Some(ImportEdge {
                symbol: id,
                range: entry.range,
                segments: target.segments.clone(),
                level: target.level,
                target: ImportTargetState::Unresolved,
            })
        })
        .collect()
}

/// 把一条 import 解析成磁盘上的文件。
///
/// 顺序: 后端给的 hint > 相对导入锚点 > 当前文件目录 > workspace 根 >
/// 环境的搜索路径。每个锚点下试 `.vy` 和 `.vyi` 两种后缀。
pub fn resolve_import_path(
    env: &EnvironmentHandle,
    workspace_root: &Path,
    importing_file: &Path,
    edge: &ImportEdge,
    resolved_hint: Option<&Path>,
) -> Option<PathBuf> {
    let importing_dir = importing_file.parent().unwrap_or(Path::new("."));

    if let Some(hint) = resolved_hint {
        for base in [None, Some(workspace_root), Some(importing_dir)] {
            let candidate = match base {
                None if hint.is_absolute() => hint.to_path_buf(),
                None => continue,
                Some(base) => base.join(hint),
            };
            if candidate.is_file() {
                return canonical(&candidate);
            }
        }
    }

    if edge.segments.is_empty() {
        return None;
    }

    let mut anchors: Vec<PathBuf> = Vec::new();
    if edge.level > 0 {
        // `from . import x` 的 level 是 1, 锚在当前目录; 每多一个点上一层
        let mut anchor = importing_dir.to_path_buf();
        for _ in 1..edge.level {
            anchor = anchor.parent()?.to_path_buf();
        }
        anchors.push(anchor);
    } else {
        anchors.push(importing_dir.to_path_buf());
        anchors.push(workspace_root.to_path_buf());
        anchors.extend(env.search_paths.iter().cloned());
    }

    for anchor in anchors {
        let mut stem = anchor;
        for segment in &edge.segments {
            stem.push(segment);
        }
        for extension in ["vy", "vyi"] {
            let candidate = stem.with_extension(extension);
            if candidate.is_file() {
                return canonical(&candidate);
            }
        }
    }
    None
}

/// 路径统一成规范形式, 同一个文件才会在模块表里只占一个键
fn canonical(path: &Path) -> Option<PathBuf> {
    match path.canonicalize() {
        Ok(path) => Some(path),
        Err(err) => {
            log::warn!("cannot canonicalize {}: {err}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::scope::{ImportTarget, SymbolEntry, SymbolKind};
    use crate::environment::{EnvironmentHandle, EnvironmentKind, Provisioner};
    use semver::Version;
    use std::sync::Arc;

    struct NoopProvisioner;

    impl Provisioner for NoopProvisioner {
        fn installed_version(&self) -> Option<Version> {
            None
        }
        fn host_search_paths(&self) -> Vec<PathBuf> {
            Vec::new()
        }
        fn build(&self, _version: &Version, _root: &Path) -> Result<(), String> {
            Ok(())
        }
        fn invoke_parse(
            &self,
            _env: &EnvironmentHandle,
            _source: &str,
            _path: &Path,
        ) -> Result<String, String> {
            Err("not a real backend".into())
        }
    }

    fn env_with_paths(search_paths: Vec<PathBuf>) -> EnvironmentHandle {
        EnvironmentHandle::for_tests(
            EnvironmentKind::Sandbox,
            Version::new(0, 4, 3),
            search_paths,
            Arc::new(NoopProvisioner),
        )
    }

    fn edge(segments: &[&str], level: usize) -> ImportEdge {
        ImportEdge {
            symbol: SymbolId(0),
            range: Range::at(1, 0, 1, 10),
            segments: segments.iter().map(|s| s.to_string()).collect(),
            level,
            target: ImportTargetState::Unresolved,
        }
    }

    #[test]
    fn collects_only_import_symbols() {
        let mut tree = ScopeTree::new(Range::at(1, 0, 5, 0));
        tree.define(
            ScopeTree::ROOT,
            SymbolEntry::new("x", SymbolKind::Variable, Range::at(2, 0, 2, 1)),
        );
        tree.define(
            ScopeTree::ROOT,
            SymbolEntry::new("lib", SymbolKind::ImportAlias, Range::at(1, 0, 1, 10)).with_import(
                ImportTarget {
                    segments: vec!["lib".into()],
                    level: 0,
                    resolved_hint: None,
                },
            ),
        );

        let edges = collect_edges(&tree);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].segments, vec!["lib"]);
        assert_eq!(edges[0].target, ImportTargetState::Unresolved);
    }

    #[test]
    fn resolves_sibling_module_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("lib.vy"), "# pragma version ^0.4.0\n").unwrap();
        std::fs::write(root.join("main.vy"), "import lib\n").unwrap();

        let env = env_with_paths(vec![root.to_path_buf()]);
        let found = resolve_import_path(&env, root, &root.join("main.vy"), &edge(&["lib"], 0), None)
            .unwrap();
        assert_eq!(found, root.join("lib.vy").canonicalize().unwrap());
    }

    #[test]
    fn relative_import_climbs_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("inner")).unwrap();
        std::fs::write(root.join("common.vyi"), "").unwrap();
        std::fs::write(root.join("inner/main.vy"), "").unwrap();

        let env = env_with_paths(vec![]);
        // from .. import common  → level 2
        let found = resolve_import_path(
            &env,
            root,
            &root.join("inner/main.vy"),
            &edge(&["common"], 2),
            None,
        )
        .unwrap();
        assert_eq!(found, root.join("common.vyi").canonicalize().unwrap());
    }

    #[test]
    fn backend_hint_wins_over_search() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("pkg")).unwrap();
        std::fs::write(root.join("pkg/token.vy"), "").unwrap();
        // 同名文件也放一个在搜索路径能碰到的位置
        std::fs::write(root.join("token.vy"), "").unwrap();

        let env = env_with_paths(vec![root.to_path_buf()]);
        let found = resolve_import_path(
            &env,
            root,
            &root.join("main.vy"),
            &edge(&["token"], 0),
            Some(Path::new("pkg/token.vy")),
        )
        .unwrap();
        assert_eq!(found, root.join("pkg/token.vy").canonicalize().unwrap());
    }

    #[test]
    fn missing_target_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let env = env_with_paths(vec![]);
        assert!(
            resolve_import_path(&env, root, &root.join("main.vy"), &edge(&["ghost"], 0), None)
                .is_none()
        );
    }
}

//! 会话: 打开的文档、按需加载的被导入模块、以及它们之间的边。
//!
//! 每个文档的分析产物 (AST / 符号表 / 出边 / 诊断) 打包成一个不可变的
//! [`Module`], 重建时整体替换。查询方拿到的是 Arc 快照, 正在进行的
//! 重建不会影响它。

use crate::analyzer;
use crate::analyzer::resolve::{self, ImportEdge, ImportTargetState};
use crate::analyzer::scope::ScopeTree;
use crate::ast::ModuleNode;
use crate::ast::adapter::{self, AstAdapter};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::environment::{EnvironmentError, EnvironmentHandle, EnvironmentManager, Provisioner};
use crate::query::{self, ModuleGraph, Reference, ResolvedSymbol};
use crate::utils::{Position, Range};
use crate::version::{self, VersionSpec};
use semver::Version;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// 一个模块的完整分析快照
pub struct Module {
    pub path: PathBuf,
    pub text: String,
    /// 编辑器侧的文档版本号; 磁盘加载的模块是 0
    pub text_version: i32,
    /// 实际使用的后端版本 (环境都拿不到时是 None)
    pub backend_version: Option<Version>,
    pub ast: ModuleNode,
    pub scopes: ScopeTree,
    pub imports: Vec<ImportEdge>,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct Session {
    workspace_root: PathBuf,
    environments: EnvironmentManager,
    modules: RwLock<HashMap<PathBuf, Arc<Module>>>,
}

impl Session {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        workspace_root: PathBuf,
        default_spec: Option<VersionSpec>,
    ) -> Self {
        let environments =
            EnvironmentManager::new(provisioner, workspace_root.clone(), default_spec);
        Self {
            workspace_root,
            environments,
            modules: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_cache_root(
        provisioner: Arc<dyn Provisioner>,
        workspace_root: PathBuf,
        default_spec: Option<VersionSpec>,
        cache_root: PathBuf,
    ) -> Self {
        let environments = EnvironmentManager::with_cache_root(
            provisioner,
            workspace_root.clone(),
            default_spec,
            cache_root,
        );
        Self {
            workspace_root,
            environments,
            modules: RwLock::new(HashMap::new()),
        }
    }

    // --- 文档生命周期 ---

    pub fn open_document(&self, path: &Path, text: String, text_version: i32) {
        self.rebuild(normalize(path), text, text_version);
    }

    pub fn update_document(&self, path: &Path, text: String, text_version: i32) {
        self.rebuild(normalize(path), text, text_version);
    }

    pub fn close_document(&self, path: &Path) {
        let key = normalize(path);
        self.modules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }

    // --- 查询 ---

    pub fn module(&self, path: &Path) -> Option<Arc<Module>> {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&normalize(path))
            .cloned()
    }

    pub fn definition(&self, path: &Path, pos: Position) -> Option<ResolvedSymbol> {
        let module = self.module(path)?;
        query::resolve_definition(self, &module, pos)
    }

    pub fn references(
        &self,
        path: &Path,
        pos: Position,
        include_declaration: bool,
    ) -> Vec<Reference> {
        let Some(module) = self.module(path) else {
            return Vec::new();
        };
        query::resolve_references(self, &module, pos, include_declaration)
    }

    pub fn diagnostics(&self, path: &Path) -> Vec<Diagnostic> {
        self.module(path)
            .map(|module| module.diagnostics.clone())
            .unwrap_or_default()
    }

    // --- 构建管线 ---

    fn rebuild(&self, path: PathBuf, text: String, text_version: i32) {
        // 环检测只看本次导入链, 不受别的文档并发重建干扰
        let mut loading = HashSet::new();
        loading.insert(path.clone());
        let module = self.build_module(path.clone(), text, text_version, &mut loading);

        let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
        // 乱序到达的旧重建直接丢弃
        if let Some(existing) = modules.get(&path) {
            if existing.text_version > text_version {
                log::debug!(
                    "discarding stale rebuild of {} (v{} < v{})",
                    path.display(),
                    text_version,
                    existing.text_version
                );
                return;
            }
        }
        modules.insert(path, Arc::new(module));
    }

    fn build_module(
        &self,
        path: PathBuf,
        text: String,
        text_version: i32,
        loading: &mut HashSet<PathBuf>,
    ) -> Module {
        let pragma = version::extract_pragma(&text);
        let environment = match self
            .environments
            .resolve_spec(pragma.as_ref())
            .and_then(|spec| self.environments.resolve(&spec))
        {
            Ok(env) => env,
            Err(err) => {
                // 没有环境就没有 AST, 模块退化成只带一条诊断的空壳
                return Module {
                    path,
                    text,
                    text_version,
                    backend_version: None,
                    ast: adapter::empty_module(),
                    scopes: ScopeTree::new(Range::file_start()),
                    imports: Vec::new(),
                    diagnostics: vec![environment_diagnostic(&err)],
                };
            }
        };

        let adapter = AstAdapter::new(environment.version.clone());
        let parsed = adapter.parse(&environment, &text, &path);
        let mut diagnostics = parsed.diagnostics;

        let (scopes, scope_diagnostics) = analyzer::build(&parsed.module);
        diagnostics.extend(scope_diagnostics);

        let mut imports = resolve::collect_edges(&scopes);
        self.link_imports(&path, &environment, &scopes, &mut imports, &mut diagnostics, loading);

        Module {
            path,
            text,
            text_version,
            backend_version: Some(environment.version.clone()),
            ast: parsed.module,
            scopes,
            imports,
            diagnostics,
        }
    }

    /// 逐条出边落盘解析, 顺带把还没加载的目标模块拉进来。
    /// 环在回边上现形: 目标已经在本次导入链上就不递归, 发一条诊断,
    /// 这条边留在未解析状态。
    fn link_imports(
        &self,
        path: &Path,
        environment: &Arc<EnvironmentHandle>,
        scopes: &ScopeTree,
        imports: &mut [ImportEdge],
        diagnostics: &mut Vec<Diagnostic>,
        loading: &mut HashSet<PathBuf>,
    ) {
        for edge in imports {
            let hint = scopes
                .symbol(edge.symbol)
                .import
                .as_ref()
                .and_then(|target| target.resolved_hint.as_deref());
            let Some(target) = resolve::resolve_import_path(
                environment,
                &self.workspace_root,
                path,
                edge,
                hint,
            ) else {
                diagnostics.push(Diagnostic::error(
                    DiagnosticKind::ImportResolution,
                    edge.range,
                    format!("cannot resolve import `{}`", edge.segments.join(".")),
                ));
                continue;
            };

            if loading.contains(&target) {
                diagnostics.push(Diagnostic::error(
                    DiagnosticKind::ImportResolution,
                    edge.range,
                    format!("cyclic import of `{}`", edge.segments.join(".")),
                ));
                continue;
            }
            self.ensure_loaded(&target, loading);
            edge.target = ImportTargetState::Resolved(target);
        }
    }

    /// 被导入的模块从磁盘拉起来 (已经在内存里的不动)
    fn ensure_loaded(&self, path: &Path, loading: &mut HashSet<PathBuf>) {
        {
            let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
            if modules.contains_key(path) {
                return;
            }
        }
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("cannot read imported module {}: {err}", path.display());
                return;
            }
        };

        loading.insert(path.to_path_buf());
        let module = self.build_module(path.to_path_buf(), text, 0, loading);
        loading.remove(path);

        self.modules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            // 与此同时编辑器可能已经把同一文件当文档打开了, 不覆盖
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(module));
    }
}

impl ModuleGraph for Session {
    fn module_at(&self, path: &Path) -> Option<Arc<Module>> {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    fn loaded_paths(&self) -> Vec<PathBuf> {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

fn environment_diagnostic(err: &EnvironmentError) -> Diagnostic {
    let kind = match err {
        EnvironmentError::VersionResolution(_) => DiagnosticKind::VersionResolution,
        EnvironmentError::Build { .. } => DiagnosticKind::EnvironmentBuild,
    };
    Diagnostic::error(kind, Range::file_start(), err.to_string())
}

/// 模块表的键统一用规范路径, 同一个文件只占一个条目
fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

//! 编译器环境管理。
//!
//! 一个 "环境" 是能运行某个版本后端的运行时: 要么直接用宿主机上
//! 已装好的那个 (system), 要么在用户缓存目录下建一个按版本隔离的
//! 沙箱 (sandbox)。同一版本的沙箱全进程共享一份, 并发请求只触发
//! 一次安装。

pub mod toolchain;

use crate::version::VersionSpec;
use semver::Version;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    /// 定不下来版本: 没 pragma、没默认配置、宿主上也没装后端
    VersionResolution(String),
    /// 沙箱安装失败
    Build { version: String, reason: String },
}

impl fmt::Display for EnvironmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentError::VersionResolution(msg) => {
                write!(f, "cannot resolve compiler version: {msg}")
            }
            EnvironmentError::Build { version, reason } => {
                write!(f, "failed to build environment for {version}: {reason}")
            }
        }
    }
}

impl std::error::Error for EnvironmentError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentKind {
    /// 宿主机上已安装的后端
    System,
    /// 缓存目录下按版本隔离的虚拟环境
    Sandbox,
}

/// 与具体后端打交道的边界。生产实现是 [`toolchain::UvProvisioner`];
/// 测试用假实现替掉, 不碰真实的包管理器。
pub trait Provisioner: Send + Sync {
    /// 宿主机上后端的版本 (没装返回 None)
    fn installed_version(&self) -> Option<Version>;

    /// 宿主后端的模块搜索路径
    fn host_search_paths(&self) -> Vec<PathBuf>;

    /// 在 root 下安装指定版本的后端
    fn build(&self, version: &Version, root: &Path) -> Result<(), String>;

    /// 在环境里跑一次解析, 成功返回 AST JSON, 失败返回 stderr 文本
    fn invoke_parse(
        &self,
        env: &EnvironmentHandle,
        source: &str,
        path: &Path,
    ) -> Result<String, String>;
}

/// 一个就绪可用的环境。句柄是廉价共享的 (Arc), 同版本的所有文档拿同一份。
pub struct EnvironmentHandle {
    pub kind: EnvironmentKind,
    pub version: Version,
    /// import 解析用的模块搜索路径 (workspace 根永远在里面)
    pub search_paths: Vec<PathBuf>,
    /// 沙箱根目录; system 环境没有
    pub root: Option<PathBuf>,
    provisioner: Arc<dyn Provisioner>,
}

impl EnvironmentHandle {
    pub fn invoke_parse(&self, source: &str, path: &Path) -> Result<String, String> {
        self.provisioner.invoke_parse(self, source, path)
    }
}

#[cfg(test)]
impl EnvironmentHandle {
    pub(crate) fn for_tests(
        kind: EnvironmentKind,
        version: Version,
        search_paths: Vec<PathBuf>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            kind,
            version,
            search_paths,
            root: None,
            provisioner,
        }
    }
}

impl fmt::Debug for EnvironmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentHandle")
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("search_paths", &self.search_paths)
            .field("root", &self.root)
            .finish()
    }
}

/// 同版本并发构建的汇合点: 第一个到的线程负责安装, 其余线程在
/// OnceLock 上等结果。
type BuildCell = Arc<OnceLock<Result<Arc<EnvironmentHandle>, EnvironmentError>>>;

pub struct EnvironmentManager {
    provisioner: Arc<dyn Provisioner>,
    /// 沙箱都建在这里, 默认 ~/.natrix/envs
    cache_root: PathBuf,
    workspace_root: PathBuf,
    /// 配置给的默认版本 (文档没写 pragma 时用)
    default_spec: Option<VersionSpec>,
    system: OnceLock<Option<Arc<EnvironmentHandle>>>,
    cells: Mutex<HashMap<String, BuildCell>>,
}

impl EnvironmentManager {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        workspace_root: PathBuf,
        default_spec: Option<VersionSpec>,
    ) -> Self {
        let cache_root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".natrix")
            .join("envs");
        Self::with_cache_root(provisioner, workspace_root, default_spec, cache_root)
    }

    pub fn with_cache_root(
        provisioner: Arc<dyn Provisioner>,
        workspace_root: PathBuf,
        default_spec: Option<VersionSpec>,
        cache_root: PathBuf,
    ) -> Self {
        Self {
            provisioner,
            cache_root,
            workspace_root,
            default_spec,
            system: OnceLock::new(),
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// 文档没写 pragma 时决定用什么版本:
    /// 默认配置 > 宿主已装的版本 > 报错。
    pub fn resolve_spec(
        &self,
        pragma: Option<&VersionSpec>,
    ) -> Result<VersionSpec, EnvironmentError> {
        if let Some(spec) = pragma {
            return Ok(spec.clone());
        }
        if let Some(default) = &self.default_spec {
            return Ok(default.clone());
        }
        if let Some(system) = self.system_handle() {
            return Ok(VersionSpec::exact(system.version.clone()));
        }
        Err(EnvironmentError::VersionResolution(
            "no version pragma, no configured default, and no compiler on the host".into(),
        ))
    }

    /// 拿到满足约束的环境。宿主版本满足就直接用它, 否则按 pinned
    /// 版本建 (或复用) 沙箱。
    pub fn resolve(&self, spec: &VersionSpec) -> Result<Arc<EnvironmentHandle>, EnvironmentError> {
        if let Some(system) = self.system_handle() {
            if spec.matches(&system.version) {
                return Ok(system);
            }
        }
        self.sandbox(&spec.pinned)
    }

    fn system_handle(&self) -> Option<Arc<EnvironmentHandle>> {
        self.system
            .get_or_init(|| {
                let version = self.provisioner.installed_version()?;
                let mut search_paths = self.provisioner.host_search_paths();
                search_paths.insert(0, self.workspace_root.clone());
                log::info!("host compiler detected: {version}");
                Some(Arc::new(EnvironmentHandle {
                    kind: EnvironmentKind::System,
                    version,
                    search_paths,
                    root: None,
                    provisioner: Arc::clone(&self.provisioner),
                }))
            })
            .clone()
    }

    fn sandbox(&self, version: &Version) -> Result<Arc<EnvironmentHandle>, EnvironmentError> {
        let key = version.to_string();
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(cells.entry(key.clone()).or_default())
        };

        let result = cell
            .get_or_init(|| self.build_sandbox(version))
            .clone();

        // 失败不留缓存, 下一次请求重新尝试安装
        if result.is_err() {
            let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(current) = cells.get(&key) {
                if Arc::ptr_eq(current, &cell) {
                    cells.remove(&key);
                }
            }
        }
        result
    }

    fn build_sandbox(&self, version: &Version) -> Result<Arc<EnvironmentHandle>, EnvironmentError> {
        let root = self.cache_root.join(version.to_string());

        // 目录在就视为装好了 (安装失败的残渣会被当场清掉, 见下)
        if !root.is_dir() {
            log::info!("building sandbox for compiler {version} at {}", root.display());
            if let Err(reason) = self.provisioner.build(version, &root) {
                let _ = std::fs::remove_dir_all(&root);
                return Err(EnvironmentError::Build {
                    version: version.to_string(),
                    reason,
                });
            }
        } else {
            log::debug!("reusing cached sandbox at {}", root.display());
        }

        Ok(Arc::new(EnvironmentHandle {
            kind: EnvironmentKind::Sandbox,
            version: version.clone(),
            search_paths: vec![self.workspace_root.clone()],
            root: Some(root),
            provisioner: Arc::clone(&self.provisioner),
        }))
    }
}

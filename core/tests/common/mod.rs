//! 集成测试的共用假件: 不碰真实包管理器的 Provisioner,
//! 以及拼后端 JSON AST 的小工具。
#![allow(dead_code)]

use natrix::environment::{EnvironmentHandle, Provisioner};
use semver::Version;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// 假后端: AST 按文件名预先注册, build 只建目录。
pub struct FakeProvisioner {
    installed: Option<Version>,
    host_paths: Vec<PathBuf>,
    pub build_calls: AtomicUsize,
    build_delay: Duration,
    fail_builds: AtomicBool,
    asts: Mutex<HashMap<String, String>>,
    parse_delays: Mutex<HashMap<String, Duration>>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self {
            installed: None,
            host_paths: Vec::new(),
            build_calls: AtomicUsize::new(0),
            build_delay: Duration::ZERO,
            fail_builds: AtomicBool::new(false),
            asts: Mutex::new(HashMap::new()),
            parse_delays: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_installed(version: Version) -> Self {
        Self {
            installed: Some(version),
            ..Self::new()
        }
    }

    pub fn with_host_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.host_paths = paths;
        self
    }

    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = delay;
        self
    }

    pub fn set_fail_builds(&self, fail: bool) {
        self.fail_builds.store(fail, Ordering::SeqCst);
    }

    /// 让某个文件的解析变慢 (模拟真实后端的启动开销)
    pub fn set_parse_delay(&self, file_name: &str, delay: Duration) {
        self.parse_delays
            .lock()
            .unwrap()
            .insert(file_name.to_string(), delay);
    }

    /// 注册某个文件名对应的后端输出
    pub fn set_ast(&self, file_name: &str, ast: Value) {
        self.asts
            .lock()
            .unwrap()
            .insert(file_name.to_string(), ast.to_string());
    }

    pub fn builds(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }
}

impl Provisioner for FakeProvisioner {
    fn installed_version(&self) -> Option<Version> {
        self.installed.clone()
    }

    fn host_search_paths(&self) -> Vec<PathBuf> {
        self.host_paths.clone()
    }

    fn build(&self, _version: &Version, root: &Path) -> Result<(), String> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.build_delay);
        // 先把目录建出来再失败, 验证上层会清掉残渣
        std::fs::create_dir_all(root).map_err(|e| e.to_string())?;
        if self.fail_builds.load(Ordering::SeqCst) {
            return Err("simulated install failure".into());
        }
        Ok(())
    }

    fn invoke_parse(
        &self,
        _env: &EnvironmentHandle,
        _source: &str,
        path: &Path,
    ) -> Result<String, String> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let delay = self.parse_delays.lock().unwrap().get(&file_name).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.asts
            .lock()
            .unwrap()
            .get(&file_name)
            .cloned()
            .ok_or_else(|| format!("no registered ast for {file_name}"))
    }
}

// --- 后端 JSON 节点 ---

pub fn name(id: &str, line: u64, col: u64) -> Value {
    json!({
        "ast_type": "Name", "id": id,
        "lineno": line, "col_offset": col,
        "end_lineno": line, "end_col_offset": col + id.len() as u64,
    })
}

/// `self.attr`, self 起始于 col
pub fn self_attr(attr: &str, line: u64, col: u64) -> Value {
    json!({
        "ast_type": "Attribute", "attr": attr,
        "lineno": line, "col_offset": col,
        "end_lineno": line, "end_col_offset": col + 5 + attr.len() as u64,
        "value": name("self", line, col),
    })
}

/// 模块级状态变量 `x: uint256` (0.4 形状)
pub fn var_decl(var: &str, line: u64, type_name: &str, is_constant: bool) -> Value {
    let ann_col = var.len() as u64 + 2;
    json!({
        "ast_type": "VariableDecl",
        "lineno": line, "col_offset": 0,
        "end_lineno": line, "end_col_offset": ann_col + type_name.len() as u64,
        "target": name(var, line, 0),
        "annotation": name(type_name, line, ann_col),
        "is_constant": is_constant, "is_immutable": false, "is_public": false,
        "value": null,
    })
}

/// `import lib` (vyper 的 Import 节点)
pub fn import_stmt(module_name: &str, line: u64) -> Value {
    json!({
        "ast_type": "Import",
        "lineno": line, "col_offset": 0,
        "end_lineno": line, "end_col_offset": 7 + module_name.len() as u64,
        "name": module_name, "alias": null, "level": 0,
    })
}

pub fn module(end_line: u64, end_col: u64, body: Vec<Value>) -> Value {
    json!({
        "ast_type": "Module",
        "lineno": 1, "col_offset": 0,
        "end_lineno": end_line, "end_col_offset": end_col,
        "body": body,
    })
}

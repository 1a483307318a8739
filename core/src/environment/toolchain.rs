//! 生产环境的 Provisioner: 用 uv 建虚拟环境, 用 python 跑后端。
//!
//! AST 的获取方式是往 python 里灌一段小脚本: 源码走 stdin,
//! JSON 树走 stdout, 报错原样留在 stderr 给上层挖位置。

use crate::environment::{EnvironmentHandle, Provisioner};
use semver::Version;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub struct UvProvisioner;

impl Provisioner for UvProvisioner {
    fn installed_version(&self) -> Option<Version> {
        let output = Command::new("vyper").arg("--version").output().ok()?;
        if !output.status.success() {
            return None;
        }
        parse_version_output(&String::from_utf8_lossy(&output.stdout))
    }

    fn host_search_paths(&self) -> Vec<PathBuf> {
        let output = match Command::new("python3")
            .arg("-c")
            .arg("import json, sys; print(json.dumps(sys.path))")
            .output()
        {
            Ok(output) if output.status.success() => output,
            _ => return Vec::new(),
        };
        serde_json::from_slice::<Vec<String>>(&output.stdout)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    fn build(&self, version: &Version, root: &Path) -> Result<(), String> {
        if let Some(parent) = root.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create cache directory: {e}"))?;
        }

        run(Command::new("uv")
            .arg("venv")
            .arg("--python")
            .arg(python_for(version))
            .arg(root))?;

        let python = root.join("bin").join("python");

        // 老版本的安装脚本在新 setuptools 下会炸
        if *version <= Version::new(0, 2, 7) {
            run(Command::new("uv")
                .arg("pip")
                .arg("install")
                .arg("--python")
                .arg(&python)
                .arg("--upgrade")
                .arg("setuptools"))?;
        }

        run(Command::new("uv")
            .arg("pip")
            .arg("install")
            .arg("--python")
            .arg(&python)
            .arg(format!("vyper=={version}")))?;

        Ok(())
    }

    fn invoke_parse(
        &self,
        env: &EnvironmentHandle,
        source: &str,
        path: &Path,
    ) -> Result<String, String> {
        let python = match &env.root {
            Some(root) => root.join("bin").join("python"),
            None => PathBuf::from("python3"),
        };

        let mut child = Command::new(&python)
            .arg("-c")
            .arg(dump_script(env, path))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to launch {}: {e}", python.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            use std::io::Write;
            if let Err(e) = stdin.write_all(source.as_bytes()) {
                let _ = child.kill();
                return Err(format!("failed to feed source to backend: {e}"));
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| format!("backend did not finish: {e}"))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).into_owned())
        }
    }
}

/// 跑一条安装命令, 失败时把 stderr 原样带回去
fn run(cmd: &mut Command) -> Result<(), String> {
    let output = cmd
        .output()
        .map_err(|e| format!("failed to launch {:?}: {e}", cmd.get_program()))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

/// "0.4.3+commit.abc123" → 0.4.3
fn parse_version_output(text: &str) -> Option<Version> {
    let token = text.split_whitespace().next()?;
    let core = token.split('+').next()?;
    Version::parse(core).ok()
}

/// 旧后端在新解释器上装不动
fn python_for(version: &Version) -> &'static str {
    if *version < Version::new(0, 3, 0) {
        "3.8"
    } else if *version < Version::new(0, 3, 8) {
        "3.9"
    } else {
        "3.10"
    }
}

/// 生成 AST 导出脚本。0.4.1 起后端能顺带解析 import 并把目标路径
/// 写进 import_info, 老版本只有裸树。
fn dump_script(env: &EnvironmentHandle, path: &Path) -> String {
    // 路径和搜索路径都经 JSON 转义后嵌入, 防注入也防奇怪的文件名
    let module_path = serde_json::to_string(&path.to_string_lossy()).unwrap_or_else(|_| "null".into());
    if env.version >= Version::new(0, 4, 1) {
        let search_paths = serde_json::to_string(
            &env.search_paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".into());
        format!(
            r#"
import json, sys
from pathlib import Path
from vyper.ast import parse_to_ast
from vyper.ast.utils import ast_to_dict
from vyper.compiler.input_bundle import FilesystemInputBundle
from vyper.semantics.analysis.imports import resolve_imports

src = sys.stdin.read()
module = parse_to_ast(src, module_path={module_path})
try:
    resolve_imports(module, FilesystemInputBundle([Path(p) for p in {search_paths}]))
except Exception:
    pass
print(json.dumps(ast_to_dict(module)))
"#
        )
    } else {
        format!(
            r#"
import json, sys
from vyper.ast import parse_to_ast
from vyper.ast.utils import ast_to_dict

src = sys.stdin.read()
print(json.dumps(ast_to_dict(parse_to_ast(src, module_path={module_path}))))
"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_output_with_commit_suffix() {
        assert_eq!(
            parse_version_output("0.4.3+commit.bff19ea2\n"),
            Some(Version::new(0, 4, 3))
        );
        assert_eq!(
            parse_version_output("0.3.7\n"),
            Some(Version::new(0, 3, 7))
        );
        assert_eq!(parse_version_output("not a version"), None);
    }

    #[test]
    fn run_surfaces_stderr_on_failure() {
        assert!(run(Command::new("sh").arg("-c").arg("exit 0")).is_ok());
        let err = run(Command::new("sh").arg("-c").arg("echo boom >&2; exit 1")).unwrap_err();
        assert!(err.contains("boom"));
    }

    #[test]
    fn python_choice_tracks_backend_age() {
        assert_eq!(python_for(&Version::new(0, 2, 16)), "3.8");
        assert_eq!(python_for(&Version::new(0, 3, 7)), "3.9");
        assert_eq!(python_for(&Version::new(0, 4, 3)), "3.10");
    }
}

use regex::Regex;
use semver::{Version, VersionReq};
use std::sync::OnceLock;

/// 从 pragma 中提取出的版本约束。
/// pinned 是 pragma 写明的那个具体版本 (沙箱安装就装它),
/// req 是按操作符展开的约束 (用来判断宿主版本是否满足)。
#[derive(Debug, Clone)]
pub struct VersionSpec {
    pub raw: String,
    pub pinned: Version,
    pub req: VersionReq,
}

impl VersionSpec {
    /// 精确指定一个版本 (配置里的默认版本走这条路)
    pub fn exact(version: Version) -> Self {
        let req = exact_req(&version);
        Self {
            raw: version.to_string(),
            pinned: version,
            req,
        }
    }

    pub fn matches(&self, installed: &Version) -> bool {
        self.req.matches(installed)
    }
}

/// `# pragma version ^0.4.0` / `# @version 0.3.7` 两种写法都认
fn pragma_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*#\s*(?:@version|pragma\s+version)\s*([=<>!~^]*)\s*(\d+\.\d+\.\d+)")
            .unwrap()
    })
}

/// 在源码里找版本 pragma。没有返回 None (由调用方决定走默认版本还是报错)。
pub fn extract_pragma(source: &str) -> Option<VersionSpec> {
    let caps = pragma_regex().captures(source)?;
    let ops = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
    let raw_version = caps.get(2)?.as_str();
    let pinned = Version::parse(raw_version).ok()?;

    // semver 不认 "=="; "!=" 之类解析不了的就退化成精确匹配
    let req_src = match ops {
        "" | "==" => format!("={raw_version}"),
        _ => format!("{ops}{raw_version}"),
    };
    let req = VersionReq::parse(&req_src).unwrap_or_else(|_| exact_req(&pinned));

    Some(VersionSpec {
        raw: caps.get(0).map(|m| m.as_str().trim().to_string())?,
        pinned,
        req,
    })
}

fn exact_req(version: &Version) -> VersionReq {
    VersionReq::parse(&format!("={version}")).unwrap_or(VersionReq::STAR)
}

//! 环境管理的行为测试: 缓存、并发去重、失败重试。

mod common;

use common::FakeProvisioner;
use natrix::environment::{EnvironmentError, EnvironmentKind, EnvironmentManager};
use natrix::version::{VersionSpec, extract_pragma};
use semver::Version;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn manager(
    provisioner: Arc<FakeProvisioner>,
    cache_root: PathBuf,
    default_spec: Option<VersionSpec>,
) -> EnvironmentManager {
    EnvironmentManager::with_cache_root(
        provisioner,
        PathBuf::from("/workspace"),
        default_spec,
        cache_root,
    )
}

#[test]
fn host_compiler_satisfies_matching_pragma() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = Arc::new(
        FakeProvisioner::with_installed(Version::new(0, 4, 3))
            .with_host_paths(vec![PathBuf::from("/usr/lib/python3/site-packages")]),
    );
    let manager = manager(provisioner.clone(), dir.path().to_path_buf(), None);

    let spec = extract_pragma("# pragma version ^0.4.0\n").unwrap();
    let first = manager.resolve(&spec).unwrap();
    let second = manager.resolve(&spec).unwrap();

    assert_eq!(first.kind, EnvironmentKind::System);
    assert_eq!(first.version, Version::new(0, 4, 3));
    // 同一个句柄, 不是每次新建
    assert!(Arc::ptr_eq(&first, &second));
    // workspace 根排在宿主搜索路径前面
    assert_eq!(first.search_paths[0], PathBuf::from("/workspace"));
    assert!(
        first
            .search_paths
            .contains(&PathBuf::from("/usr/lib/python3/site-packages"))
    );
    assert_eq!(provisioner.builds(), 0);
}

#[test]
fn mismatched_pragma_gets_a_sandbox() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = Arc::new(FakeProvisioner::with_installed(Version::new(0, 4, 3)));
    let manager = manager(provisioner.clone(), dir.path().to_path_buf(), None);

    let spec = extract_pragma("# @version 0.3.7\n").unwrap();
    let env = manager.resolve(&spec).unwrap();

    assert_eq!(env.kind, EnvironmentKind::Sandbox);
    assert_eq!(env.version, Version::new(0, 3, 7));
    assert_eq!(env.root.as_deref(), Some(dir.path().join("0.3.7").as_path()));
    // 沙箱只从 workspace 找 import
    assert_eq!(env.search_paths, vec![PathBuf::from("/workspace")]);
    assert_eq!(provisioner.builds(), 1);
}

#[test]
fn concurrent_requests_build_once() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = Arc::new(FakeProvisioner::new().with_build_delay(Duration::from_millis(50)));
    let manager = manager(provisioner.clone(), dir.path().to_path_buf(), None);
    let spec = VersionSpec::exact(Version::new(0, 3, 10));

    let handles: Vec<_> = std::thread::scope(|scope| {
        let threads: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| manager.resolve(&spec).unwrap()))
            .collect();
        threads.into_iter().map(|t| t.join().unwrap()).collect()
    });

    assert_eq!(provisioner.builds(), 1);
    for env in &handles[1..] {
        assert!(Arc::ptr_eq(&handles[0], env));
    }
}

#[test]
fn sandbox_survives_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let spec = VersionSpec::exact(Version::new(0, 3, 10));

    let first = Arc::new(FakeProvisioner::new());
    manager(first.clone(), dir.path().to_path_buf(), None)
        .resolve(&spec)
        .unwrap();
    assert_eq!(first.builds(), 1);

    // 新 manager (模拟重启) 看到目录直接复用
    let second = Arc::new(FakeProvisioner::new());
    let env = manager(second.clone(), dir.path().to_path_buf(), None)
        .resolve(&spec)
        .unwrap();
    assert_eq!(second.builds(), 0);
    assert_eq!(env.kind, EnvironmentKind::Sandbox);
}

#[test]
fn failed_build_is_cleaned_up_and_retried() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = Arc::new(FakeProvisioner::new());
    let manager = manager(provisioner.clone(), dir.path().to_path_buf(), None);
    let spec = VersionSpec::exact(Version::new(0, 3, 10));

    provisioner.set_fail_builds(true);
    let err = manager.resolve(&spec).unwrap_err();
    assert!(matches!(err, EnvironmentError::Build { .. }));
    // 半成品目录被清掉, 不会被下次当成缓存命中
    assert!(!dir.path().join("0.3.10").exists());

    provisioner.set_fail_builds(false);
    let env = manager.resolve(&spec).unwrap();
    assert_eq!(env.version, Version::new(0, 3, 10));
    assert_eq!(provisioner.builds(), 2);
}

#[test]
fn version_fallback_order() {
    let dir = tempfile::tempdir().unwrap();

    // pragma 优先
    let provisioner = Arc::new(FakeProvisioner::with_installed(Version::new(0, 4, 3)));
    let with_default = manager(
        provisioner,
        dir.path().to_path_buf(),
        Some(VersionSpec::exact(Version::new(0, 3, 7))),
    );
    let pragma = extract_pragma("# pragma version ^0.4.0\n").unwrap();
    assert_eq!(
        with_default.resolve_spec(Some(&pragma)).unwrap().pinned,
        Version::new(0, 4, 0)
    );
    // 没 pragma → 配置的默认版本
    assert_eq!(
        with_default.resolve_spec(None).unwrap().pinned,
        Version::new(0, 3, 7)
    );

    // 没默认 → 宿主版本
    let provisioner = Arc::new(FakeProvisioner::with_installed(Version::new(0, 4, 3)));
    let without_default = manager(provisioner, dir.path().to_path_buf(), None);
    assert_eq!(
        without_default.resolve_spec(None).unwrap().pinned,
        Version::new(0, 4, 3)
    );

    // 什么都没有 → 报错
    let provisioner = Arc::new(FakeProvisioner::new());
    let bare = manager(provisioner, dir.path().to_path_buf(), None);
    assert!(matches!(
        bare.resolve_spec(None),
        Err(EnvironmentError::VersionResolution(_))
    ));
}

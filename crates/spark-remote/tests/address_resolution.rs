//! 集成测试：容器文件地址策略与策略描述的跨进程传递。
//!
//! ## 设计意图（Why）
//! - 容器内进程的通告地址由宿主写入文件，只能读取一次；若重复读取，宿主改写文件会导致
//!   同一进程前后通告不同地址，驱动器登记的标识随之失效。
//! - 父进程以 `describe()` 产出的描述片段传给子进程，子进程必须能够重建等价策略。
//!
//! ## 测试策略（How）
//! - 借助 `tempfile` 创建地址文件，解析后改写文件再次解析；
//! - 描述片段经 `serde_json` 序列化再反序列化，模拟跨进程传递。

use std::{fs, io::Write};

use spark_remote::{
    ContainerFileResolver, ErrorKind, LocalAddressResolver, LoopbackResolver, PathSource,
    ResolverDescriptor,
};

/// 首次解析后缓存结果，文件改写不影响后续解析。
#[test]
fn container_address_is_read_once_and_cached() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("host_ip");
    fs::write(&path, "10.0.0.5\n").expect("write address file");

    let resolver = ContainerFileResolver::with_source(PathSource::Fixed(path.clone()));
    assert_eq!(resolver.resolve().expect("first resolve"), "10.0.0.5");

    fs::write(&path, "10.0.0.6").expect("overwrite address file");
    assert_eq!(resolver.resolve().expect("cached resolve"), "10.0.0.5");

    // 文件被删除后仍返回缓存值。
    fs::remove_file(&path).expect("remove address file");
    assert_eq!(resolver.resolve().expect("cached resolve"), "10.0.0.5");
}

/// 失败不会被缓存：文件出现后下一次解析成功。
#[test]
fn failed_resolution_is_retried_on_next_call() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("late_host_ip");
    let resolver = ContainerFileResolver::with_source(PathSource::Fixed(path.clone()));

    let err = resolver.resolve().expect_err("file does not exist yet");
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.code(), "spark.remote.configuration");

    fs::write(&path, "  192.168.7.1  ").expect("write address file");
    assert_eq!(resolver.resolve().expect("resolve"), "192.168.7.1");
}

/// 空文件属于配置错误。
#[test]
fn empty_address_file_is_rejected() {
    let file = tempfile::NamedTempFile::new().expect("temp file");
    let resolver = ContainerFileResolver::with_source(PathSource::Fixed(file.path().to_path_buf()));
    assert_eq!(
        resolver.resolve().expect_err("empty").kind(),
        ErrorKind::Configuration
    );
}

/// 描述片段可序列化传递，子进程据此重建同一策略。
#[test]
fn descriptor_survives_serialization() {
    let descriptor = LoopbackResolver.describe().expect("describe");
    let json = serde_json::to_string(&descriptor).expect("serialize");
    assert_eq!(json, r#"{"strategy":"loopback"}"#);

    let restored: ResolverDescriptor = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(restored, ResolverDescriptor::Loopback);
    assert_eq!(restored.build().resolve().expect("resolve"), "127.0.0.1");

    let container: ResolverDescriptor =
        serde_json::from_str(r#"{"strategy":"container","host_address":"10.1.1.1"}"#)
            .expect("deserialize container");
    assert_eq!(container.host_address(), Some("10.1.1.1"));
}

/// 环境变量给出地址文件路径，解析结果为去除空白后的文件内容。
#[test]
fn environment_variable_points_at_address_file() {
    const VARIABLE: &str = "SPARK_REMOTE_TEST_HOST_IP_ADDR_PATH";
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, " 172.16.0.8 ").expect("write address file");
    // SAFETY: 变量名只在本测试中使用，没有其它线程读写它。
    unsafe { std::env::set_var(VARIABLE, file.path()) };

    let resolver = ContainerFileResolver::with_source(PathSource::Env(VARIABLE.to_owned()));
    assert_eq!(resolver.resolve().expect("resolve through env"), "172.16.0.8");

    // SAFETY: 同上。
    unsafe { std::env::remove_var(VARIABLE) };
    assert_eq!(resolver.resolve().expect("cached after env removal"), "172.16.0.8");
}

/// 容器策略的描述携带父进程经主机名解析出的地址；沙箱内 DNS 不可用时返回解析错误。
#[test]
fn container_descriptor_carries_resolved_host() {
    let resolver = ContainerFileResolver::from_env();
    match resolver.describe() {
        Ok(descriptor) => {
            assert!(matches!(
                descriptor,
                ResolverDescriptor::Container { host_address: Some(_) }
            ));
            assert!(descriptor.host_address().is_some_and(|host| !host.is_empty()));
        }
        Err(err) => assert_eq!(err.code(), "spark.remote.address_resolution"),
    }
}

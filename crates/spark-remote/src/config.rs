//! # TransportConfig：传输配置快照
//!
//! ## 核心意图（Why）
//! - 以显式、静态类型的结构体承载传输所需的全部配置值，由 Builder 一次性构造并校验，
//!   之后按值传入构造函数，不再修改；
//! - 派生 serde，使外部配置系统（TOML/JSON 等）可直接加载，时长统一以毫秒表示。
//!
//! ## 行为契约（What）
//! - `host_address`：通告主机，`None` 表示绑定时由 `LocalAddressResolver` 解析；
//! - `listen_port`：请求的监听端口，0 表示按 `port_allocator` 自动选择；
//! - `retry`：建连重试次数与固定退避；
//! - `ordering_guarantee`：链路写入是否按提交顺序串行化；
//! - `socket`/`pools`：套接字选项与 boss/worker 线程池规模；
//! - `shutdown_grace`：关闭时等待每个线程池退出的上限。

use std::{net::IpAddr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::RemoteError, ports::PortAllocator};

/// 建连重试策略：最多 `retries + 1` 次尝试，相邻尝试之间固定等待 `backoff`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retries: u32,
    #[serde(rename = "backoff_ms", with = "millis")]
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_RETRIES: u32 = 3;
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(10_000);

    pub const fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    /// 总尝试次数。
    pub const fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RETRIES, Self::DEFAULT_BACKOFF)
    }
}

/// 套接字选项：客户端与服务端均启用地址复用与 keep-alive，服务端额外限制 backlog。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketOptions {
    pub reuse_address: bool,
    pub keep_alive: bool,
    pub backlog: u32,
    #[serde(rename = "connect_timeout_ms", with = "opt_millis")]
    pub connect_timeout: Option<Duration>,
    pub max_frame_length: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reuse_address: true,
            keep_alive: true,
            backlog: 128,
            connect_timeout: None,
            max_frame_length: 64 * 1024 * 1024,
        }
    }
}

/// 线程池规模：接受连接、服务端数据、客户端数据三个角色分别配置。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSizes {
    pub server_boss: usize,
    pub server_worker: usize,
    pub client_worker: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            server_boss: 3,
            server_worker: 20,
            client_worker: 10,
        }
    }
}

/// 传输配置快照，构造后不可变。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub host_address: Option<String>,
    pub listen_port: u16,
    pub retry: RetryPolicy,
    pub ordering_guarantee: bool,
    pub port_allocator: PortAllocator,
    pub socket: SocketOptions,
    pub pools: PoolSizes,
    #[serde(rename = "shutdown_grace_ms", with = "millis")]
    pub shutdown_grace: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host_address: None,
            listen_port: 0,
            retry: RetryPolicy::default(),
            ordering_guarantee: true,
            port_allocator: PortAllocator::default(),
            socket: SocketOptions::default(),
            pools: PoolSizes::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl TransportConfig {
    /// 以默认值开始构建。
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder {
            config: Self::default(),
        }
    }

    /// 基于当前快照派生 Builder，原快照保持不变。
    pub fn to_builder(&self) -> TransportConfigBuilder {
        TransportConfigBuilder {
            config: self.clone(),
        }
    }

    /// 校验配置的一致性。
    pub fn validate(&self) -> Result<(), RemoteError> {
        if let Some(host) = &self.host_address {
            host.parse::<IpAddr>().map_err(|err| {
                RemoteError::configuration(format!("host address `{host}` is not an IP: {err}"))
            })?;
        }
        if self.socket.backlog == 0 {
            return Err(RemoteError::configuration("socket backlog must be positive"));
        }
        if self.socket.max_frame_length == 0 {
            return Err(RemoteError::configuration("max frame length must be positive"));
        }
        let pools = &self.pools;
        if pools.server_boss == 0 || pools.server_worker == 0 || pools.client_worker == 0 {
            return Err(RemoteError::configuration(format!(
                "thread pool sizes must be positive, got {pools:?}"
            )));
        }
        Ok(())
    }
}

/// [`TransportConfig`] 的建造器。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 每个 `with_*` 方法消费并返回 Builder，便于链式调用；
/// - [`TransportConfigBuilder::build`] 校验后产出快照，校验失败返回 [`RemoteError::Configuration`]。
///
/// ## 注意事项（Trade-offs）
/// - Builder 被消费后无法复用，若需不同配置请从快照重新 [`TransportConfig::to_builder`]。
#[derive(Clone, Debug)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    pub fn with_host_address(mut self, host: impl Into<String>) -> Self {
        self.config.host_address = Some(host.into());
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.config.listen_port = port;
        self
    }

    pub fn with_retry(mut self, retries: u32, backoff: Duration) -> Self {
        self.config.retry = RetryPolicy::new(retries, backoff);
        self
    }

    pub fn with_ordering_guarantee(mut self, ordered: bool) -> Self {
        self.config.ordering_guarantee = ordered;
        self
    }

    pub fn with_port_allocator(mut self, allocator: PortAllocator) -> Self {
        self.config.port_allocator = allocator;
        self
    }

    pub fn with_socket_options(mut self, socket: SocketOptions) -> Self {
        self.config.socket = socket;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.socket.connect_timeout = timeout;
        self
    }

    pub fn with_pools(mut self, pools: PoolSizes) -> Self {
        self.config.pools = pools;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn build(self) -> Result<TransportConfig, RemoteError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documented_values() {
        let config = TransportConfig::builder().build().expect("defaults are valid");
        assert_eq!(config.listen_port, 0);
        assert_eq!(config.retry.retries, 3);
        assert_eq!(config.retry.backoff, Duration::from_millis(10_000));
        assert_eq!(config.retry.attempts(), 4);
        assert!(config.ordering_guarantee);
        assert_eq!(config.port_allocator, PortAllocator::range(10_000, 10_000));
        assert_eq!(config.socket.backlog, 128);
        assert_eq!(config.pools, PoolSizes::default());
    }

    #[test]
    fn builder_rejects_invalid_values() {
        assert!(TransportConfig::builder().with_host_address("not-an-ip").build().is_err());
        let pools = PoolSizes {
            server_boss: 0,
            ..PoolSizes::default()
        };
        assert!(TransportConfig::builder().with_pools(pools).build().is_err());
    }

    #[test]
    fn to_builder_leaves_snapshot_untouched() {
        let base = TransportConfig::builder()
            .with_listen_port(7000)
            .build()
            .expect("valid");
        let derived = base.to_builder().with_listen_port(7001).build().expect("valid");
        assert_eq!(base.listen_port, 7000);
        assert_eq!(derived.listen_port, 7001);
    }

    #[test]
    fn loads_partial_json_with_defaults() {
        let config: TransportConfig = serde_json::from_str(
            r#"{
                "host_address": "10.0.0.5",
                "retry": { "retries": 1, "backoff_ms": 250 },
                "port_allocator": { "strategy": "list", "ports": [2000, 2001] },
                "socket": { "connect_timeout_ms": 1500 }
            }"#,
        )
        .expect("deserialize");
        assert_eq!(config.host_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.retry, RetryPolicy::new(1, Duration::from_millis(250)));
        assert_eq!(config.port_allocator, PortAllocator::list([2000, 2001]));
        assert_eq!(config.socket.connect_timeout, Some(Duration::from_millis(1500)));
        assert!(config.socket.keep_alive);
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        config.validate().expect("valid");
    }
}

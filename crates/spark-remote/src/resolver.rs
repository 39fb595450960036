//! # 本地可通告地址解析
//!
//! ## 定位与职责（Why）
//! - 进程需要把“对端可达”的 IP 写入自己的标识（`host:port`），供驱动器或外部调度器登记；
//! - 不同部署形态给出这个 IP 的方式不同：物理机/虚机走主机名解析，测试走回环地址，
//!   容器内的进程由宿主把 IP 写进文件，再通过环境变量告知文件路径。
//!
//! ## 行为契约（What）
//! - [`LocalAddressResolver::resolve`] 返回 IP 字符串；
//! - [`LocalAddressResolver::describe`] 返回 [`ResolverDescriptor`]，用于把策略传递给子进程，
//!   子进程以 [`ResolverDescriptor::build`] 重建同一策略。
//!
//! ## 风险提示（Trade-offs）
//! - 容器策略只在首次解析时读取文件，此后文件变化不会被感知；
//! - 主机名策略每次调用都会查询 DNS，调用方应自行缓存结果。

use std::{
    env, fmt, fs,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::RemoteError;

/// 容器策略读取的环境变量名，值为记录宿主 IP 的文件路径。
pub const HOST_IP_ADDR_PATH_ENV: &str = "HOST_IP_ADDR_PATH";

/// 本地可通告地址解析策略。
pub trait LocalAddressResolver: Send + Sync + fmt::Debug {
    /// 解析本进程应向对端通告的 IP 地址。
    fn resolve(&self) -> Result<String, RemoteError>;

    /// 把当前策略描述为可传递给子进程的配置片段。
    fn describe(&self) -> Result<ResolverDescriptor, RemoteError>;
}

/// 可序列化的解析策略描述。
///
/// - `host_address` 为父进程预先解析出的地址，子进程可将其作为默认通告主机。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ResolverDescriptor {
    /// 主机名解析。
    Hostname,
    /// 回环地址。
    Loopback,
    /// 容器文件。
    Container { host_address: Option<String> },
}

impl ResolverDescriptor {
    /// 根据描述重建解析策略。
    pub fn build(&self) -> Arc<dyn LocalAddressResolver> {
        match self {
            ResolverDescriptor::Hostname => Arc::new(HostnameResolver),
            ResolverDescriptor::Loopback => Arc::new(LoopbackResolver),
            ResolverDescriptor::Container { .. } => Arc::new(ContainerFileResolver::from_env()),
        }
    }

    /// 父进程预先解析出的通告地址（仅容器策略携带）。
    pub fn host_address(&self) -> Option<&str> {
        match self {
            ResolverDescriptor::Container { host_address } => host_address.as_deref(),
            _ => None,
        }
    }
}

/// 通过本机主机名与 DNS 解析出地址，优先选择非回环 IPv4。
#[derive(Clone, Copy, Debug, Default)]
pub struct HostnameResolver;

impl LocalAddressResolver for HostnameResolver {
    fn resolve(&self) -> Result<String, RemoteError> {
        let name = hostname::get().map_err(|err| RemoteError::AddressResolution {
            detail: format!("cannot read hostname: {err}"),
        })?;
        let name = name.to_str().ok_or_else(|| RemoteError::AddressResolution {
            detail: format!("hostname {name:?} is not valid UTF-8"),
        })?;
        let addresses: Vec<IpAddr> = dns_lookup::lookup_host(name)
            .map_err(|err| RemoteError::AddressResolution {
                detail: format!("cannot resolve hostname `{name}`: {err}"),
            })?
            .into_iter()
            .collect();
        let chosen = pick_advertised(&addresses).ok_or_else(|| RemoteError::AddressResolution {
            detail: format!("hostname `{name}` resolved to no address"),
        })?;
        debug!(hostname = name, address = %chosen, "resolved local address from hostname");
        Ok(chosen.to_string())
    }

    fn describe(&self) -> Result<ResolverDescriptor, RemoteError> {
        Ok(ResolverDescriptor::Hostname)
    }
}

fn pick_advertised(addresses: &[IpAddr]) -> Option<IpAddr> {
    addresses
        .iter()
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
        .or_else(|| addresses.iter().find(|ip| !ip.is_loopback()))
        .or_else(|| addresses.first())
        .copied()
}

/// 总是返回 IPv4 回环地址。
#[derive(Clone, Copy, Debug, Default)]
pub struct LoopbackResolver;

impl LocalAddressResolver for LoopbackResolver {
    fn resolve(&self) -> Result<String, RemoteError> {
        Ok(Ipv4Addr::LOCALHOST.to_string())
    }

    fn describe(&self) -> Result<ResolverDescriptor, RemoteError> {
        Ok(ResolverDescriptor::Loopback)
    }
}

/// 文件路径来源。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSource {
    /// 从指定环境变量读取路径。
    Env(String),
    /// 直接给定路径。
    Fixed(PathBuf),
}

/// 容器策略：从文件读取宿主写入的 IP，并在进程生命周期内缓存。
///
/// # 教案式注释
/// - **契约 (What)**：首次 [`resolve`](LocalAddressResolver::resolve) 时读取路径来源与文件内容，
///   去除首尾空白后缓存；之后的调用直接返回缓存值，即使文件已被改写；
/// - **失败语义**：环境变量缺失或为空、路径不存在或不是普通文件、读取失败、内容为空，
///   均返回 [`RemoteError::Configuration`]；失败不会被缓存，下一次调用会重新尝试；
/// - **并发**：解析过程持有内部互斥锁，多个线程同时首次解析时只读取一次文件。
#[derive(Debug)]
pub struct ContainerFileResolver {
    source: PathSource,
    cached: Mutex<Option<String>>,
}

impl ContainerFileResolver {
    /// 从 [`HOST_IP_ADDR_PATH_ENV`] 读取路径。构造时不做任何检查。
    pub fn from_env() -> Self {
        Self::with_source(PathSource::Env(HOST_IP_ADDR_PATH_ENV.to_owned()))
    }

    /// 指定路径来源。
    pub fn with_source(source: PathSource) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    fn locate(&self) -> Result<PathBuf, RemoteError> {
        match &self.source {
            PathSource::Fixed(path) => Ok(path.clone()),
            PathSource::Env(name) => match env::var_os(name) {
                Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
                _ => {
                    let err =
                        RemoteError::configuration(format!("environment variable must be set for {name}"));
                    error!(env = name.as_str(), "{err}");
                    Err(err)
                }
            },
        }
    }

    fn read_address(path: &Path) -> Result<String, RemoteError> {
        if !path.is_file() {
            let err = RemoteError::configuration(format!(
                "host address path points to invalid file: {}",
                path.display()
            ));
            error!(path = %path.display(), "{err}");
            return Err(err);
        }
        let content = fs::read_to_string(path).map_err(|err| {
            error!(path = %path.display(), error = %err, "cannot read host address file");
            RemoteError::configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        let address = content.trim();
        if address.is_empty() {
            return Err(RemoteError::configuration(format!(
                "host address file {} is empty",
                path.display()
            )));
        }
        Ok(address.to_owned())
    }
}

impl LocalAddressResolver for ContainerFileResolver {
    fn resolve(&self) -> Result<String, RemoteError> {
        let mut cached = self.cached.lock();
        if let Some(address) = cached.as_ref() {
            return Ok(address.clone());
        }
        let path = self.locate()?;
        let address = Self::read_address(&path)?;
        debug!(path = %path.display(), address = %address, "cached container host address");
        *cached = Some(address.clone());
        Ok(address)
    }

    fn describe(&self) -> Result<ResolverDescriptor, RemoteError> {
        Ok(ResolverDescriptor::Container {
            host_address: Some(HostnameResolver.resolve()?),
        })
    }
}

use std::{
    fmt,
    io,
    net::{SocketAddr, ToSocketAddrs},
    str::FromStr,
    sync::Arc,
};

use crate::error::RemoteError;

/// `RemoteAddress` 表示远端进程的 `host:port` 端点，是连接缓存的键。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 驱动器、评估器与资源管理器垫片之间以“主机名或 IP + 端口”互相寻址，地址在注册时以字符串形式
///   交换，因此不能直接使用 `std::net::SocketAddr`（后者要求已解析的 IP）。
///
/// ## 合同（What）
/// - 值语义：`Eq`/`Hash` 基于 `host` 与 `port` 的值比较，可安全作为 `DashMap` 键；
/// - 不可变：构造后不提供修改接口，`host` 以 `Arc<str>` 共享，克隆开销为一次引用计数；
/// - `Display` 输出稳定的 `host:port`，IPv6 字面量以方括号包裹。
///
/// ## 设计权衡与风险（Trade-offs）
/// - 主机名大小写不做归一化，`Node-1:80` 与 `node-1:80` 视为不同键；
/// - 解析延迟到 [`RemoteAddress::resolve`]，解析失败属于不可重试错误。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteAddress {
    host: Arc<str>,
    port: u16,
}

impl RemoteAddress {
    /// 以主机与端口构造地址。
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        let host = host.as_ref();
        let host = host
            .strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(host);
        Self {
            host: Arc::from(host),
            port,
        }
    }

    /// 主机名或 IP 字面量。
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 端口号。
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 将地址解析为可连接的套接字地址，优先返回 IPv4。
    pub fn resolve(&self) -> io::Result<SocketAddr> {
        let candidates: Vec<SocketAddr> =
            (self.host.as_ref(), self.port).to_socket_addrs()?.collect();
        candidates
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {self}"),
                )
            })
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for RemoteAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for RemoteAddress {
    type Err = RemoteError;

    /// 解析 `host:port` 或 `[v6]:port`。
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| RemoteError::configuration(format!("address `{value}` has no port")))?;
        if host.is_empty() {
            return Err(RemoteError::configuration(format!(
                "address `{value}` has no host"
            )));
        }
        let port = port.parse::<u16>().map_err(|err| {
            RemoteError::configuration(format!("address `{value}` has invalid port: {err}"))
        })?;
        Ok(Self::new(host, port))
    }
}

//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为远程传输层提供统一错误域：绑定失败、建连失败、传输已关闭、通道协议错误、配置错误；
//! - 每个变体都携带稳定错误码（`spark.remote.*`），供告警与日志聚合使用。
//!
//! ## 设计要求（What）
//! - 错误通过 `thiserror::Error` 派生，兼容 `std::error::Error` 与 `?` 传播；
//! - [`ErrorKind`] 提供粗粒度分类，调用方无需匹配字符串即可决定处理策略；
//! - 建连阶段被拒绝的瞬时错误只在重试循环内部消化，不会以独立变体暴露。

use std::io;

use thiserror::Error;

use crate::addr::RemoteAddress;

/// 远程传输层的粗粒度错误分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 监听套接字绑定失败，构造期致命。
    Bind,
    /// 重试预算耗尽后的建连失败。
    Connect,
    /// 传输已关闭，拒绝新的操作。
    Closed,
    /// 已建立通道上的协议/解码错误，经由错误处理器旁路上报。
    Protocol,
    /// 配置缺失或非法，首次使用时快速失败。
    Configuration,
    /// 其余无法归类的 IO 失败。
    Io,
}

/// 远程传输层错误。
///
/// # 教案式说明
/// - **契约 (What)**：所有变体均为 `Send + Sync + 'static`，可跨线程传递给错误处理器；
///   [`RemoteError::code`] 返回稳定错误码，[`RemoteError::kind`] 返回分类。
/// - **传播策略 (How)**：建连错误在本地按预算重试后以 [`RemoteError::Connect`] 抛给 `open` 调用方；
///   已建立通道上的错误以 [`RemoteError::Protocol`] 交给注册的错误处理器，不抛入无关调用栈。
#[derive(Debug, Error)]
pub enum RemoteError {
    /// 显式请求的固定端口无法绑定。
    #[error("cannot bind {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// 候选端口序列耗尽仍未绑定成功。
    #[error("port allocator could not find a free port on {host} after {tried} candidates")]
    NoFreePort { host: String, tried: usize },

    /// 对同一地址的建连在 `attempts` 次尝试后仍被拒绝。
    #[error("connection to {address} refused after {attempts} attempts")]
    Connect {
        address: RemoteAddress,
        attempts: u32,
    },

    /// 传输已经关闭。
    #[error("transport closed")]
    Closed,

    /// 已建立通道上的协议错误。
    #[error("protocol error on channel {remote}: {detail}")]
    Protocol { remote: String, detail: String },

    /// 配置缺失或非法。
    #[error("invalid configuration: {detail}")]
    Configuration { detail: String },

    /// 本地可通告地址无法解析。
    #[error("cannot resolve local address: {detail}")]
    AddressResolution { detail: String },

    /// 附带操作名的底层 IO 失败。
    #[error("{operation} failed: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: io::Error,
    },
}

impl RemoteError {
    /// 构造配置错误。
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration {
            detail: detail.into(),
        }
    }

    /// 构造协议错误。
    pub fn protocol(remote: impl ToString, detail: impl Into<String>) -> Self {
        Self::Protocol {
            remote: remote.to_string(),
            detail: detail.into(),
        }
    }

    /// 为 IO 错误附加操作名。
    pub fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }

    /// 返回错误分类。
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::Bind { .. } | RemoteError::NoFreePort { .. } => ErrorKind::Bind,
            RemoteError::Connect { .. } => ErrorKind::Connect,
            RemoteError::Closed => ErrorKind::Closed,
            RemoteError::Protocol { .. } => ErrorKind::Protocol,
            RemoteError::Configuration { .. } | RemoteError::AddressResolution { .. } => {
                ErrorKind::Configuration
            }
            RemoteError::Io { .. } => ErrorKind::Io,
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            RemoteError::Bind { .. } => "spark.remote.bind_failed",
            RemoteError::NoFreePort { .. } => "spark.remote.no_free_port",
            RemoteError::Connect { .. } => "spark.remote.connect_failed",
            RemoteError::Closed => "spark.remote.closed",
            RemoteError::Protocol { .. } => "spark.remote.protocol",
            RemoteError::Configuration { .. } => "spark.remote.configuration",
            RemoteError::AddressResolution { .. } => "spark.remote.address_resolution",
            RemoteError::Io { .. } => "spark.remote.io",
        }
    }
}

/// 判断 IO 错误是否属于“连接被拒绝”类，可在重试循环内消化。
pub fn is_connect_refused(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::ConnectionRefused)
}

/// 判断 IO 错误是否属于“地址已被占用”类，绑定探测时跳过该端口。
pub fn is_addr_in_use(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::AddrInUse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_kinds_are_stable() {
        let err = RemoteError::Connect {
            address: RemoteAddress::new("10.0.0.1", 7000),
            attempts: 4,
        };
        assert_eq!(err.code(), "spark.remote.connect_failed");
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert_eq!(
            err.to_string(),
            "connection to 10.0.0.1:7000 refused after 4 attempts"
        );

        let err = RemoteError::NoFreePort {
            host: "127.0.0.1".into(),
            tried: 3,
        };
        assert_eq!(err.kind(), ErrorKind::Bind);
        assert_eq!(RemoteError::Closed.kind(), ErrorKind::Closed);
        assert_eq!(
            RemoteError::configuration("missing").kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn refused_and_in_use_classification() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(is_connect_refused(&refused));
        assert!(!is_connect_refused(&reset));
        assert!(is_addr_in_use(&io::Error::from(io::ErrorKind::AddrInUse)));
        assert!(!is_addr_in_use(&io::Error::from(
            io::ErrorKind::AddrNotAvailable
        )));
    }
}

use std::{
    fmt,
    net::{IpAddr, SocketAddr, TcpListener as StdTcpListener},
};

use spark_remote::{PortAllocator, RemoteError, SocketOptions, error::is_addr_in_use};
use tracing::{debug, error, trace};

use crate::socket;

/// 监听套接字绑定器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 进程可能与同机的其它进程共享一段端口区间，固定端口并不总是可用；
///   绑定器在“指定端口”与“按候选序列探测”两种模式之间选择，为传输确定永久的监听地址。
///
/// ## 逻辑 (How)
/// - `requested_port != 0`：只尝试该端口，失败即返回 [`RemoteError::Bind`]；
/// - `requested_port == 0`：按 [`PortAllocator::candidates`] 顺序逐个绑定，
///   “地址已被占用”跳过，其它错误立即返回；序列耗尽返回 [`RemoteError::NoFreePort`]。
///
/// ## 契约 (What)
/// - 成功返回的 [`BoundListener`] 已处于监听状态，端口在其生命周期内不变；
/// - 每次 [`ListeningSocketBinder::bind`] 都从候选序列的开头重新开始。
///
/// ## 注意事项 (Trade-offs)
/// - 探测与绑定之间不存在竞争窗口：探测即绑定，成功者直接保留套接字。
#[derive(Clone)]
pub struct ListeningSocketBinder {
    host: IpAddr,
    allocator: PortAllocator,
    options: SocketOptions,
}

impl ListeningSocketBinder {
    pub fn new(host: IpAddr, allocator: PortAllocator, options: SocketOptions) -> Self {
        Self {
            host,
            allocator,
            options,
        }
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    /// 绑定监听套接字，`requested_port` 为 0 表示按候选序列自动选择。
    pub fn bind(&self, requested_port: u16) -> Result<BoundListener, RemoteError> {
        if requested_port != 0 {
            return self.bind_port(requested_port).map_err(|source| {
                error!(host = %self.host, port = requested_port, error = %source, "cannot bind requested port");
                RemoteError::Bind {
                    host: self.host.to_string(),
                    port: requested_port,
                    source,
                }
            });
        }

        let mut tried = 0usize;
        for port in self.allocator.candidates() {
            tried += 1;
            match self.bind_port(port) {
                Ok(bound) => {
                    debug!(host = %self.host, port, tried, allocator = %self.allocator, "bound listening socket");
                    return Ok(bound);
                }
                Err(err) if is_addr_in_use(&err) => {
                    trace!(host = %self.host, port, "port in use, trying next candidate");
                }
                Err(source) => {
                    error!(host = %self.host, port, error = %source, "bind failed while probing candidates");
                    return Err(RemoteError::Bind {
                        host: self.host.to_string(),
                        port,
                        source,
                    });
                }
            }
        }
        error!(host = %self.host, tried, allocator = %self.allocator, "no free port found");
        Err(RemoteError::NoFreePort {
            host: self.host.to_string(),
            tried,
        })
    }

    fn bind_port(&self, port: u16) -> std::io::Result<BoundListener> {
        let listener = socket::listen(SocketAddr::new(self.host, port), &self.options)?;
        let local = listener.local_addr()?;
        Ok(BoundListener { listener, local })
    }
}

impl fmt::Debug for ListeningSocketBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListeningSocketBinder")
            .field("host", &self.host)
            .field("allocator", &self.allocator.to_string())
            .finish()
    }
}

/// 已进入监听状态的套接字及其实际地址。
#[derive(Debug)]
pub struct BoundListener {
    listener: StdTcpListener,
    local: SocketAddr,
}

impl BoundListener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn port(&self) -> u16 {
        self.local.port()
    }

    pub(crate) fn into_std(self) -> StdTcpListener {
        self.listener
    }
}

//! 基于 `socket2` 的套接字构造。
//!
//! 标准库与 Tokio 的 `bind`/`connect` 不暴露 backlog、keep-alive 与建连超时，
//! 这里先以 `socket2::Socket` 完成配置与系统调用，再转换为标准库类型交给运行时注册。

use std::{
    io,
    net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream},
};

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use spark_remote::SocketOptions;
use tokio::net::TcpStream;

/// 创建并绑定监听套接字。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 启用 `SO_REUSEADDR` 与 `SO_KEEPALIVE`（按 `options`），随后 `bind` 并以 `backlog` 进入监听；
/// - 返回的监听器处于非阻塞模式，可直接交给 `tokio::net::TcpListener::from_std`；
/// - 端口被占用时返回 `io::ErrorKind::AddrInUse`，由绑定器决定是否跳过。
///
/// ## 注意事项（Trade-offs）
/// - Linux 上即使设置了 `SO_REUSEADDR`，仍无法绑定已有监听者的端口，这正是探测逻辑所依赖的行为。
pub(crate) fn listen(addr: SocketAddr, options: &SocketOptions) -> io::Result<StdTcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(options.reuse_address)?;
    socket.set_keepalive(options.keep_alive)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(options.backlog).unwrap_or(i32::MAX))?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// 在调用线程上阻塞建连。
///
/// - `connect_timeout` 为 `None` 时使用操作系统默认超时；
/// - 建连成功后切换为非阻塞模式，供 `TcpStream::from_std` 注册。
pub(crate) fn connect(addr: SocketAddr, options: &SocketOptions) -> io::Result<StdTcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(options.reuse_address)?;
    socket.set_keepalive(options.keep_alive)?;
    match options.connect_timeout {
        Some(timeout) => socket.connect_timeout(&addr.into(), timeout)?,
        None => socket.connect(&addr.into())?,
    }
    let stream: StdTcpStream = socket.into();
    stream.set_nodelay(true)?;
    stream.set_nonblocking(true)?;
    Ok(stream)
}

/// 为接受的入站连接应用选项。
pub(crate) fn configure_accepted(stream: &TcpStream, options: &SocketOptions) -> io::Result<()> {
    SockRef::from(stream).set_keepalive(options.keep_alive)?;
    stream.set_nodelay(true)
}

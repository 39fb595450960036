#![doc = r#"
# spark-remote-tcp

## 设计动机（Why）
- **定位**：在 Tokio 运行时上实现远程消息的 TCP 传输：监听端口选择、按地址缓存的出站链路、
  入站帧分发与整体关闭；
- **架构角色**：`spark-remote` 给出运行时无关的契约与建连算法，本 crate 把它们落到
  socket2/Tokio 上，并提供面向使用者的 [`RemoteManager`] 与 [`RemoteManagerFactory`]。

## 核心契约（What）
- [`Transport::open`] 对同一地址只建连一次，并发调用方得到同一条 [`Link`]；
- [`Transport::close`] 关闭全部通道并等待所有线程池退出，之后的 `open` 返回
  [`RemoteError::Closed`](spark_remote::RemoteError::Closed)；
- 线上帧格式为 4 字节大端长度前缀加负载。

## 实现策略（How）
- boss、服务端、客户端三组线程各自是独立的多线程 Tokio 运行时；
- `open` 在调用线程上以阻塞方式建连（支持退避重试），成功后把套接字注册到客户端运行时；
- 已建立通道上的读写错误经由注册的错误处理器旁路上报，不抛入无关调用栈。

## 风险与考量（Trade-offs）
- `open`/`close` 会阻塞调用线程，不可在异步上下文中调用；
- 无序模式下并发写入者竞争写半部的异步锁，单帧写出保持原子，但帧之间不保证顺序。
"#]

mod binder;
mod channel;
mod error;
mod factory;
mod frame;
mod link;
mod manager;
mod pools;
mod socket;
mod transport;

pub use binder::{BoundListener, ListeningSocketBinder};
pub use factory::{RemoteManagerFactory, RemoteManagerSettings, RemoteOverrides};
pub use link::Link;
pub use manager::{RemoteManager, RemoteMessage};
pub use pools::WorkerPools;
pub use transport::Transport;

#![doc = r#"
# spark-remote

## 设计动机（Why）
- **定位**：远程消息传输的运行时无关层，描述“如何找到对端、如何只建一次连接、
  如何选择监听端口、如何通告本机地址”，不绑定具体的异步运行时；
- **架构角色**：`spark-remote-tcp` 在此之上实现 Tokio 版本的 TCP 传输与
  `RemoteManager`；测试可直接以模拟连接器驱动这里的建连算法。

## 核心契约（What）
- [`ports::PortAllocator`]：区间/列表/集合三种端口候选策略，产出有限且可重新开始的序列；
- [`resolver::LocalAddressResolver`]：主机名、回环、容器文件三种通告地址策略；
- [`cache::LinkCache`] 与 [`cache::ConnectionEstablisher`]：每个地址最多一次在途建连，
  被拒绝时按固定退避重试；
- [`config::TransportConfig`]：不可变配置快照，由 Builder 构造并校验；
- [`error::RemoteError`]：带稳定错误码的统一错误域。

## 风险与考量（Trade-offs）
- 建连算法以阻塞方式运行在调用线程上，不可在事件循环线程中调用；
- 链路缓存仅在链路失活时移除条目，与大量短命对端通信时需关注条目数量。
"#]

pub mod addr;
pub mod cache;
pub mod config;
pub mod error;
pub mod link;
pub mod ports;
pub mod resolver;

pub use addr::RemoteAddress;
pub use cache::{
    ConnectPermit, ConnectionEstablisher, Connector, LinkCache, LinkReference, LinkState,
    RetryPause, ThreadSleep,
};
pub use config::{PoolSizes, RetryPolicy, SocketOptions, TransportConfig, TransportConfigBuilder};
pub use error::{ErrorKind, RemoteError};
pub use link::{
    BytesCodec, ChannelRole, Codec, Decoder, Encoder, ErrorHandler, EventHandler, LinkListener,
    NoopLinkListener, StringCodec, TransportEvent,
};
pub use ports::{PortAllocator, PortCandidates};
pub use resolver::{
    ContainerFileResolver, HOST_IP_ADDR_PATH_ENV, HostnameResolver, LocalAddressResolver,
    LoopbackResolver, PathSource, ResolverDescriptor,
};

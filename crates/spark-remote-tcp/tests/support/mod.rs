//! 集成测试共享的装配工具。
//!
//! - 所有传输都绑定在回环地址上，端口由区间策略探测，测试之间互不冲突；
//! - 入站事件与错误通过 `std::sync::mpsc` 汇集，断言时以超时等待。

#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    time::Duration,
};

use bytes::Bytes;
use spark_remote::{
    EventHandler, LinkListener, LoopbackResolver, PoolSizes, PortAllocator, RemoteAddress,
    RemoteError, RetryPause, TransportConfig, TransportEvent,
};
use spark_remote_tcp::Transport;

pub const WAIT: Duration = Duration::from_secs(5);

/// 小规模线程池与短退避的测试配置。
pub fn config(range_begin: u16) -> TransportConfig {
    TransportConfig::builder()
        .with_port_allocator(PortAllocator::range(range_begin, 2_000))
        .with_retry(2, Duration::from_millis(20))
        .with_pools(PoolSizes {
            server_boss: 1,
            server_worker: 2,
            client_worker: 2,
        })
        .with_shutdown_grace(Duration::from_secs(5))
        .build()
        .expect("valid test config")
}

/// 收集入站事件的处理器。
pub fn collector() -> (Arc<dyn EventHandler<TransportEvent>>, mpsc::Receiver<TransportEvent>) {
    let (tx, rx) = mpsc::channel();
    let handler: Arc<dyn EventHandler<TransportEvent>> = Arc::new(move |event: TransportEvent| {
        let _ = tx.send(event);
    });
    (handler, rx)
}

/// 收集错误的处理器。
pub fn error_collector() -> (Arc<dyn EventHandler<RemoteError>>, mpsc::Receiver<RemoteError>) {
    let (tx, rx) = mpsc::channel();
    let handler: Arc<dyn EventHandler<RemoteError>> = Arc::new(move |err: RemoteError| {
        let _ = tx.send(err);
    });
    (handler, rx)
}

/// 在回环地址上绑定一个字节传输。
pub fn bytes_transport(range_begin: u16) -> (Transport<Bytes>, mpsc::Receiver<TransportEvent>) {
    let (inbound, events) = collector();
    let transport = Transport::bind(config(range_begin), &LoopbackResolver, inbound).expect("bind transport");
    (transport, events)
}

/// 传输对外通告的地址。
pub fn address_of<T>(transport: &Transport<T>) -> RemoteAddress {
    transport.advertised_address().clone()
}

/// 统计投递结果的监听器。
#[derive(Default)]
pub struct CountingListener {
    pub delivered: AtomicUsize,
    pub failed: AtomicUsize,
}

impl CountingListener {
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

impl<T> LinkListener<T> for CountingListener {
    fn on_success(&self, _message: &T) {
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }

    fn on_exception(&self, _error: &RemoteError, _remote: std::net::SocketAddr, _message: &T) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

/// 只计数不等待的重试暂停。
#[derive(Default)]
pub struct CountingPause {
    pub pauses: AtomicUsize,
}

impl RetryPause for CountingPause {
    fn pause(&self, _delay: Duration) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }
}

/// 轮询直到条件成立或超时。
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

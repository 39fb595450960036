use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use spark_remote::{PoolSizes, RemoteError};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, error};

use crate::error::{RUNTIME, map_io_error};

/// 传输使用的三组工作线程。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 接受连接与处理数据分属不同线程池，接受路径不会被繁忙的数据通道拖慢；
///   服务端数据与客户端数据再各自独立，便于按角色调整规模。
///
/// ## 逻辑 (How)
/// - 每个角色是一个独立的多线程 Tokio 运行时，线程名为 `<name>-<role>`；
/// - 线程启动/退出时分别增减共享计数器，[`WorkerPools::alive_threads`] 直接读取该计数；
/// - [`WorkerPools::shutdown`] 依次关闭 boss、服务端、客户端运行时，每个最多等待 `grace`。
///
/// ## 契约 (What)
/// - `shutdown` 返回且未超时时，计数器归零；
/// - **前置条件**：`shutdown` 与析构不可在异步上下文中执行，否则 Tokio 会 panic。
pub struct WorkerPools {
    boss: Runtime,
    server: Runtime,
    client: Runtime,
    alive: Arc<AtomicUsize>,
}

impl WorkerPools {
    pub fn new(name: &str, sizes: &PoolSizes) -> Result<Self, RemoteError> {
        let alive = Arc::new(AtomicUsize::new(0));
        let boss = runtime(name, "boss", sizes.server_boss, &alive)?;
        let server = runtime(name, "server", sizes.server_worker, &alive)?;
        let client = runtime(name, "client", sizes.client_worker, &alive)?;
        debug!(name, ?sizes, "worker pools started");
        Ok(Self {
            boss,
            server,
            client,
            alive,
        })
    }

    /// 接受入站连接的运行时。
    pub fn boss(&self) -> &Handle {
        self.boss.handle()
    }

    /// 服务端数据通道的运行时。
    pub fn server(&self) -> &Handle {
        self.server.handle()
    }

    /// 客户端数据通道的运行时。
    pub fn client(&self) -> &Handle {
        self.client.handle()
    }

    /// 当前存活的池线程数量。
    pub fn alive_threads(&self) -> usize {
        self.alive.load(Ordering::Acquire)
    }

    /// 共享的存活计数器，池被关闭后仍可读取。
    pub fn alive_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.alive)
    }

    /// 关闭全部线程池并等待线程退出。
    pub fn shutdown(self, grace: Duration) {
        let Self {
            boss,
            server,
            client,
            alive,
        } = self;
        boss.shutdown_timeout(grace);
        server.shutdown_timeout(grace);
        client.shutdown_timeout(grace);
        let remaining = alive.load(Ordering::Acquire);
        if remaining == 0 {
            debug!("worker pools terminated");
        } else {
            error!(remaining, ?grace, "worker pools did not terminate within grace period");
        }
    }
}

impl fmt::Debug for WorkerPools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPools")
            .field("alive_threads", &self.alive_threads())
            .finish()
    }
}

fn runtime(name: &str, role: &str, threads: usize, alive: &Arc<AtomicUsize>) -> Result<Runtime, RemoteError> {
    let started = Arc::clone(alive);
    let stopped = Arc::clone(alive);
    Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name(format!("{name}-{role}"))
        .enable_io()
        .enable_time()
        .on_thread_start(move || {
            started.fetch_add(1, Ordering::AcqRel);
        })
        .on_thread_stop(move || {
            stopped.fetch_sub(1, Ordering::AcqRel);
        })
        .build()
        .map_err(|err| map_io_error(RUNTIME, err))
}

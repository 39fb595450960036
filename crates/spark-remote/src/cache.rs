//! # 链路缓存与建连器
//!
//! ## 核心意图（Why）
//! - 同一进程内的任意线程都可能同时请求到同一远端地址的链路，缓存必须保证
//!   “每个地址同一时刻最多一次出站建连”，所有竞争者最终拿到同一条链路；
//! - 建连被拒绝属于瞬时故障，按固定退避重试；其它错误立即向调用方传播。
//!
//! ## 行为契约（What）
//! - [`LinkCache`]：`DashMap` 分片存储地址到 [`LinkReference`] 的映射，读路径不取全局锁；
//! - [`LinkReference`]：三态标志 `Idle → Connecting → Established`，失败时 `Connecting → Idle`，
//!   从不由 `Established` 回退；只有赢得 `Idle → Connecting` 的线程可以写入链路；
//! - [`ConnectionEstablisher::establish`]：每个调用方最多执行 `retries + 1` 轮循环。
//!
//! ## 风险提示（Trade-offs）
//! - 等待者在条件变量上阻塞调用线程，`establish` 不可在事件循环线程上调用；
//! - 缓存条目只在链路失活时由 [`LinkCache::evict`] 移除，长期不活跃但仍存活的链路会一直保留。

use std::{
    fmt, io,
    sync::{Arc, OnceLock},
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::{
    addr::RemoteAddress,
    config::RetryPolicy,
    error::{RemoteError, is_connect_refused},
};

/// 缓存条目的连接状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkState {
    Idle,
    Connecting,
    Established,
}

/// 单个远端地址的缓存条目。
///
/// # 教案式注释
/// - **快路径**：[`LinkReference::link`] 只读取 `OnceLock`，不加锁；
/// - **状态迁移**：`state` 由互斥锁保护，迁移后通过条件变量唤醒全部等待者；
/// - **单写者**：链路字段只在持有 [`ConnectPermit`] 的线程中写入一次。
pub struct LinkReference<L> {
    link: OnceLock<Arc<L>>,
    state: Mutex<LinkState>,
    settled: Condvar,
}

impl<L> LinkReference<L> {
    fn new() -> Self {
        Self {
            link: OnceLock::new(),
            state: Mutex::new(LinkState::Idle),
            settled: Condvar::new(),
        }
    }

    /// 已建立的链路。
    pub fn link(&self) -> Option<Arc<L>> {
        self.link.get().cloned()
    }

    /// 当前状态。
    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    /// 尝试完成 `Idle → Connecting` 迁移，成功者获得唯一的建连许可。
    pub fn try_begin_connect(&self) -> Option<ConnectPermit<'_, L>> {
        let mut state = self.state.lock();
        if *state != LinkState::Idle {
            return None;
        }
        *state = LinkState::Connecting;
        Some(ConnectPermit {
            reference: self,
            settled: false,
        })
    }

    /// 阻塞直到状态离开 `Connecting`，随后返回链路（若已建立）。
    pub fn wait_settled(&self) -> Option<Arc<L>> {
        let mut state = self.state.lock();
        while *state == LinkState::Connecting {
            self.settled.wait(&mut state);
        }
        drop(state);
        self.link()
    }

    fn transition(&self, next: LinkState) {
        let mut state = self.state.lock();
        *state = next;
        self.settled.notify_all();
    }
}

impl<L> fmt::Debug for LinkReference<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkReference")
            .field("state", &self.state())
            .field("established", &self.link.get().is_some())
            .finish()
    }
}

/// 建连许可。
///
/// 调用 [`ConnectPermit::complete`] 将状态推进到 `Established`；许可在未完成时被丢弃
/// （建连失败或 panic），状态回到 `Idle`，两种情况都会唤醒所有等待者。
pub struct ConnectPermit<'a, L> {
    reference: &'a LinkReference<L>,
    settled: bool,
}

impl<L> ConnectPermit<'_, L> {
    /// 写入链路并唤醒等待者。
    pub fn complete(mut self, link: Arc<L>) -> Arc<L> {
        // 许可唯一且状态不会从 Established 回退，此处是链路的唯一写入点
        let stored = self.reference.link.get_or_init(|| link);
        self.settled = true;
        self.reference.transition(LinkState::Established);
        Arc::clone(stored)
    }
}

impl<L> Drop for ConnectPermit<'_, L> {
    fn drop(&mut self) {
        if !self.settled {
            self.reference.transition(LinkState::Idle);
        }
    }
}

/// 地址到链路条目的并发映射。
pub struct LinkCache<L> {
    references: DashMap<RemoteAddress, Arc<LinkReference<L>>>,
}

impl<L> LinkCache<L> {
    pub fn new() -> Self {
        Self {
            references: DashMap::new(),
        }
    }

    /// 非阻塞查看已建立的链路，不触发建连。
    pub fn get(&self, address: &RemoteAddress) -> Option<Arc<L>> {
        self.references.get(address).and_then(|entry| entry.link())
    }

    /// 获取地址对应的条目，不存在时原子插入（先写者胜出）。
    pub fn reference(&self, address: &RemoteAddress) -> Arc<LinkReference<L>> {
        if let Some(existing) = self.references.get(address) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .references
            .entry(address.clone())
            .or_insert_with(|| Arc::new(LinkReference::new()));
        Arc::clone(entry.value())
    }

    /// 链路失活后移除条目；仅当条目持有的正是 `link` 时才移除。
    pub fn evict(&self, address: &RemoteAddress, link: &Arc<L>) -> bool {
        self.evict_if(address, |cached| std::ptr::eq(cached, Arc::as_ptr(link)))
    }

    /// 条目已建立且链路满足 `predicate` 时移除；未建立的条目保持不动。
    pub fn evict_if<F>(&self, address: &RemoteAddress, predicate: F) -> bool
    where
        F: FnOnce(&L) -> bool,
    {
        self.references
            .remove_if(address, |_, reference| {
                reference.link().is_some_and(|cached| predicate(cached.as_ref()))
            })
            .is_some()
    }

    /// 当前所有已建立的链路。
    pub fn links(&self) -> Vec<Arc<L>> {
        self.references
            .iter()
            .filter_map(|entry| entry.value().link())
            .collect()
    }

    /// 清空缓存。
    pub fn clear(&self) {
        self.references.clear();
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

impl<L> Default for LinkCache<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> fmt::Debug for LinkCache<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkCache")
            .field("entries", &self.references.len())
            .finish()
    }
}

/// 真正执行一次网络建连的组件。
pub trait Connector<L> {
    fn connect(&mut self, address: &RemoteAddress) -> io::Result<L>;
}

impl<L, F> Connector<L> for F
where
    F: FnMut(&RemoteAddress) -> io::Result<L>,
{
    fn connect(&mut self, address: &RemoteAddress) -> io::Result<L> {
        self(address)
    }
}

/// 重试之间的等待方式。
pub trait RetryPause: Send + Sync {
    fn pause(&self, delay: Duration);
}

/// 以 `std::thread::sleep` 阻塞当前线程。
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleep;

impl RetryPause for ThreadSleep {
    fn pause(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// 将“缓存未命中”转化为已建立的链路或终止性的建连失败。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// 每轮循环：
/// 1. 查询条目，已有链路直接返回；
/// 2. 条目不存在则原子插入；
/// 3. 尝试 `Idle → Connecting`：失败者在条件变量上等待，醒来后若链路已建立则返回，
///    否则进入下一轮；成功者成为唯一建连者；
/// 4. 建连成功：写入链路、置为 `Established`、唤醒等待者并返回；
/// 5. 连接被拒绝：回到 `Idle` 并唤醒等待者，若仍有剩余轮次则等待 `backoff`；
///    其它错误立即返回，不再重试。
///
/// 所有轮次用尽后返回 [`RemoteError::Connect`]。
pub struct ConnectionEstablisher<L> {
    cache: Arc<LinkCache<L>>,
    policy: RetryPolicy,
    pause: Arc<dyn RetryPause>,
}

impl<L> ConnectionEstablisher<L> {
    pub fn new(cache: Arc<LinkCache<L>>, policy: RetryPolicy) -> Self {
        Self {
            cache,
            policy,
            pause: Arc::new(ThreadSleep),
        }
    }

    /// 替换重试等待方式。
    pub fn with_pause(mut self, pause: Arc<dyn RetryPause>) -> Self {
        self.set_pause(pause);
        self
    }

    /// 原地替换重试等待方式，供持有者无法按值移出时使用。
    pub fn set_pause(&mut self, pause: Arc<dyn RetryPause>) {
        self.pause = pause;
    }

    pub fn cache(&self) -> &Arc<LinkCache<L>> {
        &self.cache
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// 返回地址对应的链路，必要时通过 `connector` 建连。
    pub fn establish<C>(
        &self,
        address: &RemoteAddress,
        connector: &mut C,
    ) -> Result<Arc<L>, RemoteError>
    where
        C: Connector<L> + ?Sized,
    {
        let retries = self.policy.retries;
        for attempt in 0..=retries {
            let reference = self.cache.reference(address);
            if let Some(link) = reference.link() {
                debug!(remote = %address, "cached link found");
                return Ok(link);
            }

            let Some(permit) = reference.try_begin_connect() else {
                debug!(remote = %address, "connect in progress on another thread, waiting");
                if let Some(link) = reference.wait_settled() {
                    return Ok(link);
                }
                continue;
            };

            debug!(remote = %address, attempt = attempt + 1, "no cached link, connecting");
            match connector.connect(address) {
                Ok(link) => {
                    let link = permit.complete(Arc::new(link));
                    debug!(remote = %address, "link established");
                    return Ok(link);
                }
                Err(err) if is_connect_refused(&err) => {
                    drop(permit);
                    warn!(
                        remote = %address,
                        attempt = attempt + 1,
                        retries,
                        "connection refused, attempt {} of {}",
                        attempt + 1,
                        self.policy.attempts()
                    );
                    if attempt < retries {
                        self.pause.pause(self.policy.backoff);
                    }
                }
                Err(err) => {
                    drop(permit);
                    return Err(RemoteError::io("connect", err));
                }
            }
        }
        Err(RemoteError::Connect {
            address: address.clone(),
            attempts: self.policy.attempts(),
        })
    }

    /// 与 [`ConnectionEstablisher::establish`] 相同，但不交出已失活的链路。
    ///
    /// - `is_live` 判定失活的链路会按指针从缓存移除，随后重新建连，至多额外 `retries` 次；
    /// - 仍然失活时返回最后一条链路，条目已被移除，调用方的写入会以关闭错误回报。
    pub fn establish_live<C, F>(
        &self,
        address: &RemoteAddress,
        connector: &mut C,
        is_live: F,
    ) -> Result<Arc<L>, RemoteError>
    where
        C: Connector<L> + ?Sized,
        F: Fn(&L) -> bool,
    {
        let mut link = self.establish(address, &mut *connector)?;
        for _ in 0..self.policy.retries {
            if is_live(&link) {
                return Ok(link);
            }
            self.cache.evict(address, &link);
            debug!(remote = %address, "link went inactive before use, reconnecting");
            link = self.establish(address, &mut *connector)?;
        }
        if !is_live(&link) {
            self.cache.evict(address, &link);
        }
        Ok(link)
    }
}

impl<L> fmt::Debug for ConnectionEstablisher<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEstablisher")
            .field("cache", &self.cache)
            .field("policy", &self.policy)
            .finish()
    }
}

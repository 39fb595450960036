//! 监听端口候选策略。
//!
//! 当请求的监听端口为 0 时，绑定器按 [`PortAllocator::candidates`] 给出的顺序逐个尝试绑定。
//! 三种策略均为配置的纯函数，不产生副作用；空序列表示“没有可用候选”。

use std::{collections::BTreeSet, fmt, ops::Range, vec};

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// 端口候选策略。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `Range { begin, count }`：半开区间 `[begin, begin + count)`，按升序产出；超出 65535 的部分被截断；
/// - `List { ports }`：按配置顺序产出，允许重复；
/// - `Set { ports }`：按 `BTreeSet` 的自然（升序）顺序产出，每个成员恰好一次；
/// - **后置条件**：每次调用 [`PortAllocator::candidates`] 都从头产出一个新的有限序列。
///
/// ## 注意事项（Trade-offs）
/// - 历史上存在 `[begin, end]` 闭区间的写法，这里只支持基于 `count` 的半开区间，避免两种语义并存。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PortAllocator {
    /// 连续端口区间。
    Range { begin: u16, count: u32 },
    /// 显式有序列表。
    List { ports: Vec<u16> },
    /// 显式集合。
    Set { ports: BTreeSet<u16> },
}

impl PortAllocator {
    /// 默认区间起点。
    pub const DEFAULT_RANGE_BEGIN: u16 = 10_000;
    /// 默认区间长度。
    pub const DEFAULT_RANGE_COUNT: u32 = 10_000;

    /// 构造区间策略。
    pub fn range(begin: u16, count: u32) -> Self {
        Self::Range { begin, count }
    }

    /// 构造列表策略。
    pub fn list(ports: impl IntoIterator<Item = u16>) -> Self {
        Self::List {
            ports: ports.into_iter().collect(),
        }
    }

    /// 构造集合策略。
    pub fn set(ports: impl IntoIterator<Item = u16>) -> Self {
        Self::Set {
            ports: ports.into_iter().collect(),
        }
    }

    /// 解析逗号分隔的端口列表，例如容器端口参数 `"2000,2001"`。
    pub fn from_list_str(value: &str) -> Result<Self, RemoteError> {
        let ports = value
            .split(',')
            .map(str::trim)
            .map(|entry| {
                entry.parse::<u16>().map_err(|err| {
                    RemoteError::configuration(format!("invalid port `{entry}` in `{value}`: {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::List { ports })
    }

    /// 产出一个新的候选序列。
    pub fn candidates(&self) -> PortCandidates {
        let inner = match self {
            PortAllocator::Range { begin, count } => {
                let start = u32::from(*begin);
                let end = start.saturating_add(*count).min(u32::from(u16::MAX) + 1);
                CandidatesInner::Range(start..end)
            }
            PortAllocator::List { ports } => CandidatesInner::Ports(ports.clone().into_iter()),
            PortAllocator::Set { ports } => {
                CandidatesInner::Ports(ports.iter().copied().collect::<Vec<_>>().into_iter())
            }
        };
        PortCandidates { inner }
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::range(Self::DEFAULT_RANGE_BEGIN, Self::DEFAULT_RANGE_COUNT)
    }
}

impl fmt::Display for PortAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortAllocator::Range { begin, count } => write!(f, "range[{begin}; +{count})"),
            PortAllocator::List { ports } => write!(f, "list{ports:?}"),
            PortAllocator::Set { ports } => write!(f, "set{ports:?}"),
        }
    }
}

/// 一次性消费的端口候选序列。
#[derive(Clone, Debug)]
pub struct PortCandidates {
    inner: CandidatesInner,
}

#[derive(Clone, Debug)]
enum CandidatesInner {
    Range(Range<u32>),
    Ports(vec::IntoIter<u16>),
}

impl Iterator for PortCandidates {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        match &mut self.inner {
            // 区间上界已被截断到 65536，转换不会失败
            CandidatesInner::Range(range) => range.next().and_then(|port| u16::try_from(port).ok()),
            CandidatesInner::Ports(ports) => ports.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.inner {
            CandidatesInner::Range(range) => range.size_hint(),
            CandidatesInner::Ports(ports) => ports.size_hint(),
        }
    }
}

impl ExactSizeIterator for PortCandidates {}

//! 通道运行时：入站读循环、失活通知与错误旁路。
//!
//! 客户端与服务端通道共享同一套读循环：逐帧读取负载并以 [`TransportEvent`] 交给入站处理器；
//! 读失败转换为协议错误交给 [`ErrorSink`]；通道失活时只触发一次失活回调。

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::RwLock;
use spark_remote::{ChannelRole, ErrorHandler, EventHandler, RemoteError, TransportEvent};
use tokio::{io::AsyncRead, sync::watch};
use tracing::{debug, warn};

use crate::{
    error::{READ, channel_error},
    frame,
};

/// 通道活跃标志。
#[derive(Debug)]
pub(crate) struct ChannelState {
    active: AtomicBool,
}

impl ChannelState {
    pub(crate) fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 置为失活，仅首次调用返回 `true`。
    pub(crate) fn deactivate(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// 可替换的错误处理器槽位，传输与所有通道任务共享。
#[derive(Clone, Default)]
pub(crate) struct ErrorSink {
    handler: Arc<RwLock<Option<ErrorHandler>>>,
}

impl ErrorSink {
    pub(crate) fn install(&self, handler: ErrorHandler) {
        *self.handler.write() = Some(handler);
    }

    pub(crate) fn report(&self, error: RemoteError) {
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler.on_next(error),
            None => warn!(code = error.code(), error = %error, "channel error without registered handler"),
        }
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("installed", &self.handler.read().is_some())
            .finish()
    }
}

pub(crate) type InboundHandler = Arc<dyn EventHandler<TransportEvent>>;
pub(crate) type InactiveHook = Arc<dyn Fn() + Send + Sync>;

/// 单条通道的运行上下文。
#[derive(Clone)]
pub(crate) struct ChannelContext {
    pub role: ChannelRole,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub max_frame_length: usize,
    pub inbound: InboundHandler,
    pub errors: ErrorSink,
    pub state: Arc<ChannelState>,
    pub on_inactive: Option<InactiveHook>,
}

impl ChannelContext {
    /// 标记通道失活并在首次失活时执行回调。
    pub(crate) fn mark_inactive(&self) {
        if self.state.deactivate() {
            debug!(role = ?self.role, remote = %self.remote, "channel inactive");
            if let Some(hook) = &self.on_inactive {
                hook();
            }
        }
    }
}

/// 读循环：直到对端关闭、读失败或收到关闭信号。
pub(crate) async fn read_loop<R>(mut reader: R, context: ChannelContext, mut shutdown: watch::Receiver<bool>)
where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = frame::read(&mut reader, context.max_frame_length) => match frame {
                Ok(Some(payload)) => context.inbound.on_next(TransportEvent {
                    role: context.role,
                    local: context.local,
                    remote: context.remote,
                    payload,
                }),
                Ok(None) => {
                    debug!(role = ?context.role, remote = %context.remote, "channel closed by peer");
                    break;
                }
                Err(err) => {
                    context.errors.report(channel_error(READ, context.remote, err));
                    break;
                }
            },
        }
    }
    context.mark_inactive();
}

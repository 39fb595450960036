use std::{fmt, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use spark_remote::{Encoder, LinkListener, RemoteError};
use tokio::{
    io::AsyncWriteExt,
    net::tcp::OwnedWriteHalf,
    runtime::Handle,
    sync::{Mutex as AsyncMutex, mpsc, watch},
};
use tracing::debug;

use crate::{
    channel::ChannelContext,
    error::{WRITE, channel_error, map_io_error},
    frame,
};

/// 指向某个远端地址的已建立双工通道。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 同一地址的所有调用方共享一条 `Link`，编码器与投递监听器在建连时绑定，之后不再变化。
///
/// ## 逻辑 (How)
/// - [`Link::write`] 在调用线程上完成编码与组帧，随后把帧交给写路径：
///   - 有序模式：单一写任务消费无界 FIFO 队列，按提交顺序写出；
///   - 无序模式：每次写入是独立任务，竞争同一个写半部的异步锁。
/// - 每条消息的结果通过 [`LinkListener`] 回报；写失败会把通道标记为失活，
///   失活回调负责从链路缓存中移除该链路。
///
/// ## 契约 (What)
/// - `write` 不阻塞、不返回错误，所有失败都经由监听器的 `on_exception` 报告；
/// - 通道失活后的写入立即以 [`RemoteError::Closed`] 回报。
pub struct Link<T> {
    local: SocketAddr,
    remote: SocketAddr,
    encoder: Arc<dyn Encoder<T>>,
    listener: Arc<dyn LinkListener<T>>,
    context: ChannelContext,
    writer: LinkWriter<T>,
}

enum LinkWriter<T> {
    Ordered(mpsc::UnboundedSender<Outbound<T>>),
    Unordered {
        half: Arc<AsyncMutex<OwnedWriteHalf>>,
        handle: Handle,
    },
}

struct Outbound<T> {
    message: T,
    frame: Bytes,
}

impl<T> Link<T>
where
    T: Send + Sync + 'static,
{
    /// 以写半部创建链路，并在 `handle` 上启动写路径。
    pub(crate) fn spawn(
        half: OwnedWriteHalf,
        handle: &Handle,
        ordered: bool,
        encoder: Arc<dyn Encoder<T>>,
        listener: Arc<dyn LinkListener<T>>,
        context: ChannelContext,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let writer = if ordered {
            let (tx, rx) = mpsc::unbounded_channel();
            handle.spawn(write_queue(
                half,
                rx,
                Arc::clone(&listener),
                context.clone(),
                shutdown,
            ));
            LinkWriter::Ordered(tx)
        } else {
            LinkWriter::Unordered {
                half: Arc::new(AsyncMutex::new(half)),
                handle: handle.clone(),
            }
        };
        Self {
            local: context.local,
            remote: context.remote,
            encoder,
            listener,
            context,
            writer,
        }
    }

    /// 编码并写出一条消息，结果经由监听器回报。
    pub fn write(&self, message: T) {
        let frame = match self.encode(&message) {
            Ok(frame) => frame,
            Err(err) => {
                self.listener.on_exception(&err, self.remote, &message);
                return;
            }
        };
        if !self.is_active() {
            self.listener
                .on_exception(&RemoteError::Closed, self.remote, &message);
            return;
        }
        match &self.writer {
            LinkWriter::Ordered(queue) => {
                if let Err(mpsc::error::SendError(rejected)) = queue.send(Outbound { message, frame }) {
                    self.listener
                        .on_exception(&RemoteError::Closed, self.remote, &rejected.message);
                }
            }
            LinkWriter::Unordered { half, handle } => {
                let half = Arc::clone(half);
                let listener = Arc::clone(&self.listener);
                let context = self.context.clone();
                handle.spawn(async move {
                    let result = half.lock().await.write_all(&frame).await;
                    deliver(result, &message, listener.as_ref(), &context);
                });
            }
        }
    }

    fn encode(&self, message: &T) -> Result<Bytes, RemoteError> {
        let payload = self.encoder.encode(message)?;
        frame::encode(&payload, self.context.max_frame_length).map_err(|err| map_io_error(WRITE, err))
    }
}

impl<T> Link<T> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// 通道是否仍然活跃。
    pub fn is_active(&self) -> bool {
        self.context.state.is_active()
    }

    /// 写路径是否保证提交顺序。
    pub fn is_ordered(&self) -> bool {
        matches!(self.writer, LinkWriter::Ordered(_))
    }

    /// 标记失活，之后的写入立即失败。
    pub(crate) fn deactivate(&self) {
        self.context.mark_inactive();
    }
}

impl<T> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("ordered", &self.is_ordered())
            .field("active", &self.is_active())
            .finish()
    }
}

fn deliver<T>(
    result: std::io::Result<()>,
    message: &T,
    listener: &dyn LinkListener<T>,
    context: &ChannelContext,
) -> bool {
    match result {
        Ok(()) => {
            listener.on_success(message);
            true
        }
        Err(err) => {
            let err = channel_error(WRITE, context.remote, err);
            listener.on_exception(&err, context.remote, message);
            context.mark_inactive();
            false
        }
    }
}

async fn write_queue<T>(
    mut half: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Outbound<T>>,
    listener: Arc<dyn LinkListener<T>>,
    context: ChannelContext,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let outbound = tokio::select! {
            _ = shutdown.changed() => break,
            outbound = queue.recv() => match outbound {
                Some(outbound) => outbound,
                None => break,
            },
        };
        let result = half.write_all(&outbound.frame).await;
        if !deliver(result, &outbound.message, listener.as_ref(), &context) {
            break;
        }
    }

    queue.close();
    while let Ok(rejected) = queue.try_recv() {
        listener.on_exception(&RemoteError::Closed, context.remote, &rejected.message);
    }
    if let Err(err) = half.shutdown().await {
        debug!(remote = %context.remote, error = %err, "write half shutdown failed");
    }
}

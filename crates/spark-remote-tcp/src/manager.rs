use std::{fmt, net::SocketAddr, sync::Arc};

use parking_lot::RwLock;
use spark_remote::{
    ChannelRole, Codec, Encoder, ErrorHandler, EventHandler, LinkListener, LocalAddressResolver,
    RemoteAddress, RemoteError, TransportConfig, TransportEvent,
};
use tracing::debug;

use crate::transport::Transport;

/// 解码后的入站消息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteMessage<M> {
    pub role: ChannelRole,
    pub remote: SocketAddr,
    pub message: M,
}

type MessageHandler<M> = Arc<dyn EventHandler<RemoteMessage<M>>>;

/// 面向使用者的远程消息收发组合：传输 + 编解码器 + 错误处理器。
///
/// # 教案式注释
///
/// ## 契约 (What)
/// - [`RemoteManager::send`]：按需建连并写出一条消息，投递失败交给错误处理器；
/// - [`RemoteManager::register_handler`]：安装入站消息处理器，未安装时入站消息被丢弃；
/// - 入站负载以管理器自己的编解码器解码，解码失败以 [`RemoteError::Protocol`] 交给错误处理器。
pub struct RemoteManager<M> {
    name: String,
    transport: Transport<M>,
    encoder: Arc<dyn Encoder<M>>,
    listener: Arc<dyn LinkListener<M>>,
    handler: Arc<RwLock<Option<MessageHandler<M>>>>,
}

impl<M> RemoteManager<M>
where
    M: Send + Sync + 'static,
{
    /// 绑定传输并装配编解码器与错误处理器。
    pub fn new(
        name: impl Into<String>,
        config: TransportConfig,
        codec: Arc<dyn Codec<M>>,
        error_handler: ErrorHandler,
        resolver: &dyn LocalAddressResolver,
    ) -> Result<Self, RemoteError> {
        let name = name.into();
        let handler: Arc<RwLock<Option<MessageHandler<M>>>> = Arc::new(RwLock::new(None));
        let inbound = Arc::new(InboundDispatcher {
            codec: Arc::clone(&codec),
            handler: Arc::clone(&handler),
            errors: Arc::clone(&error_handler),
        });
        let transport = Transport::bind(config, resolver, inbound)?;
        transport.register_error_handler(Arc::clone(&error_handler));
        debug!(name = %name, identifier = %transport.identifier(), "remote manager ready");
        Ok(Self {
            name,
            transport,
            encoder: codec,
            listener: Arc::new(ReportingListener {
                errors: error_handler,
            }),
            handler,
        })
    }

    /// 发送一条消息到 `address`。
    ///
    /// 建连失败与传输已关闭同步返回；写出结果异步交给错误处理器。
    pub fn send(&self, address: &RemoteAddress, message: M) -> Result<(), RemoteError> {
        let link = self
            .transport
            .open(address, Arc::clone(&self.encoder), Arc::clone(&self.listener))?;
        link.write(message);
        Ok(())
    }
}

impl<M> RemoteManager<M> {
    /// 安装入站消息处理器，替换之前的处理器。
    pub fn register_handler(&self, handler: Arc<dyn EventHandler<RemoteMessage<M>>>) {
        *self.handler.write() = Some(handler);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 对外通告的 `host:port` 标识。
    pub fn identifier(&self) -> String {
        self.transport.identifier()
    }

    pub fn local_address(&self) -> SocketAddr {
        self.transport.local_address()
    }

    pub fn transport(&self) -> &Transport<M> {
        &self.transport
    }

    /// 关闭底层传输，幂等。
    pub fn close(&self) {
        self.transport.close();
    }
}

impl<M> fmt::Debug for RemoteManager<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteManager")
            .field("name", &self.name)
            .field("transport", &self.transport)
            .finish()
    }
}

struct InboundDispatcher<M> {
    codec: Arc<dyn Codec<M>>,
    handler: Arc<RwLock<Option<MessageHandler<M>>>>,
    errors: ErrorHandler,
}

impl<M> EventHandler<TransportEvent> for InboundDispatcher<M>
where
    M: Send + Sync + 'static,
{
    fn on_next(&self, event: TransportEvent) {
        let message = match self.codec.decode(&event.payload) {
            Ok(message) => message,
            Err(err) => {
                self.errors
                    .on_next(RemoteError::protocol(event.remote, format!("decode failed: {err}")));
                return;
            }
        };
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler.on_next(RemoteMessage {
                role: event.role,
                remote: event.remote,
                message,
            }),
            None => debug!(remote = %event.remote, "no handler registered, inbound message dropped"),
        }
    }
}

struct ReportingListener {
    errors: ErrorHandler,
}

impl<M> LinkListener<M> for ReportingListener {
    fn on_success(&self, _message: &M) {}

    fn on_exception(&self, error: &RemoteError, remote: SocketAddr, _message: &M) {
        self.errors.on_next(RemoteError::protocol(
            remote,
            format!("delivery failed [{}]: {error}", error.code()),
        ));
    }
}

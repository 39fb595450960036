use std::{
    fmt, io,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use spark_remote::{
    ChannelRole, ConnectionEstablisher, Encoder, ErrorHandler, EventHandler, LinkCache, LinkListener,
    LocalAddressResolver, RemoteAddress, RemoteError, RetryPause, TransportConfig, TransportEvent,
};
use tokio::{
    net::{TcpListener, TcpStream},
    runtime::Handle,
    sync::watch,
};
use tracing::{debug, warn};

use crate::{
    binder::ListeningSocketBinder,
    channel::{ChannelContext, ChannelState, ErrorSink, InactiveHook, InboundHandler, read_loop},
    error::{ACCEPT, BIND, CONFIGURE, map_io_error},
    link::Link,
    pools::WorkerPools,
    socket,
};

/// 远程消息传输门面：持有监听套接字、链路缓存与工作线程池。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 进程内所有发往远端的消息都经由同一个 `Transport`，它负责“每个地址一条链路”，
///   并在关闭时一次性释放全部套接字与线程。
///
/// ## 逻辑 (How)
/// - [`Transport::bind`]：确定通告主机（配置优先，否则询问解析器），经
///   [`ListeningSocketBinder`] 绑定监听端口，启动线程池并在 boss 池上运行接受循环；
/// - [`Transport::open`]：在调用线程上执行带重试的建连算法，建连本身是阻塞系统调用，
///   成功后将套接字注册到客户端池并启动读写任务；
/// - [`Transport::close`]：广播关闭信号，令所有通道任务退出，清空缓存后逐个关闭线程池。
///
/// ## 契约 (What)
/// - 状态机：`Bound → Closed`，关闭后 `open` 返回 [`RemoteError::Closed`]；
/// - 监听端口在整个生命周期内不变；
/// - `close` 幂等，第二次调用不做任何事；
/// - **前置条件**：`open`、`close` 与析构不可在异步上下文中调用。
///
/// ## 注意事项 (Trade-offs)
/// - `open` 最坏情况下阻塞 `retries × backoff` 加上每次建连的系统超时；
/// - 通道失活（对端关闭、读写失败）时链路从缓存中移除，下一次 `open` 重新建连。
pub struct Transport<T> {
    config: TransportConfig,
    local: SocketAddr,
    advertised: RemoteAddress,
    cache: Arc<LinkCache<Link<T>>>,
    establisher: ConnectionEstablisher<Link<T>>,
    pools: Mutex<Option<WorkerPools>>,
    client: Handle,
    alive: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    errors: ErrorSink,
    inbound: InboundHandler,
}

impl<T> Transport<T>
where
    T: Send + Sync + 'static,
{
    /// 绑定监听套接字并启动线程池。
    pub fn bind(
        config: TransportConfig,
        resolver: &dyn LocalAddressResolver,
        inbound: Arc<dyn EventHandler<TransportEvent>>,
    ) -> Result<Self, RemoteError> {
        config.validate()?;
        let host = match &config.host_address {
            Some(host) => host.clone(),
            None => resolver.resolve()?,
        };
        let ip: IpAddr = host.parse().map_err(|err| {
            RemoteError::configuration(format!("advertised host `{host}` is not an IP address: {err}"))
        })?;

        let binder = ListeningSocketBinder::new(ip, config.port_allocator.clone(), config.socket.clone());
        let bound = binder.bind(config.listen_port)?;
        let local = bound.local_addr();
        let advertised = RemoteAddress::new(&host, local.port());

        let pools = WorkerPools::new(&format!("remote-{}", local.port()), &config.pools)?;
        let (shutdown, _) = watch::channel(false);
        let errors = ErrorSink::default();

        let listener = {
            let _runtime = pools.boss().enter();
            TcpListener::from_std(bound.into_std()).map_err(|err| map_io_error(BIND, err))?
        };
        pools.boss().spawn(accept_loop(
            listener,
            Acceptor {
                server: pools.server().clone(),
                config: config.clone(),
                errors: errors.clone(),
                inbound: Arc::clone(&inbound),
                shutdown: shutdown.subscribe(),
            },
        ));

        let cache = Arc::new(LinkCache::new());
        let establisher = ConnectionEstablisher::new(Arc::clone(&cache), config.retry);
        debug!(
            identifier = %advertised,
            local = %local,
            ordered = config.ordering_guarantee,
            "transport bound"
        );
        Ok(Self {
            client: pools.client().clone(),
            alive: pools.alive_counter(),
            pools: Mutex::new(Some(pools)),
            config,
            local,
            advertised,
            cache,
            establisher,
            shutdown,
            closed: AtomicBool::new(false),
            errors,
            inbound,
        })
    }

    /// 替换建连重试之间的等待方式。
    pub fn with_retry_pause(mut self, pause: Arc<dyn RetryPause>) -> Self {
        self.establisher.set_pause(pause);
        self
    }

    /// 返回到 `address` 的链路，必要时建连。
    ///
    /// 同一地址的并发调用只触发一次建连，所有调用方得到同一条链路；
    /// 编码器与监听器只在本次调用真正建连时绑定到新链路。
    pub fn open(
        &self,
        address: &RemoteAddress,
        encoder: Arc<dyn Encoder<T>>,
        listener: Arc<dyn LinkListener<T>>,
    ) -> Result<Arc<Link<T>>, RemoteError> {
        if self.is_closed() {
            return Err(RemoteError::Closed);
        }
        let mut connector =
            |target: &RemoteAddress| self.connect(target, Arc::clone(&encoder), Arc::clone(&listener));
        // 对端在链路入缓存前已断开时，失活回调找不到条目，由这里移除并重新建连
        self.establisher
            .establish_live(address, &mut connector, |link: &Link<T>| link.is_active())
            .map_err(|err| if self.is_closed() { RemoteError::Closed } else { err })
    }

    fn connect(
        &self,
        target: &RemoteAddress,
        encoder: Arc<dyn Encoder<T>>,
        listener: Arc<dyn LinkListener<T>>,
    ) -> io::Result<Link<T>> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        let remote = target.resolve()?;
        let stream = socket::connect(remote, &self.config.socket)?;
        let stream = {
            let _runtime = self.client.enter();
            TcpStream::from_std(stream)?
        };
        let local = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();

        let context = ChannelContext {
            role: ChannelRole::Client,
            local,
            remote,
            max_frame_length: self.config.socket.max_frame_length,
            inbound: Arc::clone(&self.inbound),
            errors: self.errors.clone(),
            state: Arc::new(ChannelState::new()),
            on_inactive: Some(evict_on_inactive(&self.cache, target.clone())),
        };
        self.client.spawn(read_loop(read_half, context.clone(), self.shutdown.subscribe()));
        let link = Link::spawn(
            write_half,
            &self.client,
            self.config.ordering_guarantee,
            encoder,
            listener,
            context,
            self.shutdown.subscribe(),
        );
        debug!(remote = %target, local = %local, "client channel connected");
        Ok(link)
    }
}

impl<T> Transport<T> {
    /// 关闭全部通道与线程池，幂等。
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(identifier = %self.advertised, "transport already closed");
            return;
        }
        debug!(identifier = %self.advertised, links = self.cache.len(), "closing transport");
        self.shutdown.send_replace(true);
        for link in self.cache.links() {
            link.deactivate();
        }
        self.cache.clear();
        if let Some(pools) = self.pools.lock().take() {
            pools.shutdown(self.config.shutdown_grace);
        }
        debug!(identifier = %self.advertised, "transport closed");
    }

    /// 非阻塞查看已缓存的链路。
    pub fn get(&self, address: &RemoteAddress) -> Option<Arc<Link<T>>> {
        self.cache.get(address)
    }

    /// 监听套接字的实际地址。
    pub fn local_address(&self) -> SocketAddr {
        self.local
    }

    pub fn listening_port(&self) -> u16 {
        self.local.port()
    }

    /// 对外通告的 `host:port` 标识。
    pub fn identifier(&self) -> String {
        self.advertised.to_string()
    }

    /// 对外通告的地址。
    pub fn advertised_address(&self) -> &RemoteAddress {
        &self.advertised
    }

    /// 安装通道错误处理器，替换之前的处理器。
    pub fn register_error_handler(&self, handler: ErrorHandler) {
        self.errors.install(handler);
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 仍然存活的线程池线程数量。
    pub fn alive_threads(&self) -> usize {
        self.alive.load(Ordering::Acquire)
    }
}

impl<T> Drop for Transport<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> fmt::Debug for Transport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("identifier", &self.advertised.to_string())
            .field("local", &self.local)
            .field("links", &self.cache.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn evict_on_inactive<T>(cache: &Arc<LinkCache<Link<T>>>, address: RemoteAddress) -> InactiveHook
where
    T: Send + Sync + 'static,
{
    let cache: Weak<LinkCache<Link<T>>> = Arc::downgrade(cache);
    Arc::new(move || {
        if let Some(cache) = cache.upgrade()
            && cache.evict_if(&address, |link| !link.is_active())
        {
            debug!(remote = %address, "evicted inactive link");
        }
    })
}

struct Acceptor {
    server: Handle,
    config: TransportConfig,
    errors: ErrorSink,
    inbound: InboundHandler,
    shutdown: watch::Receiver<bool>,
}

async fn accept_loop(listener: TcpListener, mut acceptor: Acceptor) {
    loop {
        tokio::select! {
            _ = acceptor.shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => acceptor.serve(stream, remote),
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    acceptor.errors.report(map_io_error(ACCEPT, err));
                }
            },
        }
    }
    debug!("accept loop stopped");
}

impl Acceptor {
    /// 把接受的连接移交给服务端线程池。
    fn serve(&self, stream: TcpStream, remote: SocketAddr) {
        if let Err(err) = socket::configure_accepted(&stream, &self.config.socket) {
            self.errors.report(map_io_error(CONFIGURE, err));
        }
        // 套接字需在服务端运行时上重新注册，读写才会由服务端线程驱动
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(err) => {
                self.errors.report(map_io_error(ACCEPT, err));
                return;
            }
        };
        let errors = self.errors.clone();
        let inbound = Arc::clone(&self.inbound);
        let max_frame_length = self.config.socket.max_frame_length;
        let shutdown = self.shutdown.clone();
        self.server.spawn(async move {
            let stream = match TcpStream::from_std(stream) {
                Ok(stream) => stream,
                Err(err) => {
                    errors.report(map_io_error(ACCEPT, err));
                    return;
                }
            };
            let local = match stream.local_addr() {
                Ok(local) => local,
                Err(err) => {
                    errors.report(map_io_error(ACCEPT, err));
                    return;
                }
            };
            debug!(remote = %remote, local = %local, "server channel accepted");
            let context = ChannelContext {
                role: ChannelRole::Server,
                local,
                remote,
                max_frame_length,
                inbound,
                errors,
                state: Arc::new(ChannelState::new()),
                on_inactive: None,
            };
            read_loop(stream, context, shutdown).await;
        });
    }
}

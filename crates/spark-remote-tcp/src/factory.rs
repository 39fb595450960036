use std::{fmt, sync::Arc, time::Duration};

use spark_remote::{Codec, ErrorHandler, LocalAddressResolver, RemoteError, TransportConfig};
use tracing::debug;

use crate::manager::RemoteManager;

/// 构造 [`RemoteManager`] 所需的完整设置。
pub struct RemoteManagerSettings<M> {
    pub name: String,
    pub config: TransportConfig,
    pub codec: Arc<dyn Codec<M>>,
    pub error_handler: ErrorHandler,
    pub resolver: Arc<dyn LocalAddressResolver>,
}

impl<M> Clone for RemoteManagerSettings<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            codec: Arc::clone(&self.codec),
            error_handler: Arc::clone(&self.error_handler),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<M> fmt::Debug for RemoteManagerSettings<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteManagerSettings")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish()
    }
}

/// 单次构造时的覆盖项，未设置的字段沿用基础设置。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `listen_port` 仅在大于 0 时生效，0 等同于未设置；
/// - `host_address` 仅在设置时生效；
/// - [`RemoteOverrides::apply`] 在基础设置的副本上叠加覆盖项并重新校验，基础设置本身不被修改。
pub struct RemoteOverrides<M> {
    name: Option<String>,
    host_address: Option<String>,
    listen_port: Option<u16>,
    codec: Option<Arc<dyn Codec<M>>>,
    error_handler: Option<ErrorHandler>,
    ordering_guarantee: Option<bool>,
    retries: Option<u32>,
    retry_backoff: Option<Duration>,
}

impl<M> Default for RemoteOverrides<M> {
    fn default() -> Self {
        Self {
            name: None,
            host_address: None,
            listen_port: None,
            codec: None,
            error_handler: None,
            ordering_guarantee: None,
            retries: None,
            retry_backoff: None,
        }
    }
}

impl<M> RemoteOverrides<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_host_address(mut self, host: impl Into<String>) -> Self {
        self.host_address = Some(host.into());
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec<M>>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn with_ordering_guarantee(mut self, ordered: bool) -> Self {
        self.ordering_guarantee = Some(ordered);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    /// 在 `base` 的副本上叠加覆盖项。
    pub fn apply(&self, base: &RemoteManagerSettings<M>) -> Result<RemoteManagerSettings<M>, RemoteError> {
        let mut settings = base.clone();
        let mut builder = base.config.to_builder();
        if let Some(name) = &self.name {
            settings.name = name.clone();
        }
        if let Some(host) = &self.host_address {
            builder = builder.with_host_address(host.clone());
        }
        if let Some(port) = self.listen_port.filter(|port| *port > 0) {
            builder = builder.with_listen_port(port);
        }
        if let Some(ordered) = self.ordering_guarantee {
            builder = builder.with_ordering_guarantee(ordered);
        }
        if self.retries.is_some() || self.retry_backoff.is_some() {
            let retry = base.config.retry;
            builder = builder.with_retry(
                self.retries.unwrap_or(retry.retries),
                self.retry_backoff.unwrap_or(retry.backoff),
            );
        }
        if let Some(codec) = &self.codec {
            settings.codec = Arc::clone(codec);
        }
        if let Some(handler) = &self.error_handler {
            settings.error_handler = Arc::clone(handler);
        }
        settings.config = builder.build()?;
        Ok(settings)
    }
}

impl<M> fmt::Debug for RemoteOverrides<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteOverrides")
            .field("name", &self.name)
            .field("host_address", &self.host_address)
            .field("listen_port", &self.listen_port)
            .field("codec", &self.codec.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .field("ordering_guarantee", &self.ordering_guarantee)
            .field("retries", &self.retries)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

/// 从基础设置与覆盖项构造相互独立的 [`RemoteManager`]。
///
/// 每次 [`RemoteManagerFactory::create`] 都在基础设置的副本上工作，产出的管理器之间
/// 不共享配置，也不会回写基础设置。
pub struct RemoteManagerFactory<M> {
    base: RemoteManagerSettings<M>,
}

impl<M> RemoteManagerFactory<M>
where
    M: Send + Sync + 'static,
{
    pub fn new(base: RemoteManagerSettings<M>) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &RemoteManagerSettings<M> {
        &self.base
    }

    /// 以基础设置构造管理器。
    pub fn create_default(&self) -> Result<RemoteManager<M>, RemoteError> {
        self.create(RemoteOverrides::default())
    }

    /// 叠加覆盖项后构造管理器。
    pub fn create(&self, overrides: RemoteOverrides<M>) -> Result<RemoteManager<M>, RemoteError> {
        let settings = overrides.apply(&self.base)?;
        debug!(name = %settings.name, ?overrides, "creating remote manager");
        RemoteManager::new(
            settings.name,
            settings.config,
            settings.codec,
            settings.error_handler,
            settings.resolver.as_ref(),
        )
    }
}

impl<M> fmt::Debug for RemoteManagerFactory<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteManagerFactory")
            .field("base", &self.base)
            .finish()
    }
}

//! 集成测试：`RemoteManagerFactory` 装配与 `RemoteManager` 收发。
//!
//! ## 设计意图（Why）
//! - 每次构造都叠加在基础设置的副本上，不同管理器之间互不影响；
//! - 入站负载以管理器自身的编解码器解码，解码失败走错误处理器而不是处理器。

mod support;

use std::{
    sync::{Arc, mpsc},
    time::Duration,
};

use bytes::Bytes;
use spark_remote::{
    BytesCodec, ChannelRole, ErrorKind, EventHandler, LoopbackResolver, RemoteError, StringCodec,
};
use spark_remote_tcp::{RemoteManagerFactory, RemoteManagerSettings, RemoteMessage, RemoteOverrides};
use support::{WAIT, error_collector};

fn string_factory(range_begin: u16) -> (RemoteManagerFactory<String>, mpsc::Receiver<RemoteError>) {
    let (errors, error_rx) = error_collector();
    let factory = RemoteManagerFactory::new(RemoteManagerSettings {
        name: "driver".to_owned(),
        config: support::config(range_begin),
        codec: Arc::new(StringCodec),
        error_handler: errors,
        resolver: Arc::new(LoopbackResolver),
    });
    (factory, error_rx)
}

fn message_collector<M: Send + 'static>() -> (Arc<dyn EventHandler<RemoteMessage<M>>>, mpsc::Receiver<RemoteMessage<M>>) {
    let (tx, rx) = mpsc::channel();
    let handler: Arc<dyn EventHandler<RemoteMessage<M>>> = Arc::new(move |message: RemoteMessage<M>| {
        let _ = tx.send(message);
    });
    (handler, rx)
}

#[test]
fn managers_exchange_messages() {
    let (factory, _errors) = string_factory(22_000);
    let server = factory
        .create(RemoteOverrides::new().with_name("evaluator"))
        .expect("server manager");
    let client = factory.create_default().expect("client manager");
    assert_eq!(server.name(), "evaluator");
    assert_eq!(client.name(), "driver");
    assert_ne!(server.identifier(), client.identifier());

    let (handler, inbox) = message_collector();
    server.register_handler(handler);

    let target = server.transport().advertised_address().clone();
    client.send(&target, "hello".to_owned()).expect("send");
    let received = inbox.recv_timeout(WAIT).expect("message");
    assert_eq!(received.message, "hello");
    assert_eq!(received.role, ChannelRole::Server);

    client.close();
    server.close();
}

#[test]
fn overrides_do_not_touch_base_settings() {
    let (factory, _errors) = string_factory(24_000);
    let manager = factory
        .create(
            RemoteOverrides::new()
                .with_host_address("127.0.0.1")
                .with_ordering_guarantee(false)
                .with_retries(0)
                .with_retry_backoff(Duration::from_millis(1)),
        )
        .expect("manager");

    let config = manager.transport().config();
    assert!(!config.ordering_guarantee);
    assert_eq!(config.retry.retries, 0);
    assert_eq!(manager.identifier(), format!("127.0.0.1:{}", manager.local_address().port()));

    let base = &factory.base().config;
    assert!(base.host_address.is_none());
    assert!(base.ordering_guarantee);
    assert_eq!(base.retry.retries, 2);
    manager.close();
}

#[test]
fn undecodable_payload_goes_to_error_handler() {
    let (factory, errors) = string_factory(26_000);
    let server = factory.create_default().expect("server manager");
    let (handler, inbox) = message_collector();
    server.register_handler(handler);

    let (client_errors, _) = error_collector();
    let bytes_factory = RemoteManagerFactory::<Bytes>::new(RemoteManagerSettings {
        name: "raw".to_owned(),
        config: support::config(28_000),
        codec: Arc::new(BytesCodec),
        error_handler: client_errors,
        resolver: Arc::new(LoopbackResolver),
    });
    let client = bytes_factory.create_default().expect("client manager");

    let target = server.transport().advertised_address().clone();
    client
        .send(&target, Bytes::from_static(&[0xff, 0xfe, 0xfd]))
        .expect("send");

    let err = errors.recv_timeout(WAIT).expect("decode error reported");
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(err.to_string().contains("decode failed"));
    assert!(inbox.try_recv().is_err());

    client.close();
    server.close();
}

#[test]
fn send_after_close_fails() {
    let (factory, _errors) = string_factory(30_000);
    let server = factory.create_default().expect("server");
    let client = factory.create_default().expect("client");
    let target = server.transport().advertised_address().clone();

    client.close();
    let err = client.send(&target, "late".to_owned()).expect_err("closed");
    assert!(matches!(err, RemoteError::Closed));
    assert_eq!(client.transport().alive_threads(), 0);
    server.close();
}

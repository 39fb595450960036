//! 集成测试：多个调用方共享同一链路缓存时的建连协作。
//!
//! ## 设计意图（Why）
//! - 等待者醒来后若发现对方建连失败，必须自行进入下一轮，而不是把对方的失败当作自己的结果；
//! - 链路失活移除条目后，再次建连应从 `Idle` 的新条目开始。
//!
//! ## 预置条件（What）
//! - 连接器为闭包，以通道控制其阻塞与返回时机，不涉及真实网络。

use std::{
    io,
    sync::{Arc, mpsc},
    thread,
    time::Duration,
};

use spark_remote::{ConnectionEstablisher, LinkCache, LinkState, RemoteAddress, RetryPolicy};

#[derive(Debug)]
struct Handle(&'static str);

/// 先到者建连被拒，等待者醒来后自行建连成功。
#[test]
fn waiter_connects_after_owner_fails() {
    let cache = Arc::new(LinkCache::<Handle>::new());
    let address = RemoteAddress::new("10.2.0.1", 9000);

    let owner = ConnectionEstablisher::new(
        Arc::clone(&cache),
        RetryPolicy::new(0, Duration::from_millis(1)),
    );
    let waiter = ConnectionEstablisher::new(
        Arc::clone(&cache),
        RetryPolicy::new(1, Duration::from_millis(1)),
    );

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let owner_thread = {
        let address = address.clone();
        thread::spawn(move || {
            let mut connector = move |_: &RemoteAddress| -> io::Result<Handle> {
                started_tx.send(()).expect("signal start");
                release_rx.recv().expect("wait release");
                Err(io::Error::from(io::ErrorKind::ConnectionRefused))
            };
            owner.establish(&address, &mut connector)
        })
    };

    started_rx.recv().expect("owner is connecting");
    assert_eq!(cache.reference(&address).state(), LinkState::Connecting);

    let waiter_thread = {
        let address = address.clone();
        thread::spawn(move || {
            let mut connector = |_: &RemoteAddress| -> io::Result<Handle> { Ok(Handle("waiter")) };
            waiter.establish(&address, &mut connector)
        })
    };

    thread::sleep(Duration::from_millis(50));
    release_tx.send(()).expect("release owner");

    let owner_result = owner_thread.join().expect("owner thread");
    assert!(owner_result.is_err());

    let link = waiter_thread
        .join()
        .expect("waiter thread")
        .expect("waiter establishes its own link");
    assert_eq!(link.0, "waiter");
    assert_eq!(cache.reference(&address).state(), LinkState::Established);
}

/// 失活移除后，新的建连得到新的链路。
#[test]
fn evicted_address_reconnects_from_idle() {
    let cache = Arc::new(LinkCache::<Handle>::new());
    let establisher = ConnectionEstablisher::new(Arc::clone(&cache), RetryPolicy::default());
    let address = RemoteAddress::new("10.2.0.2", 9000);

    let mut first = |_: &RemoteAddress| -> io::Result<Handle> { Ok(Handle("first")) };
    let link = establisher.establish(&address, &mut first).expect("first link");
    assert!(cache.evict(&address, &link));
    assert!(cache.get(&address).is_none());

    let mut second = |_: &RemoteAddress| -> io::Result<Handle> { Ok(Handle("second")) };
    let relinked = establisher.establish(&address, &mut second).expect("second link");
    assert_eq!(relinked.0, "second");
    assert!(!Arc::ptr_eq(&link, &relinked));
    assert_eq!(cache.links().len(), 1);
}

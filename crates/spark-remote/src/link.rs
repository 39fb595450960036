//! 链路上的编解码与投递契约。
//!
//! 传输层只搬运字节；消息与字节之间的转换由 [`Encoder`]/[`Decoder`] 完成，
//! 每条消息的投递结果由 [`LinkListener`] 接收，入站字节以 [`TransportEvent`] 交给 [`EventHandler`]。

use std::{fmt, net::SocketAddr, sync::Arc};

use bytes::Bytes;

use crate::error::RemoteError;

/// 将消息编码为字节。
pub trait Encoder<T>: Send + Sync {
    fn encode(&self, message: &T) -> Result<Bytes, RemoteError>;
}

/// 将字节解码为消息。
pub trait Decoder<T>: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<T, RemoteError>;
}

/// 同时具备编码与解码能力的编解码器。
pub trait Codec<T>: Encoder<T> + Decoder<T> {}

impl<T, C> Codec<T> for C where C: Encoder<T> + Decoder<T> {}

/// 单条消息的投递结果监听器。
///
/// - `on_success`：消息已完整写入套接字；
/// - `on_exception`：写入失败，附带远端地址与原消息。
pub trait LinkListener<T>: Send + Sync {
    fn on_success(&self, message: &T);

    fn on_exception(&self, error: &RemoteError, remote: SocketAddr, message: &T);
}

/// 不关心投递结果时使用的监听器。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLinkListener;

impl<T> LinkListener<T> for NoopLinkListener {
    fn on_success(&self, _message: &T) {}

    fn on_exception(&self, _error: &RemoteError, _remote: SocketAddr, _message: &T) {}
}

/// 事件处理器：入站消息与旁路错误都以该契约投递。
pub trait EventHandler<E>: Send + Sync {
    fn on_next(&self, event: E);
}

impl<E, F> EventHandler<E> for F
where
    F: Fn(E) + Send + Sync,
{
    fn on_next(&self, event: E) {
        self(event)
    }
}

/// 共享的错误处理器。
pub type ErrorHandler = Arc<dyn EventHandler<RemoteError>>;

/// 通道在传输中的角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    /// 由监听套接字接受的入站通道。
    Server,
    /// 由 `open` 建立的出站通道。
    Client,
}

/// 通道上收到的一帧数据。
#[derive(Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub role: ChannelRole,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub payload: Bytes,
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvent")
            .field("role", &self.role)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// 字节透传编解码器。
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesCodec;

impl Encoder<Bytes> for BytesCodec {
    fn encode(&self, message: &Bytes) -> Result<Bytes, RemoteError> {
        Ok(message.clone())
    }
}

impl Decoder<Bytes> for BytesCodec {
    fn decode(&self, payload: &[u8]) -> Result<Bytes, RemoteError> {
        Ok(Bytes::copy_from_slice(payload))
    }
}

/// UTF-8 字符串编解码器。
#[derive(Clone, Copy, Debug, Default)]
pub struct StringCodec;

impl Encoder<String> for StringCodec {
    fn encode(&self, message: &String) -> Result<Bytes, RemoteError> {
        Ok(Bytes::copy_from_slice(message.as_bytes()))
    }
}

impl Decoder<String> for StringCodec {
    fn decode(&self, payload: &[u8]) -> Result<String, RemoteError> {
        String::from_utf8(payload.to_vec())
            .map_err(|err| RemoteError::protocol("codec", format!("payload is not UTF-8: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn string_codec_rejects_invalid_utf8() {
        let err = StringCodec.decode(&[0xff, 0xfe]).expect_err("invalid utf-8");
        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
        assert_eq!(StringCodec.decode(b"hello").expect("decode"), "hello");
    }

    #[test]
    fn closures_are_event_handlers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: Arc<dyn EventHandler<u32>> = Arc::new(move |value: u32| {
            sink.lock().expect("lock").push(value);
        });
        handler.on_next(1);
        handler.on_next(2);
        assert_eq!(*seen.lock().expect("lock"), vec![1, 2]);
    }
}

//! 线上帧格式：4 字节大端长度前缀 + 负载。
//!
//! 长度超过 `max_frame_length` 的帧在编码与解码两侧都会被拒绝，
//! 解码侧以 `io::ErrorKind::InvalidData` 终止通道。

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

pub(crate) const HEADER_LEN: usize = 4;

/// 为负载加上长度前缀，产出可一次性写入的帧。
pub(crate) fn encode(payload: &[u8], max_frame_length: usize) -> io::Result<Bytes> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len as usize <= max_frame_length)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame of {} bytes exceeds limit of {max_frame_length} bytes",
                    payload.len()
                ),
            )
        })?;
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u32(len);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// 读取一帧。对端在帧边界处关闭时返回 `Ok(None)`；帧内截断返回 `UnexpectedEof`。
pub(crate) async fn read<R>(reader: &mut R, max_frame_length: usize) -> io::Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(io::Error::from(io::ErrorKind::UnexpectedEof))
            };
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame_length {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("incoming frame of {len} bytes exceeds limit of {max_frame_length} bytes"),
        ));
    }
    let mut payload = BytesMut::zeroed(len);
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload.freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_consecutive_frames_then_clean_eof() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode(b"hello", 64).expect("encode"));
        wire.extend_from_slice(&encode(b"", 64).expect("encode"));
        let mut reader = wire.as_slice();

        assert_eq!(read(&mut reader, 64).await.expect("frame"), Some(Bytes::from_static(b"hello")));
        assert_eq!(read(&mut reader, 64).await.expect("frame"), Some(Bytes::new()));
        assert_eq!(read(&mut reader, 64).await.expect("eof"), None);
    }

    #[tokio::test]
    async fn truncated_frame_is_unexpected_eof() {
        let frame = encode(b"payload", 64).expect("encode");
        let mut reader = &frame[..frame.len() - 2];
        let err = read(&mut reader, 64).await.expect_err("truncated");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut header_only = &frame[..2];
        let err = read(&mut header_only, 64).await.expect_err("truncated header");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        assert_eq!(
            encode(&[0u8; 32], 16).expect_err("too large").kind(),
            io::ErrorKind::InvalidInput
        );
        let frame = encode(&[0u8; 32], 64).expect("encode");
        let mut reader = &frame[..];
        assert_eq!(
            read(&mut reader, 16).await.expect_err("too large").kind(),
            io::ErrorKind::InvalidData
        );
    }
}

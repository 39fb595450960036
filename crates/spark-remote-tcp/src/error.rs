use std::{io, net::SocketAddr};

use spark_remote::RemoteError;

/// 描述一次底层操作对应的操作名与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub operation: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    operation: "bind",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    operation: "accept",
    message: "tcp accept",
};
pub(crate) const READ: OperationKind = OperationKind {
    operation: "read",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    operation: "write",
    message: "tcp write",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    operation: "configure",
    message: "tcp configure",
};
pub(crate) const RUNTIME: OperationKind = OperationKind {
    operation: "runtime",
    message: "worker pool",
};

/// 将 IO 错误映射为带操作名的 [`RemoteError::Io`]。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> RemoteError {
    RemoteError::io(kind.operation, error)
}

/// 已建立通道上的 IO 失败统一视为协议错误，交给错误处理器旁路上报。
pub(crate) fn channel_error(kind: OperationKind, remote: SocketAddr, error: io::Error) -> RemoteError {
    let detail = if is_peer_gone(&error) {
        format!("{}: peer closed the channel ({error})", kind.message)
    } else {
        format!("{}: {error}", kind.message)
    };
    RemoteError::protocol(remote, detail)
}

/// 对端已断开一类的错误。
pub(crate) fn is_peer_gone(error: &io::Error) -> bool {
    use io::ErrorKind;
    matches!(
        error.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected
    )
}

use std::io;

/// Category of a [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// The host name could not be resolved.
    CouldNotResolveAddr,

    /// A method was called out of order, or on a closed sender.
    InvalidApiCall,

    /// A socket could not be created, connected, written or read.
    SocketError,

    /// A table, symbol or column name failed validation.
    InvalidName,

    /// A timestamp could not be represented in the requested unit.
    InvalidTimestamp,

    /// A column value cannot be encoded by the active protocol version.
    InvalidValue,

    /// A decimal literal or decimal value is malformed.
    InvalidDecimal,

    /// An array has an unsupported shape.
    ArrayError,

    /// The authentication handshake failed.
    AuthError,

    /// TLS was requested but could not be established.
    TlsError,

    /// The configuration string or builder settings are invalid.
    ConfigError,

    /// The server rejected a flush or answered with an unreadable response.
    ServerFlushError,

    /// A feature was used that the selected protocol version lacks.
    ProtocolVersionError,
}

/// Error returned by the line encoder, the transports and the sender.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}{msg}", errno_prefix(.errno))]
pub struct Error {
    code: ErrorCode,
    msg: String,
    errno: Option<i32>,
    retryable: bool,
}

impl Error {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            errno: None,
            retryable: false,
        }
    }

    pub fn with_errno(mut self, errno: Option<i32>) -> Self {
        self.errno = errno;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }

    pub fn errno(&self) -> Option<i32> {
        self.errno
    }

    /// Whether repeating the same flush may succeed.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

fn errno_prefix(errno: &Option<i32>) -> String {
    errno.map(|errno| format!("[{errno}] ")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, Error>;

/// Builds an [`Error`] from a code and a format string.
macro_rules! fmt_error {
    ($code:ident, $($arg:tt)*) => {
        $crate::error::Error::new($crate::error::ErrorCode::$code, format!($($arg)*))
    };
}

pub(crate) use fmt_error;

/// Whether an I/O failure is worth retrying on a fresh connection.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Interrupted
    )
}

pub(crate) fn socket_error(context: &str, err: io::Error) -> Error {
    let retryable = is_transient(&err);
    Error::new(ErrorCode::SocketError, format!("{context}: {err}"))
        .with_errno(err.raw_os_error())
        .with_retryable(retryable)
}

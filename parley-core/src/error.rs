use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Bridge encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Bridge decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("QR render error: {0}")]
    Qr(#[from] qrcode::types::QrError),

    #[error("Other error: {0}")]
    Other(String),
}

/// Faults raised by the messaging transport. Always recovered by the session
/// manager; never process-fatal.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Bridge unreachable at {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Bridge connect timed out after {seconds}s")]
    ConnectTimeout { seconds: u64 },

    #[error("Bridge I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bridge protocol error: {0}")]
    Protocol(String),

    #[error("Connection already destroyed")]
    Destroyed,
}

impl From<ParleyError> for TransportError {
    fn from(e: ParleyError) -> Self {
        TransportError::Protocol(e.to_string())
    }
}

/// Conversation/account persistence errors. Logged and dropped by callers on
/// the reply path.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("No account found")]
    AccountNotFound,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

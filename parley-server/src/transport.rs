//! Messaging transport.
//!
//! The session manager talks to the messaging network through two traits:
//! a `Connector` that builds a fresh `Connection` for an account, and the
//! `MessagingClient` handle inside it used to send replies and to tear the
//! connection down. The production implementation reaches a bridge sidecar
//! over a Unix socket (length-prefixed MessagePack, see `parley_core::bridge`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parley_core::bridge::{decode_event, encode_command, BridgeCommand, BridgeEvent};
use parley_core::config::TransportConfig;
use parley_core::models::AccountIdentity;
use parley_core::{AccountContext, TransportError};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// An inbound chat message as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub from: String,
    pub body: String,
    pub push_name: Option<String>,
    pub message_id: Option<String>,
}

/// Everything a connection can report.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    PairingChallenge(String),
    Ready(AccountIdentity),
    AuthFailure(String),
    Disconnected(String),
    Error(String),
    Message(InboundMessage),
}

impl From<BridgeEvent> for TransportEvent {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Qr { payload } => TransportEvent::PairingChallenge(payload),
            BridgeEvent::Ready {
                phone_number,
                display_name,
            } => TransportEvent::Ready(AccountIdentity {
                phone_number,
                display_name,
            }),
            BridgeEvent::AuthFailure { reason } => TransportEvent::AuthFailure(reason),
            BridgeEvent::Disconnected { reason } => TransportEvent::Disconnected(reason),
            BridgeEvent::Error { message } => TransportEvent::Error(message),
            BridgeEvent::Message {
                from,
                body,
                push_name,
                message_id,
            } => TransportEvent::Message(InboundMessage {
                from,
                body,
                push_name,
                message_id,
            }),
        }
    }
}

#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError>;

    /// Release the client and its handles. Calling twice returns
    /// `TransportError::Destroyed`.
    async fn destroy(&self) -> Result<(), TransportError>;
}

/// A live connection: the client handle plus its event stream.
pub struct Connection {
    pub client: Arc<dyn MessagingClient>,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, ctx: &AccountContext) -> Result<Connection, TransportError>;
}

// ============================================================================
// Bridge transport
// ============================================================================

type BridgeWriter = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

fn le_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().little_endian().new_codec()
}

pub struct BridgeConnector {
    config: TransportConfig,
    /// Directory the bridge keeps this account's auth state in.
    session_dir: String,
}

impl BridgeConnector {
    pub fn new(config: TransportConfig, session_dir: String) -> Self {
        Self {
            config,
            session_dir,
        }
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(&self, ctx: &AccountContext) -> Result<Connection, TransportError> {
        let path = self.config.bridge_socket.clone();
        let seconds = self.config.connect_timeout_seconds;

        let stream = tokio::time::timeout(Duration::from_secs(seconds), UnixStream::connect(&path))
            .await
            .map_err(|_| TransportError::ConnectTimeout { seconds })?
            .map_err(|source| TransportError::Connect {
                path: path.clone(),
                source,
            })?;

        let (read, write) = stream.into_split();
        let mut framed_read = FramedRead::new(read, le_codec());
        let mut framed_write = FramedWrite::new(write, le_codec());

        let start = BridgeCommand::Start {
            account_id: ctx.account_id,
            session_dir: self.session_dir.clone(),
        };
        framed_write.send(Bytes::from(encode_command(&start)?)).await?;

        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let account_id = ctx.account_id;

        let reader = tokio::spawn(async move {
            while let Some(frame) = framed_read.next().await {
                let event = match frame {
                    Ok(bytes) => match decode_event(&bytes) {
                        Ok(event) => TransportEvent::from(event),
                        Err(e) => {
                            tracing::warn!(account_id = %account_id, error = %e, "Dropping undecodable bridge frame");
                            continue;
                        }
                    },
                    Err(e) => {
                        tracing::error!(account_id = %account_id, error = %e, "Bridge frame error");
                        let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(TransportEvent::Disconnected("bridge_closed".to_string()))
                .await;
        });

        tracing::info!(account_id = %account_id, socket = %path, "Connected to messaging bridge");

        Ok(Connection {
            client: Arc::new(BridgeClient {
                writer: Mutex::new(framed_write),
                reader,
                destroyed: AtomicBool::new(false),
            }),
            events: rx,
        })
    }
}

struct BridgeClient {
    writer: Mutex<BridgeWriter>,
    reader: JoinHandle<()>,
    destroyed: AtomicBool,
}

impl BridgeClient {
    async fn send_command(&self, command: &BridgeCommand) -> Result<(), TransportError> {
        let frame = Bytes::from(encode_command(command)?);
        self.writer.lock().await.send(frame).await?;
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for BridgeClient {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(TransportError::Destroyed);
        }
        self.send_command(&BridgeCommand::SendText {
            to: to.to_string(),
            body: body.to_string(),
        })
        .await
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Destroyed);
        }
        let result = self.send_command(&BridgeCommand::Destroy).await;
        let closed = SinkExt::<Bytes>::close(&mut *self.writer.lock().await).await;
        self.reader.abort();
        result?;
        closed?;
        Ok(())
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

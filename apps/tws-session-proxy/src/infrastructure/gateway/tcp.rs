//! TCP Gateway Transport
//!
//! Connects to a TWS / IB Gateway socket, performs the greeting and runs two
//! tasks per connection:
//!
//! - **reader**: decodes frames into `GatewayEvent`s; end of stream or a read
//!   error is reported as `ConnectionClosed`
//! - **writer**: drains an unbounded queue of encoded requests, so `send`
//!   never waits on the socket; on disconnect it flushes whatever is still
//!   queued before closing
//!
//! # Greeting
//!
//! ```text
//! client: "API\0" + frame("v100..187")
//! server: frame(server_version, connection_time)
//! client: START_API(client_id)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use super::codec::FrameCodec;
use super::messages::{self, VERSION_RANGE};
use crate::application::ports::{
    GatewayEndpoint, GatewayEvent, GatewayRequest, GatewayTransport, TransportError,
};

/// Default time allowed for TCP connect plus greeting.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type FrameSink = SplitSink<Framed<TcpStream, FrameCodec>, Vec<String>>;
type FrameStream = SplitStream<Framed<TcpStream, FrameCodec>>;

struct Connection {
    outbound: mpsc::UnboundedSender<Vec<String>>,
    cancel: CancellationToken,
    server_version: i32,
}

/// `GatewayTransport` over a TCP socket.
pub struct TcpGateway {
    connection: Mutex<Option<Connection>>,
    connect_timeout: Duration,
}

impl Default for TcpGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpGateway {
    /// Create a disconnected gateway.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connection: Mutex::new(None),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the connect + greeting timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Server version reported in the greeting, while connected.
    #[must_use]
    pub fn server_version(&self) -> Option<i32> {
        self.connection.lock().as_ref().map(|c| c.server_version)
    }

    /// Whether a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }
}

#[async_trait]
impl GatewayTransport for TcpGateway {
    async fn connect(
        &self,
        endpoint: &GatewayEndpoint,
        event_capacity: usize,
    ) -> Result<mpsc::Receiver<GatewayEvent>, TransportError> {
        if self.is_connected() {
            return Err(TransportError::Handshake("already connected".to_string()));
        }

        let address = endpoint.address();
        let (framed, server_version, connection_time) =
            tokio::time::timeout(self.connect_timeout, open(&address, endpoint.client_id))
                .await
                .map_err(|_| {
                    TransportError::Handshake(format!(
                        "no greeting from {address} within {:?}",
                        self.connect_timeout
                    ))
                })??;

        tracing::info!(
            %address,
            client_id = endpoint.client_id,
            server_version,
            %connection_time,
            "Connected to gateway"
        );

        let (sink, stream) = framed.split();
        let (event_tx, event_rx) = mpsc::channel(event_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(read_frames(stream, event_tx, cancel.clone()));
        tokio::spawn(write_frames(sink, outbound_rx, cancel.clone()));

        *self.connection.lock() = Some(Connection {
            outbound: outbound_tx,
            cancel,
            server_version,
        });
        Ok(event_rx)
    }

    fn send(&self, request: &GatewayRequest) -> Result<(), TransportError> {
        let connection = self.connection.lock();
        let connection = connection.as_ref().ok_or(TransportError::NotConnected)?;
        connection
            .outbound
            .send(messages::encode_request(request))
            .map_err(|_| TransportError::Closed)
    }

    fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().take() {
            connection.cancel.cancel();
            tracing::info!("Disconnected from gateway");
        }
    }
}

async fn open(
    address: &str,
    client_id: i32,
) -> Result<(Framed<TcpStream, FrameCodec>, i32, String), TransportError> {
    let mut stream = TcpStream::connect(address).await?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
    }

    let mut prefix = BytesMut::with_capacity(8 + VERSION_RANGE.len());
    prefix.put_slice(b"API\0");
    prefix.put_u32(u32::try_from(VERSION_RANGE.len()).unwrap_or(u32::MAX));
    prefix.put_slice(VERSION_RANGE.as_bytes());
    stream.write_all(&prefix).await?;

    let mut framed = Framed::new(stream, FrameCodec::new());
    let greeting = framed
        .next()
        .await
        .ok_or_else(|| TransportError::Handshake("connection closed during greeting".to_string()))??;

    let server_version = greeting
        .first()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .ok_or_else(|| TransportError::Handshake(format!("unexpected greeting {greeting:?}")))?;
    let connection_time = greeting.get(1).cloned().unwrap_or_default();

    framed.send(messages::encode_start_api(client_id)).await?;
    Ok((framed, server_version, connection_time))
}

async fn read_frames(
    mut frames: FrameStream,
    events: mpsc::Sender<GatewayEvent>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = frames.next() => frame,
        };

        let event = match frame {
            Some(Ok(fields)) => match messages::decode_event(&fields) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed gateway message");
                    continue;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Gateway read failed");
                GatewayEvent::ConnectionClosed
            }
            None => {
                tracing::info!("Gateway closed the connection");
                GatewayEvent::ConnectionClosed
            }
        };

        let closed = matches!(event, GatewayEvent::ConnectionClosed);
        if events.send(event).await.is_err() || closed {
            break;
        }
    }
    tracing::debug!("Gateway reader finished");
}

async fn write_frames(
    mut sink: FrameSink,
    mut outbound: mpsc::UnboundedReceiver<Vec<String>>,
    cancel: CancellationToken,
) {
    loop {
        // Queued requests win over cancellation, so a disconnect right after
        // a send still writes it.
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => frame,
            () = cancel.cancelled() => break,
        };
        let Some(frame) = frame else { break };

        if let Err(e) = sink.send(frame).await {
            tracing::warn!(error = %e, "Gateway write failed");
            cancel.cancel();
            break;
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "Error closing gateway socket");
    }
    tracing::debug!("Gateway writer finished");
}

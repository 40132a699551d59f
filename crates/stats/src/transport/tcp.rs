//! Plain TCP transport with newline-delimited JSON frames.
//!
//! One JSON object per line, tagged by `type`. A provider opens the
//! connection and sends `hello` with its nickname and node key; the gatherer
//! answers `welcome` (carrying the identity it registered) or `rejected` and
//! then issues `get_stats` calls, each tagged with a `call_id` the provider
//! echoes in its `stats` or `error` reply.
//!
//! Frames longer than [`MAX_FRAME_LEN`] close the connection, and a peer
//! that has not said `hello` within [`HELLO_TIMEOUT`] is dropped.
//!
//! This transport does not prove possession of the node key; it exists so
//! the binaries can run against each other on a trusted network.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{DisconnectHandler, DisconnectNotifier, Dialer, ProviderLink, ProviderSession, StatsService};
use crate::error::TransportError;
use crate::gatherer::Gatherer;
use crate::identity::{NodeKey, ProviderId};
use crate::stats::StatsReport;

/// Longest accepted frame, excluding the newline.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// How long an accepted connection may stay silent before its `hello`.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

type FrameReader = BufReader<OwnedReadHalf>;

/// Wire frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Hello {
        nickname: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_key: Option<String>,
    },
    Welcome {
        identity: ProviderId,
    },
    Rejected {
        reason: String,
    },
    GetStats {
        call_id: u64,
    },
    Stats {
        call_id: u64,
        report: StatsReport,
    },
    Error {
        call_id: u64,
        message: String,
    },
}

async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let limit = MAX_FRAME_LEN as u64 + 1;
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.len() > MAX_FRAME_LEN {
        return Err(TransportError::Protocol(format!(
            "frame exceeds {MAX_FRAME_LEN} bytes"
        )));
    }
    Ok(Some(serde_json::from_slice(&line)?))
}

type PendingCalls = HashMap<u64, oneshot::Sender<Result<StatsReport, TransportError>>>;

/// Gatherer-side link to a provider over TCP.
pub struct TcpProviderLink {
    identity: Option<ProviderId>,
    peer_addr: SocketAddr,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    // `None` once the connection is gone.
    pending: Mutex<Option<PendingCalls>>,
    next_call: AtomicU64,
    notifier: Mutex<DisconnectNotifier>,
}

impl TcpProviderLink {
    fn new(identity: Option<ProviderId>, peer_addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            identity,
            peer_addr,
            writer: tokio::sync::Mutex::new(writer),
            pending: Mutex::new(Some(HashMap::new())),
            next_call: AtomicU64::new(1),
            notifier: Mutex::new(DisconnectNotifier::default()),
        }
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, frame).await
    }

    fn complete(&self, call_id: u64, result: Result<StatsReport, TransportError>) {
        let waiter = self
            .pending
            .lock()
            .as_mut()
            .and_then(|pending| pending.remove(&call_id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!(peer = %self.peer_addr, call_id, "reply for unknown call"),
        }
    }

    /// Fail every pending call and run the disconnect handlers.
    fn shut_down(&self) {
        let pending = self.pending.lock().take();
        for (_, tx) in pending.into_iter().flatten() {
            let _ = tx.send(Err(TransportError::Disconnected));
        }
        let handlers = self.notifier.lock().fire();
        for handler in handlers {
            handler();
        }
    }

    async fn read_replies(self: Arc<Self>, mut reader: FrameReader) {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(Frame::Stats { call_id, report })) => self.complete(call_id, Ok(report)),
                Ok(Some(Frame::Error { call_id, message })) => {
                    self.complete(call_id, Err(TransportError::Remote(message)));
                }
                Ok(Some(other)) => {
                    warn!(peer = %self.peer_addr, frame = ?other, "unexpected frame from provider");
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(peer = %self.peer_addr, error = %e, "provider connection failed");
                    break;
                }
            }
        }
        self.shut_down();
    }
}

#[async_trait]
impl ProviderLink for TcpProviderLink {
    fn identity(&self) -> Option<ProviderId> {
        self.identity.clone()
    }

    async fn get_stats(&self) -> Result<StatsReport, TransportError> {
        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            let Some(pending) = pending.as_mut() else {
                return Err(TransportError::Disconnected);
            };
            pending.insert(call_id, tx);
        }

        if let Err(e) = self.send(&Frame::GetStats { call_id }).await {
            if let Some(pending) = self.pending.lock().as_mut() {
                pending.remove(&call_id);
            }
            return Err(e);
        }

        rx.await.unwrap_or(Err(TransportError::Disconnected))
    }

    fn on_disconnect(&self, handler: DisconnectHandler) {
        let late = self.notifier.lock().register(handler);
        if let Some(handler) = late {
            handler();
        }
    }
}

/// Accept provider connections on `listener` until it fails.
pub async fn serve(listener: TcpListener, gatherer: Arc<Gatherer>) -> std::io::Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let gatherer = Arc::clone(&gatherer);
        tokio::spawn(async move {
            if let Err(e) = accept_provider(stream, peer_addr, gatherer).await {
                debug!(peer = %peer_addr, error = %e, "provider handshake failed");
            }
        });
    }
}

async fn accept_provider(
    stream: TcpStream,
    peer_addr: SocketAddr,
    gatherer: Arc<Gatherer>,
) -> Result<(), TransportError> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let hello = tokio::time::timeout(HELLO_TIMEOUT, read_frame(&mut reader))
        .await
        .map_err(|_| TransportError::Protocol("no hello before timeout".to_string()))??;
    let (nickname, node_key) = match hello {
        Some(Frame::Hello { nickname, node_key }) => (nickname, node_key),
        Some(other) => {
            return Err(TransportError::Protocol(format!(
                "expected hello, got {other:?}"
            )));
        }
        None => return Err(TransportError::Disconnected),
    };

    let identity = ProviderId::from_presented_key(node_key.as_deref());
    let link = Arc::new(TcpProviderLink::new(identity, peer_addr, write_half));

    match gatherer.handle_provide(Arc::clone(&link) as Arc<dyn ProviderLink>, &nickname) {
        Ok(record) => {
            tokio::spawn(Arc::clone(&link).read_replies(reader));
            link.send(&Frame::Welcome {
                identity: record.identity,
            })
            .await
        }
        Err(e) => {
            link.send(&Frame::Rejected {
                reason: e.to_string(),
            })
            .await?;
            link.writer.lock().await.shutdown().await?;
            Ok(())
        }
    }
}

/// Provider-side TCP dialer.
pub struct TcpDialer {
    key: Option<NodeKey>,
}

impl TcpDialer {
    #[must_use]
    pub fn new(key: Option<NodeKey>) -> Self {
        Self { key }
    }

    /// Connect to the first reachable address of a comma-separated location
    /// list such as `192.168.1.10:7000,127.0.0.1:7000`.
    async fn open(location: &str) -> Result<TcpStream, TransportError> {
        let mut last_err = None;
        for addr in location.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(addr, error = %e, "gatherer address unreachable");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.map_or_else(
            || TransportError::Protocol(format!("no address in location {location:?}")),
            TransportError::Io,
        ))
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn when_ready(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn connect(
        &self,
        addr: &str,
        nickname: &str,
        service: Arc<dyn StatsService>,
    ) -> Result<ProviderSession, TransportError> {
        let stream = Self::open(addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        write_frame(
            &mut write_half,
            &Frame::Hello {
                nickname: nickname.to_string(),
                node_key: self.key.as_ref().map(NodeKey::to_hex),
            },
        )
        .await?;

        let (welcome_tx, welcome_rx) = oneshot::channel();
        let reader = BufReader::new(read_half);
        let task = tokio::spawn(answer_polls(reader, write_half, service, welcome_tx));

        match welcome_rx.await {
            Ok(Ok(identity)) => {
                info!(%identity, addr, "registered with gatherer");
                Ok(ProviderSession::new(identity, task))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => match task.await {
                Ok(Err(e)) => Err(e),
                _ => Err(TransportError::Disconnected),
            },
        }
    }
}

async fn answer_polls(
    mut reader: FrameReader,
    mut writer: OwnedWriteHalf,
    service: Arc<dyn StatsService>,
    welcome: oneshot::Sender<Result<ProviderId, TransportError>>,
) -> Result<(), TransportError> {
    let mut welcome = Some(welcome);
    loop {
        let Some(frame) = read_frame(&mut reader).await? else {
            return Ok(());
        };
        match frame {
            Frame::Welcome { identity } => {
                if let Some(tx) = welcome.take() {
                    let _ = tx.send(Ok(identity));
                }
            }
            Frame::Rejected { reason } => {
                if let Some(tx) = welcome.take() {
                    let _ = tx.send(Err(TransportError::Rejected(reason)));
                }
                return Ok(());
            }
            Frame::GetStats { call_id } => {
                let reply = match service.get_stats() {
                    Ok(report) => Frame::Stats { call_id, report },
                    Err(message) => Frame::Error { call_id, message },
                };
                write_frame(&mut writer, &reply).await?;
            }
            other => {
                return Err(TransportError::Protocol(format!(
                    "unexpected frame from gatherer: {other:?}"
                )));
            }
        }
    }
}

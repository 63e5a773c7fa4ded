//! Client session: socket ownership, the reader and writer tasks, and
//! request dispatch.
//!
//! A `Client` is a cheaply cloneable handle over one connection. The writer
//! task serializes outbound frames in send order; the reader task reassembles
//! inbound frames and resolves them against the pending table by tag, so any
//! number of requests can be in flight at once and responses may arrive in
//! any order.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::codec::MsgPackCodec;
use crate::error::{JoedbError, Result};
use crate::pending::PendingTable;
use crate::protocol::{FrameBuffer, Header, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::query::{FilterNode, Operation, Query, RequestDocument};
use crate::response::Response;
use crate::transport::ConnectSpec;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Default read buffer size (64 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default tag-space ceiling.
pub const DEFAULT_TAG_CEILING: u64 = 1024;

/// Session tuning knobs. The defaults suit most deployments.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Largest payload accepted in either direction.
    pub max_payload_size: u32,
    /// Number of distinct correlation tags; also the cap on concurrent
    /// in-flight requests.
    pub tag_ceiling: u64,
    /// How long a request waits for a free tag when all are in flight.
    pub tag_wait_timeout: Duration,
    /// Writer channel capacity.
    pub channel_capacity: usize,
    /// Pending outbound frames before sends start waiting.
    pub max_pending_frames: usize,
    /// How long a send waits out writer backpressure.
    pub backpressure_timeout: Duration,
    /// Socket read buffer size.
    pub read_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            tag_ceiling: DEFAULT_TAG_CEILING,
            tag_wait_timeout: Duration::from_secs(5),
            channel_capacity: 1024,
            max_pending_frames: 1024,
            backpressure_timeout: Duration::from_secs(5),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

struct SessionInner {
    writer: WriterHandle,
    pending: Arc<PendingTable>,
    config: ClientConfig,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<Result<()>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
        self.pending.fail_all();
    }
}

/// Handle to one server connection.
///
/// Clones share the session; the connection closes when the last clone is
/// dropped or [`disconnect`](Client::disconnect) is called.
#[derive(Clone)]
pub struct Client {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connect to `joedb://[user[:pass]@]host:port` with default settings.
    ///
    /// When the URL carries credentials, an authenticate exchange runs
    /// before this returns; a rejection closes the connection.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, ClientConfig::default()).await
    }

    /// Connect with explicit settings.
    pub async fn connect_with(url: &str, config: ClientConfig) -> Result<Self> {
        let spec = ConnectSpec::parse(url)?;
        let stream = TcpStream::connect(spec.address()).await?;
        debug!(address = %spec.address(), "connected");

        let client = Self::from_transport_with(stream, config);
        if spec.has_credentials() {
            if let (Some(username), Some(password)) = (&spec.username, &spec.password) {
                if let Err(err) = client.authenticate(username, password).await {
                    client.disconnect();
                    return Err(err);
                }
            }
        }
        Ok(client)
    }

    /// Drive a session over any byte stream, for tests or custom transports.
    pub fn from_transport<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::from_transport_with(stream, ClientConfig::default())
    }

    /// [`from_transport`](Client::from_transport) with explicit settings.
    pub fn from_transport_with<S>(stream: S, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);

        let (writer, writer_task) = spawn_writer_task(
            write_half,
            WriterConfig {
                max_pending_frames: config.max_pending_frames,
                channel_capacity: config.channel_capacity,
                backpressure_timeout: config.backpressure_timeout,
            },
        );

        let pending = Arc::new(PendingTable::new(config.tag_ceiling));
        let reader_task = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&pending),
            config.max_payload_size,
            config.read_buffer_size,
        ));

        Self {
            inner: Arc::new(SessionInner {
                writer,
                pending,
                config,
                reader_task,
                writer_task,
            }),
        }
    }

    /// Tear the session down. Every in-flight request resolves with
    /// [`JoedbError::ConnectionClosed`], as does any later `run`.
    pub fn disconnect(&self) {
        self.inner.reader_task.abort();
        self.inner.writer_task.abort();
        self.inner.pending.fail_all();
    }

    /// Start an empty query chain.
    pub fn query(&self) -> Query {
        Query::new(self.clone())
    }

    /// Start a chain against one table.
    pub fn table(&self, name: impl Into<String>) -> Query {
        self.query().table(name)
    }

    /// Chain requesting the table names.
    pub fn list_tables(&self) -> Query {
        self.query().list_tables()
    }

    /// Chain creating a table.
    pub fn create_table(&self, name: impl Into<String>) -> Query {
        self.query().create_table(name)
    }

    /// Chain dropping a table.
    pub fn drop_table(&self, name: impl Into<String>) -> Query {
        self.query().drop_table(name)
    }

    /// Chain renaming a table.
    pub fn rename_table(&self, old: impl Into<String>, new: impl Into<String>) -> Query {
        self.query().rename_table(old, new)
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Whether the outbound queue is full and sends would wait.
    pub fn is_backpressure_active(&self) -> bool {
        self.inner.writer.is_backpressure_active()
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let mut doc = RequestDocument::default();
        doc.set_operation(Operation::Authenticate);
        doc.username = Some(username.to_string());
        doc.password = Some(password.to_string());

        let response = self.dispatch(doc.to_wire()?, Vec::new()).await?;
        if response.is_ok() {
            Ok(())
        } else {
            let reason = response.message().unwrap_or("credentials rejected");
            Err(JoedbError::AuthenticationFailed(reason.to_string()))
        }
    }

    /// Encode one envelope, register a tag, write the frame, and await the
    /// correlated response.
    pub(crate) async fn dispatch(
        &self,
        envelope: Value,
        prefilters: Vec<Vec<FilterNode>>,
    ) -> Result<Response> {
        let payload = MsgPackCodec::encode(&envelope)?;
        if payload.len() > self.inner.config.max_payload_size as usize {
            return Err(JoedbError::Protocol(format!(
                "payload of {} bytes exceeds the {} byte limit",
                payload.len(),
                self.inner.config.max_payload_size
            )));
        }

        let (tag, receiver) = self
            .inner
            .pending
            .register_waiting(self.inner.config.tag_wait_timeout)
            .await?;

        let header = Header::new(tag, payload.len() as u32);
        let frame = OutboundFrame::new(&header, Bytes::from(payload));
        if let Err(err) = self.inner.writer.send(frame).await {
            self.inner.pending.discard(tag);
            return Err(err);
        }

        let mut response = receiver.await.map_err(|_| JoedbError::ConnectionClosed)??;
        response.apply_prefilters(&prefilters);
        Ok(response)
    }
}

/// Reader side of a session. Feeds raw socket bytes through the frame
/// buffer and resolves complete frames by tag. Any read failure or protocol
/// desync ends the session and sweeps the pending table.
async fn read_loop<R>(
    mut reader: R,
    pending: Arc<PendingTable>,
    max_payload_size: u32,
    read_buffer_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; read_buffer_size];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("connection closed by peer");
                break;
            }
            Ok(n) => match frames.push(&buf[..n]) {
                Ok(ready) => {
                    for frame in ready {
                        pending.resolve(frame);
                    }
                }
                Err(err) => {
                    error!(error = %err, "stream desynchronized, closing connection");
                    break;
                }
            },
            Err(err) => {
                error!(error = %err, "socket read failed");
                break;
            }
        }
    }

    pending.fail_all();
}

//! Networked access to a broker.
//!
//! [`Manager`] exposes a [`Broker`] on a TCP socket; [`RemoteChannels`] is
//! the client side, implementing the three channel traits by sending
//! [`Frame`]s and waiting for the matching [`Reply`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::channel::{ContentCache, ResultChannel, TaskChannel};
use crate::error::{ParallelError, Result};
use crate::protocol::{
    decode_payload, encode_payload, CacheKey, Frame, JobId, Reply, ResultEnvelope, TaskEnvelope,
};

/// Longest wait a client may ask the manager to block for.
const MAX_WAIT: Duration = Duration::from_secs(60);

/// TCP front end of a broker.
///
/// Runs on its own tokio runtime; dropping the manager stops it.
pub struct Manager {
    runtime: Option<Runtime>,
    local_addr: SocketAddr,
}

impl Manager {
    /// Bind `addr` and start accepting authenticated connections.
    pub fn start(addr: &str, secret: String, broker: Arc<Broker>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("millpath-manager")
            .build()?;
        let listener = runtime
            .block_on(TcpListener::bind(addr))
            .map_err(|source| ParallelError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "manager listening");
        runtime.spawn(accept_loop(listener, Arc::new(secret), broker));
        Ok(Self {
            runtime: Some(runtime),
            local_addr,
        })
    }

    /// Address the manager is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

async fn accept_loop(listener: TcpListener, secret: Arc<String>, broker: Arc<Broker>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let secret = secret.clone();
                let broker = broker.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, peer, secret, broker).await {
                        debug!(%peer, error = %e, "connection closed with error");
                    }
                });
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    secret: Arc<String>,
    broker: Arc<Broker>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let Some(first) = lines.next_line().await? else {
        return Ok(());
    };
    match serde_json::from_str::<Frame>(&first) {
        Ok(Frame::Hello { secret: offered }) if offered == *secret => {
            send_reply(&mut write, &Reply::Welcome).await?;
            debug!(%peer, "client authenticated");
        }
        Ok(Frame::Hello { .. }) => {
            warn!(%peer, "rejected connection with wrong secret");
            let reason = "authentication failed".to_string();
            return send_reply(&mut write, &Reply::Rejected { reason }).await;
        }
        _ => {
            warn!(%peer, "rejected connection without hello");
            let reason = "expected hello".to_string();
            return send_reply(&mut write, &Reply::Rejected { reason }).await;
        }
    }

    while let Some(line) = lines.next_line().await? {
        let reply = match serde_json::from_str::<Frame>(&line) {
            Ok(frame) => {
                let broker = broker.clone();
                tokio::task::spawn_blocking(move || dispatch(&broker, frame))
                    .await
                    .unwrap_or_else(|e| Reply::Error {
                        message: e.to_string(),
                    })
            }
            Err(e) => Reply::Error {
                message: format!("malformed frame: {e}"),
            },
        };
        send_reply(&mut write, &reply).await?;
    }
    Ok(())
}

async fn send_reply(write: &mut OwnedWriteHalf, reply: &Reply) -> Result<()> {
    let mut line = serde_json::to_string(reply)?;
    line.push('\n');
    write.write_all(line.as_bytes()).await?;
    Ok(())
}

fn wait_for(timeout_ms: u64) -> Duration {
    Duration::from_millis(timeout_ms).min(MAX_WAIT)
}

fn dispatch(broker: &Broker, frame: Frame) -> Reply {
    let outcome = match frame {
        Frame::Hello { .. } => Err(ParallelError::Protocol("already authenticated".into())),
        Frame::PushTask { task } => broker.push_task(task).map(|()| Reply::Ok),
        Frame::PopTask { timeout_ms } => broker
            .pop_task(wait_for(timeout_ms))
            .map(|task| Reply::Task { task }),
        Frame::DrainJob { job } => broker.drain_job(job).map(|count| Reply::Drained { count }),
        Frame::PushResult { result } => broker.push_result(result).map(|()| Reply::Ok),
        Frame::PopResult { job, timeout_ms } => broker
            .pop_result(job, wait_for(timeout_ms))
            .map(|result| Reply::Result { result }),
        Frame::CacheInsert { key, payload } => decode_payload(&payload)
            .and_then(|bytes| broker.insert(&key, Arc::new(bytes)))
            .map(|()| Reply::Ok),
        Frame::CacheFetch { key } => broker.fetch(&key).map(|payload| Reply::Payload {
            payload: payload.map(|bytes| encode_payload(&bytes)),
        }),
        Frame::CacheRelease { key } => broker.release(&key).map(|()| Reply::Ok),
    };
    outcome.unwrap_or_else(|e| Reply::Error {
        message: e.to_string(),
    })
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Set once an exchange fails midway; a late reply may still be in
    /// flight, so nothing read afterwards can be trusted.
    broken: bool,
}

/// Client connection to a [`Manager`].
///
/// Requests are serialized over one socket; open one per worker thread.
/// After a request times out or fails on the socket, every later request
/// fails with [`ParallelError::ManagerGone`]; reconnect to continue.
pub struct RemoteChannels {
    addr: String,
    request_timeout: Duration,
    runtime: Runtime,
    conn: Mutex<Connection>,
}

impl RemoteChannels {
    /// Connect to `addr` and authenticate with `secret`.
    ///
    /// `timeout` bounds the connection attempt and every later request,
    /// on top of any wait the request itself asks for.
    pub fn connect(addr: &str, secret: &str, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let stream = runtime
            .block_on(tokio::time::timeout(timeout, TcpStream::connect(addr)))
            .map_err(|_| ParallelError::Timeout(format!("connecting to {addr}")))?
            .map_err(|source| ParallelError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;
        let (read, writer) = stream.into_split();
        let remote = Self {
            addr: addr.to_string(),
            request_timeout: timeout,
            runtime,
            conn: Mutex::new(Connection {
                reader: BufReader::new(read),
                writer,
                broken: false,
            }),
        };
        let hello = Frame::Hello {
            secret: secret.to_string(),
        };
        match remote.call(&hello, Duration::ZERO)? {
            Reply::Welcome => {
                debug!(addr, "connected to manager");
                Ok(remote)
            }
            Reply::Rejected { reason } => Err(ParallelError::AuthRejected(reason)),
            other => Err(unexpected(&other)),
        }
    }

    /// Address of the manager.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn call(&self, frame: &Frame, wait: Duration) -> Result<Reply> {
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        let limit = self.request_timeout + wait;

        let mut conn = self.conn.lock();
        let Connection {
            reader,
            writer,
            broken,
        } = &mut *conn;
        if *broken {
            return Err(ParallelError::ManagerGone);
        }
        let exchange = async {
            writer.write_all(line.as_bytes()).await?;
            let mut reply = String::new();
            if reader.read_line(&mut reply).await? == 0 {
                return Err(ParallelError::ManagerGone);
            }
            Ok::<Reply, ParallelError>(serde_json::from_str(&reply)?)
        };
        let reply = match self.runtime.block_on(tokio::time::timeout(limit, exchange)) {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                *broken = true;
                return Err(e);
            }
            Err(_) => {
                *broken = true;
                return Err(ParallelError::Timeout(format!("no reply from {}", self.addr)));
            }
        };
        match reply {
            Reply::Error { message } => Err(ParallelError::Protocol(message)),
            reply => Ok(reply),
        }
    }

    fn call_ok(&self, frame: &Frame) -> Result<()> {
        match self.call(frame, Duration::ZERO)? {
            Reply::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

impl std::fmt::Debug for RemoteChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteChannels")
            .field("addr", &self.addr)
            .finish()
    }
}

fn unexpected(reply: &Reply) -> ParallelError {
    ParallelError::Protocol(format!("unexpected reply {reply:?}"))
}

fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

impl TaskChannel for RemoteChannels {
    fn push_task(&self, task: TaskEnvelope) -> Result<()> {
        self.call_ok(&Frame::PushTask { task })
    }

    fn pop_task(&self, timeout: Duration) -> Result<Option<TaskEnvelope>> {
        let frame = Frame::PopTask {
            timeout_ms: millis(timeout),
        };
        match self.call(&frame, timeout.min(MAX_WAIT))? {
            Reply::Task { task } => Ok(task),
            other => Err(unexpected(&other)),
        }
    }

    fn drain_job(&self, job: JobId) -> Result<usize> {
        match self.call(&Frame::DrainJob { job }, Duration::ZERO)? {
            Reply::Drained { count } => Ok(count),
            other => Err(unexpected(&other)),
        }
    }
}

impl ResultChannel for RemoteChannels {
    fn push_result(&self, result: ResultEnvelope) -> Result<()> {
        self.call_ok(&Frame::PushResult { result })
    }

    fn pop_result(&self, job: JobId, timeout: Duration) -> Result<Option<ResultEnvelope>> {
        let frame = Frame::PopResult {
            job,
            timeout_ms: millis(timeout),
        };
        match self.call(&frame, timeout.min(MAX_WAIT))? {
            Reply::Result { result } => Ok(result),
            other => Err(unexpected(&other)),
        }
    }
}

impl ContentCache for RemoteChannels {
    fn insert(&self, key: &CacheKey, payload: Arc<Vec<u8>>) -> Result<()> {
        self.call_ok(&Frame::CacheInsert {
            key: key.clone(),
            payload: encode_payload(&payload),
        })
    }

    fn fetch(&self, key: &CacheKey) -> Result<Option<Arc<Vec<u8>>>> {
        match self.call(&Frame::CacheFetch { key: key.clone() }, Duration::ZERO)? {
            Reply::Payload { payload: None } => Ok(None),
            Reply::Payload {
                payload: Some(text),
            } => Ok(Some(Arc::new(decode_payload(&text)?))),
            other => Err(unexpected(&other)),
        }
    }

    fn release(&self, key: &CacheKey) -> Result<()> {
        self.call_ok(&Frame::CacheRelease { key: key.clone() })
    }
}

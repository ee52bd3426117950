//! Client engine: asynchronous calls demultiplexed by sequence number.
//!
//! Calls are issued without blocking the caller: [`Client::call_async`]
//! spawns a send task and hands back a [`Call`] that resolves when the
//! response arrives. One background receive loop reads responses and routes
//! each to its caller through a pending table keyed by sequence number.
//!
//! Two locks guard the shared state, and their roles never mix:
//!
//! - the **sending lock** serializes sequence assignment and the header+body
//!   write so two calls can never interleave on the wire, and carries the
//!   shutdown flag;
//! - the **pending lock** guards the call table.
//!
//! Acquisition order is sending before pending, both in the send path and in
//! the shutdown drain. A call enters the pending table only after its
//! request was written successfully, still under the sending lock, so a
//! drain can never slip between the write and the registration.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, Mutex};

use crate::codec::CodecKind;
use crate::error::{Result, RpcError};
use crate::protocol::{write_handshake, ConnectOption, FrameReader, FrameWriter, Header};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
type Completion = oneshot::Sender<Result<Bytes>>;

/// One in-flight invocation awaiting its response.
///
/// Produced by [`Client::call_async`]; resolve it with [`Call::wait`].
/// Dropping a `Call` abandons the result without canceling the request on
/// the wire (there is no cancellation in this protocol).
pub struct Call<R> {
    service_method: String,
    codec: CodecKind,
    rx: oneshot::Receiver<Result<Bytes>>,
    _reply: PhantomData<fn() -> R>,
}

impl<R> Call<R> {
    /// The `"Service.Method"` this call targets.
    pub fn service_method(&self) -> &str {
        &self.service_method
    }
}

impl<R: DeserializeOwned> Call<R> {
    /// Block until the call completes, then decode the reply.
    ///
    /// A decode failure of the response body is this call's error and does
    /// not affect other calls.
    pub async fn wait(self) -> Result<R> {
        let bytes = self
            .rx
            .await
            .map_err(|_| RpcError::Disconnected("call abandoned".to_string()))??;
        self.codec.decode(&bytes)
    }
}

struct SendState {
    writer: FrameWriter<BoxedWrite>,
    next_seq: u64,
    shutdown: bool,
}

struct Shared {
    codec: CodecKind,
    sending: Mutex<SendState>,
    pending: Mutex<HashMap<u64, Completion>>,
}

/// An RPC client bound to one connection.
///
/// Cheap to clone; all clones share the connection, the sequence space, and
/// the pending table.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Connect over TCP with the default codec.
    pub async fn dial(addr: impl ToSocketAddrs) -> Result<Client> {
        let stream = TcpStream::connect(addr).await?;
        Self::connect(stream, CodecKind::default()).await
    }

    /// Take ownership of an established byte stream and negotiate the given
    /// codec.
    ///
    /// Writes the handshake, then spawns the background receive loop that
    /// lives until the connection ends.
    pub async fn connect<S>(stream: S, codec: CodecKind) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        write_handshake(&mut write_half, &ConnectOption::new(codec)).await?;

        let shared = Arc::new(Shared {
            codec,
            sending: Mutex::new(SendState {
                writer: FrameWriter::new(Box::new(write_half)),
                next_seq: 1,
                shutdown: false,
            }),
            pending: Mutex::new(HashMap::new()),
        });

        let reader = FrameReader::new(BufReader::new(Box::new(read_half) as BoxedRead));
        tokio::spawn(receive_loop(shared.clone(), reader));

        Ok(Client { shared })
    }

    /// The negotiated codec.
    pub fn codec(&self) -> CodecKind {
        self.shared.codec
    }

    /// Invoke a remote method and wait for its reply.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.call_async(service_method, args).wait().await
    }

    /// Invoke a remote method without waiting.
    ///
    /// The arguments are encoded immediately; the write happens on a spawned
    /// send task, concurrently with the caller. Any failure (encode, write,
    /// shutdown, disconnect) surfaces when the returned [`Call`] is awaited.
    pub fn call_async<A, R>(&self, service_method: &str, args: &A) -> Call<R>
    where
        A: Serialize,
    {
        let (tx, rx) = oneshot::channel();
        match self.shared.codec.encode(args) {
            Ok(payload) => {
                let shared = self.shared.clone();
                let method = service_method.to_string();
                tokio::spawn(async move {
                    shared.send(method, payload, tx).await;
                });
            }
            Err(e) => {
                let _ = tx.send(Err(e));
            }
        }
        Call {
            service_method: service_method.to_string(),
            codec: self.shared.codec,
            rx,
            _reply: PhantomData,
        }
    }

    /// Shut down the write side of the connection.
    ///
    /// The peer sees end-of-stream; once its side closes, the receive loop
    /// terminates and drains any calls still pending. Sends issued after
    /// `close` fail fast with [`RpcError::Shutdown`].
    pub async fn close(&self) -> Result<()> {
        let mut sending = self.shared.sending.lock().await;
        sending.shutdown = true;
        sending.writer.shutdown().await
    }
}

impl Shared {
    /// Send one request. Runs on its own task, serialized by the sending lock.
    async fn send(&self, service_method: String, payload: Vec<u8>, tx: Completion) {
        let mut sending = self.sending.lock().await;
        if sending.shutdown {
            let _ = tx.send(Err(RpcError::Shutdown));
            return;
        }

        // Sequence numbers are assigned here, not at call construction, so
        // wire order matches assignment order.
        let seq = sending.next_seq;
        sending.next_seq += 1;

        let header = Header::request(service_method, seq);
        match sending.writer.write_message(self.codec, &header, &payload).await {
            Ok(()) => {
                // Register only after the request is on the wire; the sending
                // lock is still held, so a shutdown drain cannot interleave.
                self.pending.lock().await.insert(seq, tx);
            }
            Err(e) => {
                tracing::debug!(service_method = %header.service_method, seq, error = %e, "send failed");
                let _ = tx.send(Err(e));
            }
        }
    }

    /// Complete every pending call with the terminating error.
    async fn terminate_all(&self, err: RpcError) {
        // Sending lock first: blocks in-flight sends from registering while
        // the table drains. Same order as the send path.
        let mut sending = self.sending.lock().await;
        sending.shutdown = true;
        let drained: Vec<(u64, Completion)> = self.pending.lock().await.drain().collect();
        drop(sending);

        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), error = %err, "terminating pending calls");
        }
        let msg = err.to_string();
        for (_, tx) in drained {
            let _ = tx.send(Err(RpcError::Disconnected(msg.clone())));
        }
    }
}

/// Background loop: one sequential reader routing responses to callers.
async fn receive_loop(shared: Arc<Shared>, mut frames: FrameReader<BufReader<BoxedRead>>) {
    let err = loop {
        let header_bytes = match frames.read_frame().await {
            Ok(bytes) => bytes,
            Err(e) => break e,
        };
        let header: Header = match shared.codec.decode(&header_bytes) {
            Ok(header) => header,
            Err(e) => break e,
        };

        // Lookup and removal are one atomic step.
        let entry = shared.pending.lock().await.remove(&header.seq);
        let Some(tx) = entry else {
            // Either our write failed before registration and the peer
            // answered anyway, or the peer produced a sequence number we
            // never issued. Drop the body to stay aligned.
            tracing::warn!(seq = header.seq, "response for unknown call, discarding body");
            match frames.discard_frame().await {
                Ok(()) => continue,
                Err(e) => break e,
            }
        };

        if header.is_error() {
            let outcome = frames.discard_frame().await;
            let _ = tx.send(Err(RpcError::Remote(header.error)));
            if let Err(e) = outcome {
                break e;
            }
        } else {
            match frames.read_frame().await {
                Ok(body) => {
                    let _ = tx.send(Ok(body));
                }
                Err(e) => {
                    let _ = tx.send(Err(RpcError::Disconnected(e.to_string())));
                    break e;
                }
            }
        }
    };

    tracing::debug!(error = %err, "receive loop ended");
    shared.terminate_all(err).await;
}

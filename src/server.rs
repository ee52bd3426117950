//! Server engine: accept loop and per-connection serve state machine.
//!
//! Each accepted connection negotiates a codec, then loops reading requests.
//! Requests are read strictly in arrival order but execute concurrently, one
//! spawned task per request, so responses may go out in any order. The write
//! half is shared behind a mutex because the stream is not safe for
//! concurrent writers and a response's header+body pair must never
//! interleave with another response.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Semaphore};

use crate::codec::CodecKind;
use crate::error::Result;
use crate::protocol::{read_handshake, FrameReader, FrameWriter, Header, MAGIC_NUMBER};
use crate::service::ServiceRegistry;

/// Default maximum concurrently executing requests per connection.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 256;

/// An RPC server: a service registry plus per-connection limits.
///
/// The registry is injected at construction and shared read-only by every
/// connection; registration happens before serving begins.
pub struct Server {
    registry: Arc<ServiceRegistry>,
    max_in_flight: usize,
}

impl Server {
    /// Create a server around a fully built registry.
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Cap the number of concurrently executing requests per connection.
    ///
    /// When the cap is reached the read loop waits before pulling the next
    /// request off the stream.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// The shared registry.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Accept connections until the listener fails.
    ///
    /// Every accepted connection gets an independent serve task. An accept
    /// error ends this loop and is returned; connections already being served
    /// keep running.
    pub async fn accept(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await.map_err(|e| {
                tracing::error!(error = %e, "accept failed");
                e
            })?;
            tracing::debug!(%peer, "accepted connection");
            let registry = self.registry.clone();
            let max_in_flight = self.max_in_flight;
            tokio::spawn(async move {
                serve_connection(registry, max_in_flight, stream).await;
            });
        }
    }

    /// Serve a single, already established connection to completion.
    ///
    /// Useful for transports other than TCP and for in-memory streams in
    /// tests; `accept` uses the same path internally.
    pub async fn serve_conn<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        serve_connection(self.registry.clone(), self.max_in_flight, stream).await;
    }
}

/// Run one connection: negotiate, serve requests, drain, close.
async fn serve_connection<S>(registry: Arc<ServiceRegistry>, max_in_flight: usize, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);

    // The BufReader stays installed for the connection's lifetime: bytes it
    // buffered past the handshake line belong to the negotiated codec.
    let mut reader = BufReader::new(read_half);
    let option = match read_handshake(&mut reader).await {
        Ok(option) => option,
        Err(e) => {
            tracing::warn!(error = %e, "handshake decode failed");
            return;
        }
    };
    if option.magic_number != MAGIC_NUMBER {
        tracing::warn!("invalid magic number {:#x}", option.magic_number);
        return;
    }
    let Some(codec) = option.codec() else {
        tracing::warn!(codec_type = %option.codec_type, "unknown codec type");
        return;
    };

    let mut frames = FrameReader::new(reader);
    let writer = Arc::new(Mutex::new(FrameWriter::new(write_half)));
    let limiter = Arc::new(Semaphore::new(max_in_flight));

    loop {
        // Requests come off the stream one at a time, in arrival order.
        let header_bytes = match frames.read_frame().await {
            Ok(bytes) => bytes,
            Err(_) => break, // transport end, normal termination
        };
        let header: Header = match codec.decode(&header_bytes) {
            Ok(header) => header,
            Err(e) => {
                // The request's body frame is still on the stream; drop it so
                // framing stays aligned, then report without a usable seq.
                if frames.discard_frame().await.is_err() {
                    break;
                }
                let response = Header {
                    service_method: String::new(),
                    seq: 0,
                    error: e.to_string(),
                };
                if send_response(&writer, codec, &response).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let handler = match registry.resolve(&header.service_method) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::debug!(service_method = %header.service_method, error = %e, "resolve failed");
                if frames.discard_frame().await.is_err() {
                    break;
                }
                let response = Header {
                    error: e.to_string(),
                    ..header
                };
                if send_response(&writer, codec, &response).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let body = match frames.read_frame().await {
            Ok(bytes) => bytes,
            Err(_) => break,
        };

        let Ok(permit) = limiter.clone().acquire_owned().await else {
            break;
        };
        let writer = writer.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let mut response = header;
            let reply = match handler.invoke(codec, body) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::debug!(service_method = %response.service_method,
                        seq = response.seq, error = %e, "request failed");
                    response.error = e.to_string();
                    Vec::new()
                }
            };
            let mut w = writer.lock().await;
            if let Err(e) = w.write_message(codec, &response, &reply).await {
                tracing::error!(seq = response.seq, error = %e, "send response failed");
            }
        });
    }

    // Wait for every in-flight request to finish before the write half goes
    // away; no task may touch the connection after this point.
    let _drain = limiter.acquire_many(max_in_flight as u32).await;
    let mut w = writer.lock().await;
    let _ = w.shutdown().await;
}

/// Write an error response with an empty body under the shared write lock.
async fn send_response<W>(
    writer: &Mutex<FrameWriter<W>>,
    codec: CodecKind,
    header: &Header,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut w = writer.lock().await;
    w.write_message(codec, header, &[]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{write_handshake, ConnectOption};
    use crate::service::Service;
    use serde::{Deserialize, Serialize};
    use tokio::io::{duplex, AsyncRead, AsyncWrite, ReadHalf};

    #[derive(Serialize, Deserialize)]
    struct SumArgs {
        a: i64,
        b: i64,
    }

    fn test_server() -> Server {
        let svc = Service::builder("Arith", ())
            .method("Sum", |_: &(), args: SumArgs, reply: &mut i64| {
                *reply = args.a + args.b;
                Ok(())
            })
            .method("Slow", |_: &(), args: SumArgs, reply: &mut i64| {
                std::thread::sleep(std::time::Duration::from_millis(100));
                *reply = args.a + args.b;
                Ok(())
            })
            .method("Fail", |_: &(), _: SumArgs, _: &mut i64| {
                Err(crate::RpcError::handler("no can do"))
            })
            .build()
            .unwrap();
        let mut registry = ServiceRegistry::new();
        registry.register(svc);
        Server::new(registry)
    }

    struct RawClient<S> {
        frames: FrameReader<ReadHalf<S>>,
        writer: FrameWriter<tokio::io::WriteHalf<S>>,
        codec: CodecKind,
    }

    impl<S: AsyncRead + AsyncWrite> RawClient<S> {
        async fn connect(stream: S, option: &ConnectOption) -> Self {
            let (read_half, mut write_half) = tokio::io::split(stream);
            write_handshake(&mut write_half, option).await.unwrap();
            Self {
                frames: FrameReader::new(read_half),
                writer: FrameWriter::new(write_half),
                codec: option.codec().unwrap_or_default(),
            }
        }

        async fn send<T: Serialize>(&mut self, service_method: &str, seq: u64, args: &T) {
            let header = Header::request(service_method, seq);
            let body = self.codec.encode(args).unwrap();
            self.writer
                .write_message(self.codec, &header, &body)
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> (Header, bytes::Bytes) {
            let header_bytes = self.frames.read_frame().await.unwrap();
            let header: Header = self.codec.decode(&header_bytes).unwrap();
            let body = self.frames.read_frame().await.unwrap();
            (header, body)
        }
    }

    fn spawn_server(server: Server) -> tokio::io::DuplexStream {
        let (client_side, server_side) = duplex(64 * 1024);
        tokio::spawn(async move { server.serve_conn(server_side).await });
        client_side
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let stream = spawn_server(test_server());
        let mut client = RawClient::connect(stream, &ConnectOption::default()).await;

        client.send("Arith.Sum", 1, &SumArgs { a: 2, b: 3 }).await;
        let (header, body) = client.recv().await;
        assert_eq!(header.seq, 1);
        assert!(!header.is_error());
        let sum: i64 = client.codec.decode(&body).unwrap();
        assert_eq!(sum, 5);
    }

    #[tokio::test]
    async fn test_json_codec_negotiation() {
        let stream = spawn_server(test_server());
        let option = ConnectOption::new(CodecKind::Json);
        let mut client = RawClient::connect(stream, &option).await;

        client.send("Arith.Sum", 9, &SumArgs { a: 4, b: 4 }).await;
        let (header, body) = client.recv().await;
        assert_eq!(header.seq, 9);
        let sum: i64 = client.codec.decode(&body).unwrap();
        assert_eq!(sum, 8);
    }

    #[tokio::test]
    async fn test_bad_magic_drops_connection() {
        let stream = spawn_server(test_server());
        let option = ConnectOption {
            magic_number: 0xdead,
            codec_type: "msgpack".to_string(),
        };
        let mut client = RawClient::connect(stream, &option).await;

        // No response bytes at all; the stream just closes.
        assert!(client.frames.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_codec_drops_connection() {
        let stream = spawn_server(test_server());
        let option = ConnectOption {
            magic_number: MAGIC_NUMBER,
            codec_type: "gob".to_string(),
        };
        let mut client = RawClient::connect(stream, &option).await;

        assert!(client.frames.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_service_keeps_connection_serving() {
        let stream = spawn_server(test_server());
        let mut client = RawClient::connect(stream, &ConnectOption::default()).await;

        client.send("Ghost.Method", 1, &SumArgs { a: 0, b: 0 }).await;
        let (header, _body) = client.recv().await;
        assert_eq!(header.seq, 1);
        assert!(header.is_error());
        assert!(header.error.contains("Ghost"));

        // The connection survives a bad request.
        client.send("Arith.Sum", 2, &SumArgs { a: 1, b: 1 }).await;
        let (header, body) = client.recv().await;
        assert_eq!(header.seq, 2);
        assert!(!header.is_error());
        let sum: i64 = client.codec.decode(&body).unwrap();
        assert_eq!(sum, 2);
    }

    #[tokio::test]
    async fn test_malformed_service_method_strings() {
        let stream = spawn_server(test_server());
        let mut client = RawClient::connect(stream, &ConnectOption::default()).await;

        for (seq, bad) in ["NoDot", "A.B.C"].iter().enumerate() {
            let seq = seq as u64 + 1;
            client.send(bad, seq, &SumArgs { a: 0, b: 0 }).await;
            let (header, _body) = client.recv().await;
            assert_eq!(header.seq, seq);
            assert!(header.is_error(), "{bad:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_unknown_method_reports_error() {
        let stream = spawn_server(test_server());
        let mut client = RawClient::connect(stream, &ConnectOption::default()).await;

        client.send("Arith.Missing", 3, &SumArgs { a: 0, b: 0 }).await;
        let (header, _body) = client.recv().await;
        assert!(header.is_error());
        assert!(header.error.contains("Missing"));
    }

    #[tokio::test]
    async fn test_handler_error_in_header_with_empty_body() {
        let stream = spawn_server(test_server());
        let mut client = RawClient::connect(stream, &ConnectOption::default()).await;

        client.send("Arith.Fail", 4, &SumArgs { a: 1, b: 2 }).await;
        let (header, body) = client.recv().await;
        assert_eq!(header.error, "no can do");
        assert!(body.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_responses_may_complete_out_of_order() {
        let stream = spawn_server(test_server());
        let mut client = RawClient::connect(stream, &ConnectOption::default()).await;

        client.send("Arith.Slow", 1, &SumArgs { a: 1, b: 1 }).await;
        client.send("Arith.Sum", 2, &SumArgs { a: 2, b: 2 }).await;

        // The fast request answers first even though it was sent second.
        let (first, body) = client.recv().await;
        assert_eq!(first.seq, 2);
        let sum: i64 = client.codec.decode(&body).unwrap();
        assert_eq!(sum, 4);

        let (second, body) = client.recv().await;
        assert_eq!(second.seq, 1);
        let sum: i64 = client.codec.decode(&body).unwrap();
        assert_eq!(sum, 2);
    }

    #[tokio::test]
    async fn test_argument_decode_error_reported_per_request() {
        let stream = spawn_server(test_server());
        let mut client = RawClient::connect(stream, &ConnectOption::default()).await;

        // Body is a string where the handler expects a struct.
        client.send("Arith.Sum", 5, &"not a struct").await;
        let (header, _body) = client.recv().await;
        assert_eq!(header.seq, 5);
        assert!(header.is_error());
    }
}

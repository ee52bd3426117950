//! Handshake and header records.
//!
//! The handshake is a single JSON line sent by the client immediately after
//! connecting:
//!
//! ```text
//! {"magic_number":8639374,"codec_type":"msgpack"}\n
//! ```
//!
//! JSON is used regardless of the negotiated codec: the codec is not known
//! until the handshake has been read, so the handshake itself must use a
//! fixed self-describing encoding. Everything after the newline belongs to
//! the negotiated codec.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::CodecKind;
use crate::error::{Result, RpcError};

/// Protocol identification constant carried in every handshake.
pub const MAGIC_NUMBER: u32 = 0x83d3_8e;

/// Maximum accepted handshake line length in bytes.
const MAX_HANDSHAKE_LEN: u64 = 4096;

/// Connection-level negotiation record, sent once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOption {
    /// Must equal [`MAGIC_NUMBER`] or the connection is rejected.
    pub magic_number: u32,
    /// Wire name of the codec used for all subsequent frames.
    pub codec_type: String,
}

impl ConnectOption {
    /// Build a handshake record selecting the given codec.
    pub fn new(codec: CodecKind) -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: codec.name().to_string(),
        }
    }

    /// Resolve the negotiated codec, if the name is known.
    pub fn codec(&self) -> Option<CodecKind> {
        CodecKind::from_name(&self.codec_type)
    }
}

impl Default for ConnectOption {
    fn default() -> Self {
        Self::new(CodecKind::default())
    }
}

/// Per-call envelope, exchanged as the first frame of every message.
///
/// `seq` is assigned by the client at send time and echoed verbatim by the
/// server; it is the sole correlation key between a request and its response.
/// An empty `error` means success.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Header {
    /// Target in `"Service.Method"` form. Echoed in responses.
    pub service_method: String,
    /// Per-connection sequence number, unique per direction.
    pub seq: u64,
    /// Error indicator; empty on success.
    pub error: String,
}

impl Header {
    /// Build a request header.
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// True if this header carries an error indicator.
    #[inline]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Write the handshake line to a connection.
pub async fn write_handshake<W>(writer: &mut W, option: &ConnectOption) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(option)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and parse the handshake line from a connection.
///
/// The reader must be buffered and must stay installed for the connection's
/// lifetime: any bytes it buffered past the newline belong to the negotiated
/// codec and would be lost if the buffer were discarded.
pub async fn read_handshake<R>(reader: &mut R) -> Result<ConnectOption>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = (&mut *reader)
        .take(MAX_HANDSHAKE_LEN)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Err(RpcError::Protocol(
            "connection closed before handshake".to_string(),
        ));
    }
    let option: ConnectOption = serde_json::from_str(line.trim_end())?;
    Ok(option)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_connect_option_default() {
        let option = ConnectOption::default();
        assert_eq!(option.magic_number, MAGIC_NUMBER);
        assert_eq!(option.codec(), Some(CodecKind::MsgPack));
    }

    #[test]
    fn test_connect_option_unknown_codec() {
        let option = ConnectOption {
            magic_number: MAGIC_NUMBER,
            codec_type: "gob".to_string(),
        };
        assert_eq!(option.codec(), None);
    }

    #[test]
    fn test_header_request() {
        let header = Header::request("Arith.Add", 7);
        assert_eq!(header.service_method, "Arith.Add");
        assert_eq!(header.seq, 7);
        assert!(!header.is_error());
    }

    #[test]
    fn test_header_roundtrip_in_both_codecs() {
        let header = Header {
            service_method: "Echo.Say".to_string(),
            seq: 42,
            error: "boom".to_string(),
        };

        for kind in [CodecKind::MsgPack, CodecKind::Json] {
            let bytes = kind.encode(&header).unwrap();
            let back: Header = kind.decode(&bytes).unwrap();
            assert_eq!(back, header);
            assert!(back.is_error());
        }
    }

    #[tokio::test]
    async fn test_handshake_roundtrip() {
        let mut buf = Vec::new();
        let option = ConnectOption::new(CodecKind::Json);
        write_handshake(&mut buf, &option).await.unwrap();
        assert_eq!(*buf.last().unwrap(), b'\n');

        let mut reader = BufReader::new(buf.as_slice());
        let parsed = read_handshake(&mut reader).await.unwrap();
        assert_eq!(parsed, option);
    }

    #[tokio::test]
    async fn test_handshake_leaves_following_bytes_intact() {
        let mut buf = Vec::new();
        write_handshake(&mut buf, &ConnectOption::default())
            .await
            .unwrap();
        buf.extend_from_slice(b"AFTER");

        let mut reader = BufReader::new(buf.as_slice());
        read_handshake(&mut reader).await.unwrap();

        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut rest)
            .await
            .unwrap();
        assert_eq!(rest, b"AFTER");
    }

    #[tokio::test]
    async fn test_handshake_malformed_json() {
        let mut reader = BufReader::new(&b"not json\n"[..]);
        assert!(read_handshake(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_handshake_closed_connection() {
        let mut reader = BufReader::new(&b""[..]);
        let err = read_handshake(&mut reader).await.unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
    }
}

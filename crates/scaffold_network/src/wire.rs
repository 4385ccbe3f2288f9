//! SCF framing: the byte layout shared by the coordination server and client.
//!
//! Request:  `[u8 id len N][N bytes id][u32 BE body len L][L bytes body]`
//! Response: `[u8 status][u32 BE body len L][L bytes body]`
//!
//! A connection that closes before the first byte of a frame yields
//! [`NetworkError::TransportClosed`]; one that closes part-way through yields
//! [`NetworkError::FrameTruncated`]. Partial frames are never returned.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetworkError;

/// Success.
pub const STATUS_OK: u8 = 0;
/// The host's game service is not running.
pub const STATUS_SERVER_NOT_READY: u8 = 32;
/// Any other failure. The body carries a UTF-8 message.
pub const STATUS_UNKNOWN_ERROR: u8 = 255;

/// Largest body accepted in either direction (16 MiB).
pub const MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;

/// Longest protocol id that fits the one-byte length prefix.
pub const MAX_PROTOCOL_LEN: usize = u8::MAX as usize;

/// Message prefix of a status-255 reply to a protocol nobody serves.
pub const UNSUPPORTED_PROTOCOL_PREFIX: &str = "unsupported protocol: ";
/// Message prefix of a status-255 reply to a malformed protocol id.
pub const INVALID_PROTOCOL_PREFIX: &str = "invalid protocol: ";

/// A request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScfRequest {
    pub protocol: String,
    pub body: Vec<u8>,
}

impl ScfRequest {
    pub fn new(protocol: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            protocol: protocol.into(),
            body: body.into(),
        }
    }

    /// A request with no body.
    pub fn empty(protocol: impl Into<String>) -> Self {
        Self::new(protocol, Vec::new())
    }
}

/// A response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScfResponse {
    pub status: u8,
    pub body: Vec<u8>,
}

impl ScfResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: STATUS_OK,
            body: body.into(),
        }
    }

    pub fn ok_empty() -> Self {
        Self::ok(Vec::new())
    }

    pub fn server_not_ready() -> Self {
        Self {
            status: STATUS_SERVER_NOT_READY,
            body: Vec::new(),
        }
    }

    /// Status 255 with a human-readable message.
    pub fn unknown_error(message: impl AsRef<str>) -> Self {
        Self {
            status: STATUS_UNKNOWN_ERROR,
            body: message.as_ref().as_bytes().to_vec(),
        }
    }

    pub fn unsupported_protocol(id: &str) -> Self {
        Self::unknown_error(format!("{UNSUPPORTED_PROTOCOL_PREFIX}{id}"))
    }

    pub fn invalid_protocol(id: &str) -> Self {
        Self::unknown_error(format!("{INVALID_PROTOCOL_PREFIX}{id}"))
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// The body as text, lossily decoded.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn a non-zero status into an error.
    ///
    /// Status-255 replies about protocol ids map to
    /// [`NetworkError::ProtocolUnsupported`] and
    /// [`NetworkError::ProtocolMalformed`].
    pub fn into_result(self) -> Result<Vec<u8>, NetworkError> {
        match self.status {
            STATUS_OK => Ok(self.body),
            STATUS_SERVER_NOT_READY => Err(NetworkError::GameServerNotReady),
            STATUS_UNKNOWN_ERROR => {
                let message = self.message();
                if let Some(id) = message.strip_prefix(UNSUPPORTED_PROTOCOL_PREFIX) {
                    Err(NetworkError::ProtocolUnsupported(id.to_string()))
                } else if let Some(id) = message.strip_prefix(INVALID_PROTOCOL_PREFIX) {
                    Err(NetworkError::ProtocolMalformed(id.to_string()))
                } else {
                    Err(NetworkError::Remote {
                        status: STATUS_UNKNOWN_ERROR,
                        message,
                    })
                }
            }
            status => Err(NetworkError::Remote {
                status,
                message: self.message(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a request frame.
pub fn encode_request(request: &ScfRequest) -> Result<Vec<u8>, NetworkError> {
    let id = request.protocol.as_bytes();
    let id_len = u8::try_from(id.len()).map_err(|_| {
        NetworkError::ProtocolMalformed(format!(
            "protocol id is {} bytes (max {MAX_PROTOCOL_LEN})",
            id.len()
        ))
    })?;
    let body_len = body_len(&request.body)?;

    let mut buf = Vec::with_capacity(1 + id.len() + 4 + request.body.len());
    buf.push(id_len);
    buf.extend_from_slice(id);
    buf.extend_from_slice(&body_len.to_be_bytes());
    buf.extend_from_slice(&request.body);
    Ok(buf)
}

/// Encode a response frame.
pub fn encode_response(response: &ScfResponse) -> Result<Vec<u8>, NetworkError> {
    let body_len = body_len(&response.body)?;

    let mut buf = Vec::with_capacity(5 + response.body.len());
    buf.push(response.status);
    buf.extend_from_slice(&body_len.to_be_bytes());
    buf.extend_from_slice(&response.body);
    Ok(buf)
}

fn body_len(body: &[u8]) -> Result<u32, NetworkError> {
    match u32::try_from(body.len()) {
        Ok(len) if len <= MAX_BODY_SIZE => Ok(len),
        _ => Err(NetworkError::FrameTooLarge(
            u32::try_from(body.len()).unwrap_or(u32::MAX),
        )),
    }
}

// ---------------------------------------------------------------------------
// Async I/O
// ---------------------------------------------------------------------------

/// Write one request frame and flush.
pub async fn write_request<W>(writer: &mut W, request: &ScfRequest) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_request(request)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Write one response frame and flush.
pub async fn write_response<W>(writer: &mut W, response: &ScfResponse) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_response(response)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one request frame.
///
/// The protocol id is returned as read (lossily decoded); validating it is
/// the caller's job so that a bad id can still be answered.
pub async fn read_request<R>(reader: &mut R) -> Result<ScfRequest, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let id_len = read_first_byte(reader).await?;
    let mut id = vec![0u8; usize::from(id_len)];
    read_exact(reader, &mut id).await?;
    let body = read_body(reader).await?;

    Ok(ScfRequest {
        protocol: String::from_utf8_lossy(&id).into_owned(),
        body,
    })
}

/// Read one response frame.
pub async fn read_response<R>(reader: &mut R) -> Result<ScfResponse, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let status = read_first_byte(reader).await?;
    let body = read_body(reader).await?;
    Ok(ScfResponse { status, body })
}

async fn read_first_byte<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8, NetworkError> {
    let mut byte = [0u8; 1];
    match reader.read(&mut byte).await? {
        0 => Err(NetworkError::TransportClosed),
        _ => Ok(byte[0]),
    }
}

async fn read_body<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, NetworkError> {
    let mut len_buf = [0u8; 4];
    read_exact(reader, &mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_BODY_SIZE {
        return Err(NetworkError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len as usize];
    read_exact(reader, &mut body).await?;
    Ok(body)
}

async fn read_exact<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), NetworkError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(NetworkError::FrameTruncated),
        Err(e) => Err(NetworkError::Io(e)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

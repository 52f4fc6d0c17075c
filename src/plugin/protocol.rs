//! Plugin wire protocol.
//!
//! A driver launched with [`PLUGIN_TOKEN_ENV`] prints its loopback
//! `host:port` as the first line on stdout, then answers length-prefixed
//! frames: a little-endian `u32` length followed by an rkyv archive.

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Drivers refuse to serve unless launched with this handshake cookie.
pub const PLUGIN_TOKEN_ENV: &str = "MACHINE_PLUGIN_TOKEN";
pub const PLUGIN_TOKEN: &str = "42";

/// Upper bound on a single frame; flag lists are small.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Host to driver
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub enum Request {
    /// Describe the parameters accepted when creating a host
    GetCreateFlags,
    /// Host is done; the driver may exit
    Close,
}

/// Driver to host
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub enum Response {
    CreateFlags { flags: Vec<CreateFlag> },
    Error { message: String },
    Closed,
}

/// A creation parameter declared by a driver, named `<driver>-<words>`.
///
/// The JSON form (`{"type": "string-list", "name": ..., ...}`) is what
/// `driver-stub` reads its flag list from.
#[derive(Archive, Deserialize, Serialize, serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CreateFlag {
    String {
        name: String,
        usage: String,
        default: Option<String>,
    },
    Int {
        name: String,
        usage: String,
        default: Option<i64>,
    },
    Bool {
        name: String,
        usage: String,
    },
    StringList {
        name: String,
        usage: String,
        #[serde(default)]
        default: Vec<String>,
    },
}

impl CreateFlag {
    pub fn name(&self) -> &str {
        match self {
            Self::String { name, .. }
            | Self::Int { name, .. }
            | Self::Bool { name, .. }
            | Self::StringList { name, .. } => name,
        }
    }
}

/// Length-prefixed framing helpers
pub struct MessageFrame;

impl MessageFrame {
    pub fn encode_request(request: &Request) -> Result<Vec<u8>, rkyv::rancor::Error> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(request)?;
        Ok(Self::prefixed(&bytes))
    }

    pub fn encode_response(response: &Response) -> Result<Vec<u8>, rkyv::rancor::Error> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(response)?;
        Ok(Self::prefixed(&bytes))
    }

    pub fn decode_request(bytes: &[u8]) -> Result<Request, rkyv::rancor::Error> {
        rkyv::from_bytes::<Request, rkyv::rancor::Error>(bytes)
    }

    pub fn decode_response(bytes: &[u8]) -> Result<Response, rkyv::rancor::Error> {
        rkyv::from_bytes::<Response, rkyv::rancor::Error>(bytes)
    }

    pub fn read_length(buf: &[u8; 4]) -> usize {
        u32::from_le_bytes(*buf) as usize
    }

    fn prefixed(bytes: &[u8]) -> Vec<u8> {
        let len = bytes.len() as u32;
        let mut result = Vec::with_capacity(4 + bytes.len());
        result.extend_from_slice(&len.to_le_bytes());
        result.extend_from_slice(bytes);
        result
    }
}

/// Reads one frame body into an aligned buffer. `Ok(None)` on clean EOF
/// before the length prefix.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<AlignedVec>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = MessageFrame::read_length(&len_buf);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    let mut aligned = AlignedVec::<16>::with_capacity(len);
    aligned.extend_from_slice(&body);
    Ok(Some(aligned))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

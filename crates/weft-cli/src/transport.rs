//! Management transport: length-prefixed CBOR over TCP.
//!
//! One request per connection. Each message on the wire is a `u32` big
//! endian length followed by that many bytes of CBOR. Coordinator-side
//! failures come back as structured error replies and are rebuilt into the
//! matching [`CoreError`] kind.

use std::io;

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;
use weft_core::{error::CoreError, mgmt::ManagementClient, peer::PeerId};
use weft_proto::{
    control::{self, SystemMeta},
    LoginRequest, ManagementRequest, ManagementResponse, RegisterRequest,
};

/// Upper bound on a management reply. Login responses are tiny; anything
/// bigger is a framing error or a hostile server.
const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Client for a coordinator reachable over plain TCP.
pub struct TcpManagementClient {
    addr: String,
    local_key: PeerId,
    name: String,
    meta: SystemMeta,
}

impl TcpManagementClient {
    /// Client for the coordinator at `addr` (`host:port`), identifying as
    /// `local_key`.
    pub fn new(addr: impl Into<String>, local_key: PeerId, name: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            local_key,
            name: name.into(),
            meta: SystemMeta {
                hostname: std::env::var("HOSTNAME").unwrap_or_default(),
                os: std::env::consts::OS.to_string(),
                kernel: String::new(),
                platform: std::env::consts::ARCH.to_string(),
                agent_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    async fn round_trip(&self, request: &ManagementRequest) -> Result<ManagementResponse, CoreError> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|err| CoreError::Internal(format!("connecting to {}: {err}", self.addr)))?;

        write_message(&mut stream, request)
            .await
            .map_err(|err| CoreError::Internal(format!("sending request: {err}")))?;
        let response = read_message(&mut stream)
            .await
            .map_err(|err| CoreError::Internal(format!("reading response: {err}")))?;

        Ok(response)
    }
}

#[async_trait]
impl ManagementClient for TcpManagementClient {
    async fn get_server_public_key(&self) -> Result<String, CoreError> {
        match self.round_trip(&ManagementRequest::GetServerKey).await? {
            ManagementResponse::ServerKey(key) => Ok(key),
            ManagementResponse::Error(reply) => Err(CoreError::from_wire(&reply.kind, &reply.message)),
            other => Err(CoreError::Internal(format!("unexpected response {other:?}"))),
        }
    }

    async fn login(&self, server_key: &str) -> Result<weft_proto::LoginResponse, CoreError> {
        debug!(server = %server_key, "logging in to coordinator");

        let request =
            ManagementRequest::Login(LoginRequest { peer_key: self.local_key.as_str().to_string() });
        match self.round_trip(&request).await? {
            ManagementResponse::Login(response) => Ok(response),
            ManagementResponse::Error(reply) => Err(CoreError::from_wire(&reply.kind, &reply.message)),
            other => Err(CoreError::Internal(format!("unexpected response {other:?}"))),
        }
    }

    async fn register(
        &self,
        server_key: &str,
        setup_key: &str,
    ) -> Result<weft_proto::LoginResponse, CoreError> {
        debug!(server = %server_key, "registering with coordinator");

        let request = ManagementRequest::Register(RegisterRequest {
            peer_key: self.local_key.as_str().to_string(),
            setup_key: setup_key.to_string(),
            name: self.name.clone(),
            meta: self.meta.clone(),
        });
        match self.round_trip(&request).await? {
            ManagementResponse::Login(response) => Ok(response),
            ManagementResponse::Error(reply) => Err(CoreError::from_wire(&reply.kind, &reply.message)),
            other => Err(CoreError::Internal(format!("unexpected response {other:?}"))),
        }
    }
}

async fn write_message(stream: &mut TcpStream, request: &ManagementRequest) -> io::Result<()> {
    let body = control::encode(request)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;

    // Bounded by MAX_MESSAGE_SIZE on the read side; requests are far
    // smaller than u32::MAX.
    #[allow(clippy::cast_possible_truncation)]
    let len = body.len() as u32;

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await
}

async fn read_message(stream: &mut TcpStream) -> io::Result<ManagementResponse> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("response of {len} bytes exceeds limit"),
        ));
    }

    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;

    control::decode(&body).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
}

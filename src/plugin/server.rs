//! Driver-side half of the plugin protocol.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

use super::protocol::{read_frame, write_frame, CreateFlag, MessageFrame, Request, Response};

/// Answers `GetCreateFlags` with a fixed flag list on a loopback listener.
pub struct FlagServer {
    listener: TcpListener,
    flags: Vec<CreateFlag>,
}

impl FlagServer {
    pub async fn bind(flags: Vec<CreateFlag>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(Self { listener, flags })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Publishes the address on stdout and serves hosts until one sends
    /// `Close`.
    pub async fn run(self) -> std::io::Result<()> {
        println!("{}", self.local_addr()?);
        loop {
            if self.serve_one().await? {
                return Ok(());
            }
        }
    }

    /// Serves a single connection. Returns whether the host asked the driver
    /// to exit.
    pub async fn serve_one(&self) -> std::io::Result<bool> {
        let (stream, peer) = self.listener.accept().await?;
        trace!(peer = %peer, "Host connected");
        self.handle(stream).await
    }

    async fn handle(&self, mut stream: TcpStream) -> std::io::Result<bool> {
        while let Some(body) = read_frame(&mut stream).await? {
            let (response, closing) = match MessageFrame::decode_request(&body) {
                Ok(Request::GetCreateFlags) => (
                    Response::CreateFlags {
                        flags: self.flags.clone(),
                    },
                    false,
                ),
                Ok(Request::Close) => (Response::Closed, true),
                Err(e) => (
                    Response::Error {
                        message: format!("undecodable request: {e}"),
                    },
                    false,
                ),
            };

            let frame = MessageFrame::encode_response(&response)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            write_frame(&mut stream, &frame).await?;

            if closing {
                debug!("Host closed plugin session");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

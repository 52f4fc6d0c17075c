use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, trace, warn};

use super::protocol::{
    read_frame, write_frame, CreateFlag, MessageFrame, Request, Response, PLUGIN_TOKEN, PLUGIN_TOKEN_ENV,
};
use super::FlagSource;
use crate::error::{DriverError, Result};
use crate::installer::locate_installed_binary;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// An open RPC channel to one running driver.
pub struct PluginConnection {
    driver: String,
    address: String,
    stream: TcpStream,
}

impl PluginConnection {
    pub async fn connect(driver: &str, address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| plugin_unreachable(driver, address, e.to_string()))?;

        let peer = stream
            .peer_addr()
            .map_err(|e| plugin_unreachable(driver, address, e.to_string()))?;
        if !peer.ip().is_loopback() {
            return Err(DriverError::PluginProtocol {
                driver: driver.to_string(),
                detail: format!("refusing non-loopback plugin address {peer}"),
            });
        }

        Ok(Self {
            driver: driver.to_string(),
            address: address.to_string(),
            stream,
        })
    }

    async fn call(&mut self, request: &Request) -> Result<Response> {
        let frame = MessageFrame::encode_request(request).map_err(|e| self.protocol(e.to_string()))?;
        write_frame(&mut self.stream, &frame)
            .await
            .map_err(|e| plugin_unreachable(&self.driver, &self.address, e.to_string()))?;

        let body = read_frame(&mut self.stream)
            .await
            .map_err(|e| plugin_unreachable(&self.driver, &self.address, e.to_string()))?
            .ok_or_else(|| plugin_unreachable(&self.driver, &self.address, "connection closed".to_string()))?;

        MessageFrame::decode_response(&body).map_err(|e| self.protocol(e.to_string()))
    }

    pub async fn get_create_flags(&mut self) -> Result<Vec<CreateFlag>> {
        match self.call(&Request::GetCreateFlags).await? {
            Response::CreateFlags { flags } => Ok(flags),
            Response::Error { message } => Err(self.protocol(format!("plugin error: {message}"))),
            other => Err(self.protocol(format!("unexpected response {other:?}"))),
        }
    }

    /// Tells the driver to exit; failures are ignored since the process is
    /// torn down regardless.
    pub async fn close(mut self) {
        if let Err(e) = self.call(&Request::Close).await {
            trace!(driver = %self.driver, error = %e, "Plugin close not acknowledged");
        }
    }

    fn protocol(&self, detail: String) -> DriverError {
        DriverError::PluginProtocol {
            driver: self.driver.clone(),
            detail,
        }
    }
}

/// Launches installed driver executables and asks them for their creation
/// parameters.
#[derive(Debug, Clone)]
pub struct PluginClient {
    install_dir: PathBuf,
    timeout: Duration,
}

impl PluginClient {
    pub fn new(install_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            install_dir: install_dir.into(),
            timeout,
        }
    }

    /// Spawns the driver, performs the address handshake and issues a single
    /// `GetCreateFlags` call. The subprocess is always torn down afterwards.
    pub async fn discover_create_flags(&self, driver: &str) -> Result<Vec<CreateFlag>> {
        let binary = locate_installed_binary(&self.install_dir, driver)
            .ok_or_else(|| plugin_unreachable(driver, "-", "driver executable not found".to_string()))?;
        debug!(driver = %driver, binary = %binary.display(), "Launching driver plugin");

        let mut child = Command::new(&binary)
            .env(PLUGIN_TOKEN_ENV, PLUGIN_TOKEN)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| plugin_unreachable(driver, "-", format!("failed to spawn: {e}")))?;

        spawn_stderr_reader(driver, &mut child);

        let mut address = String::from("-");
        let outcome = tokio::time::timeout(self.timeout, session(driver, &mut child, &mut address)).await;
        shutdown(driver, &mut child).await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(plugin_unreachable(
                driver,
                &address,
                format!("no answer within {:?}", self.timeout),
            )),
        }
    }
}

#[async_trait]
impl FlagSource for PluginClient {
    async fn create_flags(&self, driver: &str) -> Result<Vec<CreateFlag>> {
        self.discover_create_flags(driver).await
    }
}

async fn session(driver: &str, child: &mut Child, address: &mut String) -> Result<Vec<CreateFlag>> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| plugin_unreachable(driver, "-", "stdout not captured".to_string()))?;

    let mut lines = BufReader::new(stdout).lines();
    let line = lines
        .next_line()
        .await
        .map_err(|e| plugin_unreachable(driver, "-", e.to_string()))?
        .ok_or_else(|| plugin_unreachable(driver, "-", "plugin exited before publishing its address".to_string()))?;

    *address = line.trim().to_string();
    trace!(driver = %driver, address = %address, "Plugin published address");

    let mut connection = PluginConnection::connect(driver, address).await?;
    let flags = connection.get_create_flags().await?;
    connection.close().await;
    Ok(flags)
}

fn spawn_stderr_reader(driver: &str, child: &mut Child) {
    if let Some(stderr) = child.stderr.take() {
        let driver = driver.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(driver = %driver, "[plugin] {}", line);
            }
        });
    }
}

/// SIGTERM, then SIGKILL if the driver lingers.
async fn shutdown(driver: &str, child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
        Ok(_) => trace!(driver = %driver, "Plugin exited"),
        Err(_) => {
            warn!(driver = %driver, "Plugin did not exit in time, killing");
            if let Err(e) = child.kill().await {
                warn!(driver = %driver, error = %e, "Failed to kill plugin");
            }
        }
    }
}

fn plugin_unreachable(driver: &str, address: &str, cause: String) -> DriverError {
    DriverError::PluginUnreachable {
        driver: driver.to_string(),
        address: address.to_string(),
        cause,
    }
}

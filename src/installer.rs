use std::path::{Path, PathBuf};

use reqwest::Url;
use tokio::io::AsyncWriteExt;

use crate::archive::{self, Compression};
use crate::error::{DriverError, Result};
use crate::model::{binary_name, validate_driver_name};

const FALLBACK_ARTIFACT_NAME: &str = "driver-artifact";

/// Downloads, verifies and installs driver executables into one directory.
#[derive(Debug, Clone)]
pub struct DriverInstaller {
    client: reqwest::Client,
    install_dir: PathBuf,
    work_dir: PathBuf,
}

impl DriverInstaller {
    pub fn new(install_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("machine-driver-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DriverError::network("building HTTP client", e))?;

        Ok(Self {
            client,
            install_dir: install_dir.into(),
            work_dir: work_dir.into(),
        })
    }

    pub fn binary_path(&self, name: &str) -> PathBuf {
        self.install_dir.join(binary_name(name))
    }

    /// Whether the driver's executable can currently be found.
    pub fn binary_is_on_path(&self, name: &str) -> bool {
        locate_installed_binary(&self.install_dir, name).is_some()
    }

    /// Installs `name` from `source_uri`, verifying `checksum` when given.
    ///
    /// The final binary name only appears once the artifact has been fully
    /// downloaded, verified and extracted.
    pub async fn install(&self, name: &str, source_uri: &str, checksum: &str) -> Result<PathBuf> {
        validate_driver_name(name)?;
        let scratch = self.work_dir.join(scratch_dir_name(source_uri));
        prepare_scratch_dir(&scratch).await?;
        tracing::debug!(driver = %name, uri = %source_uri, scratch = %scratch.display(), "Installing driver");

        let result = self.install_from(name, source_uri, checksum, &scratch).await;

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            tracing::warn!(dir = %scratch.display(), error = %e, "Failed to clean up download directory");
        }

        match &result {
            Ok(path) => tracing::info!(driver = %name, path = %path.display(), "Driver installed"),
            Err(e) => tracing::warn!(driver = %name, error = %e, "Driver install failed"),
        }
        result
    }

    async fn install_from(&self, name: &str, source_uri: &str, checksum: &str, scratch: &Path) -> Result<PathBuf> {
        let file_name = artifact_file_name(source_uri);
        let artifact = scratch.join(&file_name);
        self.fetch(source_uri, &artifact).await?;

        archive::verify_checksum(&artifact, checksum, source_uri).await?;

        let executable = match archive::detect_compression(&file_name) {
            Compression::None => artifact,
            compression @ (Compression::Zip | Compression::Tar) => {
                archive::extract(&artifact, compression, &scratch.join("extracted")).await?
            }
            Compression::Unknown => return Err(DriverError::UnknownCompression(file_name)),
        };

        self.place(name, &executable).await
    }

    async fn fetch(&self, source_uri: &str, dest: &Path) -> Result<()> {
        if let Some(local) = source_uri.strip_prefix("file://") {
            tokio::fs::copy(local, dest).await?;
            return Ok(());
        }

        let context = format!("downloading {source_uri}");
        let mut response = self
            .client
            .get(source_uri)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DriverError::network(&context, e))?;

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DriverError::network(&context, e))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// Copies next to the final path, marks it executable, then renames.
    async fn place(&self, name: &str, executable: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.install_dir).await?;

        let final_path = self.binary_path(name);
        let staging = self.install_dir.join(format!(".{}.partial", binary_name(name)));
        tokio::fs::copy(executable, &staging).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o755)).await?;
        }

        if let Err(e) = tokio::fs::rename(&staging, &final_path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(final_path)
    }

    /// Removes the installed executable. Returns whether one was present.
    pub async fn uninstall(&self, name: &str) -> Result<bool> {
        validate_driver_name(name)?;
        match tokio::fs::remove_file(self.binary_path(name)).await {
            Ok(()) => {
                tracing::info!(driver = %name, "Driver binary removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Scratch directory name for a URI; repeated installs of the same URI reuse
/// the same directory.
pub fn scratch_dir_name(source_uri: &str) -> String {
    format!("driver-download-{}", archive::checksum_bytes(source_uri.as_bytes()))
}

/// Last path segment of the URI, which drives compression detection.
pub fn artifact_file_name(source_uri: &str) -> String {
    let segment = match Url::parse(source_uri) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()).map(str::to_string)),
        Err(_) => source_uri
            .rsplit('/')
            .find(|s| !s.is_empty())
            .map(str::to_string),
    };
    segment.unwrap_or_else(|| FALLBACK_ARTIFACT_NAME.to_string())
}

/// The install directory copy wins; otherwise `$PATH` is searched.
pub fn locate_installed_binary(install_dir: &Path, name: &str) -> Option<PathBuf> {
    let file_name = binary_name(name);
    let installed = install_dir.join(&file_name);
    if installed.is_file() {
        return Some(installed);
    }
    archive::find_tool(&file_name)
}

async fn prepare_scratch_dir(dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(dir).await? {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
    }
    Ok(())
}

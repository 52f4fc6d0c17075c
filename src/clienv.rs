use std::path::PathBuf;

pub const CONTROL_PLANE_URL: &str = "CATTLE_URL";
pub const CONTROL_PLANE_ACCESS_KEY: &str = "CATTLE_ACCESS_KEY";
pub const CONTROL_PLANE_SECRET_KEY: &str = "CATTLE_SECRET_KEY";
pub const INSTALL_DIR: &str = "DRIVER_AGENT_INSTALL_DIR";
pub const CONFIG_PATH: &str = "DRIVER_AGENT_CONFIG";

const CONFIG_SUBDIR: &str = "machine-driver-agent";
const FALLBACK_CONFIG_DIR: &str = "/etc";

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Control-plane base URL ($CATTLE_URL)
pub fn control_plane_url() -> Option<String> {
    let val = env_opt(CONTROL_PLANE_URL);
    tracing::trace!(value = ?val, "CATTLE_URL env var");
    val
}

/// Control-plane access key ($CATTLE_ACCESS_KEY)
pub fn access_key() -> Option<String> {
    env_opt(CONTROL_PLANE_ACCESS_KEY)
}

/// Control-plane secret key ($CATTLE_SECRET_KEY)
pub fn secret_key() -> Option<String> {
    env_opt(CONTROL_PLANE_SECRET_KEY)
}

/// Driver install directory override ($DRIVER_AGENT_INSTALL_DIR)
pub fn install_dir() -> Option<PathBuf> {
    let val = env_opt(INSTALL_DIR).map(PathBuf::from);
    tracing::trace!(value = ?val, "DRIVER_AGENT_INSTALL_DIR env var");
    val
}

/// Config file path ($DRIVER_AGENT_CONFIG or ~/.config/machine-driver-agent/config.toml)
pub fn config_path() -> PathBuf {
    let path = env_opt(CONFIG_PATH).map(PathBuf::from).unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
            .join(CONFIG_SUBDIR)
            .join("config.toml")
    });
    tracing::trace!(path = %path.display(), "Resolved config path");
    path
}

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use machine_driver_agent::{AgentConfig, DriverInstaller};

pub(crate) async fn cmd_install(config: &AgentConfig, name: &str, url: &str, checksum: &str) -> anyhow::Result<()> {
    let installer = DriverInstaller::new(&config.install_dir, &config.work_dir)?;

    let pb = create_progress_bar(&format!("Installing {name} from {url}"));
    match installer.install(name, url, checksum).await {
        Ok(path) => {
            pb.finish_with_message(format!("Installed {name} to {}", path.display()));
            Ok(())
        }
        Err(e) => {
            pb.finish_and_clear();
            Err(e.into())
        }
    }
}

fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

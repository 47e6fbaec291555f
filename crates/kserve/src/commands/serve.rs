//! `kserve serve` command implementation.

use std::path::{Path, PathBuf};

use clap::Args;
use kserve_config::{CliSettings, Config};
use kserve_reload::{ReloadServer, ReloadServerConfig, WatchTargets};

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Files to watch (added to those in the config file).
    files: Vec<PathBuf>,

    /// Path to configuration file (default: auto-discover kserve.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Quiet period in milliseconds before a reload is sent (overrides config).
    #[arg(long)]
    cooldown_ms: Option<u64>,

    /// Enable verbose output (connection and reload logs).
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// Runs until Ctrl-C, then stops the server.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the server fails to start.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let cwd = std::env::current_dir()?;

        let cli_settings = CliSettings {
            host: self.host,
            port: self.port,
            cooldown_ms: self.cooldown_ms,
            watch: absolute_paths(&self.files, &cwd),
        };
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;

        let server_config = reload_server_config(&config, &cwd);
        if server_config.watch.is_empty() {
            return Err(CliError::Validation(
                "No files to watch: pass files or set reload.watch in kserve.toml".to_owned(),
            ));
        }

        for path in server_config.watch.paths() {
            if path.is_file() {
                output.info(&format!("Watching: {}", path.display()));
            } else {
                output.warning(&format!("Not found, skipping: {}", path.display()));
            }
        }

        let mut server = ReloadServer::start(server_config).await?;
        output.success(&format!("Live reload on ws://{}", server.local_addr()));

        let signal = tokio::signal::ctrl_c().await;
        output.info("Shutting down");
        server.stop().await;
        signal?;

        Ok(())
    }
}

/// Resolve CLI paths against the working directory.
fn absolute_paths(paths: &[PathBuf], cwd: &Path) -> Vec<PathBuf> {
    paths
        .iter()
        .map(|p| if p.is_absolute() { p.clone() } else { cwd.join(p) })
        .collect()
}

/// Build reload server configuration from kserve config.
fn reload_server_config(config: &Config, cwd: &Path) -> ReloadServerConfig {
    ReloadServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        cooldown: config.reload_resolved.cooldown(),
        watch: WatchTargets::new(&config.reload_resolved.watch, cwd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_absolute_paths() {
        let paths = vec![PathBuf::from("index.html"), PathBuf::from("/abs/app.js")];
        assert_eq!(
            absolute_paths(&paths, Path::new("/work")),
            vec![PathBuf::from("/work/index.html"), PathBuf::from("/abs/app.js")]
        );
    }

    #[test]
    fn test_reload_server_config_from_config() {
        let mut config = Config::default();
        config.server.port = 4000;
        config.reload_resolved.cooldown_ms = 100;
        config.reload_resolved.watch = vec![
            PathBuf::from("/work/index.html"),
            PathBuf::from("/work/index.html"),
        ];

        let server_config = reload_server_config(&config, Path::new("/work"));

        assert_eq!(server_config.host, "127.0.0.1");
        assert_eq!(server_config.port, 4000);
        assert_eq!(server_config.cooldown, Duration::from_millis(100));
        assert_eq!(
            server_config.watch.paths(),
            &[PathBuf::from("/work/index.html")]
        );
    }
}

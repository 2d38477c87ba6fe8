//! Sandfinder Agent
//!
//! Serves a controller over stdio or a Unix socket, and offers the same file
//! operations as local commands.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent::config::{default_config_path, Config};
use agent::files::{
    read_plist, BoundedReader, DirectoryBrowser, LocalFilesystem, PathResolver, StreamingExporter,
};
use agent::protocol::{Message, RootAlias, TransferEventKind};
use agent::transport::Server;
use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Sandfinder Agent - remote file access over a framed message channel.
#[derive(Parser, Debug)]
#[command(name = "sandfinder-agent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve a controller (stdio unless --socket is given)
    Serve {
        /// Listen on a Unix domain socket instead of stdio
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// List a directory relative to a root alias
    Ls {
        /// Path relative to the root
        #[arg(default_value = "")]
        path: String,

        /// Root alias (bundle or default)
        #[arg(long, default_value = "default")]
        root: String,
    },

    /// Print a property list as JSON
    Plist {
        /// Absolute path to the plist
        path: PathBuf,
    },

    /// Print the first bytes of a file
    Text {
        /// Absolute path to the file
        path: PathBuf,
    },

    /// Stream a file through the exporter into a local file
    Download {
        /// Absolute path to the source file
        path: PathBuf,

        /// Destination file
        #[arg(long, short, value_name = "FILE")]
        output: PathBuf,
    },

    /// Show the effective configuration
    Config {
        /// Write it to the configuration path
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();
    config.validate()?;

    let _guard = init_tracing(&config, cli.verbose)?;
    tracing::debug!(path = %config_path.display(), "Configuration loaded");

    match cli.command {
        Commands::Serve { socket } => run_serve(&config, socket).await,
        Commands::Ls { path, root } => run_ls(&config, &path, RootAlias::parse(&root)),
        Commands::Plist { path } => run_plist(&path),
        Commands::Text { path } => run_text(&config, &path).await,
        Commands::Download { path, output } => run_download(&config, &path, &output).await,
        Commands::Config { write } => run_config(&config, &config_path, write),
    }
}

/// Set up tracing. Logs go to stderr, or to a daily rolling file when
/// `agent.log_dir` is set; stdout is reserved for the message channel.
fn init_tracing(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.agent.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_new(&level)
        .with_context(|| format!("Invalid log level: {}", level))?;

    match &config.agent.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "sandfinder-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn resolver(config: &Config) -> PathResolver {
    PathResolver::new(config.roots.bundle.clone())
}

async fn run_serve(config: &Config, socket: Option<PathBuf>) -> anyhow::Result<()> {
    let server = Server::new(
        Arc::new(LocalFilesystem),
        resolver(config),
        config.transfer.clone(),
    );

    match socket {
        Some(path) => {
            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                trigger.cancel();
            });

            server.serve_unix(&path, shutdown).await?;
        }
        None => {
            tracing::info!("Serving controller on stdio");
            let stats = server
                .serve(tokio::io::stdin(), tokio::io::stdout())
                .await?;
            tracing::info!(
                received = stats.received,
                sent = stats.sent,
                "Controller closed the channel"
            );
        }
    }

    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Ctrl-C handler unavailable");
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
    }
}

fn run_ls(config: &Config, path: &str, root: RootAlias) -> anyhow::Result<()> {
    let browser = DirectoryBrowser::new(Arc::new(LocalFilesystem), resolver(config));
    let entries = browser.list(path, root)?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn run_plist(path: &Path) -> anyhow::Result<()> {
    let value = read_plist(path)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn run_text(config: &Config, path: &Path) -> anyhow::Result<()> {
    let reader = BoundedReader::new(Arc::new(LocalFilesystem), config.transfer.read_cap);
    let bytes = reader.read(path).await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes)?;
    stdout.flush()?;
    Ok(())
}

/// Run a real export and reassemble its events into `output`.
///
/// Data lands in a `.part` file that is renamed once `end` arrives.
async fn run_download(config: &Config, path: &Path, output: &Path) -> anyhow::Result<()> {
    let (channel, mut rx) = agent::outbound(config.transfer.channel_capacity);
    let exporter = StreamingExporter::new(
        Arc::new(LocalFilesystem),
        channel,
        config.transfer.watermark,
    );

    let started = exporter.start(path).await?;
    drop(exporter);
    tracing::info!(session = %started.session, size = started.size, "Download started");

    let mut part_name = output.as_os_str().to_owned();
    part_name.push(".part");
    let part = PathBuf::from(part_name);
    let mut file = tokio::fs::File::create(&part)
        .await
        .with_context(|| format!("Failed to create {}", part.display()))?;

    let mut written = 0u64;
    while let Some(envelope) = rx.recv().await {
        let Message::Transfer(event) = envelope.payload else {
            continue;
        };
        match event.event {
            TransferEventKind::Start => {}
            TransferEventKind::Data => {
                let chunk = envelope.attachment.unwrap_or_default();
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            TransferEventKind::End => {
                file.flush().await?;
                drop(file);
                tokio::fs::rename(&part, output)
                    .await
                    .with_context(|| format!("Failed to move download to {}", output.display()))?;
                tracing::info!(bytes = written, output = %output.display(), "Download complete");
                return Ok(());
            }
            TransferEventKind::Error => {
                drop(file);
                discard_partial(&part).await;
                anyhow::bail!(
                    "export failed: {}",
                    event.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
        }
    }

    drop(file);
    discard_partial(&part).await;
    anyhow::bail!("export ended without a terminal event")
}

async fn discard_partial(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await {
        tracing::debug!(path = %part.display(), error = %e, "Partial download not removed");
    }
}

fn run_config(config: &Config, path: &Path, write: bool) -> anyhow::Result<()> {
    if write {
        config.save(path)?;
        println!("Configuration written to {}", path.display());
    } else {
        print!("{}", config.to_toml()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_defaults_to_stdio() {
        let cli = Cli::try_parse_from(["sandfinder-agent", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { socket } => assert!(socket.is_none()),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_serve_with_socket() {
        let cli =
            Cli::try_parse_from(["sandfinder-agent", "serve", "--socket", "/tmp/agent.sock"])
                .unwrap();
        match cli.command {
            Commands::Serve { socket } => {
                assert_eq!(socket, Some(PathBuf::from("/tmp/agent.sock")))
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_ls_defaults() {
        let cli = Cli::try_parse_from(["sandfinder-agent", "ls"]).unwrap();
        match cli.command {
            Commands::Ls { path, root } => {
                assert_eq!(path, "");
                assert_eq!(RootAlias::parse(&root), RootAlias::Default);
            }
            _ => panic!("Expected Ls command"),
        }
    }

    #[test]
    fn test_ls_bundle_root() {
        let cli =
            Cli::try_parse_from(["sandfinder-agent", "ls", "Library", "--root", "bundle"]).unwrap();
        match cli.command {
            Commands::Ls { path, root } => {
                assert_eq!(path, "Library");
                assert_eq!(RootAlias::parse(&root), RootAlias::Bundle);
            }
            _ => panic!("Expected Ls command"),
        }
    }

    #[test]
    fn test_download_requires_output() {
        assert!(Cli::try_parse_from(["sandfinder-agent", "download", "/tmp/file"]).is_err());

        let cli = Cli::try_parse_from([
            "sandfinder-agent",
            "download",
            "/tmp/file",
            "-o",
            "/tmp/copy",
        ])
        .unwrap();
        match cli.command {
            Commands::Download { path, output } => {
                assert_eq!(path, PathBuf::from("/tmp/file"));
                assert_eq!(output, PathBuf::from("/tmp/copy"));
            }
            _ => panic!("Expected Download command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "sandfinder-agent",
            "text",
            "/tmp/file",
            "--verbose",
            "--config",
            "/etc/sandfinder.toml",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/sandfinder.toml")));
    }

    #[tokio::test]
    async fn test_run_download_reassembles_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let source = temp_dir.path().join("source.bin");
        let output = temp_dir.path().join("copy.bin");
        let content: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &content).unwrap();

        let mut config = Config::default();
        config.transfer.watermark = 1024;

        run_download(&config, &source, &output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), content);
        assert!(!temp_dir.path().join("copy.bin.part").exists());
    }

    #[tokio::test]
    async fn test_run_download_failure_discards_partial_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let source = temp_dir.path().join("not-a-file");
        std::fs::create_dir(&source).unwrap();
        let output = temp_dir.path().join("copy.bin");

        // Directories open fine but fail on the first read
        let err = run_download(&Config::default(), &source, &output)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("export failed"));
        assert!(!output.exists());
        assert!(!temp_dir.path().join("copy.bin.part").exists());
    }

    #[tokio::test]
    async fn test_discard_partial_tolerates_missing_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let part = temp_dir.path().join("gone.part");
        discard_partial(&part).await;

        std::fs::write(&part, b"partial").unwrap();
        discard_partial(&part).await;
        assert!(!part.exists());
    }
}

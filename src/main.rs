use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

mod app;
mod client;
mod config;
mod handler;
mod logging;
mod snippets;
mod transcript;
mod tui;
mod ui;
mod watcher;

use app::App;
use config::Config;
use tui::{EventHandler, Tui};

#[derive(Parser)]
#[command(name = "gptx")]
#[command(version, about = "Terminal chat client for the GPT-X code interpreter assistant")]
struct Cli {
    /// Backend base URL (overrides the config file)
    #[arg(short, long)]
    server: Option<String>,

    /// Folder to offer when granting access to uploads
    #[arg(short, long)]
    uploads: Option<PathBuf>,

    /// Start watching the uploads folder right away
    #[arg(short, long)]
    watch: bool,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let mut config = Config::load_from(&config_path)?;

    let log_dir = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => Config::config_dir()?,
    };
    let _log_guard = logging::init(&log_dir)?;

    if config.ensure_session_id() {
        if let Err(e) = config.save_to(&config_path) {
            tracing::warn!(error = %e, "could not persist session id");
        }
    }
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if let Some(uploads) = cli.uploads {
        config.uploads_dir = uploads;
    }
    tracing::info!(server = %config.server_url, session = config.session_id(), "starting");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, config, cli.watch).await;
    tui::restore()?;

    if let Err(e) = &result {
        tracing::error!(error = %e, "exited with error");
    }
    result
}

async fn run(terminal: &mut Tui, config: Config, watch: bool) -> Result<()> {
    let mut events = EventHandler::new();
    let mut app = App::new(config, events.sender());

    app.register_session();
    if watch {
        let dir = app.config.uploads_dir.clone();
        app.monitor_uploads_folder(dir);
    }

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(&mut app, event)?,
            None => break,
        }
    }

    if let Some(watch) = app.watch.take() {
        watch.stop();
    }
    Ok(())
}

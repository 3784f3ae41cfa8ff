//! tacheles - terminal chat client.
//!
//! This is the entry point for the `tacheles` binary.

mod app;
mod ui;

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tacheles_client::{BackendClient, ClientConfig, ConversationController};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use app::{App, AppEvent, Focus};

/// tacheles - chat with the tacheles backend from the terminal.
#[derive(Parser, Debug)]
#[command(name = "tacheles")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend URL.
    #[arg(long, env = "TACHELES_BACKEND_URL", default_value = "http://localhost:8000")]
    backend_url: String,

    /// Upper bound on reads per streamed reply.
    #[arg(
        long,
        env = "TACHELES_MAX_STREAM_READS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    max_stream_reads: Option<u64>,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,

    /// Log file used with --debug.
    #[arg(long, default_value = "tacheles.log")]
    log_file: PathBuf,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let config = ClientConfig::new(&self.backend_url);
        match self.max_stream_reads {
            Some(limit) => config.with_max_stream_reads(limit),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // The terminal belongs to the UI, so logs go to a file.
    if args.debug {
        let file = File::create(&args.log_file)
            .with_context(|| format!("cannot create log file {}", args.log_file.display()))?;
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("tacheles=debug,tacheles_client=debug,warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }

    let config = args.client_config();
    tracing::info!(backend_url = %config.backend_url, max_stream_reads = config.max_stream_reads, "Starting");

    let controller = ConversationController::connect(&config)?;
    let health = BackendClient::new(&config)?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(controller, config.base_url());
    terminal.draw(|f| ui::render(f, &app))?;

    app.backend_reachable = health.healthcheck().await;
    // Failures land in the controller's error slot and show in the status bar.
    if app.controller().initialize().await.is_ok() {
        app.sync_conversations();
    }

    let result = run_event_loop(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

/// Main event loop.
///
/// Redraws on every store change so streamed fragments show up immediately.
async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> anyhow::Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AppEvent>();
    let mut changes = app.controller().store().subscribe();

    loop {
        app.tick_animation();
        app.take_store_change();
        terminal.draw(|f| ui::render(f, app))?;

        let tick_rate = if app.is_sending() {
            Duration::from_millis(80)
        } else {
            Duration::from_millis(100)
        };

        tokio::select! {
            () = tokio::time::sleep(tick_rate) => {
                while event::poll(Duration::from_millis(0)).unwrap_or(false) {
                    if let Ok(evt) = event::read() {
                        handle_input(app, evt, &event_tx).await;
                    }
                }
            }

            Some(event) = event_rx.recv() => {
                app.handle_event(event);
            }

            Ok(()) = changes.changed() => {
                if app.take_store_change() {
                    terminal.draw(|f| ui::render(f, app))?;
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

/// Handle input events.
async fn handle_input(app: &mut App, event: Event, events: &mpsc::UnboundedSender<AppEvent>) {
    match event {
        Event::Key(key) => {
            if key.kind == KeyEventKind::Press {
                handle_key(app, key, events).await;
            }
        }
        Event::Mouse(mouse) => match mouse.kind {
            MouseEventKind::ScrollUp => app.scroll_chat_up(3),
            MouseEventKind::ScrollDown => app.scroll_chat_down(3),
            _ => {}
        },
        _ => {}
    }
}

/// Handle a key press.
///
/// Global keys first, then per focus:
/// - conversation list: Up/Down move, Enter opens, `q` quits
/// - chat: typing edits the input, Enter sends, Up/Down still move the list
async fn handle_key(app: &mut App, key: KeyEvent, events: &mpsc::UnboundedSender<AppEvent>) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Char('c') if ctrl => {
            app.quit();
            return;
        }
        KeyCode::Char('n') if ctrl => {
            if let Err(e) = app.new_conversation().await {
                tracing::warn!(error = %e, "Failed to start conversation");
                app.set_status(format!("Cannot start conversation: {e}"));
            }
            return;
        }
        KeyCode::Esc => {
            app.cancel_or_dismiss();
            return;
        }
        KeyCode::Tab | KeyCode::BackTab => {
            app.focus = app.focus.toggle();
            return;
        }
        KeyCode::Up => {
            app.select_prev();
            return;
        }
        KeyCode::Down => {
            app.select_next();
            return;
        }
        KeyCode::PageUp => {
            app.scroll_chat_up(10);
            return;
        }
        KeyCode::PageDown => {
            app.scroll_chat_down(10);
            return;
        }
        _ => {}
    }

    match app.focus {
        Focus::Conversations => match key.code {
            KeyCode::Enter => {
                if let Err(e) = app.activate_selected().await {
                    tracing::warn!(error = %e, "Failed to open conversation");
                    app.set_status(format!("Cannot open conversation: {e}"));
                }
            }
            KeyCode::Char('q') => app.quit(),
            _ => {}
        },
        Focus::Chat => handle_chat_key(app, key.code, ctrl, events),
    }
}

/// Handle a key in the chat input.
fn handle_chat_key(
    app: &mut App,
    code: KeyCode,
    ctrl: bool,
    events: &mpsc::UnboundedSender<AppEvent>,
) {
    match code {
        KeyCode::Enter => {
            app.submit(events);
        }
        KeyCode::Char('a') if ctrl => app.move_cursor_start(),
        KeyCode::Char('e') if ctrl => app.move_cursor_end(),
        KeyCode::Char('u') if ctrl => app.clear_input(),
        KeyCode::Char('w') if ctrl => app.delete_word(),
        KeyCode::Char(c) if !ctrl => app.insert_char(c),
        KeyCode::Backspace => app.delete_char(),
        KeyCode::Delete => app.delete_char_forward(),
        KeyCode::Left => app.move_cursor_left(),
        KeyCode::Right => app.move_cursor_right(),
        KeyCode::Home => app.move_cursor_start(),
        KeyCode::End => app.move_cursor_end(),
        _ => {}
    }
}

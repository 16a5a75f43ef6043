use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bibleview_bridge::{BridgeHandle, BridgeSettings, ContentBridge, LayoutSurface, SelectionMode};
use bibleview_core::{
    BookCategory, ChangeMediator, ContentLoader, FileStateStore, PageManager, StateStore,
    ViewSettings,
};
use bibleview_render::{FileCatalog, MarkupRenderer};
use bibleview_tty::{write_status_line, DrawParams, EventMapper, TerminalPainter, UiEvent};
use clap::Parser;
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal;
use directories::ProjectDirs;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

mod reader;

use reader::Reader;

#[derive(Debug, Parser)]
#[command(
    name = "bibleview",
    version,
    about = "Terminal reader for Bibles, commentaries and other books"
)]
struct Args {
    /// Directory of TOML document files
    #[arg(short = 'c', long = "catalog")]
    catalog: Option<PathBuf>,

    /// Page slot to show (bible, commentary, dictionary, map, general_book)
    #[arg(long)]
    category: Option<BookCategory>,

    /// Initials of the document to open
    #[arg(short = 'd', long)]
    document: Option<String>,

    /// Key or verse to open, e.g. Gen.1 or Gen.1.3
    #[arg(short = 'k', long)]
    key: Option<String>,

    /// Directory holding the saved session
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Print the session state as JSON and exit
    #[arg(long)]
    print_state: bool,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "bibleview", "bibleview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs, args.print_state)?;
    let settings = ViewSettings::load(&project_dirs.config_dir().join("bibleview.toml"))?;

    let catalog_dir = match &args.catalog {
        Some(dir) => dir.clone(),
        None => {
            let dir = project_dirs.data_local_dir().join("catalog");
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create catalog directory {:?}", dir))?;
            dir
        }
    };
    let catalog = Arc::new(
        FileCatalog::open(catalog_dir.clone())
            .with_context(|| format!("failed to open catalog {:?}", catalog_dir))?,
    );
    let state_dir = args
        .state_dir
        .clone()
        .unwrap_or_else(|| project_dirs.data_local_dir().join("state"));
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(state_dir)?);

    let mediator = Arc::new(ChangeMediator::new());
    let mut manager = PageManager::new(catalog.clone(), Arc::clone(&mediator));
    match store.load() {
        Ok(Some(state)) => manager.restore(&state),
        Ok(None) => debug!("no saved session"),
        Err(err) => warn!(error = %err, "ignoring unreadable session state"),
    }
    apply_args(&mut manager, &catalog, &args)?;

    if args.print_state {
        let state = manager.snapshot();
        println!("{}", state.encode()?);
        store.save(&state)?;
        return Ok(());
    }

    let (columns, rows) = terminal::size()?;
    let bridge = BridgeHandle::new(ContentBridge::new(
        LayoutSurface::new(
            usize::from(columns),
            f32::from(rows.saturating_sub(1)),
            settings.line_height,
        ),
        BridgeSettings::from(&settings),
    ));
    mediator.subscribe(Arc::new(bridge.clone()));
    let loader = ContentLoader::new(
        Arc::new(MarkupRenderer::new(catalog.clone())),
        settings.locale.clone(),
    );
    let mut reader = Reader::new(manager, catalog, loader, bridge.clone(), &settings);

    reader.show_current_page().await;
    bridge.initialize();
    reader.restore_offset().await;
    if let Some(text) = &args.key {
        if let Err(err) = reader.goto(text).await {
            reader.set_message(err.to_string());
        }
    }

    let (watch_tx, watch_rx) = mpsc::channel();
    let _watcher = watch_catalog(&catalog_dir, watch_tx);

    let cursor_row = ((settings.toolbar_offset + settings.target_line) / settings.line_height.max(f32::EPSILON))
        .max(0.0) as u16;

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut painter = TerminalPainter::new(stdout);
    let mut event_mapper = EventMapper::new();
    painter.clear_all()?;
    let mut dirty = true;

    loop {
        if watch_rx.try_iter().count() > 0 {
            reader.catalog_changed().await;
            dirty = true;
        }

        if dirty {
            let (columns, rows) = terminal::size()?;
            let view_rows = rows.saturating_sub(1);
            let (lines, selection) = reader.frame();
            painter.begin_sync_update()?;
            painter.draw(
                &lines,
                &selection,
                DrawParams::clamped(columns, view_rows).with_cursor(cursor_row),
            )?;
            let status = combine_status(reader.status(), event_mapper.pending_input().as_deref());
            write_status_line(painter.writer(), view_rows, &status)?;
            painter.end_sync_update()?;
            dirty = false;
        }

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let ev = event::read()?;
        if let event::Event::Resize(columns, rows) = ev {
            reader.resize(columns, rows.saturating_sub(1)).await;
            dirty = true;
            continue;
        }
        let page_height = reader.viewport_height();
        match event_mapper.map_event(ev) {
            UiEvent::Scroll { lines } => {
                reader.scroll_by(lines as f32 * settings.line_height).await
            }
            UiEvent::ScrollPages { pages } => reader.scroll_by(pages as f32 * page_height).await,
            UiEvent::ScrollToStart => reader.scroll_to(0.0).await,
            UiEvent::ScrollToEnd => {
                let end = reader.content_end();
                reader.scroll_to(end).await
            }
            UiEvent::NextPage { count } => reader.page_step(count as isize).await,
            UiEvent::PrevPage { count } => reader.page_step(-(count as isize)).await,
            UiEvent::SwitchSlot(category) => reader.switch_slot(category).await,
            UiEvent::EnableTouchSelection => reader.set_selection_mode(SelectionMode::TouchSelect),
            UiEvent::EnableLongPressSelection => {
                reader.set_selection_mode(SelectionMode::LongPressSelect)
            }
            UiEvent::DisableSelection => reader.set_selection_mode(SelectionMode::Off),
            UiEvent::Tap => {
                reader.gesture(false);
            }
            UiEvent::LongPress => {
                reader.gesture(true);
            }
            UiEvent::ClearHighlights => reader.clear_highlights(),
            UiEvent::KeyPromptSubmit { text } => {
                if let Err(err) = reader.goto(&text).await {
                    reader.set_message(err.to_string());
                }
            }
            UiEvent::BeginKeyPrompt
            | UiEvent::KeyPromptChanged { .. }
            | UiEvent::KeyPromptCancel
            | UiEvent::None => {}
            UiEvent::Quit => break,
        }
        dirty = true;
    }

    painter.clear_all()?;
    painter.writer().flush()?;
    reader.persist(store.as_ref())?;
    info!("session saved");
    Ok(())
}

/// Applies `--category`, `--document` and `--key` on top of the restored session.
fn apply_args(manager: &mut PageManager, catalog: &FileCatalog, args: &Args) -> Result<()> {
    if let Some(category) = args.category {
        manager.set_active_category(category);
    }
    if let Some(initials) = &args.document {
        let document = catalog
            .entry(initials)
            .ok_or_else(|| anyhow!("document {initials} is not installed"))?;
        manager.show_document(document);
    }
    if let Some(text) = &args.key {
        let document = manager
            .active_mut()
            .current_document()
            .ok_or_else(|| anyhow!("no document to open {text} in"))?;
        let key = document
            .parse_key(text)
            .with_context(|| format!("cannot open {text} in {}", document.initials()))?;
        manager.set_key(key);
    }
    Ok(())
}

fn watch_catalog(
    dir: &std::path::Path,
    tx: mpsc::Sender<notify::Result<notify::Event>>,
) -> Option<RecommendedWatcher> {
    let mut watcher = match notify::recommended_watcher(tx) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(error = %err, "catalog watching unavailable");
            return None;
        }
    };
    if let Err(err) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        warn!(error = %err, dir = %dir.display(), "failed to watch catalog");
        return None;
    }
    Some(watcher)
}

fn combine_status(base: String, pending_input: Option<&str>) -> String {
    match pending_input.filter(|s| !s.is_empty()) {
        Some(pending) => format!("{base} | {pending}"),
        None => base,
    }
}

fn init_logging(project_dirs: &ProjectDirs, console: bool) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "bibleview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // the terminal belongs to the reader unless printing state
    let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

mod backend;
mod config;
mod engine;
mod error;
mod ui;

use backend::cache::{CatalogEvent, CatalogStore};
use backend::images::{HttpImageFetcher, ImageScheduler};
use backend::provider::HttpCatalogProvider;
use backend::storage::FileStore;
use backend::wishlist::Wishlist;
use config::Config;
use engine::filter::FilterCriteria;
use engine::preload::PreloadRequest;
use engine::session::{CatalogSession, CriteriaChange};
use engine::window::columns_for_width;
use error::ProviderError;
use image::DynamicImage;
use ui::app::{App, Focus, Tab};
use ui::ui::{CARD_WIDTH, grid_area, ui};

use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use futures::future::BoxFuture;
use log::{error, info, warn};
use ratatui::{Terminal, backend::CrosstermBackend, layout::Rect};
use std::fs::{self, File};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{error::Error, io};
use tokio::sync::mpsc;

enum BackgroundTask {
    CatalogLoaded { outcome: Result<(), ProviderError> },
    CoverLoaded { pack_id: String, image: DynamicImage },
}

/// The terminal belongs to the UI, so logs go to a file.
fn init_logging() {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    let log_file = dirs::cache_dir()
        .map(|dir| dir.join("pinpack"))
        .and_then(|dir| {
            fs::create_dir_all(&dir).ok()?;
            File::create(dir.join("pinpack.log")).ok()
        });
    match log_file {
        Some(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        None => {
            builder.target(env_logger::Target::Stderr);
        }
    }
    builder.init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let config = Config::load();
    let provider = HttpCatalogProvider::new(&config.api_url, config.api_key.clone())?;
    let store = CatalogStore::new(Arc::new(provider), config.cache_ttl());
    let mut catalog_events = store.subscribe().await;
    let wishlist = Wishlist::new(Arc::new(FileStore::new()));
    let images = ImageScheduler::new(
        Arc::new(HttpImageFetcher::new()?),
        config.max_concurrent_images,
        &config.placeholder_url,
    );
    let session = CatalogSession::new(store, wishlist, &config);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(session, images);

    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<BackgroundTask>();

    app.set_loading("Fetching packs...");
    sync_grid_size(&mut app, terminal_area(&terminal)?);
    spawn_load(app.session.start(), &task_tx);

    let res = run_app(&mut terminal, &mut app, &mut task_rx, &mut catalog_events, task_tx).await;

    app.session.disconnect();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        error!("terminal error: {}", err);
        eprintln!("{err}");
    }
    Ok(())
}

fn terminal_area(terminal: &Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<Rect> {
    let size = terminal.size()?;
    Ok(Rect::new(0, 0, size.width, size.height))
}

/// Pushes the grid's current height and column count into the session.
fn sync_grid_size(app: &mut App, area: Rect) {
    let grid = grid_area(area);
    let columns = columns_for_width(grid.width as f64, CARD_WIDTH as f64, 0.0);
    let size = (grid.height, columns);
    if app.grid_size != Some(size) {
        app.grid_size = Some(size);
        app.session.on_resize(grid.height as f64, columns);
    }
}

/// Runs a catalog fetch off the UI loop and reports back when it settles.
fn spawn_load(
    fetch: BoxFuture<'static, Result<(), ProviderError>>,
    tx: &mpsc::UnboundedSender<BackgroundTask>,
) {
    let tx = tx.clone();
    tokio::spawn(async move {
        let outcome = fetch.await;
        let _ = tx.send(BackgroundTask::CatalogLoaded { outcome });
    });
}

/// Starts every cover load the session asked for since the last call.
fn dispatch_preloads(app: &mut App, tx: &mpsc::UnboundedSender<BackgroundTask>) {
    for PreloadRequest { pack_id, url, priority } in app.session.take_preload_requests() {
        let images = app.images.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            let image = match images.request(&url, priority).await {
                Ok(image) => image,
                Err(e) => {
                    warn!("cover for {} failed: {}", pack_id, e);
                    images.display(&url).unwrap_or_else(|| images.placeholder())
                }
            };
            let _ = tx.send(BackgroundTask::CoverLoaded {
                pack_id,
                image: (*image).clone(),
            });
        });
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    task_rx: &mut mpsc::UnboundedReceiver<BackgroundTask>,
    catalog_events: &mut mpsc::UnboundedReceiver<CatalogEvent>,
    task_tx: mpsc::UnboundedSender<BackgroundTask>,
) -> io::Result<()> {
    let mut event_stream = EventStream::new();

    loop {
        sync_grid_size(app, terminal_area(terminal)?);
        dispatch_preloads(app, &task_tx);
        terminal.draw(|f| ui(f, app))?;

        // Wake for the pending search, or often enough to animate the spinner.
        let wake = app
            .session
            .search_deadline()
            .unwrap_or_else(|| Instant::now() + Duration::from_millis(250));

        tokio::select! {
            _ = tokio::time::sleep_until(wake.into()) => {
                if app.session.poll_search(Instant::now()).await {
                    app.results_changed();
                }
            }

            Some(Ok(event)) = event_stream.next() => {
                if let Event::Key(key) = event {
                    if key.kind == KeyEventKind::Press
                        && !handle_key(app, key.code, &task_tx).await
                    {
                        return Ok(());
                    }
                }
            }

            Some(task) = task_rx.recv() => {
                match task {
                    BackgroundTask::CatalogLoaded { outcome } => {
                        app.session.finish_load(outcome).await;
                        app.refresh_categories().await;
                        app.results_changed();
                        if app.session.error().is_none() {
                            info!("catalog loaded, {} packs shown", app.session.results().len());
                        }
                    }
                    BackgroundTask::CoverLoaded { pack_id, image } => {
                        app.add_cover_image(&pack_id, image);
                    }
                }
            }

            Some(event) = catalog_events.recv() => {
                app.session.on_catalog_event(event);
            }
        }
    }
}

/// Returns false when the user asked to quit.
async fn handle_key(
    app: &mut App,
    key: KeyCode,
    tx: &mpsc::UnboundedSender<BackgroundTask>,
) -> bool {
    app.status = None;
    match app.focus {
        Focus::Search => handle_search_input(app, key).await,
        Focus::Grid => return handle_grid_input(app, key, tx).await,
    }
    true
}

async fn handle_search_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Char(c) => {
            let mut text = app.session.search_input().to_string();
            text.push(c);
            app.session.on_search_input(&text, Instant::now());
        }
        KeyCode::Backspace => {
            let mut text = app.session.search_input().to_string();
            text.pop();
            app.session.on_search_input(&text, Instant::now());
        }
        KeyCode::Tab => {
            // Accept the first suggestion
            if let Some(suggestion) = app.session.suggestions().first().cloned() {
                app.session
                    .on_criteria_change(CriteriaChange::Search(suggestion.text))
                    .await;
                app.results_changed();
            }
        }
        KeyCode::Enter => {
            if app.session.submit_search().await {
                app.results_changed();
            }
            app.focus = Focus::Grid;
        }
        KeyCode::Esc | KeyCode::Down => {
            app.focus = Focus::Grid;
        }
        _ => {}
    }
}

async fn handle_grid_input(
    app: &mut App,
    key: KeyCode,
    tx: &mpsc::UnboundedSender<BackgroundTask>,
) -> bool {
    let columns = app.columns() as isize;
    match key {
        KeyCode::Char('q') => return false,
        KeyCode::Char('/') => app.focus = Focus::Search,
        KeyCode::Tab => {
            app.tab = match app.tab {
                Tab::Catalog => Tab::Wishlist,
                Tab::Wishlist => Tab::Catalog,
            }
        }
        KeyCode::Left => app.move_selection(-1),
        KeyCode::Right => app.move_selection(1),
        KeyCode::Up => app.move_selection(-columns),
        KeyCode::Down => app.move_selection(columns),
        KeyCode::PageUp => app.page(-1),
        KeyCode::PageDown => app.page(1),
        KeyCode::Char('c') => {
            let next = app.next_category();
            change_criteria(app, next).await;
        }
        KeyCode::Char('s') => {
            let next = app.session.criteria().star_rating_floor.next();
            change_criteria(app, CriteriaChange::RatingFloor(next)).await;
        }
        KeyCode::Char('p') => {
            let next = app.session.criteria().pin_count_bucket.next();
            change_criteria(app, CriteriaChange::PinBucket(next)).await;
        }
        KeyCode::Char('o') => {
            let next = app.session.criteria().sort_key.next();
            change_criteria(app, CriteriaChange::Sort(next)).await;
        }
        KeyCode::Char('x') | KeyCode::Esc => {
            let filtered = *app.session.criteria() != FilterCriteria::default()
                || !app.session.search_input().is_empty();
            if filtered || key == KeyCode::Char('x') {
                change_criteria(app, CriteriaChange::Reset).await;
            }
        }
        KeyCode::Char('w') => {
            if let Some(pack_id) = app.selected_pack_id() {
                match app.session.on_wishlist_toggle(&pack_id) {
                    Ok(Some(true)) => app.set_status("Saved to wishlist"),
                    Ok(Some(false)) => app.set_status("Removed from wishlist"),
                    Ok(None) => {}
                    Err(e) => {
                        error!("wishlist update failed: {}", e);
                        app.set_status(format!("Wishlist not saved: {}", e));
                    }
                }
                app.wishlist_changed();
            }
        }
        KeyCode::Char('r') => {
            app.set_loading("Refreshing packs...");
            spawn_load(app.session.retry(), tx);
        }
        _ => {}
    }
    true
}

async fn change_criteria(app: &mut App, change: CriteriaChange) {
    app.session.on_criteria_change(change).await;
    app.results_changed();
}

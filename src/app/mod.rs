mod format;
#[cfg(unix)]
mod player;
mod process;


use std::io::BufRead;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::warn;

use crate::catalog::{GenreListing, LETTER_GROUPS, Navigator, PeopleFilter, PeopleKind, Ticket};
use crate::cli::{Cli, Command, GenreTab, PeopleArgs, PlayArgs};
use crate::config::Config;
use crate::db::{Database, HistoryRecord};
use crate::http::{FetchError, HttpClient};
use crate::model::{BookResult, CatalogItem, Track};
use crate::playback::{BookMeta, ResumePoint};
use crate::scrape::UNTITLED_BOOK;

use self::format::{format_updated_at, history_progress, truncate};

/// Interval at which the player is asked for its status.
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const SKIP_STEP_MS: i64 = 15_000;

pub fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    match cli.command {
        Some(Command::Search { query }) => run_search(&config, &query)?,
        Some(Command::Genres) => run_genres(&config)?,
        Some(Command::Authors(args)) => run_people(&config, PeopleKind::Authors, &args)?,
        Some(Command::Readers(args)) => run_people(&config, PeopleKind::Readers, &args)?,
        Some(Command::Letters) => run_letters(),
        Some(Command::Genre { url, tab, period }) => {
            let listing = match tab {
                GenreTab::New => GenreListing::Newest,
                GenreTab::Popular => GenreListing::Popular(period),
                GenreTab::Rating => GenreListing::TopRated(period),
            };
            run_genre(&config, &url, listing)?
        }
        Some(Command::Tracks {
            book_url,
            resume_url,
        }) => run_tracks(&config, &book_url, resume_url.as_deref())?,
        Some(Command::Forget { book_id }) => run_forget(&config, &book_id)?,
        Some(Command::Play(args)) => run_play(&config, &args)?,
        Some(Command::History) | None => run_history(&config)?,
    }

    Ok(())
}

fn client(config: &Config) -> HttpClient {
    HttpClient::new(config.http_timeout, &config.user_agent)
}

fn open_db(config: &Config) -> Result<Database> {
    let db = Database::open(&config.db_path)?;
    db.initialize()?;
    Ok(db)
}

fn run_search(config: &Config, query: &str) -> Result<()> {
    if query.trim().is_empty() {
        println!("Enter a search query.");
        return Ok(());
    }
    let client = client(config);
    let books = Navigator::new(&client, &config.base_url).search_books(query)?;
    print_books(&books);
    Ok(())
}

fn print_books(books: &[BookResult]) {
    if books.is_empty() {
        println!("No books found.");
        return;
    }
    println!(
        "{:<40} {:<28} {:<28} {:>9}",
        "TITLE", "AUTHORS", "READERS", "LIKES"
    );
    for book in books {
        println!(
            "{:<40} {:<28} {:<28} {:>9}",
            truncate(&book.title, 40),
            truncate(&book.authors, 28),
            truncate(&book.readers, 28),
            format!("{}/{}", book.likes, book.dislikes)
        );
        match &book.genre {
            Some(genre) => println!("    {} [{genre}]", book.url),
            None => println!("    {}", book.url),
        }
    }
}

fn print_catalog(items: &[CatalogItem]) {
    if items.is_empty() {
        println!("Nothing listed.");
        return;
    }
    for item in items {
        println!("{:<40} {}", truncate(&item.title, 40), item.url);
    }
}

fn run_genres(config: &Config) -> Result<()> {
    let client = client(config);
    let genres = Navigator::new(&client, &config.base_url).genres()?;
    print_catalog(&genres);
    Ok(())
}

fn run_people(config: &Config, kind: PeopleKind, args: &PeopleArgs) -> Result<()> {
    let filter = PeopleFilter::from_parts(args.letter.as_deref(), args.query.as_deref());
    let client = client(config);
    let page = Navigator::new(&client, &config.base_url).people(kind, &filter, args.page)?;

    if page.items.is_empty() {
        println!("Nobody found.");
        return Ok(());
    }
    for person in &page.items {
        println!(
            "{:<36} {:<16} {}",
            truncate(&person.name, 36),
            person.count.as_deref().unwrap_or(""),
            person.url
        );
    }
    println!("Page {} of {}", page.page, page.pages);
    Ok(())
}

fn run_letters() {
    for (group, letters) in LETTER_GROUPS {
        println!("{group:<6} {}", letters.join(" "));
    }
}

fn run_genre(config: &Config, url: &str, listing: GenreListing) -> Result<()> {
    let client = client(config);
    let genre = CatalogItem {
        title: genre_title_from_url(url),
        url: url.to_string(),
    };
    let page = Navigator::new(&client, &config.base_url).genre_page(&genre, listing)?;

    if let Some(meta) = &page.meta {
        match &meta.count {
            Some(count) => println!("{} ({count})\n", meta.title),
            None => println!("{}\n", meta.title),
        }
    }
    print_books(&page.books);
    Ok(())
}

/// Last path segment of a genre URL, used when the page has no header.
pub(crate) fn genre_title_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .unwrap_or_else(|| url.to_string())
}

fn run_tracks(config: &Config, book_url: &str, resume_url: Option<&str>) -> Result<()> {
    let client = client(config);
    let tracks = Navigator::new(&client, &config.base_url).book_tracks(book_url, resume_url)?;
    if tracks.is_empty() {
        println!("No playable tracks found.");
        return Ok(());
    }
    for (idx, track) in tracks.iter().enumerate() {
        println!("{:>3}. {:<32} {}", idx + 1, truncate(&track.title, 32), track.url);
    }
    Ok(())
}

fn run_history(config: &Config) -> Result<()> {
    let db = open_db(config)?;
    let records = db.list()?;
    if records.is_empty() {
        println!("No listening history yet. Run `kniga play <book-url>` first.");
        return Ok(());
    }

    println!(
        "{:<24} {:<36} {:<36} {:<16}",
        "BOOK ID", "TITLE", "PROGRESS", "LAST PLAYED"
    );
    for record in records {
        println!(
            "{:<24} {:<36} {:<36} {:<16}",
            truncate(&record.entry.book_id, 24),
            truncate(&record.entry.title, 36),
            history_progress(&record),
            format_updated_at(record.updated_at)
        );
    }
    Ok(())
}

fn run_forget(config: &Config, book_id: &str) -> Result<()> {
    let db = open_db(config)?;
    if db.delete(book_id)? {
        println!("Removed {book_id} from history.");
    } else {
        println!("No history record for {book_id}.");
    }
    Ok(())
}

/// What to open: book metadata plus the stored resume point, if any.
pub(crate) fn resolve_session(
    target: &str,
    args: &PlayArgs,
    stored: Option<&HistoryRecord>,
) -> Result<(BookMeta, Option<ResumePoint>)> {
    if let Some(record) = stored {
        let mut book = BookMeta::from(record);
        if let Some(title) = args.title.as_deref().filter(|title| !title.trim().is_empty()) {
            book.title = title.trim().to_string();
        }
        if book.book_url.is_empty() && is_http_url(target) {
            book.book_url = target.to_string();
        }
        return Ok((book, Some(ResumePoint::from(record))));
    }
    if !is_http_url(target) {
        bail!("no history record for {target}; pass a book page URL to start listening");
    }
    let book = BookMeta {
        book_id: target.to_string(),
        title: args
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or(UNTITLED_BOOK)
            .to_string(),
        authors: args.authors.trim().to_string(),
        readers: args.readers.trim().to_string(),
        cover: String::new(),
        book_url: target.to_string(),
    };
    Ok((book, None))
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

/// Result of a background track-list fetch, tagged with the request that
/// produced it.
struct TrackFetch {
    ticket: Ticket,
    result: Result<Vec<Track>, FetchError>,
}

fn spawn_track_fetch(
    config: &Config,
    ticket: Ticket,
    book_url: &str,
    resume_url: Option<String>,
    tx: &mpsc::Sender<TrackFetch>,
) {
    let client = client(config);
    let base_url = config.base_url.clone();
    let book_url = book_url.to_string();
    let tx = tx.clone();
    thread::spawn(move || {
        let navigator = Navigator::new(&client, &base_url);
        let result = navigator.book_tracks(&book_url, resume_url.as_deref());
        let _ = tx.send(TrackFetch { ticket, result });
    });
}

/// One line typed while a book is playing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlayerInput {
    Toggle,
    Next,
    Previous,
    Forward,
    Back,
    Goto(usize),
    Status,
    List,
    Reload,
    Quit,
    Help,
}

impl PlayerInput {
    pub(crate) fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("p");
        let input = match command {
            "p" | "pause" | "play" => Self::Toggle,
            "n" | "next" => Self::Next,
            "b" | "prev" => Self::Previous,
            ">" | "ff" => Self::Forward,
            "<" | "rw" => Self::Back,
            "g" | "go" => {
                let number = parts.next()?.parse::<usize>().ok()?;
                Self::Goto(number.checked_sub(1)?)
            }
            "s" | "status" => Self::Status,
            "l" | "list" => Self::List,
            "r" | "reload" => Self::Reload,
            "q" | "quit" => Self::Quit,
            "h" | "?" | "help" => Self::Help,
            _ => return None,
        };
        Some(input)
    }
}

const PLAYER_HELP: &str = "p pause/play | n next | b previous | > +15s | < -15s | g N go to track | \
     s status | l list | r reload tracks | q quit";

#[cfg(unix)]
fn run_play(config: &Config, args: &PlayArgs) -> Result<()> {
    let target = args.target.trim();
    let db = open_db(config)?;
    let stored = db.get(target)?;
    let (book, resume) = resolve_session(target, args, stored.as_ref())?;
    if book.book_url.is_empty() {
        bail!("history record for {target} has no book page URL");
    }

    println!("Playing: {}", book.title);
    if let Some(point) = &resume {
        println!(
            "  Resuming track {} at {}",
            point.track_index + 1,
            format::format_ms(point.position_ms)
        );
    }
    println!("  {PLAYER_HELP}");

    process::with_sigint_ignored(|| play_session(config, &db, book, resume))
}

#[cfg(not(unix))]
fn run_play(_config: &Config, _args: &PlayArgs) -> Result<()> {
    bail!("playback needs mpv's IPC socket, which is only supported on unix platforms")
}

#[cfg(unix)]
fn play_session(
    config: &Config,
    db: &Database,
    book: BookMeta,
    mut resume: Option<ResumePoint>,
) -> Result<()> {
    use crate::catalog::RequestGate;
    use crate::playback::{PlaybackCoordinator, SessionState, SystemClock, Transport};

    use self::format::snapshot_line;
    use self::player::MpvEngine;

    let engine = MpvEngine::spawn(&config.player_bin)?;
    let mut coordinator = PlaybackCoordinator::new(engine, db, SystemClock);
    let gate = RequestGate::default();
    let (fetch_tx, fetch_rx) = mpsc::channel::<TrackFetch>();
    coordinator.begin(book.clone())?;
    let resume_url = resume.as_ref().and_then(|point| point.audio_url.clone());
    spawn_track_fetch(config, gate.issue(), &book.book_url, resume_url, &fetch_tx);
    println!("Loading tracks...");

    let input_rx = spawn_input_reader();
    let mut announced_end = false;

    loop {
        while let Ok(fetch) = fetch_rx.try_recv() {
            let Some(result) = gate.accept(fetch.ticket, fetch.result) else {
                continue;
            };
            match result {
                Ok(tracks) => {
                    if let Err(err) = coordinator.load_tracks(tracks, resume.as_ref()) {
                        println!("{err}. Type `r` to try again.");
                        continue;
                    }
                    if coordinator.state() == SessionState::Empty {
                        println!("No playable tracks found on the book page.");
                        coordinator.close();
                        return Ok(());
                    }
                    println!("{} tracks queued.", coordinator.tracks().len());
                }
                Err(err) => println!("{err}. Type `r` to try again."),
            }
        }

        let mut show_status = false;
        match input_rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                let Some(input) = PlayerInput::parse(&line) else {
                    println!("Unknown command. {PLAYER_HELP}");
                    continue;
                };
                let ready = matches!(coordinator.state(), SessionState::Ready(_));
                let outcome = match input {
                    PlayerInput::Quit => break,
                    PlayerInput::Help => {
                        println!("{PLAYER_HELP}");
                        Ok(())
                    }
                    PlayerInput::Reload => {
                        coordinator.close();
                        if let Some(record) = db.get(&book.book_id)? {
                            resume = Some(ResumePoint::from(&record));
                        }
                        coordinator.begin(book.clone())?;
                        announced_end = false;
                        let resume_url = resume.as_ref().and_then(|point| point.audio_url.clone());
                        spawn_track_fetch(config, gate.issue(), &book.book_url, resume_url, &fetch_tx);
                        println!("Reloading tracks...");
                        Ok(())
                    }
                    _ if !ready => {
                        println!("Tracks are still loading.");
                        Ok(())
                    }
                    PlayerInput::Toggle => coordinator.toggle(),
                    PlayerInput::Next => coordinator.skip_next(),
                    PlayerInput::Previous => coordinator.skip_previous(),
                    PlayerInput::Forward => coordinator.skip_by(SKIP_STEP_MS),
                    PlayerInput::Back => coordinator.skip_by(-SKIP_STEP_MS),
                    PlayerInput::Goto(index) => coordinator.select_track(index),
                    PlayerInput::List => {
                        let active = coordinator.snapshot().active_index;
                        for (idx, track) in coordinator.tracks().iter().enumerate() {
                            let marker = if idx == active { '>' } else { ' ' };
                            println!("{marker}{:>3}. {}", idx + 1, track.title);
                        }
                        Ok(())
                    }
                    PlayerInput::Status => {
                        show_status = true;
                        Ok(())
                    }
                };
                if let Err(err) = outcome {
                    println!("{err}");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
        }

        if !coordinator.engine_mut().is_running() {
            println!("Player exited.");
            break;
        }
        if !matches!(coordinator.state(), SessionState::Ready(_)) {
            continue;
        }

        let before = coordinator.snapshot().active_index;
        if let Err(err) = coordinator.poll() {
            warn!(error = %err, "player status unavailable");
            continue;
        }
        let snapshot = coordinator.snapshot();
        if show_status || snapshot.active_index != before {
            let title = coordinator
                .tracks()
                .get(snapshot.active_index)
                .map(|track| track.title.as_str())
                .unwrap_or("");
            println!("{}", snapshot_line(&snapshot, title));
        }
        if snapshot.state == SessionState::Ready(Transport::Stopped) && !announced_end {
            println!("Reached the end of the book.");
            announced_end = true;
        }
    }

    coordinator.close();
    println!("Progress saved.");
    Ok(())
}

/// Forwards stdin lines to the player loop. The thread stays blocked on
/// stdin after the session ends; the process exits right after.
#[cfg(unix)]
fn spawn_input_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

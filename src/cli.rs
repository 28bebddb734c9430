use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::catalog::Period;

#[derive(Debug, Parser)]
#[command(
    name = "kniga",
    version,
    about = "Browse knigavuhe audiobooks and resume them where you left off"
)]
pub struct Cli {
    /// Log parser and playback details to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Quick search for books
    Search { query: String },
    /// List genres
    Genres,
    /// List authors
    Authors(PeopleArgs),
    /// List readers
    Readers(PeopleArgs),
    /// Show the letter filters accepted by `authors` and `readers`
    Letters,
    /// List books of one genre
    Genre {
        url: String,
        #[arg(long, value_enum, default_value_t = GenreTab::New)]
        tab: GenreTab,
        #[arg(long, value_enum, default_value_t = Period::Month)]
        period: Period,
    },
    /// Print the playable tracks of a book page
    Tracks {
        book_url: String,
        #[arg(long)]
        resume_url: Option<String>,
    },
    /// Show listening history, most recent first
    History,
    /// Remove a book from the listening history
    Forget { book_id: String },
    /// Play a book, resuming from history when it has a record
    Play(PlayArgs),
}

#[derive(Debug, Args)]
pub struct PeopleArgs {
    #[arg(long, conflicts_with = "query")]
    pub letter: Option<String>,
    #[arg(long)]
    pub query: Option<String>,
    #[arg(long, default_value_t = 1)]
    pub page: u32,
}

#[derive(Debug, Args)]
pub struct PlayArgs {
    /// History book id, or a book page URL for a fresh session
    pub target: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long, default_value = "")]
    pub authors: String,
    #[arg(long, default_value = "")]
    pub readers: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GenreTab {
    New,
    Popular,
    Rating,
}

//! Command-line surface for `murmur-cli`.

#![deny(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "murmur-cli", version, about = "murmur API client", long_about = None)]
pub struct Cli {
    /// API base URL, e.g. <http://127.0.0.1:3000>
    #[arg(long, env = "MURMUR_SERVER_URL", default_value = "http://127.0.0.1:3000")]
    pub server: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a user
    CreateUser {
        #[arg(long)]
        login: String,
    },
    /// Make FOLLOWER follow AUTHOR
    Follow {
        #[arg(long)]
        author: i64,
        #[arg(long)]
        follower: i64,
    },
    /// Remove a follow edge
    Unfollow {
        #[arg(long)]
        author: i64,
        #[arg(long)]
        follower: i64,
    },
    /// List the authors a user follows
    Following {
        #[arg(long)]
        user: i64,
    },
    /// Publish a post
    Publish {
        #[arg(long)]
        author: i64,
        #[arg(long, conflicts_with = "text_file")]
        text: Option<String>,
        #[arg(long)]
        text_file: Option<PathBuf>,
    },
    /// Read one page of a user's feed
    Feed {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Check server health
    Health,
}

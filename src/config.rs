use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::dispatcher::{DEFAULT_LOG_SIZE, DEFAULT_WORKERS};
use crate::transport::{DEFAULT_API_BASE, DEFAULT_TIMEOUT_SECONDS};

/// Packaged passphrase for the contacts file obfuscation. Override it with
/// `--passphrase` or `TGSEND_PASSPHRASE`.
pub const DEFAULT_PASSPHRASE: &str = "tgsend contacts file";

pub fn default_contacts_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tgsend")
        .join("contacts")
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Send messages and files to Telegram chats through a bot", long_about = None)]
pub struct Args {
    /// Contacts file location
    #[arg(long, global = true, env = "TGSEND_CONTACTS", default_value_os_t = default_contacts_path())]
    pub contacts_file: PathBuf,

    /// Passphrase for the contacts file obfuscation
    #[arg(long, global = true, env = "TGSEND_PASSPHRASE", default_value = DEFAULT_PASSPHRASE,
          hide_env_values = true, hide_default_value = true)]
    pub passphrase: String,

    /// Bot API base URL
    #[arg(long, global = true, default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Timeout for each HTTP request in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT_SECONDS)]
    pub timeout_seconds: u64,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the contacts file with a first bot
    Create {
        /// Name for the bot's API key
        #[arg(short, long)]
        bot: String,

        /// Bot API key
        #[arg(short = 'k', long)]
        api_key: Option<String>,

        /// Do not make this bot the default one
        #[arg(long)]
        no_default: bool,

        /// Overwrite an existing file, allow an empty API key
        #[arg(long)]
        force: bool,

        /// Do not ask before saving an empty API key
        #[arg(short, long)]
        yes: bool,
    },

    /// Add or replace a bot
    Bot {
        /// Name for the bot's API key
        name: String,

        /// Bot API key
        #[arg(short = 'k', long)]
        api_key: Option<String>,

        /// Make this bot the default one
        #[arg(long)]
        default: bool,

        /// Overwrite an existing bot, allow an empty API key
        #[arg(long)]
        force: bool,

        /// Do not ask before saving an empty API key
        #[arg(short, long)]
        yes: bool,
    },

    /// Add or replace a chat name
    Chat {
        name: String,

        #[arg(allow_negative_numbers = true)]
        chat_id: i64,

        /// Make this chat the default recipient
        #[arg(long)]
        default: bool,

        #[arg(long)]
        force: bool,
    },

    /// Add or replace a bulk group of chat ids
    Group {
        name: String,

        #[arg(required = true, allow_negative_numbers = true)]
        chat_ids: Vec<i64>,

        #[arg(long)]
        force: bool,
    },

    /// Remove a bot, chat name or bulk group
    Remove {
        #[arg(value_enum)]
        target: RemoveTarget,

        name: String,
    },

    /// Show the contacts file content
    List,

    /// Send a message and/or files
    Send(SendArgs),

    /// Show chats that recently wrote to the bot
    Updates {
        /// Saved bot name, the default bot if omitted
        #[arg(short, long)]
        bot: Option<String>,

        /// Use this API key instead of the saved one
        #[arg(short = 'K', long)]
        api_key: Option<String>,

        /// Only messages from this username
        #[arg(short, long)]
        username: Option<String>,

        /// Only messages with exactly this text
        #[arg(short, long)]
        text: Option<String>,
    },

    /// Write the contacts file as plain JSON
    Export {
        path: PathBuf,

        #[arg(long)]
        force: bool,
    },

    /// Replace the contacts file with an edited plain JSON copy
    Import { path: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveTarget {
    Bot,
    Chat,
    Group,
}

#[derive(clap::Args, Debug)]
pub struct SendArgs {
    /// Saved bot name, the default bot if omitted
    #[arg(short, long)]
    pub bot: Option<String>,

    /// Use this API key instead of the saved one
    #[arg(short = 'K', long)]
    pub api_key: Option<String>,

    /// Saved chat names
    #[arg(short, long = "chat", num_args = 1..)]
    pub chats: Vec<String>,

    /// Saved bulk groups
    #[arg(short, long = "group", num_args = 1..)]
    pub groups: Vec<String>,

    /// Chat ids given directly
    #[arg(short = 'i', long = "chat-id", num_args = 1.., allow_negative_numbers = true)]
    pub chat_ids: Vec<i64>,

    /// Fail if any chat name or group is not found
    #[arg(long)]
    pub found_only: bool,

    /// Message text
    #[arg(short, long)]
    pub message: Option<String>,

    /// Files to send
    #[arg(short, long = "file", num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// File kind: document, photo, audio, video, animation, voice, video_note, sticker
    #[arg(long, default_value = "document")]
    pub kind: String,

    /// Skip invalid files with a warning instead of failing
    #[arg(long)]
    pub skip_invalid_files: bool,

    /// Concurrent deliveries
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Outcome log size as a multiple of the recipient count
    #[arg(long, default_value_t = DEFAULT_LOG_SIZE)]
    pub log_size: usize,

    /// Do not print each delivery as it completes
    #[arg(long)]
    pub no_live: bool,

    /// Do not print the success summary
    #[arg(short, long)]
    pub quiet: bool,
}

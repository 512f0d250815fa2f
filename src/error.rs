//! Error types for contacts, recipient resolution and dispatch
//!
//! Per-recipient delivery failures are not errors; see
//! [`crate::dispatcher::DeliveryStatus`].

use std::path::PathBuf;

use thiserror::Error;

/// Invalid combination of command-line options or selectors.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Nothing to send: provide a message or at least one file")]
    NothingToSend,

    #[error("Operation aborted by user")]
    Aborted,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Contacts file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Contacts file {} is corrupted (integrity check failed)", .0.display())]
    Corrupted(PathBuf),

    #[error("Contacts document is malformed: {0}")]
    Malformed(String),

    #[error("{0} already exists, use force mode to overwrite")]
    AlreadyExists(String),

    #[error("'{0}' is a reserved name: bots, chat_names, bulk_groups, default_bot, default_chat")]
    ReservedName(String),

    #[error("Empty API key for bot '{0}', use force mode to save it without a value")]
    EmptyCredential(String),

    #[error("Name not found in contacts file: {0}")]
    NameNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("No default {0} configured in contacts file")]
    NoDefaultConfigured(&'static str),

    #[error("No recipients specified and no default chat configured")]
    NoRecipientsSpecified,

    #[error("Unresolved names: {}", .0.join(", "))]
    UnresolvedNames(Vec<String>),

    #[error("Recipient list is empty after resolution")]
    EmptyRecipientSet,

    #[error("Bot '{0}' has no saved API key, supply one manually")]
    MissingApiKey(String),

    #[error("Bot not found in contacts file: {0}")]
    UnknownBot(String),
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid dispatcher configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Message is too long: {0} characters, max 4096 per message")]
    MessageTooLong(usize),

    #[error("Pre-check of the files failed:\n\t{}", .0.join("\n\t"))]
    FileValidationError(Vec<String>),

    #[error("{count} files given, '{kind}' allows at most {max} per message")]
    FileCountExceeded {
        kind: &'static str,
        count: usize,
        max: usize,
    },

    #[error("Unknown file kind: {0}")]
    UnknownFileKind(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Store(StoreError::Io(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

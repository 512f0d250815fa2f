//! Turns bot and recipient selectors into a concrete recipient mapping.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::contacts::{ContactStore, Document};
use crate::error::ResolutionError;
use crate::utils::truncate_chars;

pub const MAX_LABEL_CHARS: usize = 64;
pub const MANUAL_LABEL: &str = "manually provided";

/// Chat id to provenance label.
pub type Recipients = BTreeMap<i64, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralChatIds {
    Single(i64),
    List(Vec<i64>),
    Labeled(BTreeMap<i64, String>),
}

impl From<i64> for LiteralChatIds {
    fn from(id: i64) -> Self {
        LiteralChatIds::Single(id)
    }
}

impl From<Vec<i64>> for LiteralChatIds {
    fn from(ids: Vec<i64>) -> Self {
        LiteralChatIds::List(ids)
    }
}

impl From<BTreeMap<i64, String>> for LiteralChatIds {
    fn from(ids: BTreeMap<i64, String>) -> Self {
        LiteralChatIds::Labeled(ids)
    }
}

impl LiteralChatIds {
    fn labeled(&self) -> Vec<(i64, String)> {
        match self {
            LiteralChatIds::Single(id) => vec![(*id, MANUAL_LABEL.to_string())],
            LiteralChatIds::List(ids) => {
                let mut seen = BTreeSet::new();
                ids.iter()
                    .filter(|id| seen.insert(**id))
                    .map(|id| (*id, MANUAL_LABEL.to_string()))
                    .collect()
            }
            LiteralChatIds::Labeled(ids) => ids
                .iter()
                .map(|(id, label)| (*id, label.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    /// `None` selects the contacts file's default bot.
    pub bot_alias: Option<String>,
    pub chat_aliases: Vec<String>,
    pub group_names: Vec<String>,
    pub literal_ids: Option<LiteralChatIds>,
    /// Fail instead of continuing when any name cannot be resolved.
    pub found_only: bool,
}

impl ResolveRequest {
    fn has_selectors(&self) -> bool {
        !self.chat_aliases.is_empty() || !self.group_names.is_empty() || self.literal_ids.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub bot_alias: String,
    /// `None` when the bot is saved without a key value.
    pub api_key: Option<String>,
    pub recipients: Recipients,
}

/// Names that matched nothing in the contacts file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotFoundReport {
    pub chat_names: Vec<String>,
    pub bulk_groups: Vec<String>,
}

impl NotFoundReport {
    pub fn is_empty(&self) -> bool {
        self.chat_names.is_empty() && self.bulk_groups.is_empty()
    }

    pub fn all_names(&self) -> Vec<String> {
        self.bulk_groups
            .iter()
            .chain(self.chat_names.iter())
            .cloned()
            .collect()
    }
}

impl std::fmt::Display for NotFoundReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "These names not found:")?;
        if !self.bulk_groups.is_empty() {
            writeln!(f, "  bulk groups: {}", self.bulk_groups.join(", "))?;
        }
        if !self.chat_names.is_empty() {
            writeln!(f, "  chat names: {}", self.chat_names.join(", "))?;
        }
        Ok(())
    }
}

fn merge(recipients: &mut Recipients, chat_id: i64, label: &str) {
    recipients
        .entry(chat_id)
        .and_modify(|existing| {
            existing.push_str(", ");
            existing.push_str(label);
        })
        .or_insert_with(|| label.to_string());
}

fn unique(names: &[String]) -> Vec<&String> {
    let mut seen = BTreeSet::new();
    names.iter().filter(|name| seen.insert(name.as_str())).collect()
}

fn select_bot(document: &Document, bot_alias: Option<&str>) -> Result<(String, Option<String>), ResolutionError> {
    let alias = match bot_alias {
        Some(alias) => alias.to_string(),
        None => document
            .default_bot
            .clone()
            .filter(|alias| document.bots.contains_key(alias))
            .ok_or(ResolutionError::NoDefaultConfigured("bot"))?,
    };
    let api_key = document
        .bots
        .get(&alias)
        .ok_or_else(|| ResolutionError::UnknownBot(alias.clone()))?;
    let api_key = Some(api_key.clone()).filter(|key| !key.is_empty());
    Ok((alias, api_key))
}

pub fn resolve(
    document: &Document,
    request: &ResolveRequest,
) -> Result<(Resolution, NotFoundReport), ResolutionError> {
    let (bot_alias, api_key) = select_bot(document, request.bot_alias.as_deref())?;

    let default_chat;
    let chat_aliases: &[String] = if request.has_selectors() {
        &request.chat_aliases
    } else {
        default_chat = vec![
            document
                .default_chat
                .clone()
                .ok_or(ResolutionError::NoRecipientsSpecified)?,
        ];
        &default_chat
    };

    let mut recipients = Recipients::new();
    let mut not_found = NotFoundReport::default();

    for group in unique(&request.group_names) {
        match document.bulk_groups.get(group) {
            Some(members) => {
                let label = format!("bulk group '{}'", group);
                for chat_id in members {
                    merge(&mut recipients, *chat_id, &label);
                }
            }
            None => not_found.bulk_groups.push(group.clone()),
        }
    }

    if let Some(literal) = &request.literal_ids {
        for (chat_id, label) in literal.labeled() {
            merge(&mut recipients, chat_id, &label);
        }
    }

    for alias in unique(chat_aliases) {
        match document.chat_names.get(alias) {
            Some(chat_id) => merge(&mut recipients, *chat_id, &format!("chat name '{}'", alias)),
            None => not_found.chat_names.push(alias.clone()),
        }
    }

    if !not_found.is_empty() {
        if request.found_only {
            return Err(ResolutionError::UnresolvedNames(not_found.all_names()));
        }
        warn!(names = ?not_found.all_names(), "some recipient names were not found");
    }
    if recipients.is_empty() {
        return Err(ResolutionError::EmptyRecipientSet);
    }

    for label in recipients.values_mut() {
        if label.chars().count() > MAX_LABEL_CHARS {
            *label = truncate_chars(label, MAX_LABEL_CHARS);
        }
    }

    debug!(bot = %bot_alias, recipients = recipients.len(), "recipients resolved");
    Ok((
        Resolution {
            bot_alias,
            api_key,
            recipients,
        },
        not_found,
    ))
}

/// Load the contacts file and resolve against it.
pub fn resolve_from_store(
    store: &ContactStore,
    request: &ResolveRequest,
) -> crate::Result<(Resolution, NotFoundReport)> {
    let document = store.load()?;
    Ok(resolve(&document, request)?)
}

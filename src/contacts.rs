//! Contacts file: bot credentials and recipient aliases.
//!
//! The whole document is read and written at once. Every edit loads the
//! file, mutates it in memory and writes it back; there is no protection
//! against concurrent writers.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::obfuscation::ObfuscationKey;

pub const RESERVED_NAMES: [&str; 5] = [
    "bots",
    "chat_names",
    "bulk_groups",
    "default_bot",
    "default_chat",
];

type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    /// Bot alias to API key. An empty key is allowed until supplied manually.
    pub bots: BTreeMap<String, String>,
    pub default_bot: Option<String>,
    pub chat_names: BTreeMap<String, i64>,
    pub bulk_groups: BTreeMap<String, BTreeSet<i64>>,
    pub default_chat: Option<String>,
}

impl Document {
    fn validate(&self) -> StoreResult<()> {
        let aliases = self
            .bots
            .keys()
            .chain(self.chat_names.keys())
            .chain(self.bulk_groups.keys());
        for alias in aliases {
            if is_reserved(alias) {
                return Err(StoreError::Malformed(format!(
                    "reserved name '{}' used as an alias",
                    alias
                )));
            }
        }
        Ok(())
    }
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

fn check_reserved(name: &str) -> StoreResult<()> {
    if is_reserved(name) {
        Err(StoreError::ReservedName(name.to_string()))
    } else {
        Ok(())
    }
}

fn non_empty(api_key: Option<&str>) -> Option<&str> {
    api_key.filter(|key| !key.is_empty())
}

#[derive(Debug, Clone)]
pub struct ContactStore {
    path: PathBuf,
    key: ObfuscationKey,
}

impl ContactStore {
    pub fn new(path: impl Into<PathBuf>, key: ObfuscationKey) -> Self {
        Self {
            path: path.into(),
            key,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with a single bot registered.
    pub fn initialize(
        &self,
        bot_alias: &str,
        api_key: Option<&str>,
        set_default: bool,
        force: bool,
    ) -> StoreResult<Document> {
        check_reserved(bot_alias)?;
        let api_key = non_empty(api_key);
        if api_key.is_none() && !force {
            return Err(StoreError::EmptyCredential(bot_alias.to_string()));
        }
        if self.path.exists() && !force {
            return Err(StoreError::AlreadyExists(format!(
                "file {}",
                self.path.display()
            )));
        }

        let mut document = Document::default();
        document
            .bots
            .insert(bot_alias.to_string(), api_key.unwrap_or_default().to_string());
        if set_default {
            document.default_bot = Some(bot_alias.to_string());
        }
        self.save(&document)?;
        info!(path = %self.path.display(), bot = bot_alias, "contacts file created");
        Ok(document)
    }

    pub fn load(&self) -> StoreResult<Document> {
        let sealed = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let plaintext = self
            .key
            .open(&sealed)
            .ok_or_else(|| StoreError::Corrupted(self.path.clone()))?;
        let document: Document = serde_json::from_slice(&plaintext)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        document.validate()?;
        debug!(path = %self.path.display(), "contacts file loaded");
        Ok(document)
    }

    /// Write the whole document through a sibling temp file and a rename.
    pub fn save(&self, document: &Document) -> StoreResult<()> {
        let json = serde_json::to_vec(document).map_err(|e| StoreError::Malformed(e.to_string()))?;
        let sealed = self.key.seal(&json);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&sealed)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), bytes = sealed.len(), "contacts file saved");
        Ok(())
    }

    fn edit<F>(&self, mutate: F) -> StoreResult<Document>
    where
        F: FnOnce(&mut Document) -> StoreResult<()>,
    {
        let mut document = self.load()?;
        mutate(&mut document)?;
        self.save(&document)?;
        Ok(document)
    }

    pub fn add_bot(
        &self,
        alias: &str,
        api_key: Option<&str>,
        set_default: bool,
        force: bool,
    ) -> StoreResult<Document> {
        check_reserved(alias)?;
        let api_key = non_empty(api_key);
        self.edit(|doc| {
            if !force {
                if doc.bots.contains_key(alias) {
                    return Err(StoreError::AlreadyExists(format!("bot '{}'", alias)));
                }
                if api_key.is_none() {
                    return Err(StoreError::EmptyCredential(alias.to_string()));
                }
            }
            doc.bots
                .insert(alias.to_string(), api_key.unwrap_or_default().to_string());
            if set_default {
                doc.default_bot = Some(alias.to_string());
            }
            info!(bot = alias, empty_key = api_key.is_none(), set_default, "bot saved");
            Ok(())
        })
    }

    pub fn add_chat_alias(
        &self,
        alias: &str,
        chat_id: i64,
        set_default: bool,
        force: bool,
    ) -> StoreResult<Document> {
        check_reserved(alias)?;
        self.edit(|doc| {
            if !force && doc.chat_names.contains_key(alias) {
                return Err(StoreError::AlreadyExists(format!("chat name '{}'", alias)));
            }
            doc.chat_names.insert(alias.to_string(), chat_id);
            if set_default {
                doc.default_chat = Some(alias.to_string());
            }
            info!(chat = alias, chat_id, set_default, "chat name saved");
            Ok(())
        })
    }

    pub fn add_bulk_group(
        &self,
        name: &str,
        chat_ids: impl IntoIterator<Item = i64>,
        force: bool,
    ) -> StoreResult<Document> {
        check_reserved(name)?;
        let members: BTreeSet<i64> = chat_ids.into_iter().collect();
        self.edit(|doc| {
            if !force && doc.bulk_groups.contains_key(name) {
                return Err(StoreError::AlreadyExists(format!("bulk group '{}'", name)));
            }
            info!(group = name, members = members.len(), "bulk group saved");
            doc.bulk_groups.insert(name.to_string(), members);
            Ok(())
        })
    }

    pub fn remove_bot(&self, alias: &str) -> StoreResult<Document> {
        self.edit(|doc| {
            doc.bots
                .remove(alias)
                .ok_or_else(|| StoreError::NameNotFound(format!("bot '{}'", alias)))?;
            if doc.default_bot.as_deref() == Some(alias) {
                doc.default_bot = None;
            }
            Ok(())
        })
    }

    pub fn remove_chat_alias(&self, alias: &str) -> StoreResult<Document> {
        self.edit(|doc| {
            doc.chat_names
                .remove(alias)
                .ok_or_else(|| StoreError::NameNotFound(format!("chat name '{}'", alias)))?;
            if doc.default_chat.as_deref() == Some(alias) {
                doc.default_chat = None;
            }
            Ok(())
        })
    }

    pub fn remove_bulk_group(&self, name: &str) -> StoreResult<Document> {
        self.edit(|doc| {
            doc.bulk_groups
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| StoreError::NameNotFound(format!("bulk group '{}'", name)))
        })
    }

    /// Write the decoded document as plain JSON for manual inspection.
    pub fn export_plaintext(&self, target: &Path, force: bool) -> StoreResult<()> {
        let document = self.load()?;
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;

        let mut options = fs::OpenOptions::new();
        options.write(true);
        if force {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut file = options.open(target).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => {
                StoreError::AlreadyExists(format!("file {}", target.display()))
            }
            _ => StoreError::Io(e),
        })?;
        file.write_all(json.as_bytes())?;
        info!(target = %target.display(), "contacts exported as plain JSON");
        Ok(())
    }

    /// Re-encode an edited plain JSON copy into the contacts file.
    pub fn import_plaintext(&self, source: &Path) -> StoreResult<Document> {
        let json = fs::read(source).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(source.to_path_buf()),
            _ => StoreError::Io(e),
        })?;
        let document: Document =
            serde_json::from_slice(&json).map_err(|e| StoreError::Malformed(e.to_string()))?;
        document.validate()?;
        self.save(&document)?;
        info!(source = %source.display(), "contacts imported from plain JSON");
        Ok(document)
    }
}

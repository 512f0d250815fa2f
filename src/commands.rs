//! Command handlers behind the CLI.

use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{Args, Command, RemoveTarget, SendArgs};
use crate::contacts::{ContactStore, Document};
use crate::dispatcher::{Dispatcher, DispatcherOptions};
use crate::error::{ConfigurationError, ResolutionError, Result};
use crate::files::{FileKind, PreparedFiles};
use crate::obfuscation::ObfuscationKey;
use crate::resolver::{LiteralChatIds, ResolveRequest, resolve_from_store};
use crate::status::{self, DispatchReport};
use crate::transport::{HttpTransport, mask_api_key};
use crate::updates::{fetch_chat_candidates, filter_candidates};

/// Run one CLI command and return the process exit code.
pub async fn run(args: Args) -> Result<i32> {
    let store = ContactStore::new(
        args.contacts_file.clone(),
        ObfuscationKey::from_passphrase(&args.passphrase),
    );

    match args.command {
        Command::Create { ref bot, ref api_key, no_default, force, yes } => {
            if api_key.is_none() {
                confirm_empty_key(force, yes)?;
            }
            store.initialize(bot, api_key.as_deref(), !no_default, force)?;
            println!("Contacts file successfully created: {}", store.path().display());
        }
        Command::Bot { ref name, ref api_key, default, force, yes } => {
            if api_key.is_none() {
                confirm_empty_key(force, yes)?;
            }
            store.add_bot(name, api_key.as_deref(), default, force)?;
            println!("Bot '{}' saved", name);
        }
        Command::Chat { ref name, chat_id, default, force } => {
            store.add_chat_alias(name, chat_id, default, force)?;
            println!("Chat name '{}' saved as {}", name, chat_id);
        }
        Command::Group { ref name, ref chat_ids, force } => {
            let document = store.add_bulk_group(name, chat_ids.iter().copied(), force)?;
            println!(
                "Bulk group '{}' saved with {} chats",
                name,
                document.bulk_groups[name].len()
            );
        }
        Command::Remove { target, ref name } => {
            match target {
                RemoveTarget::Bot => store.remove_bot(name)?,
                RemoveTarget::Chat => store.remove_chat_alias(name)?,
                RemoveTarget::Group => store.remove_bulk_group(name)?,
            };
            println!("Removed {:?} '{}'", target, name);
        }
        Command::List => {
            let document = store.load()?;
            print!("{}", render_document(&document));
        }
        Command::Send(ref send) => {
            return send_command(&args, &store, send).await;
        }
        Command::Updates { ref bot, ref api_key, ref username, ref text } => {
            let document = store.load()?;
            let (bot_alias, api_key) = pick_api_key(&document, bot.clone(), api_key.clone())?;
            let transport = build_transport(&args)?;
            let candidates = fetch_chat_candidates(&transport, &args.api_base, &api_key).await?;
            let known: BTreeSet<i64> = document.chat_names.values().copied().collect();
            let candidates = filter_candidates(candidates, &known, username.as_deref(), text.as_deref());

            if candidates.is_empty() {
                println!("No new chats wrote to bot '{}', send it a message and try again", bot_alias);
            } else {
                println!("There are {} chats to check:", candidates.len());
                for candidate in candidates {
                    println!("  {}", candidate);
                }
            }
        }
        Command::Export { ref path, force } => {
            store.export_plaintext(path, force)?;
            println!("Contacts written to {}", path.display());
        }
        Command::Import { ref path } => {
            store.import_plaintext(path)?;
            println!("Contacts file updated from {}", path.display());
        }
    }
    Ok(0)
}

async fn send_command(args: &Args, store: &ContactStore, send: &SendArgs) -> Result<i32> {
    if send.message.is_none() && send.files.is_empty() {
        return Err(ConfigurationError::NothingToSend.into());
    }
    let kind: FileKind = send.kind.parse()?;

    let request = ResolveRequest {
        bot_alias: send.bot.clone(),
        chat_aliases: send.chats.clone(),
        group_names: send.groups.clone(),
        literal_ids: (!send.chat_ids.is_empty()).then(|| LiteralChatIds::List(send.chat_ids.clone())),
        found_only: send.found_only,
    };
    let (resolution, not_found) = resolve_from_store(store, &request)?;
    if !not_found.is_empty() {
        eprint!("{}", not_found);
    }

    let api_key = match (&send.api_key, &resolution.api_key) {
        (Some(manual), _) => {
            info!(bot = %resolution.bot_alias, "using manually provided API key");
            manual.clone()
        }
        (None, Some(saved)) => saved.clone(),
        (None, None) => return Err(ResolutionError::MissingApiKey(resolution.bot_alias).into()),
    };
    debug!(bot = %resolution.bot_alias, key = %mask_api_key(&api_key), "API key selected");

    // Files are checked before the message goes out so a bad file aborts
    // the whole send.
    let prepared = if send.files.is_empty() {
        None
    } else {
        Some(PreparedFiles::prepare(&send.files, kind, send.skip_invalid_files)?)
    };

    let options = DispatcherOptions {
        api_base: args.api_base.clone(),
        log_size: send.log_size,
        workers: send.workers,
        print_status: !send.no_live,
        skip_invalid_files: send.skip_invalid_files,
    };
    let dispatcher = Dispatcher::new(
        build_transport(args)?,
        &api_key,
        &resolution.bot_alias,
        resolution.recipients,
        options,
    )
    .await?;
    debug!("{}", dispatcher);

    let mut report = DispatchReport::new(0, Vec::new());
    if let Some(message) = &send.message {
        report.absorb(dispatcher.send_message(message).await?);
    }
    if let Some(prepared) = prepared {
        report.absorb(dispatcher.send_prepared(prepared).await);
    }

    let mut stdout = io::stdout().lock();
    Ok(status::render(&mut stdout, &report, !send.quiet)?)
}

fn build_transport(args: &Args) -> Result<HttpTransport> {
    HttpTransport::new(Duration::from_secs(args.timeout_seconds)).map_err(|e| {
        ConfigurationError::InvalidArgument(format!("cannot build HTTP client: {}", e)).into()
    })
}

fn pick_api_key(
    document: &Document,
    bot: Option<String>,
    manual: Option<String>,
) -> Result<(String, String)> {
    let alias = match bot {
        Some(alias) => alias,
        None => document
            .default_bot
            .clone()
            .ok_or(ResolutionError::NoDefaultConfigured("bot"))?,
    };
    if let Some(manual) = manual {
        return Ok((alias, manual));
    }
    match document.bots.get(&alias) {
        Some(key) if !key.is_empty() => Ok((alias, key.clone())),
        Some(_) => Err(ResolutionError::MissingApiKey(alias).into()),
        None => Err(ResolutionError::UnknownBot(alias).into()),
    }
}

fn confirm_empty_key(force: bool, yes: bool) -> Result<()> {
    if !force || yes {
        return Ok(());
    }
    let stdin = io::stdin();
    confirm(&mut stdin.lock(), &mut io::stdout(), "Save empty API-key? (y/N) ")
}

fn confirm(input: &mut impl BufRead, output: &mut impl Write, prompt: &str) -> Result<()> {
    write!(output, "{}", prompt)?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    if answer.trim().eq_ignore_ascii_case("y") {
        Ok(())
    } else {
        Err(ConfigurationError::Aborted.into())
    }
}

/// Human-readable dump of the contacts file. API keys are masked.
pub fn render_document(document: &Document) -> String {
    let mut out = String::new();
    let marker = |is_default: bool| if is_default { " (default)" } else { "" };

    out.push_str("bots:\n");
    for (alias, key) in &document.bots {
        let key = if key.is_empty() {
            "<empty>".to_string()
        } else {
            mask_api_key(key)
        };
        let is_default = document.default_bot.as_deref() == Some(alias.as_str());
        out.push_str(&format!("  {}: {}{}\n", alias, key, marker(is_default)));
    }

    out.push_str("chat names:\n");
    for (alias, chat_id) in &document.chat_names {
        let is_default = document.default_chat.as_deref() == Some(alias.as_str());
        out.push_str(&format!("  {}: {}{}\n", alias, chat_id, marker(is_default)));
    }

    out.push_str("bulk groups:\n");
    for (name, members) in &document.bulk_groups {
        let members: Vec<String> = members.iter().map(i64::to_string).collect();
        out.push_str(&format!("  {}: {}\n", name, members.join(", ")));
    }
    out
}

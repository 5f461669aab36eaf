use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument};

use crate::cli::Invocation;
use crate::config::Config;
use crate::datastore::{SnapshotStorage, write_atomic};
use crate::datetime::parse_deadline;
use crate::model::{Quest, QuestId, Task, TaskId};
use crate::session::{Presenter, Session, Severity};
use crate::snapshot::export_file_name;
use crate::store::QuestTaskStore;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "list",
        "next",
        "quests",
        "add",
        "addquest",
        "done",
        "delete",
        "delquest",
        "save",
        "export",
        "import",
        "_show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(session, cfg, inv))]
pub fn dispatch<S: SnapshotStorage, P: Presenter>(
    session: &mut Session<S, P>,
    cfg: &Config,
    inv: Invocation,
) -> anyhow::Result<()> {
    let command = inv.command.as_str();

    debug!(
        command,
        targets = ?inv.targets,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "list" | "next" => session.render_all(),
        "quests" => session.render_quests(),
        "addquest" => cmd_add_quest(session, &inv),
        "add" => cmd_add_task(session, &inv),
        "done" => cmd_done(session, &inv),
        "delete" => cmd_delete(session, &inv),
        "delquest" => cmd_delete_quest(session, &inv),
        "save" => session.save(),
        "export" => cmd_export(session, &inv),
        "import" => cmd_import(session, &inv),
        "_show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[instrument(skip(session, inv))]
fn cmd_add_quest<S: SnapshotStorage, P: Presenter>(
    session: &mut Session<S, P>,
    inv: &Invocation,
) -> anyhow::Result<()> {
    info!("command addquest");
    let name = inv.command_args.join(" ");
    session.add_quest(&name)?;
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct TaskArgs {
    name: String,
    quest: Option<String>,
    due: Option<String>,
}

fn parse_task_args(args: &[String]) -> TaskArgs {
    let mut parsed = TaskArgs::default();
    let mut words = Vec::new();

    for arg in args {
        if let Some(quest) = arg.strip_prefix("quest:") {
            parsed.quest = Some(quest.to_string());
        } else if let Some(due) = arg
            .strip_prefix("due:")
            .or_else(|| arg.strip_prefix("deadline:"))
        {
            parsed.due = Some(due.to_string());
        } else {
            words.push(arg.as_str());
        }
    }

    parsed.name = words.join(" ");
    parsed
}

#[instrument(skip(session, inv))]
fn cmd_add_task<S: SnapshotStorage, P: Presenter>(
    session: &mut Session<S, P>,
    inv: &Invocation,
) -> anyhow::Result<()> {
    info!("command add");
    let args = parse_task_args(&inv.command_args);

    let quest_id = match args.quest.as_deref() {
        Some(reference) => match resolve_quest(session.store(), reference) {
            Ok(quest) => quest.id.clone(),
            Err(err) => {
                session.notify("Selected quest not found", Severity::Error);
                return Err(err);
            }
        },
        None => match session.store().default_quest() {
            Some(quest) => quest.id.clone(),
            None => {
                session.notify("Please fill in all task fields", Severity::Error);
                return Err(anyhow!(
                    "no quest given and no previously used quest; pass quest:<name>"
                ));
            }
        },
    };

    let today = session.today();
    let deadline = match args.due.as_deref() {
        Some(raw) => match parse_deadline(raw, today) {
            Ok(date) => Some(date),
            Err(err) => {
                session.notify("Please fill in all task fields", Severity::Error);
                return Err(err);
            }
        },
        None => Some(today),
    };

    session.add_task(&args.name, &quest_id, deadline)?;
    Ok(())
}

#[instrument(skip(session, inv))]
fn cmd_done<S: SnapshotStorage, P: Presenter>(
    session: &mut Session<S, P>,
    inv: &Invocation,
) -> anyhow::Result<()> {
    info!("command done");
    for id in resolve_task_refs(session, inv)? {
        session.toggle_task_completion(&id)?;
    }
    Ok(())
}

#[instrument(skip(session, inv))]
fn cmd_delete<S: SnapshotStorage, P: Presenter>(
    session: &mut Session<S, P>,
    inv: &Invocation,
) -> anyhow::Result<()> {
    info!("command delete");
    for id in resolve_task_refs(session, inv)? {
        session.delete_task(&id)?;
    }
    Ok(())
}

#[instrument(skip(session, inv))]
fn cmd_delete_quest<S: SnapshotStorage, P: Presenter>(
    session: &mut Session<S, P>,
    inv: &Invocation,
) -> anyhow::Result<()> {
    info!("command delquest");
    let reference = inv.references().join(" ");
    let quest_id = match resolve_quest(session.store(), &reference) {
        Ok(quest) => quest.id.clone(),
        Err(err) => {
            session.notify("Selected quest not found", Severity::Error);
            return Err(err);
        }
    };
    session.delete_quest(&quest_id)?;
    Ok(())
}

#[instrument(skip(session, inv))]
fn cmd_export<S: SnapshotStorage, P: Presenter>(
    session: &mut Session<S, P>,
    inv: &Invocation,
) -> anyhow::Result<()> {
    info!("command export");
    let text = session.export_text()?;

    match inv.command_args.first().map(String::as_str) {
        Some("-") => {
            let mut out = io::stdout().lock();
            writeln!(out, "{text}")?;
        }
        target => {
            let path = target
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(export_file_name(session.today())));
            write_atomic(&path, &text)
                .with_context(|| format!("failed to export to {}", path.display()))?;
            session.notify(
                &format!("Data exported to {}", path.display()),
                Severity::Success,
            );
        }
    }
    Ok(())
}

#[instrument(skip(session, inv))]
fn cmd_import<S: SnapshotStorage, P: Presenter>(
    session: &mut Session<S, P>,
    inv: &Invocation,
) -> anyhow::Result<()> {
    info!("command import");
    let text = match inv.command_args.first().map(String::as_str) {
        None | Some("-") => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed reading stdin")?;
            buf
        }
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("failed reading {path}"))?
        }
    };

    if text.trim().is_empty() {
        session.notify("Error importing data", Severity::Error);
        return Err(anyhow!("import: empty input"));
    }

    session.import_text(&text)
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<(&String, &String)> = cfg.iter().collect();
    entries.sort();
    for (key, value) in entries {
        println!("{key}={value}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Commands: list/next, quests, addquest <name>, \
         add <name> [quest:<quest>] [due:<date>], done <task>, delete <task>, \
         delquest <quest>, save, export [path|-], import [path|-], _show, help, version"
    );
    Ok(())
}

fn resolve_task_refs<S: SnapshotStorage, P: Presenter>(
    session: &mut Session<S, P>,
    inv: &Invocation,
) -> anyhow::Result<Vec<TaskId>> {
    let references = inv.references();
    if references.is_empty() {
        session.notify("Please name a task", Severity::Error);
        return Err(anyhow!("{}: expected a task id or number", inv.command));
    }

    let mut ids = Vec::with_capacity(references.len());
    for reference in references {
        match resolve_task(session.store(), reference) {
            Ok(task) => ids.push(task.id.clone()),
            Err(err) => {
                session.notify(&err.to_string(), Severity::Error);
                return Err(err);
            }
        }
    }
    Ok(ids)
}

/// Exact id, then 1-based position in the sorted view, then unique id prefix.
pub fn resolve_task<'a>(store: &'a QuestTaskStore, reference: &str) -> anyhow::Result<&'a Task> {
    let reference = reference.trim();
    if let Some(task) = store.task(&TaskId::from(reference)) {
        return Ok(task);
    }

    if let Ok(position) = reference.parse::<usize>() {
        let view = store.sorted_task_view();
        if position >= 1
            && let Some(task) = view.get(position - 1)
        {
            return Ok(*task);
        }
    }

    unique_prefix(store.tasks(), reference, |task| task.id.as_str())
        .map_err(|reason| anyhow!("task {reason}: {reference}"))
}

/// Exact id, then case-insensitive name, then unique id prefix.
pub fn resolve_quest<'a>(store: &'a QuestTaskStore, reference: &str) -> anyhow::Result<&'a Quest> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(anyhow!("quest reference cannot be empty"));
    }
    if let Some(quest) = store.quest(&QuestId::from(reference)) {
        return Ok(quest);
    }
    if let Some(quest) = store.find_quest_by_name(reference) {
        return Ok(quest);
    }

    unique_prefix(store.quests(), reference, |quest| quest.id.as_str())
        .map_err(|reason| anyhow!("quest {reason}: {reference}"))
}

fn unique_prefix<'a, T>(
    items: &'a [T],
    prefix: &str,
    id_of: impl Fn(&T) -> &str,
) -> Result<&'a T, &'static str> {
    if prefix.is_empty() {
        return Err("not found");
    }
    let mut matches = items.iter().filter(|item| id_of(*item).starts_with(prefix));
    let first = matches.next().ok_or("not found")?;
    if matches.next().is_some() {
        return Err("reference is ambiguous");
    }
    Ok(first)
}

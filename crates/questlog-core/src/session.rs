use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::datastore::SnapshotStorage;
use crate::datetime;
use crate::error::StoreResult;
use crate::hooks::{HookEvent, HookRunner};
use crate::model::{Quest, QuestId, QuestProgress, Task, TaskId};
use crate::snapshot::Snapshot;
use crate::store::{QuestTaskStore, overdue_flags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Warning,
    Error,
}

/// The presentation layer a [`Session`] drives after every change.
pub trait Presenter {
    fn render_quest_list(
        &mut self,
        quests: &[Quest],
        progress: &[QuestProgress],
    ) -> anyhow::Result<()>;

    /// `overdue[i]` belongs to `tasks[i]`.
    fn render_task_list(&mut self, tasks: &[&Task], overdue: &[bool]) -> anyhow::Result<()>;

    fn notify_user(&mut self, message: &str, severity: Severity);
}

/// Couples a [`QuestTaskStore`] with its storage, presenter and hooks.
///
/// Store failures are reported to the presenter and returned. Persistence,
/// render and hook failures never undo an applied change, and a failed render
/// does not skip the save that follows it.
pub struct Session<S, P> {
    store: QuestTaskStore,
    storage: S,
    presenter: P,
    hooks: HookRunner,
    autosave: bool,
    // Set when the stored snapshot could not be read; autosave would
    // overwrite it with an empty state.
    autosave_suspended: bool,
    clock: fn() -> NaiveDate,
}

impl<S: SnapshotStorage, P: Presenter> Session<S, P> {
    pub fn new(store: QuestTaskStore, storage: S, presenter: P) -> Self {
        Self {
            store,
            storage,
            presenter,
            hooks: HookRunner::disabled(),
            autosave: true,
            autosave_suspended: false,
            clock: datetime::today,
        }
    }

    pub fn with_hooks(mut self, hooks: HookRunner) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> NaiveDate) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &QuestTaskStore {
        &self.store
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    pub fn notify(&mut self, message: &str, severity: Severity) {
        self.presenter.notify_user(message, severity);
    }

    /// Restores the stored snapshot, if any. Unreadable storage is reported,
    /// leaves the session empty and suspends autosave until an explicit
    /// `save` or a successful import.
    #[instrument(skip(self))]
    pub fn load(&mut self) {
        let restored = self
            .storage
            .retrieve()
            .and_then(|snapshot| match snapshot {
                Some(snapshot) => Ok(Some(self.store.import_snapshot(snapshot)?)),
                None => Ok(None),
            });
        match restored {
            Ok(Some(())) => info!(
                quests = self.store.quests().len(),
                tasks = self.store.tasks().len(),
                "restored stored snapshot"
            ),
            Ok(None) => info!("starting with empty store"),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to load stored snapshot");
                self.autosave_suspended = true;
                self.presenter
                    .notify_user("Error loading saved data", Severity::Error);
                if self.autosave {
                    self.presenter.notify_user(
                        "Autosave is off so the stored data is not overwritten",
                        Severity::Warning,
                    );
                }
            }
        }
    }

    pub fn render_quests(&mut self) -> anyhow::Result<()> {
        let progress = self.store.progress_by_quest();
        self.presenter
            .render_quest_list(self.store.quests(), &progress)
    }

    pub fn render_tasks(&mut self) -> anyhow::Result<()> {
        let today = self.today();
        let view = self.store.sorted_task_view();
        let overdue = overdue_flags(&view, today);
        self.presenter.render_task_list(&view, &overdue)
    }

    pub fn render_all(&mut self) -> anyhow::Result<()> {
        self.render_quests()?;
        self.render_tasks()
    }

    #[instrument(skip(self))]
    pub fn add_quest(&mut self, name: &str) -> anyhow::Result<Quest> {
        let result = self.store.add_quest(name);
        let quest = self.checked(result)?;

        self.notify(
            &format!("Quest \"{}\" added successfully!", quest.name),
            Severity::Success,
        );
        let rendered = self.render_quests();
        self.autosave();
        self.fire(HookEvent::QuestAdded, &quest);
        rendered.map(|()| quest)
    }

    #[instrument(skip(self))]
    pub fn add_task(
        &mut self,
        name: &str,
        quest_id: &QuestId,
        deadline: Option<NaiveDate>,
    ) -> anyhow::Result<Task> {
        let result = self.store.add_task(name, quest_id, deadline);
        let task = self.checked(result)?;

        self.notify(
            &format!("Task \"{}\" added successfully!", task.name),
            Severity::Success,
        );
        let rendered = self.render_all();
        self.autosave();
        self.fire(HookEvent::TaskAdded, &task);
        rendered.map(|()| task)
    }

    #[instrument(skip(self))]
    pub fn toggle_task_completion(&mut self, task_id: &TaskId) -> anyhow::Result<Task> {
        let result = self.store.toggle_task_completion(task_id);
        let task = self.checked(result)?;

        let status = if task.completed {
            "completed"
        } else {
            "marked as incomplete"
        };
        self.notify(
            &format!("Task \"{}\" {status}", task.name),
            Severity::Success,
        );
        let rendered = self.render_all();
        self.autosave();
        self.fire(HookEvent::TaskCompleted, &task);
        rendered.map(|()| task)
    }

    #[instrument(skip(self))]
    pub fn delete_task(&mut self, task_id: &TaskId) -> anyhow::Result<Task> {
        let result = self.store.delete_task(task_id);
        let task = self.checked(result)?;

        self.notify(&format!("Task \"{}\" deleted", task.name), Severity::Success);
        let rendered = self.render_all();
        self.autosave();
        rendered.map(|()| task)
    }

    #[instrument(skip(self))]
    pub fn delete_quest(&mut self, quest_id: &QuestId) -> anyhow::Result<Quest> {
        let result = self.store.delete_quest(quest_id);
        let removal = self.checked(result)?;

        self.notify(
            &format!("Quest \"{}\" and all its tasks deleted", removal.quest.name),
            Severity::Success,
        );
        let rendered = self.render_all();
        self.autosave();
        rendered.map(|()| removal.quest)
    }

    /// Persists now. The error is reported and returned; the in-memory state
    /// stays as it is either way.
    #[instrument(skip(self))]
    pub fn save(&mut self) -> anyhow::Result<()> {
        let snapshot = self.store.export_snapshot();
        if let Err(err) = self.storage.persist(&snapshot) {
            warn!(error = %format!("{err:#}"), "failed to save snapshot");
            self.notify("Error saving data", Severity::Error);
            return Err(err);
        }
        self.autosave_suspended = false;
        self.notify("Data saved successfully!", Severity::Success);
        self.fire(HookEvent::DataSaved, &snapshot);
        Ok(())
    }

    /// Serialized snapshot for an external file.
    pub fn export_text(&mut self) -> anyhow::Result<String> {
        let snapshot = self.store.export_snapshot();
        let text = snapshot.to_json_pretty(Utc::now())?;
        self.fire(HookEvent::DataSaved, &snapshot);
        Ok(text)
    }

    /// Replaces the whole state from an external file's text.
    #[instrument(skip(self, text))]
    pub fn import_text(&mut self, text: &str) -> anyhow::Result<()> {
        let result = Snapshot::from_import_json(text, self.store.palette())
            .and_then(|snapshot| self.store.import_snapshot(snapshot));
        if let Err(err) = result {
            self.notify(&format!("Error importing data: {err}"), Severity::Error);
            return Err(err.into());
        }

        self.notify("Data imported successfully!", Severity::Success);
        let rendered = self.render_all();
        if self.persist_quietly() {
            self.autosave_suspended = false;
        }
        let snapshot = self.store.export_snapshot();
        self.fire(HookEvent::DataLoaded, &snapshot);
        rendered
    }

    fn checked<T>(&mut self, result: StoreResult<T>) -> anyhow::Result<T> {
        result.map_err(|err| {
            self.presenter.notify_user(&err.to_string(), Severity::Error);
            err.into()
        })
    }

    fn autosave(&mut self) {
        if !self.autosave {
            return;
        }
        if self.autosave_suspended {
            debug!("autosave suspended after a failed load");
            return;
        }
        self.persist_quietly();
    }

    fn persist_quietly(&mut self) -> bool {
        match self.storage.persist(&self.store.export_snapshot()) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to persist snapshot");
                self.presenter
                    .notify_user("Error saving data", Severity::Error);
                false
            }
        }
    }

    fn fire<T: Serialize>(&mut self, event: HookEvent, payload: &T) {
        if let Err(err) = self.hooks.fire(event, payload) {
            warn!(?event, error = %format!("{err:#}"), "hook failed");
            self.presenter.notify_user(
                &format!("{} hook failed: {err}", event.script_prefix()),
                Severity::Warning,
            );
        }
    }
}

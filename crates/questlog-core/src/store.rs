use chrono::NaiveDate;
use tracing::{debug, info, instrument};

use crate::error::{StoreError, StoreResult};
use crate::model::{DEFAULT_QUEST_COLORS, Quest, QuestId, QuestProgress, Task, TaskId};
use crate::snapshot::Snapshot;

/// In-memory quests and tasks plus the advisory last-selected quest.
///
/// All mutations validate first and write second, so an `Err` never leaves a
/// partially applied change behind.
#[derive(Debug, Clone)]
pub struct QuestTaskStore {
    palette: Vec<String>,
    quests: Vec<Quest>,
    tasks: Vec<Task>,
    last_selected_quest: Option<QuestId>,
}

/// What [`QuestTaskStore::delete_quest`] took out of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestRemoval {
    pub quest: Quest,
    pub tasks: Vec<Task>,
}

impl Default for QuestTaskStore {
    fn default() -> Self {
        Self {
            palette: DEFAULT_QUEST_COLORS.iter().map(ToString::to_string).collect(),
            quests: vec![],
            tasks: vec![],
            last_selected_quest: None,
        }
    }
}

impl QuestTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_palette(palette: Vec<String>) -> StoreResult<Self> {
        let palette: Vec<String> = palette
            .into_iter()
            .map(|color| color.trim().to_string())
            .filter(|color| !color.is_empty())
            .collect();
        if palette.is_empty() {
            return Err(StoreError::Validation(
                "quest color table cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            palette,
            ..Self::default()
        })
    }

    pub fn palette(&self) -> &[String] {
        &self.palette
    }

    pub fn quests(&self) -> &[Quest] {
        &self.quests
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn last_selected_quest(&self) -> Option<&QuestId> {
        self.last_selected_quest.as_ref()
    }

    pub fn quest(&self, id: &QuestId) -> Option<&Quest> {
        self.quests.iter().find(|quest| &quest.id == id)
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| &task.id == id)
    }

    pub fn find_quest_by_name(&self, name: &str) -> Option<&Quest> {
        self.quests.iter().find(|quest| quest.name_matches(name))
    }

    /// The last selected quest, if it still exists.
    pub fn default_quest(&self) -> Option<&Quest> {
        self.last_selected_quest
            .as_ref()
            .and_then(|id| self.quest(id))
    }

    #[instrument(skip(self))]
    pub fn add_quest(&mut self, name: &str) -> StoreResult<Quest> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation(
                "Please enter a quest name".to_string(),
            ));
        }
        if self.find_quest_by_name(name).is_some() {
            return Err(StoreError::DuplicateName(name.to_string()));
        }

        let color_class = self.palette[self.quests.len() % self.palette.len()].clone();
        let quest = Quest {
            id: QuestId::generate(),
            name: name.to_string(),
            color_class,
        };
        self.quests.push(quest.clone());

        info!(quest = %quest.id, color = %quest.color_class, "added quest");
        Ok(quest)
    }

    #[instrument(skip(self))]
    pub fn add_task(
        &mut self,
        name: &str,
        quest_id: &QuestId,
        deadline: Option<NaiveDate>,
    ) -> StoreResult<Task> {
        let name = name.trim();
        let (false, Some(deadline)) = (name.is_empty(), deadline) else {
            return Err(StoreError::Validation(
                "Please fill in all task fields".to_string(),
            ));
        };
        let quest = self
            .quest(quest_id)
            .ok_or_else(|| StoreError::QuestNotFound(quest_id.to_string()))?;

        let task = Task::new(name.to_string(), deadline, quest);
        self.tasks.push(task.clone());
        self.last_selected_quest = Some(quest_id.clone());

        info!(task = %task.id, quest = %quest_id, %deadline, "added task");
        Ok(task)
    }

    #[instrument(skip(self))]
    pub fn toggle_task_completion(&mut self, task_id: &TaskId) -> StoreResult<Task> {
        let task = self
            .tasks
            .iter_mut()
            .find(|task| &task.id == task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        task.completed = !task.completed;

        info!(task = %task.id, completed = task.completed, "toggled task");
        Ok(task.clone())
    }

    #[instrument(skip(self))]
    pub fn delete_task(&mut self, task_id: &TaskId) -> StoreResult<Task> {
        let idx = self
            .tasks
            .iter()
            .position(|task| &task.id == task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        let removed = self.tasks.remove(idx);

        info!(task = %removed.id, "deleted task");
        Ok(removed)
    }

    /// Removes the quest and every task that references it in one step.
    #[instrument(skip(self))]
    pub fn delete_quest(&mut self, quest_id: &QuestId) -> StoreResult<QuestRemoval> {
        let idx = self
            .quests
            .iter()
            .position(|quest| &quest.id == quest_id)
            .ok_or_else(|| StoreError::QuestNotFound(quest_id.to_string()))?;

        let (removed_tasks, kept): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|task| &task.quest_id == quest_id);
        self.tasks = kept;
        let quest = self.quests.remove(idx);

        info!(
            quest = %quest.id,
            cascaded = removed_tasks.len(),
            "deleted quest"
        );
        Ok(QuestRemoval {
            quest,
            tasks: removed_tasks,
        })
    }

    pub fn compute_quest_progress(&self, quest_id: &QuestId) -> QuestProgress {
        let (completed, total) = self
            .tasks
            .iter()
            .filter(|task| &task.quest_id == quest_id)
            .fold((0, 0), |(done, total), task| {
                (done + usize::from(task.completed), total + 1)
            });
        QuestProgress::from_counts(completed, total)
    }

    /// Progress for each quest, in quest order.
    pub fn progress_by_quest(&self) -> Vec<QuestProgress> {
        self.quests
            .iter()
            .map(|quest| self.compute_quest_progress(&quest.id))
            .collect()
    }

    /// Incomplete before completed, then earliest deadline first. Equal keys
    /// keep insertion order.
    pub fn sorted_task_view(&self) -> Vec<&Task> {
        let mut view: Vec<&Task> = self.tasks.iter().collect();
        view.sort_by_key(|task| (task.completed, task.deadline));
        view
    }

    pub fn is_overdue(&self, task: &Task, today: NaiveDate) -> bool {
        task.is_overdue(today)
    }

    pub fn export_snapshot(&self) -> Snapshot {
        Snapshot {
            quests: self.quests.clone(),
            tasks: self.tasks.clone(),
            last_selected_quest: self.last_selected_quest.clone(),
        }
    }

    /// Replaces the whole state with `snapshot`.
    #[instrument(skip(self, snapshot))]
    pub fn import_snapshot(&mut self, snapshot: Snapshot) -> StoreResult<()> {
        let snapshot = snapshot.validated()?;
        debug!(
            quests = snapshot.quests.len(),
            tasks = snapshot.tasks.len(),
            "replacing store state"
        );
        self.quests = snapshot.quests;
        self.tasks = snapshot.tasks;
        self.last_selected_quest = snapshot.last_selected_quest;
        info!("imported snapshot");
        Ok(())
    }

    /// Decodes a stored snapshot with this store's color table and imports it.
    pub fn import_json(&mut self, text: &str) -> StoreResult<()> {
        let snapshot = Snapshot::from_json(text, &self.palette)?;
        self.import_snapshot(snapshot)
    }
}

/// Overdue flag for each task, aligned with `tasks`.
pub fn overdue_flags(tasks: &[&Task], today: NaiveDate) -> Vec<bool> {
    tasks.iter().map(|task| task.is_overdue(today)).collect()
}

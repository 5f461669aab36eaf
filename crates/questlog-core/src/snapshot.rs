use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::model::{Quest, QuestId, Task, TaskId};

/// Full serializable state of a [`crate::store::QuestTaskStore`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub quests: Vec<Quest>,
    pub tasks: Vec<Task>,
    pub last_selected_quest: Option<QuestId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSnapshot<'a> {
    #[serde(flatten)]
    snapshot: &'a Snapshot,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnapshot {
    #[serde(default)]
    quests: Option<Vec<RawQuest>>,
    #[serde(default)]
    tasks: Option<Vec<RawTask>>,
    #[serde(default)]
    last_selected_quest: Option<QuestId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuest {
    id: QuestId,
    name: String,
    #[serde(default)]
    color_class: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    id: TaskId,
    name: String,
    deadline: NaiveDate,
    quest_id: QuestId,
    #[serde(default)]
    quest_name: Option<String>,
    #[serde(default)]
    completed: bool,
}

impl Snapshot {
    /// Pretty JSON with an informational ISO-8601 `timestamp`.
    pub fn to_json_pretty(&self, timestamp: DateTime<Utc>) -> StoreResult<String> {
        let persisted = PersistedSnapshot {
            snapshot: self,
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        Ok(serde_json::to_string_pretty(&persisted)?)
    }

    /// Lenient decode: absent collections are empty, absent selection is unset.
    pub fn from_json(text: &str, palette: &[String]) -> StoreResult<Self> {
        let raw: RawSnapshot = serde_json::from_str(text)?;
        raw.into_snapshot(palette)
    }

    /// Decode a user supplied file, which must carry both `quests` and `tasks`.
    pub fn from_import_json(text: &str, palette: &[String]) -> StoreResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let has_collections = value
            .as_object()
            .is_some_and(|obj| obj.contains_key("quests") && obj.contains_key("tasks"));
        if !has_collections {
            return Err(StoreError::Serialization(
                "Invalid file format: expected quests and tasks".to_string(),
            ));
        }
        let raw: RawSnapshot = serde_json::from_value(value)?;
        raw.into_snapshot(palette)
    }

    /// Checks the data-model invariants. Blank names and duplicate names or
    /// ids are rejected; tasks pointing at absent quests are dropped.
    pub fn validated(mut self) -> StoreResult<Self> {
        let mut names = HashSet::new();
        let mut quest_ids = HashSet::new();
        for quest in &self.quests {
            if quest.name.trim().is_empty() {
                return Err(StoreError::Serialization(format!(
                    "quest {} has an empty name",
                    quest.id
                )));
            }
            if !names.insert(quest.name.trim().to_lowercase()) {
                return Err(StoreError::Serialization(format!(
                    "duplicate quest name: {}",
                    quest.name
                )));
            }
            if !quest_ids.insert(quest.id.clone()) {
                return Err(StoreError::Serialization(format!(
                    "duplicate quest id: {}",
                    quest.id
                )));
            }
        }

        let mut task_ids = HashSet::new();
        for task in &self.tasks {
            if task.name.trim().is_empty() {
                return Err(StoreError::Serialization(format!(
                    "task {} has an empty name",
                    task.id
                )));
            }
            if !task_ids.insert(task.id.clone()) {
                return Err(StoreError::Serialization(format!(
                    "duplicate task id: {}",
                    task.id
                )));
            }
        }

        let before = self.tasks.len();
        self.tasks.retain(|task| quest_ids.contains(&task.quest_id));
        if self.tasks.len() != before {
            warn!(
                dropped = before - self.tasks.len(),
                "dropped tasks referencing unknown quests"
            );
        }

        Ok(self)
    }
}

impl RawSnapshot {
    fn into_snapshot(self, palette: &[String]) -> StoreResult<Snapshot> {
        let quests: Vec<Quest> = self
            .quests
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| {
                let color_class = match raw.color_class {
                    Some(color) if !color.is_empty() => color,
                    _ => {
                        let color = palette
                            .get(idx % palette.len().max(1))
                            .cloned()
                            .unwrap_or_default();
                        debug!(quest = %raw.id, %color, "repaired missing quest color");
                        color
                    }
                };
                Quest {
                    id: raw.id,
                    name: raw.name,
                    color_class,
                }
            })
            .collect();

        let tasks = self
            .tasks
            .unwrap_or_default()
            .into_iter()
            .map(|raw| {
                let quest_name = raw.quest_name.unwrap_or_else(|| {
                    quests
                        .iter()
                        .find(|quest| quest.id == raw.quest_id)
                        .map(|quest| quest.name.clone())
                        .unwrap_or_default()
                });
                Task {
                    id: raw.id,
                    name: raw.name,
                    deadline: raw.deadline,
                    quest_id: raw.quest_id,
                    quest_name,
                    completed: raw.completed,
                }
            })
            .collect();

        Ok(Snapshot {
            quests,
            tasks,
            last_selected_quest: self.last_selected_quest,
        })
    }
}

/// File name offered for an export made on `today`.
pub fn export_file_name(today: NaiveDate) -> String {
    format!("quest-task-data-{}.json", today.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use serde_json::Value;

    use super::{Snapshot, export_file_name};
    use crate::error::StoreError;
    use crate::model::{DEFAULT_QUEST_COLORS, QuestId};

    fn palette() -> Vec<String> {
        DEFAULT_QUEST_COLORS.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn persisted_form_uses_contract_field_names() {
        let text = r#"{
            "quests": [{"id": "q1", "name": "Main", "colorClass": "quest-color-3"}],
            "tasks": [{"id": "t1", "name": "Find sword", "deadline": "2024-01-05",
                       "questId": "q1", "questName": "Main", "completed": true}],
            "lastSelectedQuest": "q1"
        }"#;
        let snapshot = Snapshot::from_json(text, &palette()).expect("decode");
        let now = Utc
            .with_ymd_and_hms(2024, 1, 6, 8, 30, 0)
            .single()
            .expect("valid now");
        let out = snapshot.to_json_pretty(now).expect("encode");
        let value: Value = serde_json::from_str(&out).expect("json");

        assert_eq!(value["quests"][0]["colorClass"], "quest-color-3");
        assert_eq!(value["tasks"][0]["deadline"], "2024-01-05");
        assert_eq!(value["tasks"][0]["questId"], "q1");
        assert_eq!(value["tasks"][0]["questName"], "Main");
        assert_eq!(value["tasks"][0]["completed"], true);
        assert_eq!(value["lastSelectedQuest"], "q1");
        assert_eq!(value["timestamp"], "2024-01-06T08:30:00.000Z");

        let again = Snapshot::from_json(&out, &palette()).expect("decode again");
        assert_eq!(again, snapshot);
    }

    #[test]
    fn absent_fields_default_to_empty() {
        let snapshot = Snapshot::from_json("{}", &palette()).expect("decode");
        assert_eq!(snapshot, Snapshot::default());

        let snapshot =
            Snapshot::from_json(r#"{"lastSelectedQuest": null}"#, &palette()).expect("decode");
        assert!(snapshot.last_selected_quest.is_none());
    }

    #[test]
    fn missing_colors_are_repaired_by_position() {
        let text = r#"{"quests": [
            {"id": "a", "name": "A"},
            {"id": "b", "name": "B", "colorClass": "custom"},
            {"id": "c", "name": "C"}
        ]}"#;
        let table = vec!["red".to_string(), "green".to_string()];
        let snapshot = Snapshot::from_json(text, &table).expect("decode");
        let colors: Vec<&str> = snapshot
            .quests
            .iter()
            .map(|quest| quest.color_class.as_str())
            .collect();
        assert_eq!(colors, vec!["red", "custom", "red"]);
    }

    #[test]
    fn missing_quest_name_on_task_is_filled_from_quest() {
        let text = r#"{
            "quests": [{"id": "q1", "name": "Main"}],
            "tasks": [{"id": "t1", "name": "x", "deadline": "2024-01-05", "questId": "q1"}],
            "exportDate": "2024-01-05T00:00:00.000Z"
        }"#;
        let snapshot = Snapshot::from_import_json(text, &palette()).expect("decode");
        assert_eq!(snapshot.tasks[0].quest_name, "Main");
        assert!(!snapshot.tasks[0].completed);
    }

    #[test]
    fn import_requires_both_collections() {
        let err = Snapshot::from_import_json(r#"{"quests": []}"#, &palette())
            .expect_err("missing tasks");
        assert!(matches!(err, StoreError::Serialization(_)));

        let err = Snapshot::from_import_json("[]", &palette()).expect_err("not an object");
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn unparseable_dates_are_rejected() {
        let text = r#"{
            "quests": [{"id": "q1", "name": "Main"}],
            "tasks": [{"id": "t1", "name": "x", "deadline": "next week", "questId": "q1"}]
        }"#;
        let err = Snapshot::from_json(text, &palette()).expect_err("bad date");
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn validation_rejects_duplicates_and_drops_orphans() {
        let dupes = r#"{"quests": [{"id": "a", "name": "Main"}, {"id": "b", "name": "MAIN"}]}"#;
        let snapshot = Snapshot::from_json(dupes, &palette()).expect("decode");
        assert!(matches!(
            snapshot.validated(),
            Err(StoreError::Serialization(_))
        ));

        let orphans = r#"{
            "quests": [{"id": "q1", "name": "Main"}],
            "tasks": [
                {"id": "t1", "name": "kept", "deadline": "2024-01-05", "questId": "q1"},
                {"id": "t2", "name": "orphan", "deadline": "2024-01-05", "questId": "gone"}
            ],
            "lastSelectedQuest": "gone"
        }"#;
        let snapshot = Snapshot::from_json(orphans, &palette())
            .expect("decode")
            .validated()
            .expect("valid");
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[0].name, "kept");
        assert_eq!(snapshot.last_selected_quest, Some(QuestId::from("gone")));
    }

    #[test]
    fn export_file_name_carries_date() {
        let today = NaiveDate::from_ymd_opt(2024, 2, 29).expect("date");
        assert_eq!(export_file_name(today), "quest-task-data-2024-02-29.json");
    }

    #[test]
    fn blank_task_names_are_rejected() {
        let text = r#"{
            "quests": [{"id": "q1", "name": "Main"}],
            "tasks": [{"id": "t1", "name": "   ", "deadline": "2024-01-05", "questId": "q1"}]
        }"#;
        let snapshot = Snapshot::from_import_json(text, &palette()).expect("decode");
        assert!(matches!(
            snapshot.validated(),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn empty_ids_survive_a_round_trip() {
        let text = r#"{
            "quests": [{"id": "", "name": "Legacy", "colorClass": "quest-color-0"}],
            "tasks": [],
            "lastSelectedQuest": ""
        }"#;
        let snapshot = Snapshot::from_json(text, &palette())
            .expect("decode")
            .validated()
            .expect("valid");
        assert_eq!(snapshot.last_selected_quest, Some(QuestId::from("")));

        let now = Utc
            .with_ymd_and_hms(2024, 1, 6, 0, 0, 0)
            .single()
            .expect("valid now");
        let out = snapshot.to_json_pretty(now).expect("encode");
        let again = Snapshot::from_json(&out, &palette()).expect("decode again");
        assert_eq!(again, snapshot);
    }
}

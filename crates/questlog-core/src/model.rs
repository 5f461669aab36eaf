use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_QUEST_COLORS: [&str; 8] = [
    "quest-color-0",
    "quest-color-1",
    "quest-color-2",
    "quest-color-3",
    "quest-color-4",
    "quest-color-5",
    "quest-color-6",
    "quest-color-7",
];

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First eight characters, used for compact display.
            pub fn short(&self) -> &str {
                match self.0.char_indices().nth(8) {
                    Some((idx, _)) => &self.0[..idx],
                    None => &self.0,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(QuestId);
string_id!(TaskId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quest {
    pub id: QuestId,
    pub name: String,
    pub color_class: String,
}

impl Quest {
    pub(crate) fn name_matches(&self, other: &str) -> bool {
        self.name.trim().to_lowercase() == other.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub deadline: NaiveDate,
    pub quest_id: QuestId,
    /// Name of the owning quest when the task was created.
    pub quest_name: String,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    pub fn new(name: String, deadline: NaiveDate, quest: &Quest) -> Self {
        Self {
            id: TaskId::generate(),
            name,
            deadline,
            quest_id: quest.id.clone(),
            quest_name: quest.name.clone(),
            completed: false,
        }
    }

    /// Incomplete and due strictly before `today`.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.completed && self.deadline < today
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QuestProgress {
    pub completed: usize,
    pub total: usize,
    pub percentage: u8,
}

impl QuestProgress {
    pub fn from_counts(completed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            // round half up on completed / total * 100
            ((completed * 200 + total) / (total * 2)).min(100) as u8
        };
        Self {
            completed,
            total,
            percentage,
        }
    }
}

use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_deadline;
use crate::model::{Quest, QuestProgress, Task};
use crate::session::{Presenter, Severity};

const PROGRESS_CELLS: usize = 10;
const QUEST_ANSI: [&str; 8] = ["35", "36", "32", "33", "34", "31", "95", "96"];

/// Terminal presenter: tables on stdout, notifications on stderr.
#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    overdue_warnings: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
            overdue_warnings: cfg.overdue_warnings(),
        })
    }

    pub fn plain() -> Self {
        Self {
            color: false,
            overdue_warnings: true,
        }
    }

    pub fn write_quest_list<W: Write>(
        &self,
        mut out: W,
        quests: &[Quest],
        progress: &[QuestProgress],
    ) -> anyhow::Result<()> {
        if quests.is_empty() {
            writeln!(out, "No quests created yet. Add your first quest above!")?;
            return Ok(());
        }

        let headers = vec![
            "Quest".to_string(),
            "Progress".to_string(),
            "Done".to_string(),
            "%".to_string(),
        ];

        let mut rows = Vec::with_capacity(quests.len());
        for (quest, progress) in quests.iter().zip(progress) {
            let filled = usize::from(progress.percentage) * PROGRESS_CELLS / 100;
            let bar = format!(
                "{}{}",
                "#".repeat(filled),
                ".".repeat(PROGRESS_CELLS - filled)
            );
            rows.push(vec![
                quest.name.clone(),
                self.paint(&bar, quest_ansi_code(&quest.color_class)),
                format!("{}/{}", progress.completed, progress.total),
                format!("{}%", progress.percentage),
            ]);
        }

        write_table(&mut out, headers, rows)
    }

    pub fn write_task_list<W: Write>(
        &self,
        mut out: W,
        tasks: &[&Task],
        overdue: &[bool],
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks created yet. Add your first task above!")?;
            return Ok(());
        }

        let headers = vec![
            "#".to_string(),
            "ID".to_string(),
            "Deadline".to_string(),
            "Quest".to_string(),
            "Task".to_string(),
            "Status".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());
        for (idx, task) in tasks.iter().enumerate() {
            let late = self.overdue_warnings && overdue.get(idx).copied().unwrap_or(false);
            let deadline = format_deadline(task.deadline);
            let deadline = if late {
                self.paint(&format!("{deadline} (Overdue)"), "31")
            } else {
                deadline
            };
            let status = if task.completed { "done" } else { "open" };

            rows.push(vec![
                self.paint(&(idx + 1).to_string(), "33"),
                task.id.short().to_string(),
                deadline,
                task.quest_name.clone(),
                task.name.clone(),
                status.to_string(),
            ]);
        }

        write_table(&mut out, headers, rows)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

impl Presenter for Renderer {
    #[tracing::instrument(skip_all)]
    fn render_quest_list(
        &mut self,
        quests: &[Quest],
        progress: &[QuestProgress],
    ) -> anyhow::Result<()> {
        self.write_quest_list(io::stdout().lock(), quests, progress)
    }

    #[tracing::instrument(skip_all)]
    fn render_task_list(&mut self, tasks: &[&Task], overdue: &[bool]) -> anyhow::Result<()> {
        self.write_task_list(io::stdout().lock(), tasks, overdue)
    }

    fn notify_user(&mut self, message: &str, severity: Severity) {
        let code = match severity {
            Severity::Success => "32",
            Severity::Warning => "33",
            Severity::Error => "31",
        };
        let text = if io::stderr().is_terminal() && self.color {
            format!("\x1b[{code}m{message}\x1b[0m")
        } else {
            message.to_string()
        };
        eprintln!("{text}");
    }
}

/// ANSI color for a quest color class such as `quest-color-3`.
fn quest_ansi_code(color_class: &str) -> &'static str {
    let digits: String = color_class
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits
        .parse::<usize>()
        .map(|idx| QUEST_ANSI[idx % QUEST_ANSI.len()])
        .unwrap_or("37")
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{Renderer, quest_ansi_code, strip_ansi};
    use crate::model::{Quest, QuestId, QuestProgress, Task};

    fn quest() -> Quest {
        Quest {
            id: QuestId::from("q1"),
            name: "Main".to_string(),
            color_class: "quest-color-2".to_string(),
        }
    }

    #[test]
    fn quest_table_shows_progress() {
        let mut out = Vec::new();
        Renderer::plain()
            .write_quest_list(&mut out, &[quest()], &[QuestProgress::from_counts(1, 3)])
            .expect("render");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.contains("Main"));
        assert!(text.contains("###......."));
        assert!(text.contains("1/3"));
        assert!(text.contains("33%"));
    }

    #[test]
    fn task_table_marks_overdue_rows() {
        let deadline = NaiveDate::from_ymd_opt(2024, 1, 5).expect("date");
        let task = Task::new("Find sword".to_string(), deadline, &quest());
        let mut out = Vec::new();
        Renderer::plain()
            .write_task_list(&mut out, &[&task], &[true])
            .expect("render");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.contains("2024-01-05 (Overdue)"));
        assert!(text.contains("Find sword"));
        assert!(text.contains(task.id.short()));
    }

    #[test]
    fn empty_lists_print_placeholder() {
        let mut out = Vec::new();
        Renderer::plain()
            .write_task_list(&mut out, &[], &[])
            .expect("render");
        assert!(String::from_utf8(out)
            .expect("utf8")
            .starts_with("No tasks created yet"));
    }

    #[test]
    fn color_class_maps_by_trailing_index() {
        assert_eq!(quest_ansi_code("quest-color-0"), "35");
        assert_eq!(quest_ansi_code("quest-color-9"), "36");
        assert_eq!(quest_ansi_code("teal"), "37");
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
    }
}

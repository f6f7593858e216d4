use cadence_core::models::{EffectiveSubtask, EventViewModel, OccurrenceKind, SubtaskOrigin};
use chrono::{DateTime, Utc};
use chrono_humanize::Humanize;
use comfy_table::{Attribute, Cell, Color, Row, Table};

#[derive(Debug, Clone)]
pub struct ViewOccurrence {
    pub id: String,
    pub title: String,
    pub kind: OccurrenceKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub clipped: bool,
    /// Completed and total subtasks, when requested
    pub subtasks: Option<(usize, usize)>,
}

impl From<&EventViewModel> for ViewOccurrence {
    fn from(view: &EventViewModel) -> Self {
        Self {
            id: view.id().to_string(),
            title: view.occurrence.title().to_string(),
            kind: view.occurrence.kind(),
            start: view.display_start,
            end: view.display_end,
            clipped: view.clipped,
            subtasks: None,
        }
    }
}

fn format_time_span(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let days = (end.date_naive() - start.date_naive()).num_days();
    let mut span = format!("{}–{}", start.format("%H:%M"), end.format("%H:%M"));
    if days > 0 {
        span.push_str(&format!(" (+{}d)", days));
    }
    span
}

pub fn display_occurrences(occurrences: &[ViewOccurrence]) {
    if occurrences.is_empty() {
        println!("No events found.");
        return;
    }

    let show_subtasks = occurrences.iter().any(|o| o.subtasks.is_some());
    let mut table = Table::new();
    let mut header = vec!["ID", "Date", "Time", "Title", "Kind", "Starts"];
    if show_subtasks {
        header.push("Subtasks");
    }
    table.set_header(header);

    for occurrence in occurrences {
        let mut row = Row::new();
        row.add_cell(Cell::new(&occurrence.id));
        row.add_cell(Cell::new(occurrence.start.format("%a %Y-%m-%d")));

        let mut time = format_time_span(occurrence.start, occurrence.end);
        if occurrence.clipped {
            time.push_str(" ✂");
        }
        row.add_cell(Cell::new(time));

        let mut display_title = String::new();
        if matches!(occurrence.kind, OccurrenceKind::Virtual | OccurrenceKind::Override) {
            display_title.push('↻');
            display_title.push(' ');
        }
        display_title.push_str(&occurrence.title);
        let title_cell = match occurrence.kind {
            OccurrenceKind::Override => Cell::new(display_title).fg(Color::Yellow),
            _ => Cell::new(display_title),
        };
        row.add_cell(title_cell);

        let kind_cell = Cell::new(occurrence.kind.to_string());
        row.add_cell(match occurrence.kind {
            OccurrenceKind::Override => kind_cell.fg(Color::Yellow),
            OccurrenceKind::Virtual => kind_cell.fg(Color::Cyan),
            _ => kind_cell,
        });

        let starts = Cell::new(occurrence.start.humanize());
        row.add_cell(if occurrence.end < Utc::now() {
            starts.fg(Color::DarkGrey)
        } else {
            starts
        });

        if show_subtasks {
            row.add_cell(match occurrence.subtasks {
                Some((_, 0)) | None => Cell::new("-"),
                Some((done, total)) if done == total => Cell::new(format!("{}/{}", done, total)).fg(Color::Green),
                Some((done, total)) => Cell::new(format!("{}/{}", done, total)),
            });
        }
        table.add_row(row);
    }

    println!("{table}");
}

pub fn display_subtasks(subtasks: &[EffectiveSubtask]) {
    if subtasks.is_empty() {
        println!("No subtasks.");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["#", "Done", "Subtask", "From"]);

    for (i, subtask) in subtasks.iter().enumerate() {
        let mut row = Row::new();
        row.add_cell(Cell::new(i + 1));
        row.add_cell(if subtask.completed {
            Cell::new("✓").fg(Color::Green)
        } else {
            Cell::new(" ")
        });

        let text_cell = Cell::new(&subtask.text);
        row.add_cell(if subtask.completed {
            text_cell.add_attribute(Attribute::CrossedOut).fg(Color::DarkGrey)
        } else {
            text_cell
        });

        row.add_cell(Cell::new(match subtask.origin {
            SubtaskOrigin::Master => "event",
            SubtaskOrigin::Custom => "this day",
        }));
        table.add_row(row);
    }

    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_span_same_day() {
        let start = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 6, 10, 30, 0).unwrap();
        assert_eq!(format_time_span(start, end), "09:00–10:30");
    }

    #[test]
    fn test_time_span_past_midnight() {
        let start = Utc.with_ymd_and_hms(2025, 1, 6, 22, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 7, 2, 0, 0).unwrap();
        assert_eq!(format_time_span(start, end), "22:00–02:00 (+1d)");
    }
}

use cadence_core::models::{EditScope, RecurrenceRule, Weekday};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Recurring calendar events with per-occurrence overrides and subtasks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Add a new event or recurring series
    Add(AddCommand),
    /// List occurrences in a date range
    List(ListCommand),
    /// Move or resize one occurrence
    Move(MoveCommand),
    /// Change title, description or color of one occurrence
    Edit(EditCommand),
    /// Delete one occurrence or its whole series
    Delete(DeleteCommand),
    /// Bring back a deleted date of a series
    Restore(RestoreCommand),
    /// Set, change or clear the recurrence of an occurrence
    Recur(RecurCommand),
    /// Detach one occurrence from its series
    Liberate(LiberateCommand),
    /// Manage the subtasks of an occurrence
    Subtask(SubtaskCommand),
}

/// Human-friendly recurrence patterns
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Every {
    /// Every day
    Daily,
    /// Every week (same weekday unless --on is given)
    Weekly,
    /// Every month (same date unless --day is given)
    Monthly,
    /// Monday to Friday
    Weekdays,
}

impl std::fmt::Display for Every {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Every::Daily => write!(f, "daily"),
            Every::Weekly => write!(f, "weekly"),
            Every::Monthly => write!(f, "monthly"),
            Every::Weekdays => write!(f, "weekdays"),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RuleArgs {
    /// How often the event repeats
    #[arg(long, value_enum)]
    pub every: Option<Every>,
    /// Repeat every N days, weeks or months (1-30)
    #[arg(long, default_value_t = 1)]
    pub interval: u32,
    /// Days of week for weekly rules (mon,wed,fri)
    #[arg(long, requires = "every", value_delimiter = ',')]
    pub on: Vec<Weekday>,
    /// Days of month for monthly rules (1,15,31)
    #[arg(long, requires = "every", value_delimiter = ',')]
    pub day: Vec<u32>,
    /// Last date of the series, inclusive (e.g. '2025-12-31')
    #[arg(long, requires = "every")]
    pub until: Option<String>,
}

impl Every {
    pub fn to_rule(self, interval: u32, on: &[Weekday], days: &[u32], until: Option<NaiveDate>) -> RecurrenceRule {
        let rule = match self {
            Every::Daily => RecurrenceRule::daily(interval),
            Every::Weekly => RecurrenceRule::weekly(interval, on.iter().copied()),
            Every::Monthly => RecurrenceRule::monthly(interval, days.iter().copied()),
            Every::Weekdays => RecurrenceRule::weekly(
                interval,
                [
                    Weekday::Monday,
                    Weekday::Tuesday,
                    Weekday::Wednesday,
                    Weekday::Thursday,
                    Weekday::Friday,
                ],
            ),
        };
        match until {
            Some(end_date) => rule.until(end_date),
            None => rule,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    /// The title of the event
    pub title: String,
    /// When the event starts (e.g. '2025-01-06 09:00', 'tomorrow 3pm')
    #[arg(short, long)]
    pub start: String,
    /// Length in minutes
    #[arg(long, default_value_t = 60, conflicts_with = "end")]
    pub duration: i64,
    /// When the event ends, instead of --duration
    #[arg(short, long)]
    pub end: Option<String>,
    /// The description of the event
    #[arg(short, long)]
    pub description: Option<String>,
    /// Display color (e.g. '#3366ff')
    #[arg(long)]
    pub color: Option<String>,
    #[command(flatten)]
    pub rule: RuleArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// First day to show (default: today)
    #[arg(long)]
    pub from: Option<String>,
    /// Last day to show, inclusive (default: a week after --from)
    #[arg(long)]
    pub to: Option<String>,
    /// Show subtask progress for every occurrence
    #[arg(long)]
    pub subtasks: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct MoveCommand {
    /// Occurrence ID (e.g. '12' or '7_2025-01-13')
    pub id: String,
    /// New start time
    #[arg(long)]
    pub to: String,
    /// New length in minutes (default: keep the current length)
    #[arg(long)]
    pub duration: Option<i64>,
}

#[derive(Parser, Debug, Clone)]
pub struct EditCommand {
    /// Occurrence ID
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, conflicts_with = "description")]
    pub description_clear: bool,

    #[arg(long)]
    pub color: Option<String>,
    #[arg(long, conflicts_with = "color")]
    pub color_clear: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct DeleteCommand {
    /// Occurrence ID
    pub id: String,
    /// Delete the whole series instead of this day only
    #[arg(long)]
    pub series: bool,
    /// Delete without confirmation
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct RestoreCommand {
    /// Series ID
    pub series_id: i64,
    /// The deleted date (YYYY-MM-DD)
    pub date: String,
}

#[derive(Parser, Debug, Clone)]
pub struct RecurCommand {
    /// Occurrence ID
    pub id: String,
    #[command(flatten)]
    pub rule: RuleArgs,
    /// Remove the recurrence
    #[arg(long, conflicts_with = "every")]
    pub clear: bool,
    /// Change the rule of the whole series instead of starting a new one here
    #[arg(long)]
    pub series: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct LiberateCommand {
    /// Occurrence ID of a series occurrence
    pub id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct SubtaskCommand {
    #[command(subcommand)]
    pub command: SubtaskSubcommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubtaskSubcommand {
    /// Add a subtask
    Add(SubtaskAddCommand),
    /// List the subtasks of an occurrence
    List(SubtaskListCommand),
    /// Flip the completion of a subtask on this occurrence
    Toggle(SubtaskToggleCommand),
    /// Change the text of a subtask
    Edit(SubtaskEditCommand),
    /// Remove a subtask
    Remove(SubtaskRemoveCommand),
}

#[derive(Parser, Debug, Clone)]
pub struct SubtaskAddCommand {
    /// Occurrence ID
    pub id: String,
    /// Subtask text
    pub text: String,
    /// Where the change applies on recurring events (this|series)
    #[arg(long)]
    pub scope: Option<EditScope>,
}

#[derive(Parser, Debug, Clone)]
pub struct SubtaskListCommand {
    /// Occurrence ID
    pub id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct SubtaskToggleCommand {
    /// Occurrence ID
    pub id: String,
    /// Position in `subtask list` (1-based)
    pub index: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct SubtaskEditCommand {
    /// Occurrence ID
    pub id: String,
    /// Position in `subtask list` (1-based)
    pub index: usize,
    /// New text
    pub text: String,
    /// Where the change applies on recurring events (this|series)
    #[arg(long)]
    pub scope: Option<EditScope>,
}

#[derive(Parser, Debug, Clone)]
pub struct SubtaskRemoveCommand {
    /// Occurrence ID
    pub id: String,
    /// Position in `subtask list` (1-based)
    pub index: usize,
    /// Where the change applies on recurring events (this|series)
    #[arg(long)]
    pub scope: Option<EditScope>,
}

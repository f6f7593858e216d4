pub mod add;
pub mod delete;
pub mod edit;
pub mod liberate;
pub mod list;
pub mod r#move;
pub mod recurrence;
pub mod restore;
pub mod subtask;

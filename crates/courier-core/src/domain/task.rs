//! Task model: the unit of actionable work owned by a tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::DispatchError;
use super::ids::{TaskId, TenantId};

const MAX_TITLE_LEN: usize = 500;
const MAX_DOMAIN_LEN: usize = 64;
pub const DEFAULT_DOMAIN: &str = "personal";

/// Task status.
///
/// - `inbox`: captured, or blocked on unfinished dependencies
/// - `next`: ready to be dispatched
/// - `completed` / `cancelled`: terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Inbox,
    Next,
    Scheduled,
    Waiting,
    Someday,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Inbox => "inbox",
            TaskStatus::Next => "next",
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Someday => "someday",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal success: the only state that satisfies a `blocks` edge.
    pub fn is_terminal_success(self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "inbox" => TaskStatus::Inbox,
            "next" => TaskStatus::Next,
            "scheduled" => TaskStatus::Scheduled,
            "waiting" => TaskStatus::Waiting,
            "someday" => TaskStatus::Someday,
            "completed" => TaskStatus::Completed,
            "cancelled" => TaskStatus::Cancelled,
            other => {
                return Err(DispatchError::InvalidInput(format!(
                    "unknown task status '{other}'"
                )));
            }
        })
    }
}

/// Urgency or importance score, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Result<Self, DispatchError> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(DispatchError::InvalidInput(format!(
                "rating must be within {}..={}, got {value}",
                Self::MIN,
                Self::MAX
            )));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Rating {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<u8> for Rating {
    type Error = DispatchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(value: Rating) -> Self {
        value.0
    }
}

/// A stored task. `title` and `description` hold whatever the store holds,
/// which may be ciphertext; the dispatch engine decrypts them through a
/// `FieldCipher` only when snapshotting an entry context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub tenant: TenantId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub urgency: Rating,
    pub importance: Rating,
    pub domain: String,
    pub due_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub urgency: Rating,
    #[serde(default)]
    pub importance: Rating,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            urgency: Rating::default(),
            importance: Rating::default(),
            domain: default_domain(),
            due_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_ratings(mut self, urgency: Rating, importance: Rating) -> Self {
        self.urgency = urgency;
        self.importance = importance;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_due(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        validate_title(&self.title)?;
        validate_domain(&self.domain)
    }
}

fn validate_title(title: &str) -> Result<(), DispatchError> {
    if title.trim().is_empty() {
        return Err(DispatchError::InvalidInput("task.title must not be empty".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(DispatchError::InvalidInput("task.title is too long".into()));
    }
    Ok(())
}

fn validate_domain(domain: &str) -> Result<(), DispatchError> {
    if domain.trim().is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return Err(DispatchError::InvalidInput(
            "task.domain must be 1..=64 characters".into(),
        ));
    }
    Ok(())
}

/// One column assignment of a partial task update.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskField {
    Title(String),
    Description(String),
    Urgency(Rating),
    Importance(Rating),
    Domain(String),
    Due(Option<DateTime<Utc>>),
    Status(TaskStatus),
}

impl TaskField {
    /// Column written by this field. The store only ever renders these names.
    pub fn column(&self) -> &'static str {
        match self {
            TaskField::Title(_) => "title",
            TaskField::Description(_) => "description",
            TaskField::Urgency(_) => "urgency",
            TaskField::Importance(_) => "importance",
            TaskField::Domain(_) => "domain",
            TaskField::Due(_) => "due_at_ms",
            TaskField::Status(_) => "status",
        }
    }
}

/// Validated set of field changes for a task.
///
/// Built with `TaskPatch::builder()`; each field may be set at most once and
/// values are checked on `build()`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskPatch {
    fields: Vec<TaskField>,
}

impl TaskPatch {
    pub fn builder() -> TaskPatchBuilder {
        TaskPatchBuilder::default()
    }

    pub fn fields(&self) -> &[TaskField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TaskPatchBuilder {
    fields: Vec<TaskField>,
}

impl TaskPatchBuilder {
    fn set(mut self, field: TaskField) -> Self {
        self.fields.retain(|f| f.column() != field.column());
        self.fields.push(field);
        self
    }

    pub fn title(self, title: impl Into<String>) -> Self {
        self.set(TaskField::Title(title.into()))
    }

    pub fn description(self, description: impl Into<String>) -> Self {
        self.set(TaskField::Description(description.into()))
    }

    pub fn urgency(self, urgency: Rating) -> Self {
        self.set(TaskField::Urgency(urgency))
    }

    pub fn importance(self, importance: Rating) -> Self {
        self.set(TaskField::Importance(importance))
    }

    pub fn domain(self, domain: impl Into<String>) -> Self {
        self.set(TaskField::Domain(domain.into()))
    }

    pub fn due(self, due_at: Option<DateTime<Utc>>) -> Self {
        self.set(TaskField::Due(due_at))
    }

    pub fn status(self, status: TaskStatus) -> Self {
        self.set(TaskField::Status(status))
    }

    pub fn build(self) -> Result<TaskPatch, DispatchError> {
        for field in &self.fields {
            match field {
                TaskField::Title(t) => validate_title(t)?,
                TaskField::Domain(d) => validate_domain(d)?,
                _ => {}
            }
        }
        Ok(TaskPatch {
            fields: self.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bounds() {
        assert!(Rating::new(0).is_err());
        assert!(Rating::new(6).is_err());
        assert_eq!(Rating::new(5).unwrap().get(), 5);
        assert!(serde_json::from_str::<Rating>("9").is_err());
    }

    #[test]
    fn status_text_round_trips() {
        for s in [
            TaskStatus::Inbox,
            TaskStatus::Next,
            TaskStatus::Scheduled,
            TaskStatus::Waiting,
            TaskStatus::Someday,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<TaskStatus>().unwrap(), s);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn patch_builder_keeps_last_value_per_field() {
        let patch = TaskPatch::builder()
            .title("first")
            .urgency(Rating::new(2).unwrap())
            .title("second")
            .build()
            .unwrap();
        assert_eq!(patch.fields().len(), 2);
        assert!(patch
            .fields()
            .contains(&TaskField::Title("second".to_string())));
    }

    #[test]
    fn patch_builder_rejects_blank_title() {
        assert!(TaskPatch::builder().title("  ").build().is_err());
    }

    #[test]
    fn new_task_validation() {
        assert!(NewTask::new("write report").validate().is_ok());
        assert!(NewTask::new("").validate().is_err());
        assert!(NewTask::new("x").with_domain("").validate().is_err());
    }
}

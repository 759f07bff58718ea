use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Job-level status stored in the job document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    New,
    Processing,
    Complete,
    Error,
}

/// Status of a single sub-task. Absent or `New` means still outstanding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResponseStatus {
    New,
    Complete,
    Error,
}

impl ResponseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResponseStatus::Complete | ResponseStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccountType {
    Code,
    Phone,
}

/// Utility services a sub-task can check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Utility {
    Electricity,
    Gas,
    GasService,
    Water,
    VivaMts,
    TeamTelecom,
    UCom,
    Ovio,
}

/// Error classification written back for a failed sub-task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
pub enum ErrorKind {
    AccountNotFound,
    PageNavigationFailed,
    SelectorNotFound,
    SessionBuildFailed,
    Unknown,
}

/// Fields scraped from a billing portal. Which ones are present depends on
/// the utility.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debit_consumption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debit_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debit_full: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub error_kind: ErrorKind,
    pub message: String,
}

/// Error messages written to job documents and logs are capped at this many
/// characters.
pub const MAX_MESSAGE_CHARS: usize = 100;

impl ErrorRecord {
    pub fn new(error_kind: ErrorKind, message: &str) -> Self {
        Self {
            error_kind,
            message: truncate_message(message),
        }
    }
}

/// Cut `message` to [`MAX_MESSAGE_CHARS`] characters.
pub fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_MESSAGE_CHARS).collect()
}

/// Outcome stored in a sub-task's `response` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SubTaskResult {
    Error(ErrorRecord),
    Fields(ExtractedFields),
}

/// One account check inside a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubTask {
    pub account: String,
    pub account_type: AccountType,
    #[serde(default)]
    pub city: Option<String>,
    pub utility: Utility,
    #[serde(default)]
    pub status_response: Option<ResponseStatus>,
    #[serde(default)]
    pub response: Option<SubTaskResult>,
}

impl SubTask {
    pub fn is_resolved(&self) -> bool {
        self.status_response.is_some_and(ResponseStatus::is_terminal)
    }
}

/// A batch request as stored in Redis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub owner_id: String,
    pub job_status: JobStatus,
    pub notify: bool,
    pub first_check: bool,
    pub data: Vec<SubTask>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// True once no sub-task is outstanding.
    pub fn is_complete(&self) -> bool {
        self.data.iter().all(SubTask::is_resolved)
    }

    pub fn outstanding(&self) -> usize {
        self.data.iter().filter(|s| !s.is_resolved()).count()
    }

    pub fn subtask_mut(&mut self, account: &str) -> Option<&mut SubTask> {
        self.data.iter_mut().find(|s| s.account == account)
    }

    /// Flip the job to `Complete` when nothing is outstanding. A job already
    /// marked `Error` keeps that status. Returns true if the status changed.
    pub fn refresh_completion(&mut self) -> bool {
        if self.job_status == JobStatus::Complete || self.job_status == JobStatus::Error {
            return false;
        }
        if self.is_complete() {
            self.job_status = JobStatus::Complete;
            return true;
        }
        false
    }

    /// Queue payloads, one per sub-task.
    pub fn payloads(&self) -> Vec<SubTaskPayload> {
        self.data
            .iter()
            .map(|s| SubTaskPayload {
                job_id: self.job_id.clone(),
                account: s.account.clone(),
                account_type: s.account_type,
                city: s.city.clone(),
                utility: s.utility,
                first_check: self.first_check,
            })
            .collect()
    }
}

/// Payload carried inside a queue envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubTaskPayload {
    pub job_id: String,
    pub account: String,
    pub account_type: AccountType,
    #[serde(default)]
    pub city: Option<String>,
    pub utility: Utility,
    #[serde(default)]
    pub first_check: bool,
}

/// Short opaque id used for jobs and sub-task envelopes.
pub fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Accepts `true`/`false` as well as the legacy `"1"`/`"0"` flags.
pub fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(n) => Err(serde::de::Error::custom(format!("invalid flag value: {n}"))),
        Flag::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!("invalid flag value: {other}"))),
        },
    }
}

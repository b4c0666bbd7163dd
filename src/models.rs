//! Data models for Haven.
//!
//! This module defines the core entities: Task (with links, tags, priority)
//! and the vault payload types (VaultRecord, VaultEntry).
//!
//! Wire encoding matches the worker API: camelCase field names and
//! epoch-millisecond timestamps. The due-date field historically appeared as
//! both `dueDate` and `due_date` across API iterations; the serde boundary
//! accepts both spellings but the crate keeps exactly one in-memory
//! representation (`due_date: Option<DateTime<Utc>>`).

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HavenError;

/// Task priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for Priority {
    type Err = HavenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(HavenError::validation(
                "priority",
                format!("unknown priority: {}", s),
            )),
        }
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

/// Best-effort metadata scraped from a linked page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPreview {
    pub title: String,
    pub description: String,
    pub image: String,
}

/// A URL attached to a task, optionally with scraped preview metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLink {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<LinkPreview>,
}

impl TaskLink {
    /// Create a link with no preview (the fetcher may fill one in later)
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            preview: None,
        }
    }
}

/// A task record.
///
/// The client replica is the working copy; the remote store is the system
/// of record. Ids are opaque strings (the server may assign its own).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(
        rename = "dueDate",
        alias = "due_date",
        default,
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub links: Vec<TaskLink>,
}

impl Task {
    /// Apply a field-level patch. Fields absent from the patch are preserved.
    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(text) = &patch.text {
            self.text = text.clone();
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        if let Some(color) = &patch.color {
            self.color = Some(color.clone());
        }
        if let Some(notes) = &patch.notes {
            self.notes = Some(notes.clone());
        }
        if let Some(links) = &patch.links {
            self.links = links.clone();
        }
    }
}

/// Fields for creating a new task. Everything except `text` is optional.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub text: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub color: Option<String>,
    pub notes: Option<String>,
    pub links: Vec<TaskLink>,
}

impl TaskDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Materialize the draft into a Task with a fresh id and creation time
    pub fn into_task(self, created_at: DateTime<Utc>) -> Task {
        Task {
            id: Uuid::now_v7().to_string(),
            text: self.text,
            completed: false,
            created_at,
            due_date: self.due_date,
            priority: self.priority,
            tags: self.tags,
            color: self.color,
            notes: self.notes,
            links: self.links,
        }
    }
}

/// A field-level update to an existing task.
///
/// `None` means "leave unchanged". For `due_date` the outer Option is the
/// changed/unchanged flag and the inner Option clears the date.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub text: Option<String>,
    pub completed: Option<bool>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
    pub color: Option<String>,
    pub notes: Option<String>,
    pub links: Option<Vec<TaskLink>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.completed.is_none()
            && self.due_date.is_none()
            && self.priority.is_none()
            && self.tags.is_none()
            && self.color.is_none()
            && self.notes.is_none()
            && self.links.is_none()
    }
}

/// Sync state of a record in the local replica, from the client's view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// A mutation has been dispatched but the remote store has not confirmed it
    Pending,
    /// The remote store has confirmed the last mutation
    Synced,
}

/// One credential in the password vault.
///
/// Held in decrypted form only for the lifetime of an unlocked session;
/// never persisted unencrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: String,
    pub title: String,
    pub username: String,
    #[serde(rename = "password")]
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl VaultEntry {
    pub fn new(
        title: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            title: title.into(),
            username: username.into(),
            secret: secret.into(),
            url: None,
            notes: None,
            tags: BTreeSet::new(),
        }
    }

    /// Generate a random password from letters, digits and symbols
    pub fn generate_secret(length: usize) -> String {
        const CHARSET: &[u8] =
            b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()_+";
        let mut rng = OsRng;
        (0..length)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect()
    }
}

/// The whole password vault: the opaque payload the codec encrypts.
///
/// The codec itself never looks inside; this type exists for the callers
/// that hold the decrypted vault in memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VaultRecord {
    #[serde(default)]
    pub entries: Vec<VaultEntry>,
}

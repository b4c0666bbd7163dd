//! Input validation for Haven.
//!
//! Validators for user input, intended to run before a network call is made.
//! All validators return HavenError::Validation on failure.
//!
//! Note: SyncedCollection itself does not call these on create/update; the
//! UI layer is expected to validate drafts first, matching the original
//! application's behavior.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{HavenError, HavenResult};

pub const MAX_TASK_TEXT_LENGTH: usize = 1_000;
pub const MAX_NOTES_LENGTH: usize = 10_000;
pub const MAX_TAG_LENGTH: usize = 100;
pub const MAX_TAGS_PER_TASK: usize = 20;

/// Parse a user-supplied due date.
///
/// Accepts RFC 3339 ("2025-06-01T09:00:00Z"), a bare date ("2025-06-01",
/// interpreted as midnight UTC), or epoch milliseconds as a decimal string.
pub fn parse_due_date(value: &str) -> HavenResult<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return Err(HavenError::validation("due_date", "date is empty"));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| HavenError::validation("due_date", "invalid date"))?;
        return Ok(DateTime::from_naive_utc_and_offset(midnight, Utc));
    }

    if let Ok(millis) = value.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp_millis(millis) {
            return Ok(dt);
        }
    }

    Err(HavenError::validation(
        "due_date",
        format!("unparseable date: {}", value),
    ))
}

/// Validate task text before creating or editing a task
pub fn validate_task_text(text: &str) -> HavenResult<()> {
    if text.trim().is_empty() {
        return Err(HavenError::validation("text", "task text is empty"));
    }
    if text.len() > MAX_TASK_TEXT_LENGTH {
        return Err(HavenError::validation(
            "text",
            format!("task text exceeds {} characters", MAX_TASK_TEXT_LENGTH),
        ));
    }
    Ok(())
}

/// Validate free-form notes attached to a task or vault entry
pub fn validate_notes(notes: &str) -> HavenResult<()> {
    if notes.len() > MAX_NOTES_LENGTH {
        return Err(HavenError::validation(
            "notes",
            format!("notes exceed {} characters", MAX_NOTES_LENGTH),
        ));
    }
    Ok(())
}

/// Validate a single tag name
pub fn validate_tag(tag: &str) -> HavenResult<()> {
    if tag.trim().is_empty() {
        return Err(HavenError::validation("tag", "tag is empty"));
    }
    if tag.len() > MAX_TAG_LENGTH {
        return Err(HavenError::validation(
            "tag",
            format!("tag exceeds {} characters", MAX_TAG_LENGTH),
        ));
    }
    Ok(())
}

/// Validate a tag set as a whole
pub fn validate_tags(tags: &[String]) -> HavenResult<()> {
    if tags.len() > MAX_TAGS_PER_TASK {
        return Err(HavenError::validation(
            "tags",
            format!("more than {} tags", MAX_TAGS_PER_TASK),
        ));
    }
    for tag in tags {
        validate_tag(tag)?;
    }
    Ok(())
}

/// Validate a URL attached to a task link or vault entry.
///
/// Only http and https schemes are accepted; the link-preview fetcher will
/// never be pointed at anything else.
pub fn validate_link_url(url: &str) -> HavenResult<()> {
    if url.is_empty() {
        return Err(HavenError::validation("url", "url is empty"));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(HavenError::validation(
            "url",
            "url must start with http:// or https://",
        ));
    }
    Ok(())
}

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::metadata::Metadata;
use crate::entity::{contains_ci, require_text, SyncEntity, ValidationError};

const MAX_TITLE_CHARS: usize = 200;
const MAX_DURATION_MINUTES: u32 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalCategory {
    DailyCare,
    Feeding,
    Health,
    Training,
    Showing,
    Grooming,
    Veterinary,
    RecordKeeping,
    Other,
}

impl JournalCategory {
    pub const ALL: [JournalCategory; 9] = [
        JournalCategory::DailyCare,
        JournalCategory::Feeding,
        JournalCategory::Health,
        JournalCategory::Training,
        JournalCategory::Showing,
        JournalCategory::Grooming,
        JournalCategory::Veterinary,
        JournalCategory::RecordKeeping,
        JournalCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JournalCategory::DailyCare => "daily_care",
            JournalCategory::Feeding => "feeding",
            JournalCategory::Health => "health",
            JournalCategory::Training => "training",
            JournalCategory::Showing => "showing",
            JournalCategory::Grooming => "grooming",
            JournalCategory::Veterinary => "veterinary",
            JournalCategory::RecordKeeping => "record_keeping",
            JournalCategory::Other => "other",
        }
    }
}

impl fmt::Display for JournalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JournalCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        JournalCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                let valid: Vec<&str> = JournalCategory::ALL.iter().map(|c| c.as_str()).collect();
                format!(
                    "Invalid category '{}'. Valid options: {}",
                    s,
                    valid.join(", ")
                )
            })
    }
}

/// A livestock-care journal entry written by a student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub category: JournalCategory,
    pub entry_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    /// Animal this entry is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animal_id: Option<String>,
    #[serde(default)]
    pub ffa_standards: Vec<String>,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl JournalEntry {
    pub fn new(title: impl Into<String>, category: JournalCategory) -> Self {
        Self {
            title: title.into(),
            content: String::new(),
            category,
            entry_date: Utc::now().date_naive(),
            duration_minutes: None,
            animal_id: None,
            ffa_standards: Vec::new(),
            objectives: Vec::new(),
            tags: Vec::new(),
            metadata: Metadata::default(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_entry_date(mut self, date: NaiveDate) -> Self {
        self.entry_date = date;
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn with_animal(mut self, animal_id: impl Into<String>) -> Self {
        self.animal_id = Some(animal_id.into());
        self
    }

    pub fn with_ffa_standards(mut self, standards: Vec<String>) -> Self {
        self.ffa_standards = standards;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f, "{}", "=".repeat(self.title.chars().count()))?;
        writeln!(f, "Date:     {}", self.entry_date)?;
        writeln!(f, "Category: {}", self.category)?;

        if let Some(minutes) = self.duration_minutes {
            writeln!(f, "Duration: {} min", minutes)?;
        }
        if let Some(animal) = &self.animal_id {
            writeln!(f, "Animal:   {}", animal)?;
        }
        if !self.ffa_standards.is_empty() {
            writeln!(f, "FFA standards: {}", self.ffa_standards.join(", "))?;
        }
        if !self.tags.is_empty() {
            writeln!(f, "Tags: {}", self.tags.join(", "))?;
        }
        if !self.content.is_empty() {
            writeln!(f, "\n{}", self.content)?;
        }

        Ok(())
    }
}

/// Fields that can be changed on an existing entry.
///
/// `None` leaves a field alone. For optional fields, `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct JournalEntryPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<JournalCategory>,
    pub entry_date: Option<NaiveDate>,
    pub duration_minutes: Option<Option<u32>>,
    pub animal_id: Option<Option<String>>,
    pub ffa_standards: Option<Vec<String>>,
    pub objectives: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<JournalCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
}

impl SyncEntity for JournalEntry {
    const KIND: &'static str = "journal_entries";
    const ENRICH: bool = true;
    type Patch = JournalEntryPatch;
    type Filter = JournalFilter;

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title, MAX_TITLE_CHARS)?;
        if let Some(minutes) = self.duration_minutes {
            if minutes > MAX_DURATION_MINUTES {
                return Err(ValidationError::new(
                    "duration_minutes",
                    format!("must be at most {}", MAX_DURATION_MINUTES),
                ));
            }
        }
        if self.ffa_standards.iter().any(|s| s.trim().is_empty()) {
            return Err(ValidationError::new(
                "ffa_standards",
                "must not contain empty codes",
            ));
        }
        self.metadata.validate()
    }

    fn apply_patch(&mut self, patch: JournalEntryPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(date) = patch.entry_date {
            self.entry_date = date;
        }
        if let Some(minutes) = patch.duration_minutes {
            self.duration_minutes = minutes;
        }
        if let Some(animal_id) = patch.animal_id {
            self.animal_id = animal_id;
        }
        if let Some(standards) = patch.ffa_standards {
            self.ffa_standards = standards;
        }
        if let Some(objectives) = patch.objectives {
            self.objectives = objectives;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = metadata;
        }
    }

    fn matches_filter(&self, filter: &JournalFilter) -> bool {
        filter.category.map_or(true, |c| c == self.category)
            && filter
                .animal_id
                .as_ref()
                .map_or(true, |id| self.animal_id.as_ref() == Some(id))
            && filter.from.map_or(true, |from| self.entry_date >= from)
            && filter.to.map_or(true, |to| self.entry_date <= to)
    }

    fn matches_query(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        contains_ci(&self.title, &needle)
            || contains_ci(&self.content, &needle)
            || self.tags.iter().any(|t| contains_ci(t, &needle))
    }

    fn ordering(&self, other: &Self) -> Ordering {
        other.entry_date.cmp(&self.entry_date)
    }
}

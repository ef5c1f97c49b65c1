use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::metadata::Metadata;
use crate::entity::{contains_ci, require_text, SyncEntity, ValidationError};

const MAX_NAME_CHARS: usize = 100;
const MAX_WEIGHT_LBS: f64 = 5000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Species {
    Cattle,
    Swine,
    Sheep,
    Goat,
    Poultry,
    Rabbit,
    Horse,
    Other,
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Species::Cattle => write!(f, "cattle"),
            Species::Swine => write!(f, "swine"),
            Species::Sheep => write!(f, "sheep"),
            Species::Goat => write!(f, "goat"),
            Species::Poultry => write!(f, "poultry"),
            Species::Rabbit => write!(f, "rabbit"),
            Species::Horse => write!(f, "horse"),
            Species::Other => write!(f, "other"),
        }
    }
}

impl FromStr for Species {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cattle" | "beef" | "dairy" => Ok(Species::Cattle),
            "swine" | "pig" | "hog" => Ok(Species::Swine),
            "sheep" | "lamb" => Ok(Species::Sheep),
            "goat" => Ok(Species::Goat),
            "poultry" | "chicken" => Ok(Species::Poultry),
            "rabbit" => Ok(Species::Rabbit),
            "horse" => Ok(Species::Horse),
            "other" => Ok(Species::Other),
            _ => Err(format!(
                "Invalid species '{}'. Valid options: cattle, swine, sheep, goat, poultry, rabbit, horse, other",
                s
            )),
        }
    }
}

/// A project animal owned or cared for by a student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimalRecord {
    pub name: String,
    pub species: Species,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_lbs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_price: Option<f64>,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl AnimalRecord {
    pub fn new(name: impl Into<String>, species: Species) -> Self {
        Self {
            name: name.into(),
            species,
            breed: None,
            tag_number: None,
            sex: None,
            birth_date: None,
            weight_lbs: None,
            purchase_price: None,
            notes: String::new(),
            metadata: Metadata::default(),
        }
    }

    pub fn with_breed(mut self, breed: impl Into<String>) -> Self {
        self.breed = Some(breed.into());
        self
    }

    pub fn with_tag_number(mut self, tag: impl Into<String>) -> Self {
        self.tag_number = Some(tag.into());
        self
    }

    pub fn with_birth_date(mut self, date: NaiveDate) -> Self {
        self.birth_date = Some(date);
        self
    }

    pub fn with_weight(mut self, pounds: f64) -> Self {
        self.weight_lbs = Some(pounds);
        self
    }

    pub fn with_purchase_price(mut self, price: f64) -> Self {
        self.purchase_price = Some(price);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

impl fmt::Display for AnimalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.name, self.species)?;
        writeln!(f, "{}", "=".repeat(self.name.chars().count()))?;

        if let Some(breed) = &self.breed {
            writeln!(f, "Breed:  {}", breed)?;
        }
        if let Some(tag) = &self.tag_number {
            writeln!(f, "Tag:    {}", tag)?;
        }
        if let Some(date) = &self.birth_date {
            writeln!(f, "Born:   {}", date)?;
        }
        if let Some(weight) = self.weight_lbs {
            writeln!(f, "Weight: {} lbs", weight)?;
        }
        if let Some(price) = self.purchase_price {
            writeln!(f, "Purchase price: ${:.2}", price)?;
        }
        if !self.notes.is_empty() {
            writeln!(f, "\n{}", self.notes)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnimalPatch {
    pub name: Option<String>,
    pub species: Option<Species>,
    /// `Some(None)` clears the breed; likewise for the other optional fields.
    pub breed: Option<Option<String>>,
    pub tag_number: Option<Option<String>>,
    pub birth_date: Option<Option<NaiveDate>>,
    pub weight_lbs: Option<Option<f64>>,
    pub purchase_price: Option<Option<f64>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimalFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub species: Option<Species>,
}

impl SyncEntity for AnimalRecord {
    const KIND: &'static str = "animals";
    type Patch = AnimalPatch;
    type Filter = AnimalFilter;

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name, MAX_NAME_CHARS)?;
        if let Some(weight) = self.weight_lbs {
            if !weight.is_finite() || weight <= 0.0 || weight > MAX_WEIGHT_LBS {
                return Err(ValidationError::new(
                    "weight_lbs",
                    format!("must be greater than 0 and at most {}", MAX_WEIGHT_LBS),
                ));
            }
        }
        if let Some(price) = self.purchase_price {
            if !price.is_finite() || price < 0.0 {
                return Err(ValidationError::new(
                    "purchase_price",
                    "must not be negative",
                ));
            }
        }
        if let Some(born) = self.birth_date {
            if born > Utc::now().date_naive() {
                return Err(ValidationError::new(
                    "birth_date",
                    "must not be in the future",
                ));
            }
        }
        self.metadata.validate()
    }

    fn apply_patch(&mut self, patch: AnimalPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(species) = patch.species {
            self.species = species;
        }
        if let Some(breed) = patch.breed {
            self.breed = breed;
        }
        if let Some(tag) = patch.tag_number {
            self.tag_number = tag;
        }
        if let Some(date) = patch.birth_date {
            self.birth_date = date;
        }
        if let Some(weight) = patch.weight_lbs {
            self.weight_lbs = weight;
        }
        if let Some(price) = patch.purchase_price {
            self.purchase_price = price;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
    }

    fn matches_filter(&self, filter: &AnimalFilter) -> bool {
        filter.species.map_or(true, |s| s == self.species)
    }

    fn matches_query(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        contains_ci(&self.name, &needle)
            || contains_ci(&self.notes, &needle)
            || self
                .breed
                .as_deref()
                .is_some_and(|b| contains_ci(b, &needle))
            || self
                .tag_number
                .as_deref()
                .is_some_and(|t| contains_ci(t, &needle))
    }

    fn ordering(&self, other: &Self) -> Ordering {
        self.name.to_lowercase().cmp(&other.name.to_lowercase())
    }
}

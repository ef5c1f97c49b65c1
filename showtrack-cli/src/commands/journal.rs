use chrono::NaiveDate;
use clap::{Args, Subcommand};
use showtrack_core::{
    EntityId, JournalCategory, JournalEntry, JournalEntryPatch, JournalFilter, JournalService,
    Location, Metadata, Record, Weather,
};
use tokio_util::sync::CancellationToken;

use super::{
    clearable, confirm, print_delete_outcome, print_json, print_sync_details, split_list,
    status_label, OutputFormat,
};

#[derive(Args)]
pub struct JournalCommand {
    #[command(subcommand)]
    pub command: JournalSubcommand,
}

/// Weather and location recorded with an entry.
#[derive(Args, Clone, Default)]
pub struct ConditionArgs {
    /// Temperature in degrees Fahrenheit
    #[arg(long, allow_negative_numbers = true)]
    temperature: Option<f64>,

    /// Weather condition (e.g., "sunny")
    #[arg(long)]
    weather: Option<String>,

    /// Relative humidity in percent
    #[arg(long)]
    humidity: Option<f64>,

    /// Latitude of where the entry was recorded
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Longitude of where the entry was recorded
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    lon: Option<f64>,

    /// Place name for the location
    #[arg(long = "place", requires = "lat")]
    place: Option<String>,
}

impl ConditionArgs {
    fn metadata(&self) -> Option<Metadata> {
        let weather = (self.temperature.is_some()
            || self.weather.is_some()
            || self.humidity.is_some())
        .then(|| Weather {
            temperature_f: self.temperature,
            condition: self.weather.clone(),
            humidity_pct: self.humidity,
        });
        let location = match (self.lat, self.lon) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
                name: self.place.clone(),
            }),
            _ => None,
        };

        if weather.is_none() && location.is_none() {
            return None;
        }
        Some(Metadata {
            weather,
            location,
            ..Metadata::default()
        })
    }
}

#[derive(Subcommand)]
pub enum JournalSubcommand {
    /// Record a new journal entry
    Create {
        /// Entry title
        title: String,

        /// Entry body
        #[arg(long, short = 'b')]
        content: Option<String>,

        /// Category (daily_care, feeding, health, training, showing, grooming, veterinary, record_keeping, other)
        #[arg(long, default_value = "daily_care")]
        category: JournalCategory,

        /// Entry date (YYYY-MM-DD, default: today)
        #[arg(long, short)]
        date: Option<NaiveDate>,

        /// Time spent in minutes
        #[arg(long)]
        duration: Option<u32>,

        /// Animal this entry is about
        #[arg(long, short)]
        animal: Option<String>,

        /// FFA standard code (can be repeated or comma-separated)
        #[arg(long = "ffa")]
        ffa_standards: Vec<String>,

        /// Learning objective (can be repeated)
        #[arg(long = "objective")]
        objectives: Vec<String>,

        /// Tag (can be repeated or comma-separated)
        #[arg(long = "tag", short)]
        tags: Vec<String>,

        #[command(flatten)]
        conditions: ConditionArgs,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List journal entries
    List {
        /// Filter by category
        #[arg(long)]
        category: Option<JournalCategory>,

        /// Filter by animal
        #[arg(long, short)]
        animal: Option<String>,

        /// Only entries on or after this date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Only entries on or before this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Maximum number of entries
        #[arg(long, short)]
        limit: Option<usize>,

        /// Entries to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a journal entry
    Show {
        /// Entry ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update a journal entry
    Update {
        /// Entry ID
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New body
        #[arg(long, short = 'b')]
        content: Option<String>,

        /// New category
        #[arg(long)]
        category: Option<JournalCategory>,

        /// New entry date (YYYY-MM-DD)
        #[arg(long, short)]
        date: Option<NaiveDate>,

        /// New duration in minutes
        #[arg(long, conflicts_with = "clear_duration")]
        duration: Option<u32>,

        /// Remove the recorded duration
        #[arg(long)]
        clear_duration: bool,

        /// Associate with an animal
        #[arg(long, short, conflicts_with = "clear_animal")]
        animal: Option<String>,

        /// Remove the animal association
        #[arg(long)]
        clear_animal: bool,

        /// Replace FFA standards (can be repeated or comma-separated)
        #[arg(long = "ffa")]
        ffa_standards: Vec<String>,

        /// Replace learning objectives (can be repeated)
        #[arg(long = "objective")]
        objectives: Vec<String>,

        /// Replace tags (can be repeated or comma-separated)
        #[arg(long = "tag", short)]
        tags: Vec<String>,

        #[command(flatten)]
        conditions: ConditionArgs,
    },

    /// Delete a journal entry
    Delete {
        /// Entry ID
        id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Search the locally held entries
    Search {
        /// Text to look for in title, content and tags
        query: String,

        /// Filter by category
        #[arg(long)]
        category: Option<JournalCategory>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl JournalCommand {
    pub async fn run(
        &self,
        service: &JournalService,
        cancel: &CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            JournalSubcommand::Create {
                title,
                content,
                category,
                date,
                duration,
                animal,
                ffa_standards,
                objectives,
                tags,
                conditions,
                format,
            } => {
                let mut entry = JournalEntry::new(title.clone(), *category)
                    .with_ffa_standards(split_list(ffa_standards))
                    .with_tags(split_list(tags));
                entry.objectives = objectives.clone();
                if let Some(content) = content {
                    entry = entry.with_content(content.clone());
                }
                if let Some(date) = date {
                    entry = entry.with_entry_date(*date);
                }
                if let Some(minutes) = duration {
                    entry = entry.with_duration(*minutes);
                }
                if let Some(animal) = animal {
                    entry = entry.with_animal(animal.clone());
                }
                if let Some(metadata) = conditions.metadata() {
                    entry = entry.with_metadata(metadata);
                }

                let record = service.create_entry(entry, cancel).await?;
                match format {
                    OutputFormat::Json => print_json(&record)?,
                    OutputFormat::Text => {
                        println!("Created journal entry:\n");
                        print_entry(&record);
                    }
                }
                Ok(())
            }

            JournalSubcommand::List {
                category,
                animal,
                from,
                to,
                limit,
                offset,
                format,
            } => {
                let filter = JournalFilter {
                    category: *category,
                    animal_id: animal.clone(),
                    from: *from,
                    to: *to,
                };
                let records = service.get_entries(&filter, *limit, *offset).await?;
                print_entries(&records, format)
            }

            JournalSubcommand::Show { id, format } => {
                let record = service.get_entry(&EntityId::from(id.as_str())).await?;
                match format {
                    OutputFormat::Json => print_json(&record)?,
                    OutputFormat::Text => print_entry(&record),
                }
                Ok(())
            }

            JournalSubcommand::Update {
                id,
                title,
                content,
                category,
                date,
                duration,
                clear_duration,
                animal,
                clear_animal,
                ffa_standards,
                objectives,
                tags,
                conditions,
            } => {
                let ffa_standards = split_list(ffa_standards);
                let tags = split_list(tags);
                let objectives: Vec<String> = objectives
                    .iter()
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect();
                let patch = JournalEntryPatch {
                    title: title.clone(),
                    content: content.clone(),
                    category: *category,
                    entry_date: *date,
                    duration_minutes: clearable(duration, *clear_duration),
                    animal_id: clearable(animal, *clear_animal),
                    ffa_standards: (!ffa_standards.is_empty()).then_some(ffa_standards),
                    objectives: (!objectives.is_empty()).then_some(objectives),
                    tags: (!tags.is_empty()).then_some(tags),
                    metadata: conditions.metadata(),
                };

                if is_empty_patch(&patch) {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let record = service
                    .update_entry(&EntityId::from(id.as_str()), patch, cancel)
                    .await?;
                println!("Updated journal entry:\n");
                print_entry(&record);
                Ok(())
            }

            JournalSubcommand::Delete { id, force } => {
                let id = EntityId::from(id.as_str());

                if !*force {
                    let record = service.get_entry(&id).await?;
                    if !confirm(&format!("Delete journal entry '{}'?", record.payload.title))? {
                        println!("Cancelled.");
                        return Ok(());
                    }
                }

                let outcome = service.delete_entry(&id, cancel).await?;
                print_delete_outcome("journal entry", &id, outcome);
                Ok(())
            }

            JournalSubcommand::Search {
                query,
                category,
                format,
            } => {
                let filter = JournalFilter {
                    category: *category,
                    ..JournalFilter::default()
                };
                let records = service.search_entries(query, &filter).await?;
                print_entries(&records, format)
            }
        }
    }
}

fn is_empty_patch(patch: &JournalEntryPatch) -> bool {
    patch.title.is_none()
        && patch.content.is_none()
        && patch.category.is_none()
        && patch.entry_date.is_none()
        && patch.duration_minutes.is_none()
        && patch.animal_id.is_none()
        && patch.ffa_standards.is_none()
        && patch.objectives.is_none()
        && patch.tags.is_none()
        && patch.metadata.is_none()
}

fn print_entry(record: &Record<JournalEntry>) {
    print!("{}", record.payload);

    let metadata = &record.payload.metadata;
    if let Some(weather) = &metadata.weather {
        let mut parts = Vec::new();
        if let Some(t) = weather.temperature_f {
            parts.push(format!("{:.0}°F", t));
        }
        if let Some(condition) = &weather.condition {
            parts.push(condition.clone());
        }
        if let Some(h) = weather.humidity_pct {
            parts.push(format!("{:.0}% humidity", h));
        }
        println!("Weather:  {}", parts.join(", "));
    }
    if let Some(location) = &metadata.location {
        match &location.name {
            Some(name) => println!(
                "Location: {} ({:.5}, {:.5})",
                name, location.latitude, location.longitude
            ),
            None => println!("Location: {:.5}, {:.5}", location.latitude, location.longitude),
        }
    }

    print_sync_details(record);
}

fn print_entries(
    records: &[Record<JournalEntry>],
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => print_json(records)?,
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No journal entries found.");
                return Ok(());
            }

            println!(
                "{:<42}  {:<10}  {:<14}  {:<8}  TITLE",
                "ID", "DATE", "CATEGORY", "STATUS"
            );
            println!("{}", "-".repeat(100));
            for record in records {
                println!(
                    "{:<42}  {:<10}  {:<14}  {:<8}  {}",
                    record.id.to_string(),
                    record.payload.entry_date.to_string(),
                    record.payload.category.to_string(),
                    status_label(record),
                    record.payload.title
                );
            }
            println!("\nTotal: {} entr{}", records.len(), plural_y(records.len()));
        }
    }
    Ok(())
}

fn plural_y(n: usize) -> &'static str {
    if n == 1 {
        "y"
    } else {
        "ies"
    }
}

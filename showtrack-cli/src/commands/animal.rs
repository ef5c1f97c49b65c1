use chrono::NaiveDate;
use clap::{Args, Subcommand, ValueEnum};
use showtrack_core::{
    AnimalFilter, AnimalPatch, AnimalRecord, AnimalService, EntityId, Record, Species,
};
use tokio_util::sync::CancellationToken;

use super::{
    clearable, confirm, print_delete_outcome, print_json, print_sync_details, status_label,
    OutputFormat,
};

#[derive(Args)]
pub struct AnimalCommand {
    #[command(subcommand)]
    pub command: AnimalSubcommand,
}

/// Optional animal fields that `update --clear` can remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AnimalField {
    Breed,
    TagNumber,
    BirthDate,
    Weight,
    Price,
}

#[derive(Subcommand)]
pub enum AnimalSubcommand {
    /// Register a project animal
    Create {
        /// Animal name
        name: String,

        /// Species (cattle, swine, sheep, goat, poultry, rabbit, horse, other)
        #[arg(long, short)]
        species: Species,

        /// Breed
        #[arg(long)]
        breed: Option<String>,

        /// Ear tag or registration number
        #[arg(long)]
        tag_number: Option<String>,

        /// Sex
        #[arg(long)]
        sex: Option<String>,

        /// Birth date (YYYY-MM-DD)
        #[arg(long)]
        birth_date: Option<NaiveDate>,

        /// Current weight in pounds
        #[arg(long, short)]
        weight: Option<f64>,

        /// Purchase price
        #[arg(long)]
        price: Option<f64>,

        /// Notes
        #[arg(long, short)]
        notes: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List animals
    List {
        /// Filter by species
        #[arg(long, short)]
        species: Option<Species>,

        /// Maximum number of animals
        #[arg(long, short)]
        limit: Option<usize>,

        /// Animals to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show an animal
    Show {
        /// Animal ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update an animal
    Update {
        /// Animal ID
        id: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New species
        #[arg(long, short)]
        species: Option<Species>,

        /// New breed
        #[arg(long)]
        breed: Option<String>,

        /// New tag number
        #[arg(long)]
        tag_number: Option<String>,

        /// New birth date (YYYY-MM-DD)
        #[arg(long)]
        birth_date: Option<NaiveDate>,

        /// New weight in pounds
        #[arg(long, short)]
        weight: Option<f64>,

        /// New purchase price
        #[arg(long)]
        price: Option<f64>,

        /// New notes
        #[arg(long, short)]
        notes: Option<String>,

        /// Remove optional fields (can be repeated or comma-separated)
        #[arg(long, value_enum, value_delimiter = ',')]
        clear: Vec<AnimalField>,
    },

    /// Delete an animal
    Delete {
        /// Animal ID
        id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Search the locally held animals
    Search {
        /// Text to look for in name, breed, tag number and notes
        query: String,

        /// Filter by species
        #[arg(long, short)]
        species: Option<Species>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl AnimalCommand {
    pub async fn run(
        &self,
        service: &AnimalService,
        cancel: &CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            AnimalSubcommand::Create {
                name,
                species,
                breed,
                tag_number,
                sex,
                birth_date,
                weight,
                price,
                notes,
                format,
            } => {
                let mut animal = AnimalRecord::new(name.clone(), *species);
                if let Some(breed) = breed {
                    animal = animal.with_breed(breed.clone());
                }
                if let Some(tag) = tag_number {
                    animal = animal.with_tag_number(tag.clone());
                }
                animal.sex = sex.clone();
                if let Some(date) = birth_date {
                    animal = animal.with_birth_date(*date);
                }
                if let Some(pounds) = weight {
                    animal = animal.with_weight(*pounds);
                }
                if let Some(price) = price {
                    animal = animal.with_purchase_price(*price);
                }
                if let Some(notes) = notes {
                    animal = animal.with_notes(notes.clone());
                }

                let record = service.create_entry(animal, cancel).await?;
                match format {
                    OutputFormat::Json => print_json(&record)?,
                    OutputFormat::Text => {
                        println!("Created animal:\n");
                        print_animal(&record);
                    }
                }
                Ok(())
            }

            AnimalSubcommand::List {
                species,
                limit,
                offset,
                format,
            } => {
                let filter = AnimalFilter { species: *species };
                let records = service.get_entries(&filter, *limit, *offset).await?;
                print_animals(&records, format)
            }

            AnimalSubcommand::Show { id, format } => {
                let record = service.get_entry(&EntityId::from(id.as_str())).await?;
                match format {
                    OutputFormat::Json => print_json(&record)?,
                    OutputFormat::Text => print_animal(&record),
                }
                Ok(())
            }

            AnimalSubcommand::Update {
                id,
                name,
                species,
                breed,
                tag_number,
                birth_date,
                weight,
                price,
                notes,
                clear,
            } => {
                if name.is_none()
                    && species.is_none()
                    && breed.is_none()
                    && tag_number.is_none()
                    && birth_date.is_none()
                    && weight.is_none()
                    && price.is_none()
                    && notes.is_none()
                    && clear.is_empty()
                {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let cleared = |field: AnimalField| clear.contains(&field);
                let patch = AnimalPatch {
                    name: name.clone(),
                    species: *species,
                    breed: clearable(breed, cleared(AnimalField::Breed)),
                    tag_number: clearable(tag_number, cleared(AnimalField::TagNumber)),
                    birth_date: clearable(birth_date, cleared(AnimalField::BirthDate)),
                    weight_lbs: clearable(weight, cleared(AnimalField::Weight)),
                    purchase_price: clearable(price, cleared(AnimalField::Price)),
                    notes: notes.clone(),
                };
                let record = service
                    .update_entry(&EntityId::from(id.as_str()), patch, cancel)
                    .await?;
                println!("Updated animal:\n");
                print_animal(&record);
                Ok(())
            }

            AnimalSubcommand::Delete { id, force } => {
                let id = EntityId::from(id.as_str());

                if !*force {
                    let record = service.get_entry(&id).await?;
                    if !confirm(&format!("Delete animal '{}'?", record.payload.name))? {
                        println!("Cancelled.");
                        return Ok(());
                    }
                }

                let outcome = service.delete_entry(&id, cancel).await?;
                print_delete_outcome("animal", &id, outcome);
                Ok(())
            }

            AnimalSubcommand::Search {
                query,
                species,
                format,
            } => {
                let filter = AnimalFilter { species: *species };
                let records = service.search_entries(query, &filter).await?;
                print_animals(&records, format)
            }
        }
    }
}

fn print_animal(record: &Record<AnimalRecord>) {
    print!("{}", record.payload);
    print_sync_details(record);
}

fn print_animals(
    records: &[Record<AnimalRecord>],
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => print_json(records)?,
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No animals found.");
                return Ok(());
            }

            println!(
                "{:<42}  {:<8}  {:<10}  {:<8}  NAME",
                "ID", "SPECIES", "TAG", "STATUS"
            );
            println!("{}", "-".repeat(90));
            for record in records {
                println!(
                    "{:<42}  {:<8}  {:<10}  {:<8}  {}",
                    record.id.to_string(),
                    record.payload.species.to_string(),
                    record.payload.tag_number.as_deref().unwrap_or("-"),
                    status_label(record),
                    record.payload.name
                );
            }
            println!("\nTotal: {} animal(s)", records.len());
        }
    }
    Ok(())
}

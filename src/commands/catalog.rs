use clap::{Args, Subcommand};
use desertzen_core::{Catalog, Meditation, MeditationLength};
use serde::Serialize;

use super::{load_catalog, CommandError, OutputFormat};
use crate::config::Config;

#[derive(Args)]
pub struct CatalogCommand {
    #[command(subcommand)]
    pub command: CatalogSubcommand,
}

#[derive(Subcommand)]
pub enum CatalogSubcommand {
    /// List meditations
    List {
        /// Only meditations in this category
        #[arg(long)]
        category: Option<String>,

        /// Only featured meditations
        #[arg(long)]
        featured: bool,

        /// Only meditations of this length (5m, 10m, 15m, 30m, 45m)
        #[arg(long)]
        length: Option<MeditationLength>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a meditation's details
    Show {
        /// Meditation ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Search titles and descriptions
    Search {
        /// Text to look for (case-insensitive)
        query: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List categories
    Categories {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Serialize)]
struct CategorySummary<'a> {
    id: &'a str,
    name: &'a str,
    description: &'a str,
    meditations: usize,
    lengths: Vec<MeditationLength>,
}

impl CatalogCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        let catalog = load_catalog(config)?;

        match &self.command {
            CatalogSubcommand::List {
                category,
                featured,
                length,
                format,
            } => {
                let mut meditations: Vec<&Meditation> = match category {
                    Some(category) => {
                        if catalog.category(category).is_none() {
                            return Err(CommandError::UnknownCategory(category.clone()));
                        }
                        catalog.by_category(category)
                    }
                    None if *featured => catalog.featured(),
                    None => catalog.meditations().iter().collect(),
                };
                if *featured {
                    meditations.retain(|meditation| meditation.featured);
                }
                if let Some(length) = length {
                    meditations.retain(|meditation| meditation.length == *length);
                }

                print_list(&meditations, format)
            }

            CatalogSubcommand::Show { id, format } => {
                let meditation = catalog
                    .get_by_id(id)
                    .ok_or_else(|| CommandError::UnknownMeditation(id.clone()))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(meditation)?);
                    }
                    OutputFormat::Text => {
                        println!("{}", meditation);
                    }
                }
                Ok(())
            }

            CatalogSubcommand::Search { query, format } => {
                print_list(&catalog.search(query), format)
            }

            CatalogSubcommand::Categories { format } => {
                let summaries = summarize(&catalog);

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&summaries)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<16}  {:<16}  {:>5}  LENGTHS", "ID", "NAME", "COUNT");
                        println!("{}", "-".repeat(60));
                        for summary in &summaries {
                            let lengths: Vec<String> =
                                summary.lengths.iter().map(|l| l.to_string()).collect();
                            println!(
                                "{:<16}  {:<16}  {:>5}  {}",
                                summary.id,
                                summary.name,
                                summary.meditations,
                                lengths.join(", ")
                            );
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn summarize(catalog: &Catalog) -> Vec<CategorySummary<'_>> {
    catalog
        .categories()
        .iter()
        .map(|category| CategorySummary {
            id: &category.id,
            name: &category.name,
            description: &category.description,
            meditations: catalog.by_category(&category.id).len(),
            lengths: catalog.available_lengths(&category.id),
        })
        .collect()
}

fn print_list(meditations: &[&Meditation], format: &OutputFormat) -> Result<(), CommandError> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(meditations)?);
        }
        OutputFormat::Text => {
            if meditations.is_empty() {
                println!("No meditations found");
                return Ok(());
            }
            print_meditations(meditations);
            println!("\nTotal: {} meditation(s)", meditations.len());
        }
    }
    Ok(())
}

pub(super) fn print_meditations(meditations: &[&Meditation]) {
    println!("{:<4}  {:<40}  {:<16}  LENGTH", "ID", "TITLE", "CATEGORY");
    println!("{}", "-".repeat(72));
    for meditation in meditations {
        let title = if meditation.title.chars().count() > 40 {
            let short: String = meditation.title.chars().take(37).collect();
            format!("{}...", short)
        } else {
            meditation.title.clone()
        };
        let marker = if meditation.featured { " *" } else { "" };
        println!(
            "{:<4}  {:<40}  {:<16}  {}{}",
            meditation.id, title, meditation.category, meditation.length, marker
        );
    }
}

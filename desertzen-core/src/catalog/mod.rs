//! Read-only meditation catalog.
//!
//! The built-in catalog is compiled into the crate from `data/catalog.json`.
//! Other catalogs with the same shape can be loaded from disk.

mod meditation;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub use meditation::{Category, Meditation, MeditationLength};

const BUILTIN_CATALOG: &str = include_str!("../../data/catalog.json");

#[derive(Debug, Deserialize)]
struct CatalogFile {
    categories: Vec<Category>,
    meditations: Vec<Meditation>,
}

/// Meditations and the categories they belong to, in listing order.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    categories: Vec<Category>,
    meditations: Vec<Meditation>,
}

impl Catalog {
    /// Returns the catalog shipped with the app.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    /// Loads a catalog from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).map_err(|e| CatalogError::IoError(path.to_path_buf(), e))?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::new(file.categories, file.meditations)
    }

    /// Builds a catalog, checking that ids are unique and every meditation
    /// belongs to a known category.
    pub fn new(categories: Vec<Category>, meditations: Vec<Meditation>) -> Result<Self, CatalogError> {
        let mut category_ids = HashSet::new();
        for category in &categories {
            if !category_ids.insert(category.id.as_str()) {
                return Err(CatalogError::DuplicateCategory(category.id.clone()));
            }
        }

        let mut meditation_ids = HashSet::new();
        for meditation in &meditations {
            if !meditation_ids.insert(meditation.id.as_str()) {
                return Err(CatalogError::DuplicateMeditation(meditation.id.clone()));
            }
            if !category_ids.contains(meditation.category.as_str()) {
                return Err(CatalogError::UnknownCategory {
                    meditation: meditation.id.clone(),
                    category: meditation.category.clone(),
                });
            }
        }

        Ok(Self {
            categories,
            meditations,
        })
    }

    pub fn meditations(&self) -> &[Meditation] {
        &self.meditations
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|category| category.id == id)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Meditation> {
        self.meditations.iter().find(|meditation| meditation.id == id)
    }

    /// Meditations in `category`; empty for an unknown category.
    pub fn by_category(&self, category: &str) -> Vec<&Meditation> {
        self.meditations
            .iter()
            .filter(|meditation| meditation.category == category)
            .collect()
    }

    pub fn featured(&self) -> Vec<&Meditation> {
        self.meditations
            .iter()
            .filter(|meditation| meditation.featured)
            .collect()
    }

    /// Case-insensitive search over titles and descriptions.
    pub fn search(&self, query: &str) -> Vec<&Meditation> {
        self.meditations
            .iter()
            .filter(|meditation| meditation.matches(query))
            .collect()
    }

    /// Distinct lengths offered in `category`, shortest first.
    pub fn available_lengths(&self, category: &str) -> Vec<MeditationLength> {
        let mut lengths: Vec<MeditationLength> = self
            .by_category(category)
            .into_iter()
            .map(|meditation| meditation.length)
            .collect();
        lengths.sort();
        lengths.dedup();
        lengths
    }
}

/// Errors that can occur when loading a catalog.
#[derive(Debug)]
pub enum CatalogError {
    IoError(PathBuf, io::Error),
    ParseError(serde_json::Error),
    DuplicateCategory(String),
    DuplicateMeditation(String),
    UnknownCategory { meditation: String, category: String },
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::IoError(path, e) => {
                write!(f, "Failed to read catalog {}: {}", path.display(), e)
            }
            CatalogError::ParseError(e) => write!(f, "Failed to parse catalog: {}", e),
            CatalogError::DuplicateCategory(id) => write!(f, "Duplicate category id: {}", id),
            CatalogError::DuplicateMeditation(id) => write!(f, "Duplicate meditation id: {}", id),
            CatalogError::UnknownCategory {
                meditation,
                category,
            } => write!(
                f,
                "Meditation {} references unknown category: {}",
                meditation, category
            ),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogError::IoError(_, e) => Some(e),
            CatalogError::ParseError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        CatalogError::ParseError(e)
    }
}

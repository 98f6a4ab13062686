use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One occupation document, keyed by its classification code.
///
/// Stage 1 creates these from scraped detail pages; stages 2 and 3 patch
/// extra fields (`hard_skills`/`soft_skills`/`methodology`, then
/// `domain`/`sub_domain`) into the stored JSON without rewriting the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OccupationRecord {
    pub title: String,
    pub source_url: String,
    pub classification_code: String,
    pub associated_titles: Vec<String>,
    pub missions: Vec<String>,
    pub certifications: Vec<String>,
    /// Sub-heading label → items, e.g. "Relation client" → [...].
    pub primary_know_how: BTreeMap<String, Vec<String>>,
    pub secondary_know_how: BTreeMap<String, Vec<String>>,
    pub professional_know_how: Vec<String>,
    pub expertise_areas: Vec<String>,
    pub norms_procedures: Vec<String>,
    pub working_conditions: Vec<String>,
    pub schedule: Vec<String>,
    pub employment_status: Vec<String>,
}

impl OccupationRecord {
    pub fn new(title: &str, source_url: &str, code: &str) -> Self {
        Self {
            title: title.to_string(),
            source_url: source_url.to_string(),
            classification_code: code.to_string(),
            ..Default::default()
        }
    }
}

use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::db;

/// Entries containing any of these (case-insensitive) are generation noise.
const STOP_WORDS: &[&str] = &["transition écologique", "auxiliary", "reverse", "job category"];

/// Per-category cap on accepted entries.
const MAX_ITEMS: usize = 40;

/// The three skill categories patched into each record by stage 2.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillSet {
    pub hard_skills: Vec<String>,
    pub soft_skills: Vec<String>,
    pub methodology: Vec<String>,
}

impl SkillSet {
    pub fn is_empty(&self) -> bool {
        self.hard_skills.is_empty() && self.soft_skills.is_empty() && self.methodology.is_empty()
    }
}

/// The text-generation collaborator. The model behind it is opaque to this
/// crate; implementations receive the record's current skill fields as a
/// seed and return a candidate set.
pub trait SkillGenerator {
    fn generate(&self, title: &str, seed: &SkillSet) -> Result<SkillSet>;
}

/// Returns the seed unchanged. Default when no model is wired in.
pub struct Passthrough;

impl SkillGenerator for Passthrough {
    fn generate(&self, _title: &str, seed: &SkillSet) -> Result<SkillSet> {
        Ok(seed.clone())
    }
}

/// Adapts any plain text-completion function into a [`SkillGenerator`]:
/// prompt from the seed, completion parsed back into categories, seed reused
/// when the output contains no recognizable category.
pub struct CompletionGenerator<F>(pub F);

impl<F> SkillGenerator for CompletionGenerator<F>
where
    F: Fn(&str) -> Result<String>,
{
    fn generate(&self, title: &str, seed: &SkillSet) -> Result<SkillSet> {
        let prompt = build_prompt(title, seed);
        let output = (self.0)(&prompt)?;
        let parsed = parse_generated(&output);
        if parsed.is_empty() {
            Ok(seed.clone())
        } else {
            Ok(parsed)
        }
    }
}

pub fn build_prompt(title: &str, seed: &SkillSet) -> String {
    format!(
        "Generate a structured list of 30 to 40 complementary hard skills, soft skills, \
         and methodologies for the job titled '{}' based on the following job data. \
         Each category should contain a list of unique items.\n\
         \nJob Data:\n\
         Hard Skills: {:?}\n\
         Soft Skills: {:?}\n\
         Methodology: {:?}\n",
        title, seed.hard_skills, seed.soft_skills, seed.methodology
    )
}

/// Parse model output of the form `Hard Skills:` / `Soft Skills:` /
/// `Methodology:` headers followed by `- item` lines. Unknown lines are
/// ignored.
pub fn parse_generated(text: &str) -> SkillSet {
    enum Category {
        Hard,
        Soft,
        Method,
    }

    let mut out = SkillSet::default();
    let mut current: Option<Category> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with("Hard Skills:") {
            current = Some(Category::Hard);
        } else if line.starts_with("Soft Skills:") {
            current = Some(Category::Soft);
        } else if line.starts_with("Methodology:") {
            current = Some(Category::Method);
        } else if let Some(item) = line.strip_prefix('-') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            match current {
                Some(Category::Hard) => out.hard_skills.push(item.to_string()),
                Some(Category::Soft) => out.soft_skills.push(item.to_string()),
                Some(Category::Method) => out.methodology.push(item.to_string()),
                None => {}
            }
        }
    }
    out
}

/// Trim entries, drop anything containing a stop word, cap each category.
pub fn clean_skills(raw: &SkillSet) -> SkillSet {
    SkillSet {
        hard_skills: clean_list(&raw.hard_skills),
        soft_skills: clean_list(&raw.soft_skills),
        methodology: clean_list(&raw.methodology),
    }
}

fn clean_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| {
            let lower = s.to_lowercase();
            !STOP_WORDS.iter().any(|w| lower.contains(w))
        })
        .take(MAX_ITEMS)
        .collect()
}

fn seed_from_doc(doc: &Value) -> SkillSet {
    let list = |field: &str| -> Vec<String> {
        doc.get(field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    SkillSet {
        hard_skills: list("hard_skills"),
        soft_skills: list("soft_skills"),
        methodology: list("methodology"),
    }
}

pub struct SkillStats {
    pub patched: usize,
    pub errors: usize,
}

/// Stage 2: patch generated skill categories into every record that does
/// not carry them yet. A generator failure falls back to the record's own
/// seed, so one bad generation never halts the run.
pub fn run_skills(
    conn: &Connection,
    generator: &dyn SkillGenerator,
    limit: Option<usize>,
) -> Result<SkillStats> {
    let pending = db::fetch_without_skills(conn, limit)?;
    info!("Skills: {} records to enrich", pending.len());

    let mut stats = SkillStats {
        patched: 0,
        errors: 0,
    };

    for (code, doc) in pending {
        let title = doc.get("title").and_then(Value::as_str).unwrap_or_default();
        let seed = seed_from_doc(&doc);

        let generated = match generator.generate(title, &seed) {
            Ok(g) => g,
            Err(e) => {
                warn!("Generation failed for {} ('{}'): {:#}", code, title, e);
                seed.clone()
            }
        };
        let cleaned = clean_skills(&generated);

        let mut set = Map::new();
        set.insert("hard_skills".to_string(), serde_json::json!(cleaned.hard_skills));
        set.insert("soft_skills".to_string(), serde_json::json!(cleaned.soft_skills));
        set.insert("methodology".to_string(), serde_json::json!(cleaned.methodology));

        match db::upsert_fields(conn, &code, &set, &[]) {
            Ok(()) => stats.patched += 1,
            Err(e) => {
                warn!("Patch failed for {}: {:#}", code, e);
                stats.errors += 1;
            }
        }
    }

    info!("Skills: {} patched, {} errors", stats.patched, stats.errors);
    Ok(stats)
}

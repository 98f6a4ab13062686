use std::path::Path;

use anyhow::{bail, Context, Result};
use calamine::{open_workbook, Data, Reader, Xlsx};
use tracing::info;

/// Published URL of the ROME "Arborescence Principale" workbook.
pub const DEFAULT_WORKBOOK_URL: &str = "https://www.francetravail.org/files/live/sites/peorg/files/documents/Statistiques-et-analyses/Open-data/ROME/ROME%20Arborescence%20Principale%2024M11.xlsx";

pub const DEFAULT_WORKBOOK_PATH: &str = "data/rome_arborescence.xlsx";

/// Where each semantic column sits in the sheet. The workbook publishes
/// near-empty header names, so positions are the stable identifiers.
#[derive(Debug, Clone)]
pub struct SheetConfig {
    pub sheet: String,
    pub domain_col: usize,
    pub subdomain_col: usize,
    pub leaf_col: usize,
    pub label_col: usize,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            sheet: "Arbo Principale 25-11-2024".to_string(),
            domain_col: 0,
            subdomain_col: 1,
            leaf_col: 2,
            label_col: 3,
        }
    }
}

/// One spreadsheet row. Empty string means the cell was blank.
///
/// Row kinds: domain heading (only `domain_letter` set), sub-domain heading
/// (`subdomain_code` set, `leaf_marker` blank), leaf (`leaf_marker` set).
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonomyRow {
    pub domain_letter: String,
    pub subdomain_code: String,
    pub leaf_marker: String,
    pub label: String,
}

impl TaxonomyRow {
    pub fn is_domain_heading(&self) -> bool {
        !self.domain_letter.is_empty()
            && self.subdomain_code.is_empty()
            && self.leaf_marker.is_empty()
    }

    pub fn is_subdomain_heading(&self) -> bool {
        !self.subdomain_code.is_empty() && self.leaf_marker.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        !self.leaf_marker.is_empty()
    }

    /// Classification code synthesized from the three code columns.
    /// Heading rows produce short strings that fail validation downstream.
    pub fn code(&self) -> String {
        format!("{}{}{}", self.domain_letter, self.subdomain_code, self.leaf_marker)
    }
}

/// In-memory taxonomy, preserving original row order. Row order is the
/// canonical traversal order that resumption depends on.
#[derive(Debug, Clone)]
pub struct TaxonomyTable {
    rows: Vec<TaxonomyRow>,
}

impl TaxonomyTable {
    pub fn from_rows(rows: Vec<TaxonomyRow>) -> Self {
        Self { rows }
    }

    /// Load the taxonomy sheet. A missing sheet or too few columns is fatal:
    /// nothing downstream can run without the taxonomy.
    pub fn load(path: &Path, cfg: &SheetConfig) -> Result<Self> {
        let mut workbook: Xlsx<_> = open_workbook(path)
            .with_context(|| format!("failed to open workbook {}", path.display()))?;
        let range = workbook
            .worksheet_range(&cfg.sheet)
            .with_context(|| format!("sheet '{}' not found in workbook", cfg.sheet))?;

        let needed = [cfg.domain_col, cfg.subdomain_col, cfg.leaf_col, cfg.label_col]
            .into_iter()
            .max()
            .unwrap_or(0)
            + 1;
        if range.width() < needed {
            bail!(
                "sheet '{}' has {} columns, need at least {}",
                cfg.sheet,
                range.width(),
                needed
            );
        }

        // First row is the header row.
        let rows: Vec<TaxonomyRow> = range
            .rows()
            .skip(1)
            .map(|cells| TaxonomyRow {
                domain_letter: cell_text(&cells[cfg.domain_col]),
                subdomain_code: cell_text(&cells[cfg.subdomain_col]),
                leaf_marker: cell_text(&cells[cfg.leaf_col]),
                label: cell_text(&cells[cfg.label_col]),
            })
            .filter(|r| {
                !(r.domain_letter.is_empty()
                    && r.subdomain_code.is_empty()
                    && r.leaf_marker.is_empty()
                    && r.label.is_empty())
            })
            .collect();

        if rows.is_empty() {
            bail!("sheet '{}' contains no taxonomy rows", cfg.sheet);
        }

        info!("Loaded {} taxonomy rows from '{}'", rows.len(), cfg.sheet);
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[TaxonomyRow] {
        &self.rows
    }

    /// Label of the domain-heading row for `letter`. Absence is a normal,
    /// representable outcome, not an error.
    pub fn resolve_domain(&self, letter: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|r| r.is_domain_heading() && r.domain_letter == letter)
            .map(|r| r.label.as_str())
    }

    /// Label of the sub-domain heading row matching `letter` + `subcode`.
    pub fn resolve_subdomain(&self, letter: &str, subcode: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|r| {
                r.is_subdomain_heading()
                    && r.domain_letter == letter
                    && r.subdomain_code == subcode
            })
            .map(|r| r.label.as_str())
    }
}

/// Download the workbook to `path` if it is not already there.
pub async fn ensure_workbook(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    info!("Downloading taxonomy workbook: {}", url);
    let resp = client
        .get(url)
        .send()
        .await
        .context("failed to request taxonomy workbook")?;
    if !resp.status().is_success() {
        bail!("workbook download failed with status {}", resp.status());
    }
    let bytes = resp.bytes().await.context("failed to read workbook body")?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, &bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Saved workbook to {}", path.display());
    Ok(())
}

/// Cells can hold text or numbers; sub-domain codes like "01" must keep
/// their text form, numeric cells are rendered without a trailing ".0".
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

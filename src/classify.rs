use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::db;
use crate::taxonomy::TaxonomyTable;

/// Display values stored when a code's domain or sub-domain is not in the
/// taxonomy. Lookup itself returns `Option`; the sentinel strings only
/// appear here, at the point where values are written into documents.
pub const DOMAIN_NOT_FOUND: &str = "Domaine non trouvé";
pub const SUBDOMAIN_NOT_FOUND: &str = "Sous-domaine non trouvé";

/// Fields left behind by earlier pipeline versions, removed on backfill.
const LEGACY_FIELDS: &[&str] = &["parent", "child", "competences_update"];

/// Domain and sub-domain display names for a code: letter = first char,
/// sub-domain = the two following characters. Pure in `(code, table)`.
pub fn classify_code(code: &str, table: &TaxonomyTable) -> (String, String) {
    let letter: String = code.chars().take(1).collect();
    let subcode: String = code.chars().skip(1).take(2).collect();

    let domain = table
        .resolve_domain(&letter)
        .unwrap_or(DOMAIN_NOT_FOUND)
        .to_string();
    let subdomain = table
        .resolve_subdomain(&letter, &subcode)
        .unwrap_or(SUBDOMAIN_NOT_FOUND)
        .to_string();
    (domain, subdomain)
}

/// Stage 3: set `domain`/`sub_domain` on every sink record and drop legacy
/// fields. Re-running produces identical documents.
pub fn run_classify(conn: &Connection, table: &TaxonomyTable) -> Result<usize> {
    let records = db::fetch_all(conn)?;
    info!("Classify: {} records", records.len());

    let pb = ProgressBar::new(records.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len}")?
            .progress_chars("=> "),
    );

    let mut updated = 0;
    for (code, _doc) in records {
        let (domain, subdomain) = classify_code(&code, table);

        let mut set = Map::new();
        set.insert("domain".to_string(), Value::String(domain));
        set.insert("sub_domain".to_string(), Value::String(subdomain));

        match db::upsert_fields(conn, &code, &set, LEGACY_FIELDS) {
            Ok(()) => updated += 1,
            Err(e) => warn!("Backfill failed for {}: {:#}", code, e),
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Classify: {} records updated", updated);
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::OccupationRecord;
    use crate::taxonomy::TaxonomyRow;

    fn row(d: &str, s: &str, l: &str, label: &str) -> TaxonomyRow {
        TaxonomyRow {
            domain_letter: d.to_string(),
            subdomain_code: s.to_string(),
            leaf_marker: l.to_string(),
            label: label.to_string(),
        }
    }

    fn table() -> TaxonomyTable {
        TaxonomyTable::from_rows(vec![
            row("A", "", "", "Agriculture"),
            row("A", "11", "", "Engins agricoles"),
            row("A", "11", "01", "Bûcheronnage"),
        ])
    }

    #[test]
    fn resolves_both_names() {
        let (domain, sub) = classify_code("A1101", &table());
        assert_eq!(domain, "Agriculture");
        assert_eq!(sub, "Engins agricoles");
    }

    #[test]
    fn sentinels_for_unknown_code() {
        let (domain, sub) = classify_code("Z9901", &table());
        assert_eq!(domain, DOMAIN_NOT_FOUND);
        assert_eq!(sub, SUBDOMAIN_NOT_FOUND);
    }

    #[test]
    fn backfill_is_idempotent_and_strips_legacy_fields() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        db::insert(&conn, &OccupationRecord::new("Bûcheron", "u", "A1101")).unwrap();
        conn.execute(
            "UPDATE occupations SET doc = json_set(doc, '$.parent', 'old', '$.competences_update', 1)",
            [],
        )
        .unwrap();

        let t = table();
        assert_eq!(run_classify(&conn, &t).unwrap(), 1);
        let (_, first) = db::fetch_all(&conn).unwrap().remove(0);

        assert_eq!(run_classify(&conn, &t).unwrap(), 1);
        let (_, second) = db::fetch_all(&conn).unwrap().remove(0);

        assert_eq!(first, second);
        assert_eq!(first["domain"], "Agriculture");
        assert_eq!(first["sub_domain"], "Engins agricoles");
        assert!(first.get("parent").is_none());
        assert!(first.get("competences_update").is_none());
    }
}

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use crate::{db, resolver, taxonomy::TaxonomyTable};

/// Index of the taxonomy row to resume from.
///
/// Anchors on the sink's maximal code and re-derives codes over rows in
/// table order until it reappears. The index is inclusive: the boundary row
/// is reprocessed and skipped by the sink's existence check. If the code is
/// no longer derivable (the taxonomy changed between runs) the whole table
/// is walked again, which the existence check also makes safe.
pub fn find_start_index(table: &TaxonomyTable, conn: &Connection) -> Result<usize> {
    let Some(last) = db::find_max_code(conn)? else {
        return Ok(0);
    };

    for (index, row) in table.rows().iter().enumerate() {
        if resolver::find_code(&row.label, table).as_deref() == Some(last.as_str()) {
            info!("Resuming at row {} (last processed code {})", index, last);
            return Ok(index);
        }
    }

    info!("Last code {} not found in taxonomy, restarting from row 0", last);
    Ok(0)
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
            row("A", "11", "", "Engins"),
            row("A", "11", "01", "Bûcheronnage"),
            row("A", "11", "02", "Maraîchage"),
            row("A", "12", "01", "Viticulture"),
        ])
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn empty_sink_starts_at_zero() {
        let conn = test_conn();
        assert_eq!(find_start_index(&table(), &conn).unwrap(), 0);
    }

    #[test]
    fn resumes_at_row_of_max_code() {
        let conn = test_conn();
        // "Maraîchage" resolves to A1102, which is the sink's max code.
        db::insert(&conn, &OccupationRecord::new("x", "u", "A1101")).unwrap();
        db::insert(&conn, &OccupationRecord::new("y", "u", "A1102")).unwrap();
        assert_eq!(find_start_index(&table(), &conn).unwrap(), 3);
    }

    #[test]
    fn unknown_max_code_falls_back_to_zero() {
        let conn = test_conn();
        db::insert(&conn, &OccupationRecord::new("z", "u", "Z9999")).unwrap();
        assert_eq!(find_start_index(&table(), &conn).unwrap(), 0);
    }
}

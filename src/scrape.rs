use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use rusqlite::Connection;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::record::OccupationRecord;
use crate::taxonomy::TaxonomyTable;
use crate::{cursor, db, resolver};

const BASE_URL: &str = "https://candidat.francetravail.fr/metierscope/fiche-metier";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static NON_SLUG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());

// Section selectors keyed on the detail page's stable data-cy attributes.
static ASSOCIATED_SEL: LazyLock<Selector> = LazyLock::new(|| sel(r#"ul[data-cy="liste-libelle-metier"] li"#));
static MISSIONS_SEL: LazyLock<Selector> = LazyLock::new(|| sel(r#"ul[data-cy="liste-descriptif-metier"] li"#));
static CERTIFICATIONS_SEL: LazyLock<Selector> = LazyLock::new(|| sel(r#"ul[data-cy="liste-certification-metier"] li"#));
static ACCESS_TEXT_SEL: LazyLock<Selector> = LazyLock::new(|| sel(r#"p[data-cy="texte-acces-metier"]"#));
static PRIMARY_KNOW_HOW_SEL: LazyLock<Selector> = LazyLock::new(|| sel(r#"div[data-cy="liste-savoir-faire-principaux"]"#));
static SECONDARY_KNOW_HOW_SEL: LazyLock<Selector> = LazyLock::new(|| sel(r#"div[data-cy="liste-savoir-faire-secondaires"]"#));
static GROUP_HEADING_SEL: LazyLock<Selector> = LazyLock::new(|| sel(r#"p[role="heading"][aria-level="5"]"#));
static LIST_ITEM_SEL: LazyLock<Selector> = LazyLock::new(|| sel("li"));
static PROFESSIONAL_SEL: LazyLock<Selector> = LazyLock::new(|| sel(r#"ul[data-cy="liste-savoir-professionels"] li"#));
static EXPERTISE_SEL: LazyLock<Selector> = LazyLock::new(|| sel("div#fm-collapse-2-0 li"));
static NORMS_SEL: LazyLock<Selector> = LazyLock::new(|| sel("div#fm-collapse-2-1 li"));
static CONDITIONS_SEL: LazyLock<Selector> = LazyLock::new(|| sel(r#"ul[data-cy="liste-contexte-conditions"] li"#));
static SCHEDULE_SEL: LazyLock<Selector> = LazyLock::new(|| sel(r#"ul[data-cy="liste-contexte-horaires"] li"#));
static STATUS_SEL: LazyLock<Selector> = LazyLock::new(|| sel(r#"ul[data-cy="liste-contexte-types"] li"#));

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("rome_scraper/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// URL slug for a job title: punctuation stripped (hyphen survives),
/// whitespace runs collapsed to single hyphens, lowercased.
pub fn slugify(title: &str) -> String {
    NON_SLUG_RE
        .replace_all(title, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

pub fn page_url(code: &str, title: &str) -> String {
    format!("{}/{}/{}", BASE_URL, code, slugify(title))
}

/// What happened to one taxonomy row.
pub enum RowOutcome {
    /// Sink already had the code; stored missions returned, no network I/O.
    AlreadyPresent(Vec<String>),
    Inserted(Vec<String>),
    /// Soft failure (HTTP error, bad body, ...), logged and skipped.
    Failed,
}

/// Resolve-check-fetch-persist for one row. Every failure past the sink
/// existence check is soft: the batch keeps going and a later rerun retries
/// via resumption.
pub async fn process_row(
    conn: &Connection,
    client: &reqwest::Client,
    title: &str,
    code: &str,
) -> RowOutcome {
    let url = page_url(code, title);
    match process_row_at(conn, client, title, code, &url).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Row failed for '{}' ({}): {:#}", title, code, e);
            RowOutcome::Failed
        }
    }
}

async fn process_row_at(
    conn: &Connection,
    client: &reqwest::Client,
    title: &str,
    code: &str,
    url: &str,
) -> Result<RowOutcome> {
    if db::exists(conn, code)? {
        debug!("Code {} already in sink, skipping fetch", code);
        return Ok(RowOutcome::AlreadyPresent(db::missions(conn, code)?));
    }

    let resp = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!("GET {} failed: {}", url, e);
            return Ok(RowOutcome::Failed);
        }
    };
    if !resp.status().is_success() {
        warn!("GET {} returned {}", url, resp.status());
        return Ok(RowOutcome::Failed);
    }
    let body = match resp.text().await {
        Ok(b) => b,
        Err(e) => {
            warn!("Body read failed for {}: {}", url, e);
            return Ok(RowOutcome::Failed);
        }
    };

    let record = extract_record(title, url, code, &body);
    match db::insert(conn, &record) {
        Ok(()) => {
            debug!("Inserted record for code {}", code);
            Ok(RowOutcome::Inserted(record.missions))
        }
        Err(e) if db::is_duplicate(&e) => {
            warn!("Code {} was already inserted", code);
            Ok(RowOutcome::AlreadyPresent(record.missions))
        }
        Err(e) => Err(e.into()),
    }
}

/// Extract a structured record from a detail page. Every section is
/// independently optional; a missing section yields an empty list or map.
pub fn extract_record(title: &str, url: &str, code: &str, html: &str) -> OccupationRecord {
    let doc = Html::parse_document(html);

    let mut record = OccupationRecord::new(title, url, code);
    record.associated_titles = items(&doc, &ASSOCIATED_SEL);
    record.missions = items(&doc, &MISSIONS_SEL);

    record.certifications = items(&doc, &CERTIFICATIONS_SEL);
    if record.certifications.is_empty() {
        // Pages without a certification list carry a single free-text
        // "access requirements" paragraph instead.
        if let Some(p) = doc.select(&ACCESS_TEXT_SEL).next() {
            let text = element_text(p);
            if !text.is_empty() {
                record.certifications = vec![text];
            }
        }
    }

    record.primary_know_how = know_how_groups(&doc, &PRIMARY_KNOW_HOW_SEL);
    record.secondary_know_how = know_how_groups(&doc, &SECONDARY_KNOW_HOW_SEL);
    record.professional_know_how = items(&doc, &PROFESSIONAL_SEL);
    record.expertise_areas = items(&doc, &EXPERTISE_SEL);
    record.norms_procedures = items(&doc, &NORMS_SEL);
    record.working_conditions = items(&doc, &CONDITIONS_SEL);
    record.schedule = items(&doc, &SCHEDULE_SEL);
    record.employment_status = items(&doc, &STATUS_SEL);
    record
}

fn items(doc: &Html, sel: &Selector) -> Vec<String> {
    doc.select(sel)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Sub-heading label → item list for each know-how section div.
fn know_how_groups(doc: &Html, section_sel: &Selector) -> BTreeMap<String, Vec<String>> {
    let mut groups = BTreeMap::new();
    for section in doc.select(section_sel) {
        let Some(heading) = section.select(&GROUP_HEADING_SEL).next() else {
            continue;
        };
        let label = element_text(heading);
        let entries: Vec<String> = section
            .select(&LIST_ITEM_SEL)
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect();
        groups.insert(label, entries);
    }
    groups
}

fn element_text(el: ElementRef) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct IngestStats {
    pub rows: usize,
    pub inserted: usize,
    pub existing: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Stage 1: walk the taxonomy from the resume point, one row at a time.
pub async fn run_ingest(
    conn: &Connection,
    table: &TaxonomyTable,
    limit: Option<usize>,
) -> Result<IngestStats> {
    let client = http_client()?;
    let start = cursor::find_start_index(table, conn)?;

    let remaining = &table.rows()[start..];
    let rows: &[_] = match limit {
        Some(n) if n < remaining.len() => &remaining[..n],
        _ => remaining,
    };

    let pb = ProgressBar::new(rows.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut stats = IngestStats {
        rows: rows.len(),
        inserted: 0,
        existing: 0,
        skipped: 0,
        errors: 0,
    };

    for row in rows {
        let title = row.label.as_str();
        match resolver::find_code(title, table) {
            Some(code) if resolver::is_valid(&code) => {
                match process_row(conn, &client, title, &code).await {
                    RowOutcome::Inserted(_) => stats.inserted += 1,
                    RowOutcome::AlreadyPresent(_) => stats.existing += 1,
                    RowOutcome::Failed => stats.errors += 1,
                }
            }
            other => {
                debug!(
                    "No usable code for '{}' (resolved: {:?})",
                    title,
                    other.as_deref()
                );
                stats.skipped += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Ingest: {} rows, {} inserted, {} existing, {} skipped, {} errors",
        stats.rows, stats.inserted, stats.existing, stats.skipped, stats.errors
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
    <html><body>
      <ul data-cy="liste-libelle-metier">
        <li>Employé / Employée de bureau</li>
        <li>Agent administratif</li>
      </ul>
      <ul data-cy="liste-descriptif-metier">
        <li>Classe des documents</li>
        <li>  Saisit   des données  </li>
      </ul>
      <div data-cy="liste-savoir-faire-principaux">
        <p role="heading" aria-level="5">Gestion administrative</p>
        <ul><li>Archivage</li><li>Courrier</li></ul>
      </div>
      <div data-cy="liste-savoir-faire-principaux">
        <p role="heading" aria-level="5">Accueil</p>
        <ul><li>Orientation des visiteurs</li></ul>
      </div>
      <ul data-cy="liste-savoir-professionels"><li>Bureautique</li></ul>
      <div id="fm-collapse-2-0"><ul><li>Secrétariat</li></ul></div>
      <div id="fm-collapse-2-1"><ul><li>Normes rédactionnelles</li></ul></div>
      <ul data-cy="liste-contexte-conditions"><li>Travail en bureau</li></ul>
      <ul data-cy="liste-contexte-horaires"><li>Temps plein</li></ul>
      <ul data-cy="liste-contexte-types"><li>Salarié</li></ul>
      <p data-cy="texte-acces-metier">Accessible sans diplôme particulier.</p>
    </body></html>
    "#;

    #[test]
    fn slugs() {
        assert_eq!(slugify("Employé de bureau"), "employé-de-bureau");
        assert_eq!(slugify("Chef d'équipe  (BTP)"), "chef-déquipe-btp");
        assert_eq!(slugify("Aide-soignant"), "aide-soignant");
    }

    #[test]
    fn url_template() {
        assert_eq!(
            page_url("M1602", "Employé de bureau"),
            "https://candidat.francetravail.fr/metierscope/fiche-metier/M1602/employé-de-bureau"
        );
    }

    #[test]
    fn extracts_lists_and_groups() {
        let r = extract_record("Employé de bureau", "u", "M1602", FIXTURE);
        assert_eq!(r.associated_titles.len(), 2);
        assert_eq!(
            r.missions,
            vec!["Classe des documents", "Saisit des données"]
        );
        assert_eq!(
            r.primary_know_how.get("Gestion administrative").unwrap(),
            &vec!["Archivage".to_string(), "Courrier".to_string()]
        );
        assert_eq!(r.primary_know_how.len(), 2);
        assert!(r.secondary_know_how.is_empty());
        assert_eq!(r.professional_know_how, vec!["Bureautique"]);
        assert_eq!(r.expertise_areas, vec!["Secrétariat"]);
        assert_eq!(r.norms_procedures, vec!["Normes rédactionnelles"]);
        assert_eq!(r.working_conditions, vec!["Travail en bureau"]);
        assert_eq!(r.schedule, vec!["Temps plein"]);
        assert_eq!(r.employment_status, vec!["Salarié"]);
    }

    #[test]
    fn certification_falls_back_to_access_paragraph() {
        let r = extract_record("t", "u", "M1602", FIXTURE);
        assert_eq!(r.certifications, vec!["Accessible sans diplôme particulier."]);
    }

    #[test]
    fn certification_list_wins_over_fallback() {
        let html = r#"
        <ul data-cy="liste-certification-metier"><li>CAP</li></ul>
        <p data-cy="texte-acces-metier">Fallback text</p>
        "#;
        let r = extract_record("t", "u", "M1602", html);
        assert_eq!(r.certifications, vec!["CAP"]);
    }

    #[test]
    fn empty_page_yields_empty_sections() {
        let r = extract_record("t", "u", "M1602", "<html></html>");
        assert!(r.missions.is_empty());
        assert!(r.primary_know_how.is_empty());
        assert!(r.certifications.is_empty());
    }

    #[tokio::test]
    async fn existing_code_short_circuits_without_network() {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let mut record = OccupationRecord::new("Clerk", "u", "A1101");
        record.missions = vec!["stored mission".to_string()];
        db::insert(&conn, &record).unwrap();

        // The URL is unroutable; a network attempt would fail the row.
        let client = http_client().unwrap();
        let outcome =
            process_row_at(&conn, &client, "Clerk", "A1101", "http://127.0.0.1:1/x")
                .await
                .unwrap();
        match outcome {
            RowOutcome::AlreadyPresent(missions) => {
                assert_eq!(missions, vec!["stored mission".to_string()]);
            }
            _ => panic!("expected AlreadyPresent"),
        }
    }

    #[tokio::test]
    async fn error_status_inserts_nothing() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = sock.read(&mut buf).await;
            let _ = sock
                .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n")
                .await;
        });

        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let client = http_client().unwrap();
        let url = format!("http://{}/fiche", addr);
        let outcome = process_row_at(&conn, &client, "Clerk", "A1101", &url)
            .await
            .unwrap();
        assert!(matches!(outcome, RowOutcome::Failed));
        assert!(!db::exists(&conn, "A1101").unwrap());
    }
}

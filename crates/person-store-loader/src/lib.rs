use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use person_store_core::Person;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

pub const BUNDLED_DATASET_SOURCE: &str = "bundled:persons.ndjson";
const BUNDLED_DATASET: &str = include_str!("../data/persons.ndjson");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetInfo {
    pub source: String,
    pub sha256: String,
    pub records: usize,
    pub loaded_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub info: DatasetInfo,
    pub records: Vec<Person>,
}

/// Read the initial person dataset from disk.
///
/// The body is a JSON array when its first non-whitespace character is `[`,
/// NDJSON otherwise.
///
/// # Errors
/// Returns an error when the file cannot be read or any record fails to parse.
pub fn load_dataset(path: &Path) -> Result<Dataset> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset file {}", path.display()))?;
    parse_dataset(&path.display().to_string(), &body)
}

/// Parse the dataset compiled into this crate.
///
/// # Errors
/// Returns an error if the bundled file is malformed.
pub fn bundled_dataset() -> Result<Dataset> {
    parse_dataset(BUNDLED_DATASET_SOURCE, BUNDLED_DATASET)
}

/// Parse a dataset body already held in memory. `source` only labels errors
/// and the returned [`DatasetInfo`].
///
/// # Errors
/// Returns an error when the body is neither a JSON array of persons nor valid
/// NDJSON, or when the load timestamp cannot be formatted.
pub fn parse_dataset(source: &str, body: &str) -> Result<Dataset> {
    let records = if body.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<Person>>(body)
            .with_context(|| format!("failed to parse JSON array dataset {source}"))?
    } else {
        parse_ndjson(source, body)?
    };

    let info = DatasetInfo {
        source: source.to_string(),
        sha256: format!("{:x}", Sha256::digest(body.as_bytes())),
        records: records.len(),
        loaded_at: now_rfc3339()?,
    };
    tracing::info!(source, records = info.records, "dataset loaded");

    Ok(Dataset { info, records })
}

fn parse_ndjson(source: &str, body: &str) -> Result<Vec<Person>> {
    let mut records = Vec::new();
    for (index, line) in body.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record = serde_json::from_str(trimmed)
            .with_context(|| format!("failed to parse NDJSON row {} from {source}", index + 1))?;
        records.push(record);
    }
    Ok(records)
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use person_store_core::{PersonId, PersonStore};
    use std::path::PathBuf;

    fn unique_temp_path(extension: &str) -> PathBuf {
        std::env::temp_dir().join(format!("person-store-loader-{}.{extension}", ulid::Ulid::new()))
    }

    // Test IDs: TLOAD-001
    #[test]
    fn bundled_dataset_seeds_a_store() -> Result<()> {
        let dataset = bundled_dataset()?;
        assert_eq!(dataset.info.source, BUNDLED_DATASET_SOURCE);
        assert_eq!(dataset.info.records, dataset.records.len());
        assert_eq!(dataset.info.sha256.len(), 64);

        let store = PersonStore::with_records(dataset.records)?;
        let fons = store.get_by_id(PersonId(1));
        assert_eq!(fons.map(|person| person.first_name), Some("Fons".to_string()));
        assert!(!store.search_by_job_title(Some("Senior Developer")).is_empty());
        assert!(!store.filter_by_sex(Some("male")).is_empty());
        assert!(!store.filter_by_age(40).is_empty());
        Ok(())
    }

    // Test IDs: TLOAD-002
    #[test]
    fn ndjson_skips_blank_lines_and_reports_bad_rows() {
        let row = serde_json::json!({
            "id": 3,
            "first_name": "A",
            "last_name": "B",
            "email": "a@b",
            "sex": "Male",
            "ip_address": "1.1.1.1",
            "job_title": "X",
            "age": 1
        });
        let good = format!("\n{row}\n\n");
        match parse_dataset("inline", &good) {
            Ok(dataset) => assert_eq!(dataset.records.len(), 1),
            Err(err) => panic!("valid NDJSON should parse: {err:#}"),
        }

        let bad = format!("{}\n{{\"id\":4}}\n", good.trim());
        match parse_dataset("inline", &bad) {
            Ok(_) => panic!("incomplete row should fail"),
            Err(err) => assert!(format!("{err:#}").contains("row 2 from inline")),
        }
    }

    // Test IDs: TLOAD-003
    #[test]
    fn json_array_files_load_from_disk() -> Result<()> {
        let path = unique_temp_path("json");
        fs::write(
            &path,
            r#"  [
              {"id": 10, "first_name": "Ann", "last_name": "Lee", "email": "ann@example.com",
               "sex": "Female", "ip_address": "10.1.1.1", "job_title": "Data Engineer", "age": -2}
            ]"#,
        )?;

        let dataset = load_dataset(&path)?;
        assert_eq!(dataset.records.len(), 1);
        assert_eq!(dataset.records[0].age, -2);
        assert_eq!(dataset.info.source, path.display().to_string());

        let _ = fs::remove_file(&path);
        Ok(())
    }

    // Test IDs: TLOAD-004
    #[test]
    fn missing_file_error_names_the_path() {
        let path = unique_temp_path("ndjson");
        match load_dataset(&path) {
            Ok(_) => panic!("missing file should fail"),
            Err(err) => assert!(err.to_string().contains(&path.display().to_string())),
        }
    }

    #[test]
    fn identical_bodies_share_a_digest() -> Result<()> {
        let a = parse_dataset("a", "[]")?;
        let b = parse_dataset("b", "[]")?;
        assert_eq!(a.info.sha256, b.info.sha256);
        assert_eq!(a.info.records, 0);
        Ok(())
    }
}

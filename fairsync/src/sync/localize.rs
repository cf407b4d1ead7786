use std::path::Path;

use fairsync_core::RecordMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LocalizeError {
    #[error("cannot classify division for entity {entity} (division field: {division:?})")]
    UnclassifiedDivision {
        entity: String,
        division: Option<String>,
    },
}

/// Structured identifier of the shape `division-category-sequence`,
/// e.g. `JR-MAT-004`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectNumber {
    pub division: String,
    pub category: String,
    pub sequence: String,
}

impl ProjectNumber {
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.splitn(3, '-');
        let division = parts.next()?.trim();
        let category = parts.next()?.trim();
        let sequence = parts.next()?.trim();
        if division.is_empty() || category.is_empty() || sequence.is_empty() {
            return None;
        }
        Some(Self {
            division: division.to_string(),
            category: category.to_string(),
            sequence: sequence.to_string(),
        })
    }
}

/// Maps free-text division names onto the tier codes used in identifiers.
fn classify_division(division: Option<&str>) -> Option<&'static str> {
    let text = division?;
    if text.contains("Ele") {
        Some("ELE")
    } else if text.contains("Jun") {
        Some("JR")
    } else if text.contains("Sen") {
        Some("SR")
    } else {
        None
    }
}

/// Populates every slot's local-path and freshness sequences and derives the
/// participant count per entity.
///
/// Deterministic given the record map and the filesystem: paths never depend
/// on when resolution runs, and freshness only changes when files appear on
/// disk between runs. An entity whose identifier cannot be parsed and whose
/// division text cannot be classified aborts the run, since no downstream
/// path can be computed for it.
pub async fn resolve_local_paths(
    file_root: &Path,
    records: &mut RecordMap,
) -> Result<(), LocalizeError> {
    for (id, record) in records.iter_mut() {
        let identifier = record
            .project_number
            .clone()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| id.clone());
        let (division, category) = match ProjectNumber::parse(&identifier) {
            Some(number) => (number.division, number.category),
            None => {
                let division = classify_division(record.division.as_deref()).ok_or_else(|| {
                    LocalizeError::UnclassifiedDivision {
                        entity: id.clone(),
                        division: record.division.clone(),
                    }
                })?;
                debug!(entity = %id, division, "identifier unparseable; classified from division text");
                (division.to_string(), "uncategorized".to_string())
            }
        };
        record.participants = record.last_names.len();

        let last_names = record.last_names.clone();
        let first_names = record.first_names.clone();
        for (label, slot) in record.files.iter_mut() {
            slot.clear_resolution();
            let multi = slot.remote_refs.len() > 1;
            for (index, remote_ref) in slot.remote_refs.iter().enumerate() {
                if remote_ref.is_blank() {
                    slot.local_paths.push(None);
                    slot.local_modified.push(None);
                    continue;
                }
                // Team members each upload a like-named file; tell them apart
                // by the uploader's name.
                let stem = match (multi, last_names.get(index), first_names.get(index)) {
                    (true, Some(last), Some(first)) => format!("{label}_{last}_{first}"),
                    _ => label.clone(),
                };
                let relative = match remote_ref.extension() {
                    Some(ext) => {
                        format!("{division}/{category}/{identifier}/{identifier}_{stem}.{ext}")
                    }
                    None => format!("{division}/{category}/{identifier}/{identifier}_{stem}"),
                };
                let modified = file_mtime(&file_root.join(&relative)).await;
                slot.local_paths.push(Some(relative));
                slot.local_modified.push(modified);
            }
        }
    }
    Ok(())
}

async fn file_mtime(path: &Path) -> Option<i64> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    let modified = metadata.modified().ok()?;
    modified
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|age| age.as_secs() as i64)
}

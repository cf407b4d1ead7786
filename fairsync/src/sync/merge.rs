use fairsync_core::RecordMap;
use tracing::warn;

/// The three portal tabs a sync cycle reads, in merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Project,
    File,
    Form,
}

impl SourceKind {
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Project => "project",
            SourceKind::File => "file",
            SourceKind::Form => "form",
        }
    }

    pub fn cache_key(self) -> &'static str {
        match self {
            SourceKind::Project => "project_records.json",
            SourceKind::File => "file_records.json",
            SourceKind::Form => "form_records.json",
        }
    }
}

/// Per-entity partial records from each source tab.
#[derive(Debug, Default)]
pub struct SourceSet {
    pub project: RecordMap,
    pub file: RecordMap,
    pub form: RecordMap,
}

/// Folds the three source maps into one canonical record per entity.
///
/// The project tab seeds the result and carries the canonical scalar fields.
/// The remaining sources are additive: unseen entities are inserted verbatim;
/// file slots are unioned key-by-key; records without slots shallow-merge
/// their scalars with later sources winning. A file-type label contributed by
/// two sources keeps the later value, and the collision is always logged.
pub fn merge_sources(sources: SourceSet) -> RecordMap {
    let SourceSet {
        project,
        file,
        form,
    } = sources;
    let mut merged = project;
    for (source, partial) in [(SourceKind::File, file), (SourceKind::Form, form)] {
        for (id, record) in partial {
            let Some(existing) = merged.get_mut(&id) else {
                merged.insert(id, record);
                continue;
            };
            if record.has_files() {
                for (label, slot) in record.files {
                    if let Some(previous) = existing.files.get(&label) {
                        warn!(
                            entity = %id,
                            label = %label,
                            source = source.label(),
                            kept_refs = slot.remote_refs.len(),
                            dropped_refs = previous.remote_refs.len(),
                            "file slot contributed by more than one source; keeping the later one"
                        );
                    }
                    existing.files.insert(label, slot);
                }
            } else {
                existing.absorb_scalars(&record);
            }
        }
    }
    merged
}

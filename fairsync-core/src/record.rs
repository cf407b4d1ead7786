use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-entity records keyed by the portal's student id.
pub type RecordMap = BTreeMap<String, ProjectRecord>;

/// One remote reference to an uploaded file.
///
/// The portal hands out either a direct object-storage URL or a bare filename
/// that has to be requested through its download endpoint; a slot never mixes
/// the two kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum RemoteRef {
    Bucket(String),
    Portal(String),
}

impl RemoteRef {
    pub fn as_str(&self) -> &str {
        match self {
            RemoteRef::Bucket(value) | RemoteRef::Portal(value) => value,
        }
    }

    /// Per-member table cells are blank when a member has not uploaded.
    pub fn is_blank(&self) -> bool {
        self.as_str().is_empty()
    }

    /// Extension taken from the reference's own name.
    pub fn extension(&self) -> Option<&str> {
        self.as_str()
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && !ext.contains('/'))
    }
}

/// All uploaded files of one logical type for one entity.
///
/// The three vectors are positionally aligned: index `i` across
/// `remote_refs`, `local_paths`, and `local_modified` describes one physical
/// file. `local_paths`/`local_modified` are populated by path resolution and
/// stay empty on freshly fetched slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSlot {
    #[serde(default)]
    pub remote_refs: Vec<RemoteRef>,
    #[serde(default)]
    pub local_paths: Vec<Option<String>>,
    #[serde(default)]
    pub local_modified: Vec<Option<i64>>,
}

impl FileSlot {
    pub fn from_refs(remote_refs: Vec<RemoteRef>) -> Self {
        Self {
            remote_refs,
            local_paths: Vec::new(),
            local_modified: Vec::new(),
        }
    }

    pub fn is_aligned(&self) -> bool {
        self.remote_refs.len() == self.local_paths.len()
            && self.remote_refs.len() == self.local_modified.len()
    }

    pub fn clear_resolution(&mut self) {
        self.local_paths.clear();
        self.local_modified.clear();
    }
}

/// One entity as seen by some subset of the portal tabs.
///
/// Every scalar is optional because each tab only carries a slice of the
/// record; fields the model does not name are kept verbatim in `extra` so a
/// merge never drops portal data it does not understand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub division: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub first_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_names: Vec<String>,
    /// Derived by path resolution; a team project has more than one.
    #[serde(default)]
    pub participants: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, FileSlot>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ProjectRecord {
    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }

    /// Shallow-merges another tab's scalar fields into this record, with the
    /// other record winning on collision. File slots are not touched here.
    pub fn absorb_scalars(&mut self, other: &ProjectRecord) {
        if other.project_number.is_some() {
            self.project_number = other.project_number.clone();
        }
        if other.project_name.is_some() {
            self.project_name = other.project_name.clone();
        }
        if other.division.is_some() {
            self.division = other.division.clone();
        }
        if other.category.is_some() {
            self.category = other.category.clone();
        }
        if other.school.is_some() {
            self.school = other.school.clone();
        }
        if !other.first_names.is_empty() {
            self.first_names = other.first_names.clone();
        }
        if !other.last_names.is_empty() {
            self.last_names = other.last_names.clone();
        }
        for (key, value) in &other.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

use std::collections::HashMap;
use std::path::Path;

use fairsync_core::{DriveClient, NodeInfo, NodeKind, UploadSlot};
use tracing::{debug, error};

use super::transfer::TransferClient;

/// Ancestor chains longer than this are treated as cycles in the listing.
const MAX_DEPTH: usize = 64;

/// A resolved node, as seen through the path index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub parent_path: String,
    pub name: String,
    pub is_folder: bool,
}

/// Path-addressed view over the drive's id/parent-id node space.
///
/// The drive only speaks node ids; this cache amortizes listing calls behind
/// a `path → id` index that is rebuilt by `list_all` and updated
/// incrementally as nodes are created, so a burst of creations under one
/// parent costs one remote call each, not a walk per call. The index is a
/// snapshot: it goes stale the moment something else mutates the drive, and
/// stays stale until a forced `list_all`.
///
/// Remote failures abort the single operation with an error log and an empty
/// return; the cache itself stays usable.
pub struct RemoteTreeCache {
    drive: DriveClient,
    transfer: TransferClient,
    nodes: HashMap<String, NodeInfo>,
    by_path: HashMap<String, String>,
    loaded: bool,
}

impl RemoteTreeCache {
    pub fn new(drive: DriveClient) -> Self {
        Self {
            drive,
            transfer: TransferClient::new(),
            nodes: HashMap::new(),
            by_path: HashMap::new(),
            loaded: false,
        }
    }

    pub fn with_transfer(mut self, transfer: TransferClient) -> Self {
        self.transfer = transfer;
        self
    }

    /// Populates the node index from the drive. Pass `force` to discard the
    /// in-memory snapshot after out-of-band changes; otherwise a loaded
    /// index is reused as-is.
    pub async fn list_all(&mut self, force: bool) -> Result<(), fairsync_core::DriveError> {
        if self.loaded && !force {
            return Ok(());
        }
        let items = self.drive.list_nodes_all().await?;
        debug!(nodes = items.len(), "indexed drive listing");
        self.nodes = items
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect();
        self.rebuild_paths();
        self.loaded = true;
        Ok(())
    }

    /// Exact-path lookup. With `refresh`, a miss triggers one forced
    /// `list_all` and a single retry before giving up.
    pub async fn find(&mut self, full_path: &str, refresh: bool) -> Option<FoundNode> {
        if let Err(err) = self.list_all(false).await {
            error!(error = %err, "node listing failed");
            return None;
        }
        let norm = normalize(full_path);
        if let Some(found) = self.lookup(&norm) {
            return Some(found);
        }
        if refresh {
            if let Err(err) = self.list_all(true).await {
                error!(error = %err, "node listing failed");
                return None;
            }
            return self.lookup(&norm);
        }
        None
    }

    /// Idempotent folder creation: returns the existing node's id when the
    /// path already resolves, and otherwise creates every missing ancestor
    /// from the root down.
    pub async fn create_folder(&mut self, full_path: &str, refresh: bool) -> Option<String> {
        if let Err(err) = self.list_all(false).await {
            error!(error = %err, "node listing failed");
            return None;
        }
        let norm = normalize(full_path);
        let segments: Vec<String> = split_segments(&norm);
        if segments.is_empty() {
            error!(path = full_path, "refusing to create a folder at the drive root");
            return None;
        }
        if refresh && !self.by_path.contains_key(&norm) {
            if let Err(err) = self.list_all(true).await {
                error!(error = %err, "node listing failed");
                return None;
            }
        }

        let mut parent_id: Option<String> = None;
        let mut current_path = String::new();
        for name in &segments {
            current_path.push('/');
            current_path.push_str(name);
            if let Some(id) = self.by_path.get(&current_path) {
                parent_id = Some(id.clone());
                continue;
            }
            let created = match self.drive.create_folder(parent_id.as_deref(), name).await {
                Ok(node) => node,
                Err(err) if err.is_conflict() => {
                    // Lost a creation race; the fresh listing has the winner.
                    if let Err(err) = self.list_all(true).await {
                        error!(path = %current_path, error = %err, "relist after duplicate create failed");
                        return None;
                    }
                    match self.by_path.get(&current_path) {
                        Some(id) => {
                            parent_id = Some(id.clone());
                            continue;
                        }
                        None => {
                            error!(path = %current_path, "duplicate create reported but no node listed");
                            return None;
                        }
                    }
                }
                Err(err) => {
                    error!(path = %current_path, error = %err, "folder create failed");
                    return None;
                }
            };
            debug!(path = %current_path, id = %created.id, "created folder");
            parent_id = Some(created.id.clone());
            self.index_node(created);
        }
        parent_id
    }

    /// Idempotent file upsert: an existing node at `remote_full_path` has its
    /// content replaced in place; otherwise ancestors are ensured and a new
    /// node is created. Bytes stream from disk either way.
    pub async fn create_file(&mut self, local_path: &Path, remote_full_path: &str) -> Option<String> {
        if let Err(err) = self.list_all(false).await {
            error!(error = %err, "node listing failed");
            return None;
        }
        let norm = normalize(remote_full_path);
        let Some((folder_path, name)) = norm
            .rsplit_once('/')
            .map(|(folder, name)| (folder.to_string(), name.to_string()))
            .filter(|(_, name)| !name.is_empty())
        else {
            error!(path = remote_full_path, "remote file path has no name component");
            return None;
        };

        let slot = match self.by_path.get(&norm).cloned() {
            Some(existing_id) => {
                if self.nodes.get(&existing_id).map(|node| node.kind) != Some(NodeKind::File) {
                    error!(path = %norm, "path is occupied by a non-file node");
                    return None;
                }
                match self.drive.refresh_file_slot(&existing_id).await {
                    Ok(slot) => slot,
                    Err(err) => {
                        error!(path = %norm, error = %err, "could not reissue upload slot");
                        return None;
                    }
                }
            }
            None => {
                let parent_id = if folder_path.is_empty() {
                    None
                } else {
                    Some(self.create_folder(&folder_path, false).await?)
                };
                match self
                    .drive
                    .create_file_slot(parent_id.as_deref(), &name)
                    .await
                {
                    Ok(slot) => slot,
                    Err(err) if err.is_conflict() => {
                        // Someone else created it first; replace its content.
                        if let Err(err) = self.list_all(true).await {
                            error!(path = %norm, error = %err, "relist after duplicate create failed");
                            return None;
                        }
                        let Some(existing_id) = self.by_path.get(&norm).cloned() else {
                            error!(path = %norm, "duplicate create reported but no node listed");
                            return None;
                        };
                        match self.drive.refresh_file_slot(&existing_id).await {
                            Ok(slot) => slot,
                            Err(err) => {
                                error!(path = %norm, error = %err, "could not reissue upload slot");
                                return None;
                            }
                        }
                    }
                    Err(err) => {
                        error!(path = %norm, error = %err, "file create failed");
                        return None;
                    }
                }
            }
        };

        let UploadSlot { node, upload_url } = slot;
        let node_id = node.id.clone();
        self.index_node(node);
        if let Err(err) = self
            .transfer
            .upload_from_path(upload_url.as_str(), local_path)
            .await
        {
            error!(path = %norm, error = %err, "content upload failed");
            return None;
        }
        debug!(path = %norm, id = %node_id, "uploaded file");
        Some(node_id)
    }

    /// Creates a reference node pointing at an existing target without
    /// duplicating content. Fails cleanly (no node created) when the target
    /// does not resolve; returns the existing node when the destination
    /// already holds one of that name.
    pub async fn create_shortcut(
        &mut self,
        target_full_path: &str,
        folder_full_path: &str,
        display_name: &str,
    ) -> Option<String> {
        let Some(target) = self.find(target_full_path, true).await else {
            error!(target = target_full_path, "shortcut target does not resolve");
            return None;
        };
        let folder_id = self.create_folder(folder_full_path, false).await?;
        let shortcut_path = format!("{}/{display_name}", normalize(folder_full_path));
        if let Some(existing) = self.by_path.get(&shortcut_path) {
            debug!(path = %shortcut_path, "shortcut already present");
            return Some(existing.clone());
        }
        match self
            .drive
            .create_shortcut(Some(&folder_id), display_name, &target.id)
            .await
        {
            Ok(node) => {
                let id = node.id.clone();
                debug!(path = %shortcut_path, target = %target.id, "created shortcut");
                self.index_node(node);
                Some(id)
            }
            Err(err) if err.is_conflict() => {
                if let Err(err) = self.list_all(true).await {
                    error!(path = %shortcut_path, error = %err, "relist after duplicate create failed");
                    return None;
                }
                self.by_path.get(&shortcut_path).cloned()
            }
            Err(err) => {
                error!(path = %shortcut_path, error = %err, "shortcut create failed");
                None
            }
        }
    }

    fn lookup(&self, norm: &str) -> Option<FoundNode> {
        let id = self.by_path.get(norm)?;
        let node = self.nodes.get(id)?;
        let parent_path = norm.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("");
        Some(FoundNode {
            id: node.id.clone(),
            parent_id: node.parent_id.clone(),
            parent_path: parent_path.to_string(),
            name: node.name.clone(),
            is_folder: node.kind == NodeKind::Folder,
        })
    }

    fn rebuild_paths(&mut self) {
        self.by_path.clear();
        let ids: Vec<String> = self.nodes.keys().cloned().collect();
        for id in ids {
            match self.path_of(&id) {
                Some(path) => {
                    self.by_path.insert(path, id);
                }
                None => debug!(node = %id, "dropping orphaned node from the path index"),
            }
        }
    }

    fn path_of(&self, id: &str) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = Some(id.to_string());
        while let Some(node_id) = current {
            let node = self.nodes.get(&node_id)?;
            segments.push(node.name.clone());
            if segments.len() > MAX_DEPTH {
                return None;
            }
            current = node.parent_id.clone();
        }
        segments.reverse();
        Some(format!("/{}", segments.join("/")))
    }

    fn index_node(&mut self, node: NodeInfo) {
        let path = match &node.parent_id {
            None => Some(format!("/{}", node.name)),
            Some(parent_id) => self
                .path_of(parent_id)
                .map(|parent_path| format!("{parent_path}/{}", node.name)),
        };
        match path {
            Some(path) => {
                self.by_path.insert(path, node.id.clone());
            }
            None => debug!(id = %node.id, "created node has no indexed parent"),
        }
        self.nodes.insert(node.id.clone(), node);
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", split_segments(path).join("/"))
}

fn split_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{body_string_contains, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn folder(id: &str, parent: Option<&str>, name: &str) -> serde_json::Value {
        json!({"id": id, "parent_id": parent, "name": name, "type": "folder"})
    }

    fn file(id: &str, parent: Option<&str>, name: &str) -> serde_json::Value {
        json!({"id": id, "parent_id": parent, "name": name, "type": "file"})
    }

    async fn mount_listing(server: &MockServer, items: Vec<serde_json::Value>) {
        Mock::given(method("GET"))
            .and(url_path("/v1/nodes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": items})))
            .mount(server)
            .await;
    }

    async fn mount_listing_once(server: &MockServer, items: Vec<serde_json::Value>) {
        Mock::given(method("GET"))
            .and(url_path("/v1/nodes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": items})))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }

    fn tree(server: &MockServer) -> RemoteTreeCache {
        RemoteTreeCache::new(DriveClient::new(&server.uri(), "drive-token").unwrap())
    }

    #[tokio::test]
    async fn create_folder_builds_missing_ancestors_once() {
        let server = MockServer::start().await;
        mount_listing(&server, vec![]).await;
        for (name, id, parent) in [
            ("auto", "n1", json!(null)),
            ("by project", "n2", json!("n1")),
            ("JR", "n3", json!("n2")),
        ] {
            Mock::given(method("POST"))
                .and(url_path("/v1/nodes"))
                .and(body_string_contains(format!("\"name\":\"{name}\"")))
                .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                    "id": id, "parent_id": parent, "name": name, "type": "folder"
                })))
                .expect(1)
                .mount(&server)
                .await;
        }

        let mut tree = tree(&server);
        let first = tree.create_folder("/auto/by project/JR", false).await;
        let second = tree.create_folder("/auto/by project/JR", false).await;

        assert_eq!(first.as_deref(), Some("n3"));
        assert_eq!(second.as_deref(), Some("n3"));
    }

    #[tokio::test]
    async fn create_folder_returns_existing_node_from_the_listing() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            vec![folder("n1", None, "auto"), folder("n2", Some("n1"), "ncsef")],
        )
        .await;
        Mock::given(method("POST"))
            .and(url_path("/v1/nodes"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let mut tree = tree(&server);
        assert_eq!(
            tree.create_folder("/auto/ncsef", false).await.as_deref(),
            Some("n2")
        );
    }

    #[tokio::test]
    async fn duplicate_folder_create_recovers_through_a_relist() {
        let server = MockServer::start().await;
        mount_listing_once(&server, vec![]).await;
        mount_listing(&server, vec![folder("n1", None, "auto")]).await;
        Mock::given(method("POST"))
            .and(url_path("/v1/nodes"))
            .respond_with(ResponseTemplate::new(409).set_body_string("exists"))
            .expect(1)
            .mount(&server)
            .await;

        let mut tree = tree(&server);
        assert_eq!(tree.create_folder("/auto", false).await.as_deref(), Some("n1"));
    }

    #[tokio::test]
    async fn create_file_uploads_new_content_then_replaces_in_place() {
        let server = MockServer::start().await;
        mount_listing(&server, vec![folder("n1", None, "dest")]).await;
        Mock::given(method("POST"))
            .and(url_path("/v1/files"))
            .and(body_string_contains("\"parent_id\":\"n1\""))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "node": {"id": "f1", "parent_id": "n1", "name": "a.pdf", "type": "file"},
                "upload_url": format!("{}/upload/f1", server.uri())
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(url_path("/v1/files/f1/content"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "node": {"id": "f1", "parent_id": "n1", "name": "a.pdf", "type": "file"},
                "upload_url": format!("{}/upload/f1", server.uri())
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(url_path("/upload/f1"))
            .respond_with(ResponseTemplate::new(201))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let local = dir.path().join("a.pdf");
        std::fs::write(&local, b"%PDF").unwrap();

        let mut tree = tree(&server);
        assert_eq!(
            tree.create_file(&local, "/dest/a.pdf").await.as_deref(),
            Some("f1")
        );
        assert_eq!(
            tree.create_file(&local, "/dest/a.pdf").await.as_deref(),
            Some("f1")
        );
    }

    #[tokio::test]
    async fn create_shortcut_fails_clean_when_target_is_missing() {
        let server = MockServer::start().await;
        mount_listing(&server, vec![]).await;
        Mock::given(method("POST"))
            .and(url_path("/v1/nodes"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let mut tree = tree(&server);
        let created = tree
            .create_shortcut("/files/a.pdf", "/grp", "a.pdf")
            .await;

        assert!(created.is_none());
    }

    #[tokio::test]
    async fn create_shortcut_reuses_an_existing_node() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            vec![
                folder("n0", None, "files"),
                file("f1", Some("n0"), "a.pdf"),
                folder("g1", None, "grp"),
            ],
        )
        .await;
        Mock::given(method("POST"))
            .and(url_path("/v1/nodes"))
            .and(body_string_contains("\"type\":\"shortcut\""))
            .and(body_string_contains("\"target_id\":\"f1\""))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "s1", "parent_id": "g1", "name": "a.pdf",
                "type": "shortcut", "target_id": "f1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut tree = tree(&server);
        let first = tree.create_shortcut("/files/a.pdf", "/grp", "a.pdf").await;
        let second = tree.create_shortcut("/files/a.pdf", "/grp", "a.pdf").await;

        assert_eq!(first.as_deref(), Some("s1"));
        assert_eq!(second.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn find_refreshes_once_on_a_miss() {
        let server = MockServer::start().await;
        mount_listing_once(&server, vec![]).await;
        mount_listing(&server, vec![folder("n1", None, "late")]).await;

        let mut tree = tree(&server);
        assert!(tree.find("/late", false).await.is_none());
        let found = tree.find("/late", true).await.unwrap();

        assert_eq!(found.id, "n1");
        assert_eq!(found.name, "late");
        assert_eq!(found.parent_id, None);
        assert_eq!(found.parent_path, "");
        assert!(found.is_folder);
    }

    #[tokio::test]
    async fn orphaned_nodes_stay_out_of_the_path_index() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            vec![
                folder("n1", None, "auto"),
                file("f9", Some("gone"), "lost.pdf"),
            ],
        )
        .await;

        let mut tree = tree(&server);
        assert!(tree.find("/auto", false).await.is_some());
        assert!(tree.find("/gone/lost.pdf", false).await.is_none());
    }
}

use fairsync_core::{PortalClient, RecordMap, RemoteRef};
use tracing::{debug, warn};

/// File types the milestone view mis-attributes for team projects: every
/// member sees the first member's link even though each uploads their own.
const PER_MEMBER_LABELS: [&str; 2] = ["ISEF-1b", "Participant Signature Page"];

/// Rebuilds the per-member file slots of team projects from the detailed
/// per-student view, which does differentiate uploaders.
///
/// Solo projects are untouched. A failed detail fetch skips that entity with
/// a warning; the stale refs stay in place and get another chance next cycle.
pub async fn patch_team_files(portal: &mut PortalClient, records: &mut RecordMap) {
    for (id, record) in records.iter_mut() {
        if record.first_names.len() <= 1 {
            continue;
        }
        let rows = match portal.fetch_student_detail(id).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(entity = %id, error = %err, "detail fetch failed; keeping milestone refs");
                continue;
            }
        };
        for label in PER_MEMBER_LABELS {
            let Some(slot) = record.files.get_mut(label) else {
                continue;
            };
            let refs: Vec<RemoteRef> = rows
                .iter()
                .filter(|row| row.file_type == label)
                .filter_map(|row| row.remote_ref())
                .collect();
            debug!(
                entity = %id,
                label,
                members = record.first_names.len(),
                refs = refs.len(),
                "replacing per-member file refs"
            );
            slot.remote_refs = refs;
            slot.clear_resolution();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairsync_core::{FileSlot, ProjectRecord};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn logged_in_portal(server: &MockServer) -> PortalClient {
        Mock::given(method("POST"))
            .and(path("/admin/authenticate"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fairadmin/csrfToken"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"csrf_token": "csrf-abc"})),
            )
            .mount(server)
            .await;
        let mut portal = PortalClient::with_base_url(&server.uri(), "admin", "secret").unwrap();
        portal.login().await.unwrap();
        portal
    }

    fn team_record(shared_ref: &str) -> ProjectRecord {
        let mut record = ProjectRecord {
            first_names: vec!["Dana".into(), "Riley".into()],
            last_names: vec!["Alvarez".into(), "Chen".into()],
            ..Default::default()
        };
        record.files.insert(
            "ISEF-1b".into(),
            FileSlot::from_refs(vec![RemoteRef::Portal(shared_ref.into())]),
        );
        record
    }

    #[tokio::test]
    async fn team_slots_are_rebuilt_from_the_detail_view() {
        let server = MockServer::start().await;
        let mut portal = logged_in_portal(&server).await;
        Mock::given(method("POST"))
            .and(path("/filesAndForms/studentFormsAndFilesDetailedView"))
            .and(body_string_contains("studentId=64585"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rows": [
                    {"file_type": "ISEF-1b", "remote_filename": "1b_alvarez.pdf"},
                    {"file_type": "ISEF-1b", "remote_filename": "1b_chen.pdf"},
                    {"file_type": "Abstract", "remote_filename": "abs.pdf"}
                ]
            })))
            .mount(&server)
            .await;

        let mut records = RecordMap::new();
        records.insert("64585".into(), team_record("1b_alvarez.pdf"));

        patch_team_files(&mut portal, &mut records).await;

        let slot = &records["64585"].files["ISEF-1b"];
        assert_eq!(
            slot.remote_refs,
            vec![
                RemoteRef::Portal("1b_alvarez.pdf".into()),
                RemoteRef::Portal("1b_chen.pdf".into()),
            ]
        );
    }

    #[tokio::test]
    async fn solo_projects_are_not_fetched() {
        let server = MockServer::start().await;
        let mut portal = logged_in_portal(&server).await;
        Mock::given(method("POST"))
            .and(path("/filesAndForms/studentFormsAndFilesDetailedView"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
            .expect(0)
            .mount(&server)
            .await;

        let mut record = team_record("solo.pdf");
        record.first_names.truncate(1);
        record.last_names.truncate(1);
        let mut records = RecordMap::new();
        records.insert("64585".into(), record);

        patch_team_files(&mut portal, &mut records).await;

        let slot = &records["64585"].files["ISEF-1b"];
        assert_eq!(slot.remote_refs, vec![RemoteRef::Portal("solo.pdf".into())]);
    }

    #[tokio::test]
    async fn failed_detail_fetch_keeps_the_milestone_refs() {
        let server = MockServer::start().await;
        let mut portal = logged_in_portal(&server).await;
        Mock::given(method("POST"))
            .and(path("/filesAndForms/studentFormsAndFilesDetailedView"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut records = RecordMap::new();
        records.insert("64585".into(), team_record("1b_alvarez.pdf"));

        patch_team_files(&mut portal, &mut records).await;

        let slot = &records["64585"].files["ISEF-1b"];
        assert_eq!(
            slot.remote_refs,
            vec![RemoteRef::Portal("1b_alvarez.pdf".into())]
        );
    }
}

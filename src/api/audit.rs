use rocket::{serde::json::Json, Route, State};

use crate::error::Result;
use crate::model::audit::{AuditQuery, AuditRecord};
use crate::store::Stores;

pub fn routes() -> Vec<Route> {
    routes![audit_log]
}

/// Read back the audit trail. Filters by time window (`from`, `to`, RFC 3339),
/// `election_id`, and `entity` optionally narrowed by `entity_id`.
#[get("/audit?<query..>")]
async fn audit_log(query: AuditQuery, stores: &State<Stores>) -> Result<Json<Vec<AuditRecord>>> {
    Ok(Json(stores.audit.audit_records(&query).await?))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, SecondsFormat, Utc};
    use rocket::{http::Status, local::asynchronous::Client, serde::json::serde_json};

    use crate::store::{AuditSink, MemoryStore};

    use super::*;

    async fn record(store: &MemoryStore, entity_id: &str, election_id: u32, minutes_ago: i64) {
        let mut record = AuditRecord::new("VOTE", "Ballot", Some(entity_id.to_string()), "VALID")
            .in_election(election_id);
        record.recorded_at = Utc::now() - Duration::minutes(minutes_ago);
        store.record(record).await.unwrap();
    }

    async fn fetch(client: &Client, uri: &str) -> Vec<AuditRecord> {
        let response = client.get(uri).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let raw_response = response.into_string().await.unwrap();
        serde_json::from_str(&raw_response).unwrap()
    }

    #[backend_test]
    async fn newest_first(client: Client, store: MemoryStore) {
        assert!(fetch(&client, "/audit").await.is_empty());

        record(&store, "a", 1, 20).await;
        record(&store, "b", 1, 5).await;
        record(&store, "c", 2, 10).await;

        let ids: Vec<_> = fetch(&client, "/audit")
            .await
            .into_iter()
            .filter_map(|r| r.entity_id)
            .collect();
        assert_eq!(ids, ["b", "c", "a"]);
    }

    #[backend_test]
    async fn filtered(client: Client, store: MemoryStore) {
        record(&store, "a", 1, 20).await;
        record(&store, "b", 1, 5).await;
        record(&store, "c", 2, 10).await;

        let records = fetch(&client, "/audit?election_id=1").await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.election_id == Some(1)));

        let records = fetch(&client, "/audit?entity=Ballot&entity_id=c").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].election_id, Some(2));

        let records = fetch(&client, "/audit?entity=Terminal").await;
        assert!(records.is_empty());

        let from = (Utc::now() - Duration::minutes(15)).to_rfc3339_opts(SecondsFormat::Secs, true);
        let to = (Utc::now() - Duration::minutes(8)).to_rfc3339_opts(SecondsFormat::Secs, true);
        let records = fetch(&client, &format!("/audit?from={from}&to={to}")).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entity_id.as_deref(), Some("c"));
    }

    #[backend_test]
    async fn bad_timestamp(client: Client) {
        let response = client.get("/audit?from=yesterday").dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(voter)]
    async fn votes_are_audited(client: Client, store: MemoryStore) {
        for _ in 0..2 {
            let response = client.post("/terminal/blank").dispatch().await;
            assert_eq!(Status::Ok, response.status());
            let response = client.post("/terminal/confirm").dispatch().await;
            assert_eq!(Status::Ok, response.status());
        }

        // Audit records are written in the background.
        let mut records = Vec::new();
        for _ in 0..100 {
            records = fetch(&client, "/audit?election_id=1&entity=Ballot").await;
            if records.len() == 2 {
                break;
            }
            rocket::tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.action == "VOTE"));
        assert_eq!(store.audit_log().len(), 2);
    }
}

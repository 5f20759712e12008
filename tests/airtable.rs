//! Airtable store behaviour against a mocked REST API.

use serde_json::{json, Value};
use vetchat::airtable::client::ListQuery;
use vetchat::airtable::{AirtableClient, AirtableStore};
use vetchat::config::AirtableTables;
use vetchat_core::models::{Message, Role, User};
use vetchat_core::store::Store;
use vetchat_core::tier::Tier;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASE: &str = "appTEST";

fn client(server: &MockServer) -> AirtableClient {
    AirtableClient::new(&server.uri(), BASE, "key-test", 5)
        .unwrap()
        .with_max_retries(1)
}

fn store(server: &MockServer) -> AirtableStore {
    AirtableStore::new(client(server), AirtableTables::default())
}

async fn mount_schema(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/v0/meta/bases/{BASE}/tables")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tables": [
                { "id": "tbl1", "name": "users", "fields": [
                    { "name": "email", "type": "email" },
                    { "name": "Plan", "type": "singleSelect" },
                    { "name": "Full Name", "type": "singleLineText" }
                ]},
                { "id": "tbl2", "name": "Messages", "fields": [
                    { "name": "Conversation", "type": "singleLineText" },
                    { "name": "Sender", "type": "singleLineText" },
                    { "name": "Text", "type": "multilineText" },
                    { "name": "Timestamp", "type": "dateTime" }
                ]}
            ]
        })))
        .mount(server)
        .await;
}

async fn request_bodies(server: &MockServer, verb: &str, url_path: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == verb && r.url.path() == url_path)
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_find_user_uses_discovered_table_and_fields() {
    let server = MockServer::start().await;
    mount_schema(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/v0/{BASE}/users")))
        .and(query_param(
            "filterByFormula",
            "LOWER({email})='vet@example.com'",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{
                "id": "recU1",
                "createdTime": "2026-01-05T10:00:00.000Z",
                "fields": { "email": "Vet@Example.com", "Plan": "Premium", "Full Name": "Sam" }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let user = store(&server)
        .find_user_by_email(" VET@example.com ")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.id, "recU1");
    assert_eq!(user.email.as_deref(), Some("vet@example.com"));
    assert_eq!(user.name.as_deref(), Some("Sam"));
    assert_eq!(Tier::from_status(&user.subscription_status), Tier::Premium);
    assert_eq!(user.created_at.to_rfc3339(), "2026-01-05T10:00:00+00:00");
}

#[tokio::test]
async fn test_create_user_falls_back_to_default_names() {
    let server = MockServer::start().await;
    // No schema endpoint mounted: discovery fails with 404.
    Mock::given(method("POST"))
        .and(path(format!("/v0/{BASE}/Users")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{ "id": "recNEW", "fields": {} }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = store(&server)
        .create_user(&User::registered("new@example.com", Some("Pat".into())))
        .await
        .unwrap();
    assert_eq!(created.id, "recNEW");

    let bodies = request_bodies(&server, "POST", &format!("/v0/{BASE}/Users")).await;
    let fields = &bodies[0]["records"][0]["fields"];
    assert_eq!(fields["Email"], "new@example.com");
    assert_eq!(fields["Name"], "Pat");
    assert_eq!(fields["Subscription Status"], "free");
    assert_eq!(bodies[0]["typecast"], true);
}

#[tokio::test]
async fn test_recent_messages_are_reordered_oldest_first() {
    let server = MockServer::start().await;
    mount_schema(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/v0/{BASE}/Messages")))
        .and(query_param("filterByFormula", "{Conversation}='recC1'"))
        .and(query_param("sort[0][field]", "Timestamp"))
        .and(query_param("sort[0][direction]", "desc"))
        .and(query_param("maxRecords", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [
                { "id": "recM3", "fields": { "Conversation": "recC1", "Sender": "assistant", "Text": "third", "Timestamp": "2026-02-01T10:02:00Z" }},
                { "id": "recM2", "fields": { "Conversation": "recC1", "Sender": "user", "Text": "second", "Timestamp": "2026-02-01T10:01:00Z" }}
            ]
        })))
        .mount(&server)
        .await;

    let messages = store(&server).recent_messages("recC1", 2).await.unwrap();
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["second", "third"]);
    assert_eq!(messages[1].role, Role::Assistant);
}

#[tokio::test]
async fn test_list_records_follows_offset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v0/{BASE}/Resources")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{ "id": "rec1", "fields": {} }, { "id": "rec2", "fields": {} }],
            "offset": "itr1"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v0/{BASE}/Resources")))
        .and(query_param("offset", "itr1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{ "id": "rec3", "fields": {} }]
        })))
        .with_priority(1)
        .mount(&server)
        .await;

    let records = client(&server)
        .list_records("Resources", &ListQuery::default())
        .await
        .unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["rec1", "rec2", "rec3"]);
}

#[tokio::test]
async fn test_search_failure_degrades_to_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v0/{BASE}/Resources")))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let found = store(&server).search_resources("Housing", 5).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_usage_counter_create_then_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v0/{BASE}/Usage")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{ "id": "recUSG", "fields": { "User ID": "u1", "Date": "2026-03-01", "Message Count": 3 } }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("/v0/{BASE}/Usage")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{ "id": "recUSG", "fields": { "Message Count": 4 } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
    let s = store(&server);
    assert_eq!(
        s.daily_usage("u1", date).await.unwrap().unwrap().message_count,
        3
    );
    let usage = s.increment_daily_usage("u1", date).await.unwrap();
    assert_eq!(usage.message_count, 4);

    let bodies = request_bodies(&server, "PATCH", &format!("/v0/{BASE}/Usage")).await;
    assert_eq!(bodies[0]["records"][0]["id"], "recUSG");
    assert_eq!(bodies[0]["records"][0]["fields"]["Message Count"], 4);
}

#[tokio::test]
async fn test_cleanup_deletes_messages_then_conversations() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v0/{BASE}/Conversations")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{ "id": "recC1", "fields": {} }, { "id": "recC2", "fields": {} }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v0/{BASE}/Messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [
                { "id": "recM1", "fields": {} },
                { "id": "recM2", "fields": {} },
                { "id": "recM3", "fields": {} }
            ]
        })))
        .mount(&server)
        .await;
    for table in ["Messages", "Conversations"] {
        Mock::given(method("DELETE"))
            .and(path(format!("/v0/{BASE}/{table}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [] })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let report = store(&server)
        .cleanup_before(chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(report.conversations_deleted, 2);
    assert_eq!(report.messages_deleted, 3);
}

#[tokio::test]
async fn test_message_timestamps_keep_milliseconds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/v0/{BASE}/Messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{ "id": "recM", "fields": {} }]
        })))
        .mount(&server)
        .await;

    let s = store(&server);
    let mut user = Message::new("recC1", "recU1", Role::User, "question");
    user.created_at = "2026-10-16T12:48:14.120Z".parse().unwrap();
    let mut reply = Message::new("recC1", "recU1", Role::Assistant, "answer");
    reply.created_at = "2026-10-16T12:48:14.870Z".parse().unwrap();
    s.append_message(&user).await.unwrap();
    s.append_message(&reply).await.unwrap();

    let bodies = request_bodies(&server, "POST", &format!("/v0/{BASE}/Messages")).await;
    let stamps: Vec<&str> = bodies
        .iter()
        .map(|b| b["records"][0]["fields"]["Created At"].as_str().unwrap())
        .collect();
    assert_eq!(
        stamps,
        vec!["2026-10-16T12:48:14.120Z", "2026-10-16T12:48:14.870Z"]
    );
}

#[tokio::test]
async fn test_tied_timestamps_put_user_turn_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v0/{BASE}/Messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [
                { "id": "recM1", "fields": { "Role": "user", "Content": "question", "Created At": "2026-10-16T12:48:14Z" }},
                { "id": "recM2", "fields": { "Role": "assistant", "Content": "answer", "Created At": "2026-10-16T12:48:14Z" }},
                { "id": "recM0", "fields": { "Role": "assistant", "Content": "earlier", "Created At": "2026-10-16T12:40:00Z" }}
            ]
        })))
        .mount(&server)
        .await;

    let messages = store(&server).recent_messages("recC1", 10).await.unwrap();
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["earlier", "question", "answer"]);
}

#[tokio::test]
async fn test_rate_limited_read_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v0/{BASE}/Users/recU1")))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({ "errors": [{ "error": "RATE_LIMIT_REACHED" }] })),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v0/{BASE}/Users/recU1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "recU1",
            "fields": { "Email": "vet@example.com", "Subscription Status": "founder" }
        })))
        .mount(&server)
        .await;

    let user = client(&server)
        .get_record("Users", "recU1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.id, "recU1");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rate_limited_create_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/v0/{BASE}/Messages")))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v0/{BASE}/Messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{ "id": "recM9", "fields": {} }]
        })))
        .mount(&server)
        .await;

    let record = client(&server)
        .create_record("Messages", serde_json::Map::new())
        .await
        .unwrap();
    assert_eq!(record.id, "recM9");
}

#[tokio::test]
async fn test_create_is_not_replayed_after_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/v0/{BASE}/Messages")))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .create_record("Messages", serde_json::Map::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("503"));
}

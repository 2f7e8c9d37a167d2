use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use csm_client::{
    ConnectionSettings, ConnectionUpdate, Error, HttpUserStateClient, Operation, Outcome,
    SettingsHandle, StatsClient, UserStateClient,
};
use csm_test::client::CollectingSink;
use csm_test::server::TestServer;
use csm_types::{BlockData, BlockType, CourseKey, UsageKey};
use secrecy::SecretBox;

fn key(block_type: BlockType, id: &str) -> UsageKey {
    CourseKey::default().make_usage_key(block_type, id).unwrap()
}

fn data(value: &str) -> BlockData {
    BlockData::from([("0".to_owned(), value.to_owned())])
}

fn client(settings: ConnectionSettings) -> (HttpUserStateClient, SettingsHandle) {
    let settings = SettingsHandle::new(settings);
    let client = HttpUserStateClient::builder(settings.clone())
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    (client, settings)
}

#[tokio::test]
async fn reads_back_written_state() {
    csm_test::tracing::init();
    let server = TestServer::new().await;
    let (client, _) = client(server.settings());

    let blocks = BTreeMap::from([
        (key(BlockType::Problem, "1"), data("a")),
        (key(BlockType::Vertical, "2"), BlockData::new()),
    ]);
    client.set_many("learner", blocks).await.unwrap();

    assert_eq!(
        server
            .store()
            .get_stored("learner", &key(BlockType::Problem, "1")),
        Some(data("a"))
    );

    let keys = BTreeSet::from([
        key(BlockType::Problem, "1"),
        key(BlockType::Vertical, "2"),
        key(BlockType::Html, "3"),
    ]);
    let read = client.get_many("learner", &keys).await.unwrap();

    assert_eq!(
        read,
        vec![
            (key(BlockType::Problem, "1"), data("a")),
            (key(BlockType::Vertical, "2"), BlockData::new()),
        ]
    );
}

#[tokio::test]
async fn state_is_per_user() {
    let server = TestServer::new().await;
    let (client, _) = client(server.settings());

    let blocks = BTreeMap::from([(key(BlockType::Html, "7"), data("x"))]);
    client.set_many("alice", blocks).await.unwrap();

    let keys = BTreeSet::from([key(BlockType::Html, "7")]);
    let read = client.get_many("bob", &keys).await.unwrap();
    assert!(read.is_empty());
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let server = TestServer::new().await;
    let (client, _) = client(server.settings());

    server.set_failing(true);
    let err = client
        .set_many("learner", BTreeMap::new())
        .await
        .unwrap_err();

    let Error::Reqwest(err) = err else {
        panic!("expected reqwest error, got {err:?}");
    };
    assert_eq!(err.status(), Some(reqwest_status(503)));
    assert!(server.store().is_empty());
}

#[tokio::test]
async fn reports_requests_to_sink() {
    let server = TestServer::new().await;
    let (client, _) = client(server.settings());
    let sink = Arc::new(CollectingSink::new());
    let client = StatsClient::new(client, Arc::clone(&sink));

    let blocks = BTreeMap::from([(key(BlockType::Problem, "1"), data("a"))]);
    client.set_many("learner", blocks).await.unwrap();
    let keys = BTreeSet::from([key(BlockType::Problem, "1")]);
    client.get_many("learner", &keys).await.unwrap();

    server.set_failing(true);
    client.get_many("learner", &keys).await.unwrap_err();

    let events = sink.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].operation, Operation::SetMany);
    assert!(events[0].is_success());
    assert_eq!(events[1].operation, Operation::GetMany);
    assert_eq!(events[1].outcome, Outcome::Success { response_length: 1 });
    assert_eq!(events[2].operation, Operation::GetMany);
    assert!(matches!(events[2].outcome, Outcome::Failure { .. }));
}

#[tokio::test]
async fn sends_basic_auth() {
    let server = TestServer::with_credentials("loadtest", "secret").await;

    let (anonymous, _) = client(server.settings());
    let err = anonymous
        .get_many("learner", &BTreeSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Reqwest(ref e) if e.status() == Some(reqwest_status(401))));

    let (authenticated, _) = client(ConnectionSettings {
        user: "loadtest".into(),
        password: SecretBox::new(Box::new("secret".into())),
        ..server.settings()
    });
    authenticated
        .get_many("learner", &BTreeSet::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn applies_settings_updates_to_next_request() {
    let server = TestServer::with_credentials("loadtest", "secret").await;
    let (client, settings) = client(ConnectionSettings {
        user: "loadtest".into(),
        password: SecretBox::new(Box::new("wrong".into())),
        ..server.settings()
    });

    assert!(client.get_many("learner", &BTreeSet::new()).await.is_err());

    let current = settings.current();
    settings.update(ConnectionUpdate {
        host: current.host,
        port: current.port,
        name: current.name,
        user: current.user,
        password: "secret".into(),
    });

    client.get_many("learner", &BTreeSet::new()).await.unwrap();
    assert_eq!(server.request_count(), 2);
}

#[tokio::test]
async fn unreachable_service_is_an_error() {
    let (client, _) = client(ConnectionSettings {
        host: "127.0.0.1".into(),
        port: 1,
        ..Default::default()
    });

    let err = client
        .get_many("learner", &BTreeSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Reqwest(ref e) if e.is_connect()));
}

fn reqwest_status(code: u16) -> reqwest::StatusCode {
    reqwest::StatusCode::from_u16(code).unwrap()
}

use std::fs;
use std::path::Path;
use std::sync::Once;

use harvest_core::Category;
use harvest_engine::{
    FetchSettings, HarvestError, HarvestSettings, Harvester, ReqwestSession, StageReport,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API: &str = "http://www.symplectic.co.uk/publications/api";

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(harvest_logging::initialize_for_tests);
}

fn feed(entries: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<feed xmlns=\"http://www.w3.org/2005/Atom\" xmlns:api=\"{API}\">\n{entries}</feed>\n"
    )
}

/// 1 -> {2, 3}
fn groups_feed() -> String {
    feed(concat!(
        "  <entry>\n    <api:user-group id=\"1\">\n      <api:child id=\"2\"/>\n      <api:child id=\"3\"/>\n    </api:user-group>\n  </entry>\n",
        "  <entry>\n    <api:user-group id=\"2\">\n      <api:parent id=\"1\"/>\n    </api:user-group>\n  </entry>\n",
        "  <entry>\n    <api:user-group id=\"3\">\n      <api:parent id=\"1\"/>\n    </api:user-group>\n  </entry>\n",
    ))
}

fn users_feed(ids: &[&str]) -> String {
    let entries: String = ids
        .iter()
        .map(|id| format!("  <entry><api:object category=\"user\" id=\"{id}\"/></entry>\n"))
        .collect();
    feed(&entries)
}

fn atom(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "application/atom+xml")
}

async fn mount_groups(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/groups"))
        .and(query_param("detail", "full"))
        .and(query_param("per-page", "25"))
        .respond_with(atom(groups_feed()))
        .expect(1)
        .mount(server)
        .await;
}

fn session() -> ReqwestSession {
    ReqwestSession::new(FetchSettings::default(), None).expect("client")
}

fn read(base: &Path, page: &str) -> String {
    fs::read_to_string(base.join("feed").join(page)).unwrap()
}

fn page_names(base: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(base.join("feed"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn seeded_groups_and_users_are_scoped_to_the_closure() {
    init_logging();
    let server = MockServer::start().await;
    mount_groups(&server).await;
    for group in ["1", "2", "3"] {
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("groups", group))
            .respond_with(atom(users_feed(&[&format!("{group}0")])))
            .expect(1)
            .mount(&server)
            .await;
    }
    let temp = TempDir::new().unwrap();
    let mut settings = HarvestSettings::new(server.uri(), temp.path());
    settings.groups = vec!["2".to_string()];
    let session = session();

    let harvester = Harvester::new(&session, settings.clone()).unwrap();
    harvester.run(&[Category::Groups]).await.expect("groups");

    assert_eq!(read(temp.path(), "groups-source.all.000"), groups_feed());
    let scoped = read(temp.path(), "groups.scoped.000");
    assert!(scoped.contains("<api:user-group id=\"1\">"));
    assert!(scoped.contains("<api:user-group id=\"2\">"));
    assert!(!scoped.contains("id=\"3\""));

    settings.groups = vec!["1".to_string()];
    let harvester = Harvester::new(&session, settings).unwrap();
    let report = harvester.run(&[Category::Users]).await.expect("users");

    assert_eq!(
        report.stages,
        vec![StageReport {
            category: Category::Users,
            queries: 3,
            pages: 3,
            skipped: false
        }]
    );
    assert_eq!(
        page_names(temp.path()),
        vec![
            "groups-source.all.000",
            "groups.scoped.000",
            "users.1.000",
            "users.2.000",
            "users.3.000"
        ]
    );
    assert!(read(temp.path(), "users.3.000").contains("id=\"30\""));
}

#[tokio::test]
async fn unseeded_run_harvests_everything() {
    init_logging();
    let server = MockServer::start().await;
    mount_groups(&server).await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(atom(users_feed(&["10", "11"])))
        .expect(1)
        .mount(&server)
        .await;
    let temp = TempDir::new().unwrap();
    let session = session();
    let harvester =
        Harvester::new(&session, HarvestSettings::new(server.uri(), temp.path())).unwrap();

    let report = harvester
        .run(&[Category::Groups, Category::Users])
        .await
        .expect("harvest");

    assert_eq!(report.pages(), 2);
    assert_eq!(read(temp.path(), "groups.all.000"), groups_feed());
    assert_eq!(read(temp.path(), "users.all.000"), users_feed(&["10", "11"]));
}

#[tokio::test]
async fn user_relationships_follow_the_archived_users() {
    let server = MockServer::start().await;
    for user in ["2", "10"] {
        Mock::given(method("GET"))
            .and(path(format!("/users/{user}/relationships")))
            .respond_with(atom(feed("")))
            .expect(1)
            .mount(&server)
            .await;
    }
    let temp = TempDir::new().unwrap();
    let users = temp.path().join("raw-records").join("users");
    fs::create_dir_all(&users).unwrap();
    fs::write(users.join("10"), "<api:object/>").unwrap();
    fs::write(users.join("2"), "<api:object/>").unwrap();
    let session = session();
    let harvester =
        Harvester::new(&session, HarvestSettings::new(server.uri(), temp.path())).unwrap();

    harvester
        .run(&[Category::UserRelationships])
        .await
        .expect("user relationships");

    assert_eq!(
        page_names(temp.path()),
        vec!["user-relationships.10.000", "user-relationships.2.000"]
    );
}

fn relationships_page(entries: &[(&str, &str)]) -> String {
    let entries: String = entries
        .iter()
        .map(|(relationship, publication)| {
            format!(
                "  <entry>\n    <api:relationship id=\"{relationship}\">\n      <api:related direction=\"from\"><api:object category=\"user\" id=\"10\"/></api:related>\n      <api:related direction=\"to\"><api:object category=\"publication\" id=\"{publication}\"/></api:related>\n    </api:relationship>\n  </entry>\n"
            )
        })
        .collect();
    feed(&entries)
}

#[tokio::test]
async fn batches_are_built_from_user_relationship_pages() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/relationships"))
        .and(query_param("ids", "100,101"))
        .respond_with(atom(feed("")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/publications"))
        .and(query_param("ids", "500,501"))
        .respond_with(atom(feed("")))
        .expect(1)
        .mount(&server)
        .await;
    let temp = TempDir::new().unwrap();
    let feed_dir = temp.path().join("feed");
    fs::create_dir_all(&feed_dir).unwrap();
    fs::write(
        feed_dir.join("user-relationships.10.000"),
        relationships_page(&[("100", "500"), ("101", "501"), ("100", "500")]),
    )
    .unwrap();
    // A user without relationships produces no batch.
    fs::write(feed_dir.join("user-relationships.11.000"), feed("")).unwrap();
    let session = session();
    let harvester =
        Harvester::new(&session, HarvestSettings::new(server.uri(), temp.path())).unwrap();

    let report = harvester
        .run(&[Category::Relationships, Category::Publications])
        .await
        .expect("batches");

    assert_eq!(report.pages(), 2);
    let names = page_names(temp.path());
    assert!(names.contains(&"relationships.0.000".to_string()));
    assert!(names.contains(&"publications.0.000".to_string()));
    assert!(!names.iter().any(|name| name.ends_with(".1.000")));
}

#[tokio::test]
async fn missing_input_fails_the_stage() {
    let temp = TempDir::new().unwrap();
    let session = session();
    let harvester = Harvester::new(
        &session,
        HarvestSettings::new("https://api.example.org", temp.path()),
    )
    .unwrap();

    let err = harvester
        .run(&[Category::UserRelationships])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarvestError::MissingInput {
            category: Category::UserRelationships,
            ..
        }
    ));

    let err = harvester.run(&[Category::Publications]).await.unwrap_err();
    assert!(matches!(err, HarvestError::MissingInput { .. }));
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let temp = TempDir::new().unwrap();
    let mut settings = HarvestSettings::new(server.uri(), temp.path());
    settings.groups = vec!["1".to_string()];
    settings.dry_run = true;
    let session = session();
    let harvester = Harvester::new(&session, settings).unwrap();

    let report = harvester.run(&Category::ALL).await.expect("dry run");

    assert_eq!(report.pages(), 0);
    let skipped: Vec<Category> = report
        .stages
        .iter()
        .filter(|stage| stage.skipped)
        .map(|stage| stage.category)
        .collect();
    assert_eq!(
        skipped,
        vec![
            Category::Users,
            Category::UserRelationships,
            Category::Publications,
            Category::Relationships
        ]
    );
    assert!(!temp.path().join("feed").exists());
}

#[tokio::test]
async fn failed_request_aborts_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let temp = TempDir::new().unwrap();
    let session = session();
    let harvester =
        Harvester::new(&session, HarvestSettings::new(server.uri(), temp.path())).unwrap();

    let err = harvester
        .run(&[Category::Groups, Category::Users])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarvestError::Pagination {
            category: Category::Groups,
            ..
        }
    ));
}

#[test]
fn invalid_base_url_is_rejected_up_front() {
    let session = session();
    let result = Harvester::new(&session, HarvestSettings::new("not a url", "."));
    assert!(matches!(result, Err(HarvestError::Query(_))));
}

use harvest_core::{Category, FeedQuery, PageIndex, PageIndexError, PageName, QueryError};
use pretty_assertions::assert_eq;

#[test]
fn page_index_is_zero_padded() {
    assert_eq!(PageIndex::FIRST.to_string(), "000");
    assert_eq!(PageIndex::new(42).unwrap().to_string(), "042");
    assert_eq!(PageIndex::new(999).unwrap().to_string(), "999");
}

#[test]
fn page_index_refuses_to_overflow_its_width() {
    let last = PageIndex::new(999).unwrap();
    assert_eq!(last.next(), Err(PageIndexError::Overflow(1000)));
    assert_eq!(PageIndex::new(1000), Err(PageIndexError::Overflow(1000)));
}

#[test]
fn page_names_round_trip_through_file_names() {
    let name = PageName::new("user-relationships", "1234", PageIndex::new(7).unwrap());
    assert_eq!(name.file_name(), "user-relationships.1234.007");
    assert_eq!(PageName::parse("user-relationships.1234.007"), Some(name));
}

#[test]
fn page_name_parse_rejects_foreign_files() {
    assert_eq!(PageName::parse("groups.all"), None);
    assert_eq!(PageName::parse("groups.all.7"), None);
    assert_eq!(PageName::parse("groups.all.0a1"), None);
    assert_eq!(PageName::parse(".all.001"), None);
    assert_eq!(PageName::parse("notes.txt"), None);
}

#[test]
fn page_names_sort_in_fetch_order() {
    let mut names = vec![
        PageName::new("users", "all", PageIndex::new(10).unwrap()),
        PageName::new("users", "all", PageIndex::new(2).unwrap()),
        PageName::new("users", "all", PageIndex::FIRST),
    ];
    names.sort();
    let files: Vec<String> = names.iter().map(PageName::file_name).collect();
    assert_eq!(files, vec!["users.all.000", "users.all.002", "users.all.010"]);
}

fn query() -> FeedQuery {
    FeedQuery::new("https://api.example.org/elements-api/v5.5", 25).unwrap()
}

#[test]
fn feed_queries_keep_the_base_path() {
    let query = query();
    assert_eq!(
        query.groups().as_str(),
        "https://api.example.org/elements-api/v5.5/groups?detail=full&per-page=25"
    );
    assert_eq!(
        query.users(Some("12")).as_str(),
        "https://api.example.org/elements-api/v5.5/users?groups=12&detail=full&per-page=25"
    );
    assert_eq!(
        query.user_relationships("77").as_str(),
        "https://api.example.org/elements-api/v5.5/users/77/relationships?detail=full&per-page=25"
    );
}

#[test]
fn batch_queries_join_ids() {
    let query = query();
    let url = query
        .batch(Category::Publications, &["1".to_string(), "20".to_string()])
        .unwrap()
        .expect("non-empty batch");
    let ids: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key == "ids")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    assert_eq!(ids, vec![("ids".to_string(), "1,20".to_string())]);
    assert!(url.path().ends_with("/publications"));
}

#[test]
fn empty_batches_issue_no_query() {
    assert_eq!(query().batch(Category::Relationships, &[]), Ok(None));
}

#[test]
fn only_batch_categories_accept_id_lists() {
    assert_eq!(
        query().batch(Category::Users, &["1".to_string()]),
        Err(QueryError::NotBatchable(Category::Users))
    );
}

#[test]
fn resolve_accepts_paths_and_absolute_urls() {
    let query = query();
    assert_eq!(
        query.resolve("/groups/5").unwrap().as_str(),
        "https://api.example.org/elements-api/v5.5/groups/5"
    );
    assert_eq!(
        query.resolve("https://other.example.org/x").unwrap().as_str(),
        "https://other.example.org/x"
    );
}

#[test]
fn invalid_base_urls_are_reported() {
    assert!(matches!(
        FeedQuery::new("not a url", 25),
        Err(QueryError::InvalidBase { .. })
    ));
}

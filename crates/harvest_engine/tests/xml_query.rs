use harvest_engine::{next_page_link, XmlDocument, XmlError, XmlNamespaces};
use pretty_assertions::assert_eq;

const API: &str = "http://www.symplectic.co.uk/publications/api";

fn users_page() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:api="{API}">
  <title>users</title>
  <api:pagination results-count="3" items-per-page="2">
    <api:page position="this" href="https://api.example.org/users?page=1"/>
    <api:page position="next" href="https://api.example.org/users?page=2"/>
  </api:pagination>
  <entry>
    <id>tag:10</id>
    <api:object category="user" id="10" username="ada"/>
  </entry>
  <entry>
    <id>tag:2</id>
    <api:object category="user" id="2" username="bob"><api:last-name>Bob</api:last-name></api:object>
  </entry>
</feed>
"#
    )
}

fn parse(text: &str) -> XmlDocument {
    XmlDocument::parse(text, XmlNamespaces::default()).expect("well-formed page")
}

#[test]
fn selects_attribute_values_in_document_order() {
    let page = parse(&users_page());
    let ids = page
        .select_values("//atom:entry/api:object/@id")
        .expect("selector");
    assert_eq!(ids, vec!["10", "2"]);
}

#[test]
fn unprefixed_steps_bind_to_atom() {
    let page = parse(&users_page());
    let titles = page.select("/feed/title").expect("selector");
    assert_eq!(titles.len(), 1);
    assert_eq!(titles[0].fragment(), "<title>users</title>");
}

/// Selected elements outlive the selector string and the parsed selector.
fn usernames(page: &XmlDocument) -> Vec<&str> {
    let objects = page.select("//api:object").expect("selector");
    objects
        .iter()
        .filter_map(|object| object.attribute("username"))
        .collect()
}

#[test]
fn selected_elements_borrow_only_the_document() {
    let page = parse(&users_page());
    let names = usernames(&page);
    assert_eq!(names, vec!["ada", "bob"]);

    let entries = page.select(&String::from("//atom:entry")).expect("selector");
    assert_eq!(entries[1].descendants().count(), 3);
}

#[test]
fn matching_ignores_the_document_prefixes() {
    let text = format!(
        r#"<a:feed xmlns:a="http://www.w3.org/2005/Atom" xmlns:x="{API}"><a:entry><x:object id="7"/></a:entry></a:feed>"#
    );
    let page = parse(&text);
    assert_eq!(
        page.select_values("//atom:entry/api:object/@id").unwrap(),
        vec!["7"]
    );
}

#[test]
fn configured_api_namespace_is_used() {
    let text = r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:api="urn:other"><entry><api:object id="1"/></entry></feed>"#;
    let default = parse(text);
    assert!(default.select_values("//api:object/@id").unwrap().is_empty());

    let custom = XmlDocument::parse(text, XmlNamespaces::with_api("urn:other")).unwrap();
    assert_eq!(custom.select_values("//api:object/@id").unwrap(), vec!["1"]);
}

#[test]
fn fragments_are_verbatim() {
    let page = parse(&users_page());
    let fragments = page
        .select_fragments("//atom:entry/api:object[@id='2']")
        .unwrap();
    assert_eq!(
        fragments,
        vec![r#"<api:object category="user" id="2" username="bob"><api:last-name>Bob</api:last-name></api:object>"#]
    );
}

#[test]
fn standalone_fragment_carries_inherited_namespaces() {
    let page = parse(&users_page());
    let objects = page.select("//api:object[@id='10']").unwrap();
    assert_eq!(
        objects[0].standalone_fragment(),
        format!(
            r#"<api:object xmlns="http://www.w3.org/2005/Atom" xmlns:api="{API}" category="user" id="10" username="ada"/>"#
        )
    );
}

#[test]
fn delete_nodes_keeps_every_other_byte() {
    let text = "<feed xmlns=\"http://www.w3.org/2005/Atom\">\n  <entry><id>1</id></entry>\n  <entry><id>2</id></entry>\n  <!-- kept -->\n</feed>\n";
    let page = parse(text);
    let pruned = page
        .delete_nodes(&["//atom:entry/atom:id"])
        .expect("selector");
    assert_eq!(
        pruned,
        "<feed xmlns=\"http://www.w3.org/2005/Atom\">\n  <entry></entry>\n  <entry></entry>\n  <!-- kept -->\n</feed>\n"
    );

    let without_entries = page.delete_nodes(&["/feed/entry"]).unwrap();
    assert_eq!(
        without_entries,
        "<feed xmlns=\"http://www.w3.org/2005/Atom\">\n  <!-- kept -->\n</feed>\n"
    );
}

#[test]
fn next_link_prefers_atom_then_api_pagination() {
    let page = parse(&users_page());
    assert_eq!(
        next_page_link(&page).unwrap().as_deref(),
        Some("https://api.example.org/users?page=2")
    );

    let atom = parse(
        r#"<feed xmlns="http://www.w3.org/2005/Atom"><link rel="self" href="a"/><link rel="next" href="b"/></feed>"#,
    );
    assert_eq!(next_page_link(&atom).unwrap().as_deref(), Some("b"));

    let last = parse(r#"<feed xmlns="http://www.w3.org/2005/Atom"><link rel="self" href="a"/></feed>"#);
    assert_eq!(next_page_link(&last).unwrap(), None);
}

#[test]
fn malformed_documents_are_rejected() {
    for text in ["", "<feed>", "<feed></entry>", "<feed/><feed/>"] {
        let result = XmlDocument::parse(text, XmlNamespaces::default());
        assert!(
            matches!(result, Err(XmlError::Malformed { .. })),
            "{text:?} parsed as {result:?}"
        );
    }
}

#[test]
fn non_utf8_bytes_are_an_encoding_error() {
    let result = XmlDocument::from_bytes(b"<feed>\xff</feed>", XmlNamespaces::default());
    assert!(matches!(result, Err(XmlError::Encoding(_))));
}

#[test]
fn bad_selectors_are_reported() {
    let page = parse(&users_page());
    for selector in ["entry", "//x:entry", "//entry[@id=1]", "//@id/entry", "//"] {
        assert!(
            matches!(page.select(selector), Err(XmlError::Selector { .. })),
            "{selector:?}"
        );
    }
    assert!(page.select_values("//entry").is_err());
    assert!(page.select("//entry/@id").is_err());
}

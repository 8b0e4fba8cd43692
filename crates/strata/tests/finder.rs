//! Fluent queries against a populated SQLite database.

mod common;

use common::*;
use strata::StateErrorKind;
use strata::prelude::*;

/// Ten gadgets priced 20..=110 in steps of 10, alternating between the
/// "tools" and "home" categories, plus one book.
fn populated() -> Session<SqliteConnection> {
    let session = open();
    for i in 0..10 {
        let category = if i % 2 == 0 { "tools" } else { "home" };
        let price = f64::from(20 + i * 10);
        session
            .save(&gadget(&format!("gadget-{i}"), price, category))
            .unwrap();
    }
    session
        .save(&Book {
            product: Product {
                id: None,
                title: "manual".into(),
                price: 55.0,
            },
            pages: 12,
        })
        .unwrap();
    session.commit().unwrap();
    session.clear();
    session
}

fn prices(gadgets: &[Gadget]) -> Vec<f64> {
    gadgets.iter().map(|g| g.product.price).collect()
}

#[test]
fn test_eq_order_and_limit() {
    let session = populated();
    let found = session
        .finder("Gadget")
        .eq("category", "tools")
        .order_asc("price")
        .limit(3)
        .list_as::<Gadget>()
        .unwrap();
    assert_eq!(prices(&found), [20.0, 40.0, 60.0]);
    assert!(found.iter().all(|g| g.category == "tools"));
}

#[test]
fn test_order_desc_with_offset() {
    let session = populated();
    let found = session
        .finder("Gadget")
        .order_desc("price")
        .limit(2)
        .offset(1)
        .list_as::<Gadget>()
        .unwrap();
    assert_eq!(prices(&found), [100.0, 90.0]);
}

#[test]
fn test_between_is_inclusive() {
    let session = populated();
    let found = session
        .finder("Gadget")
        .between("price", 40.0, 110.0)
        .list()
        .unwrap();
    assert_eq!(found.len(), 8);
}

#[test]
fn test_polymorphic_finder_covers_subclasses() {
    let session = populated();
    let found = session
        .finder("Product")
        .between("price", 50.0, 60.0)
        .order_asc("price")
        .list()
        .unwrap();
    let classes: Vec<_> = found.iter().map(|e| e.entity_name()).collect();
    assert_eq!(classes, ["Gadget", "Book", "Gadget"]);
}

#[test]
fn test_empty_in_list_matches_nothing() {
    let session = populated();
    let found = session
        .finder("Gadget")
        .is_in("category", Vec::<&str>::new())
        .list()
        .unwrap();
    assert!(found.is_empty());

    let found = session
        .finder("Gadget")
        .is_in("category", ["home", "garden"])
        .list()
        .unwrap();
    assert_eq!(found.len(), 5);
}

#[test]
fn test_like_and_comparisons() {
    let session = populated();
    let found = session
        .finder("Gadget")
        .like("title", "gadget-%")
        .gt("price", 80.0)
        .lte("price", 100.0)
        .list_as::<Gadget>()
        .unwrap();
    let mut titles: Vec<_> = found.iter().map(|g| g.product.title.as_str()).collect();
    titles.sort_unstable();
    assert_eq!(titles, ["gadget-7", "gadget-8"]);
}

#[test]
fn test_first_follows_order() {
    let session = populated();
    let first = session
        .finder("Gadget")
        .order_desc("price")
        .first()
        .unwrap()
        .unwrap();
    let first: Gadget = downcast(first).unwrap();
    assert_eq!(first.product.title, "gadget-9");

    let none = session.finder("Gadget").eq("category", "garden").first().unwrap();
    assert!(none.is_none());
}

#[test]
fn test_single_cardinality() {
    let session = populated();
    let one = session.finder("Gadget").eq("title", "gadget-3").single().unwrap();
    assert_eq!(one.get_value("category"), Some(Value::from("home")));

    let err = session.finder("Gadget").eq("category", "home").single().unwrap_err();
    assert_eq!(err.state_kind(), Some(StateErrorKind::MultipleFound));

    let err = session.finder("Gadget").eq("title", "missing").single().unwrap_err();
    assert_eq!(err.state_kind(), Some(StateErrorKind::NoneFound));

    let none = session
        .finder("Gadget")
        .eq("title", "missing")
        .single_optional()
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn test_raw_condition() {
    let session = populated();
    let found = session
        .finder("Gadget")
        .where_raw("price * 2 > ?", vec![Value::from(200.0)])
        .list()
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[test]
fn test_results_enter_identity_map() {
    let session = populated();
    let listed = session.finder("Gadget").eq("title", "gadget-0").list().unwrap();
    assert_eq!(listed.len(), 1);
    let tracked = session.tracked_count();
    let id = listed[0].get_value("id").unwrap();
    assert!(session.find("Gadget", id).unwrap().is_some());
    assert_eq!(session.tracked_count(), tracked);
}

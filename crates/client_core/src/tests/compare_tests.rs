use super::*;
use crate::test_support::{post, FakeListings};
use shared::protocol::PostLocation;

fn located(slug: &str, title: &str, price: f64, address: &str) -> PostSummary {
    PostSummary {
        location: Some(PostLocation {
            address_line: Some(address.into()),
        }),
        ..post(slug, title, price)
    }
}

async fn board(posts: Vec<PostSummary>) -> (CompareBoard, LocalStore) {
    let store = LocalStore::new("sqlite::memory:").await.expect("db");
    let board = CompareBoard::new(store.clone(), Arc::new(FakeListings::with_posts(posts)));
    (board, store)
}

#[test]
fn selection_is_capped_at_two() {
    let mut selection = CompareSelection::new();
    let a = post("a", "Room A", 1.0);
    let b = post("b", "Room B", 1.0);
    let c = post("c", "Room C", 1.0);

    assert!(selection.toggle(&a).expect("first"));
    assert!(selection.toggle(&b).expect("second"));
    assert!(matches!(
        selection.toggle(&c),
        Err(CompareError::LimitReached { limit: 2 })
    ));

    assert!(!selection.toggle(&a).expect("deselect"));
    assert!(!selection.is_selected(&a));
    assert!(selection.toggle(&c).expect("room again"));
    let slugs: Vec<&str> = selection
        .selected()
        .iter()
        .map(|post| post.slug.as_str())
        .collect();
    assert_eq!(slugs, ["b", "c"]);
}

#[tokio::test]
async fn confirm_requires_exactly_two_and_persists_slugs() {
    let (board, store) = board(vec![]).await;
    let mut selection = CompareSelection::new();
    selection.toggle(&post("a", "Room A", 1.0)).expect("select");

    assert!(matches!(
        board.save(&selection).await,
        Err(CompareError::WrongSelectionSize {
            expected: 2,
            actual: 1
        })
    ));
    assert!(store.compared_items().await.expect("items").is_empty());

    selection.toggle(&post("b", "Room B", 1.0)).expect("select");
    let saved = board.save(&selection).await.expect("save");
    assert_eq!(saved, ["a", "b"]);
    assert_eq!(store.compared_items().await.expect("items"), ["a", "b"]);
}

#[tokio::test]
async fn load_skips_listings_that_no_longer_exist() {
    let (board, store) = board(vec![post("a", "Room A", 1.0)]).await;
    store
        .set_compared_items(&["gone".to_string(), "a".to_string()])
        .await
        .expect("seed");

    let loaded = board.load().await.expect("load");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].slug, "a");
}

#[tokio::test]
async fn remove_and_clear_update_the_stored_list() {
    let (board, store) = board(vec![]).await;
    store
        .set_compared_items(&["a".to_string(), "b".to_string()])
        .await
        .expect("seed");

    assert_eq!(board.remove("a").await.expect("remove"), ["b"]);
    board.clear().await.expect("clear");
    assert!(store.compared_items().await.expect("items").is_empty());
}

#[tokio::test]
async fn candidates_come_from_the_first_large_page() {
    let (board, _store) = board(vec![post("b", "Room B", 1.0), post("a", "Room A", 1.0)]).await;
    let page = board.candidates().await.expect("candidates");
    assert_eq!(page.total, 2);
    assert_eq!(page.data[0].slug, "a");
}

#[test]
fn rows_cover_fixed_fields_and_every_amenity() {
    let mut a = located("a", "Room A", 3_500_000.0, "12 Le Loi");
    a.category_name = Some("Studio".into());
    a.amenities.insert("Wifi".into(), true);
    a.amenities.insert("Parking".into(), false);
    let mut b = post("b", "Room B", 2_000_000.0);
    b.area = 32.5;
    b.amenities.insert("Air conditioning".into(), true);

    let rows = comparison_rows(&[a, b]);
    let labels: Vec<&str> = rows.iter().map(|row| row.label.as_str()).collect();
    assert_eq!(
        labels,
        ["Price", "Area", "Address", "Category", "Air conditioning", "Parking", "Wifi"]
    );
    assert_eq!(rows[0].values, ["3.500.000/month", "2.000.000/month"]);
    assert_eq!(rows[1].values, ["20 m²", "32.5 m²"]);
    assert_eq!(rows[2].values, ["12 Le Loi", "N/A"]);
    assert_eq!(rows[3].values, ["Studio", "N/A"]);
    assert_eq!(rows[4].values, ["No", "Yes"]);
    assert_eq!(rows[5].values, ["No", "No"]);
    assert_eq!(rows[6].values, ["Yes", "No"]);
}

#[test]
fn filter_matches_title_or_address_case_insensitively() {
    let items = vec![
        located("a", "Sunny studio", 1.0, "12 Le Loi"),
        located("b", "Quiet room", 1.0, "7 Nguyen Hue"),
    ];

    let by_title: Vec<&str> = filter_listings(&items, "STUDIO")
        .iter()
        .map(|post| post.slug.as_str())
        .collect();
    assert_eq!(by_title, ["a"]);

    let by_address: Vec<&str> = filter_listings(&items, "nguyen")
        .iter()
        .map(|post| post.slug.as_str())
        .collect();
    assert_eq!(by_address, ["b"]);

    assert_eq!(filter_listings(&items, "  ").len(), 2);
    assert!(filter_listings(&items, "penthouse").is_empty());
}

#[test]
fn prices_use_dot_thousands_separators() {
    assert_eq!(format_price(0.0), "0");
    assert_eq!(format_price(999.0), "999");
    assert_eq!(format_price(1_000.0), "1.000");
    assert_eq!(format_price(3_500_000.4), "3.500.000");
    assert_eq!(format_price(-12_345.0), "-12.345");
}

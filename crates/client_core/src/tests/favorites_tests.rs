use super::*;
use crate::test_support::{post, FakeFavorites};

fn catalog() -> Vec<PostSummary> {
    vec![
        post("room-a", "Room A", 2_000_000.0),
        post("room-b", "Room B", 3_000_000.0),
        post("room-c", "Room C", 4_000_000.0),
    ]
}

fn favorites(source: &Arc<FakeFavorites>) -> FavoriteList {
    FavoriteList::new(source.clone(), UserId::new("u-1"))
}

#[tokio::test]
async fn load_lists_saved_posts_only() {
    let source = Arc::new(FakeFavorites::new(catalog(), &["id-room-b"]));
    let mut list = favorites(&source);

    let items = list.load().await.expect("load");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].slug, "room-b");
    assert!(list.contains(&PostId::new("id-room-b")));
    assert!(!list.contains(&PostId::new("id-room-a")));
}

#[tokio::test]
async fn toggling_a_favorite_removes_it_without_reloading() {
    let source = Arc::new(FakeFavorites::new(catalog(), &["id-room-a", "id-room-b"]));
    let mut list = favorites(&source);
    list.load().await.expect("load");

    let now_favorite = list.toggle(&PostId::new("id-room-a")).await.expect("toggle");
    assert!(!now_favorite);
    let slugs: Vec<&str> = list.items().iter().map(|item| item.slug.as_str()).collect();
    assert_eq!(slugs, ["room-b"]);
    assert_eq!(
        source.toggles(),
        [(UserId::new("u-1"), PostId::new("id-room-a"))]
    );
}

#[tokio::test]
async fn toggling_a_new_post_adds_it() {
    let source = Arc::new(FakeFavorites::new(catalog(), &[]));
    let mut list = favorites(&source);
    list.load().await.expect("load");
    assert!(list.items().is_empty());

    assert!(list.toggle(&PostId::new("id-room-c")).await.expect("toggle"));
    assert_eq!(list.items().len(), 1);
    assert_eq!(list.items()[0].title, "Room C");
}

#[tokio::test]
async fn failed_toggle_leaves_the_list_untouched() {
    let source = Arc::new(FakeFavorites::new(catalog(), &["id-room-a"]));
    source.fail_toggles(1);
    let mut list = favorites(&source);
    list.load().await.expect("load");

    let err = list
        .toggle(&PostId::new("id-room-a"))
        .await
        .expect_err("backend down");
    assert_eq!(err.status(), Some(503));
    assert_eq!(list.items().len(), 1);
    assert!(source.toggles().is_empty());
}

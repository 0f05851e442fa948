use storage::{LocalStore, COMPARED_ITEMS_KEY, TOKEN_KEY};

#[tokio::test]
async fn values_survive_reopening_the_database_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("nested").join("client.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    {
        let store = LocalStore::new(&database_url).await.expect("open");
        store.set_auth_token("persisted-token").await.expect("token");
        store
            .set_compared_items(&["room-a".to_string(), "room-b".to_string()])
            .await
            .expect("compare");
    }

    assert!(db_path.exists(), "database file should exist: {}", db_path.display());

    let reopened = LocalStore::new(&database_url).await.expect("reopen");
    assert_eq!(
        reopened.get_item(TOKEN_KEY).await.expect("token").as_deref(),
        Some("persisted-token")
    );
    assert_eq!(
        reopened.get_item(COMPARED_ITEMS_KEY).await.expect("compare").as_deref(),
        Some(r#"["room-a","room-b"]"#)
    );
}

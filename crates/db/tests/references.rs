//! Integration tests for genome reference bookkeeping.

use sqlx::PgPool;
use alaska_db::models::reference::CreateReference;
use alaska_db::repositories::ReferenceRepo;
use alaska_db::{PgRegistry, RegistryError, RetryPolicy, WorkRegistry};
use assert_matches::assert_matches;

fn reference(organism: &str, version: &str) -> CreateReference {
    CreateReference {
        organism: organism.to_string(),
        version: version.to_string(),
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_ready_references_are_not_listed(pool: PgPool) {
    let human = ReferenceRepo::create(&pool, &reference("homo_sapiens", "96"))
        .await
        .unwrap();
    let mouse = ReferenceRepo::create(&pool, &reference("mus_musculus", "96"))
        .await
        .unwrap();
    assert!(!human.ready);

    let registry = PgRegistry::new(pool.clone()).with_retry(RetryPolicy::none());
    let unbuilt: Vec<_> = registry
        .list_unbuilt_references()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(unbuilt, [human.id, mouse.id]);

    registry.mark_reference_ready(human.id).await.unwrap();
    let unbuilt = registry.list_unbuilt_references().await.unwrap();
    assert_eq!(unbuilt.len(), 1);
    assert_eq!(unbuilt[0].id, mouse.id);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_marking_unknown_reference_is_not_found(pool: PgPool) {
    let registry = PgRegistry::new(pool).with_retry(RetryPolicy::none());
    assert_matches!(
        registry.mark_reference_ready(4242).await,
        Err(RegistryError::NotFound { entity: "Reference", id: 4242 })
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_duplicate_version_is_rejected(pool: PgPool) {
    ReferenceRepo::create(&pool, &reference("homo_sapiens", "96"))
        .await
        .unwrap();
    let duplicate = ReferenceRepo::create(&pool, &reference("homo_sapiens", "96")).await;
    assert!(duplicate.is_err());
}

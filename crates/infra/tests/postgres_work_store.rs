//! Postgres adapter tests against a real database.
//!
//! Run with `ADPROMPT_TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.
//! Each test creates and drops its own table.

use std::collections::HashSet;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use adprompt_core::WorkItemId;
use adprompt_infra::work_store::{
    ExhaustionPolicy, PostgresWorkItemStore, WorkItemStore, WorkStoreError, WorkTable,
};

const DATABASE_ENV: &str = "ADPROMPT_TEST_DATABASE_URL";

struct Fixture {
    store: PostgresWorkItemStore,
    table: String,
}

impl Fixture {
    async fn create() -> Option<Self> {
        let Ok(url) = std::env::var(DATABASE_ENV) else {
            eprintln!("{DATABASE_ENV} not set; skipping");
            return None;
        };

        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let table = format!("adprompt_test_{}_{}", std::process::id(), nanos % 1_000_000_000);
        let store = PostgresWorkItemStore::connect(
            &url,
            WorkTable::for_table(&table).unwrap(),
            Duration::from_secs(10),
        )
        .await
        .expect("connect");

        sqlx::query(&format!(
            "CREATE TABLE {table} (
                id BIGINT PRIMARY KEY,
                title TEXT,
                image_data TEXT,
                image_status BOOLEAN,
                crawl_status BOOLEAN,
                prompt_veo3 TEXT,
                updated_at TIMESTAMPTZ
            )"
        ))
        .execute(store.pool())
        .await
        .expect("create table");

        Some(Self { store, table })
    }

    async fn insert(&self, id: i64, ready: bool, claim: Option<bool>, result: Option<&str>) {
        sqlx::query(&format!(
            "INSERT INTO {} (id, title, image_data, image_status, crawl_status, prompt_veo3)
             VALUES ($1, $2, $3, $4, $5, $6)",
            self.table
        ))
        .bind(id)
        .bind(format!("Sản phẩm {id}"))
        .bind(format!("img-{id}.jpg"))
        .bind(ready)
        .bind(claim)
        .bind(result)
        .execute(self.store.pool())
        .await
        .expect("insert");
    }

    async fn row(&self, id: i64) -> (Option<bool>, Option<String>, bool) {
        sqlx::query_as::<_, (Option<bool>, Option<String>, bool)>(&format!(
            "SELECT crawl_status, prompt_veo3, updated_at IS NOT NULL FROM {} WHERE id = $1",
            self.table
        ))
        .bind(id)
        .fetch_one(self.store.pool())
        .await
        .expect("select row")
    }

    async fn drop_table(self) {
        let _ = sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.table))
            .execute(self.store.pool())
            .await;
        self.store.close().await;
    }
}

fn ids(items: &[adprompt_products::WorkItem]) -> Vec<i64> {
    items.iter().map(|i| i.id_typed().get()).collect()
}

#[tokio::test]
#[ignore = "requires ADPROMPT_TEST_DATABASE_URL"]
async fn claim_respects_eligibility_order_and_limit() {
    let Some(fx) = Fixture::create().await else { return };

    for id in [4, 2, 6, 1] {
        fx.insert(id, true, None, None).await;
    }
    fx.insert(3, false, None, None).await;
    fx.insert(5, true, None, Some("{}")).await;
    fx.insert(7, true, Some(false), None).await;

    let first = fx.store.claim_batch(3).await;
    assert_eq!(ids(&first), vec![1, 2, 4]);
    assert_eq!(first[0].title(), Some("Sản phẩm 1"));
    assert_eq!(first[0].payload(), Some("img-1.jpg"));
    assert_eq!(fx.row(1).await.0, Some(true));

    let second = fx.store.claim_batch(10).await;
    assert_eq!(ids(&second), vec![6]);
    assert!(fx.store.claim_batch(10).await.is_empty());

    fx.drop_table().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires ADPROMPT_TEST_DATABASE_URL"]
async fn concurrent_claims_never_overlap() {
    let Some(fx) = Fixture::create().await else { return };
    for id in 1..=40 {
        fx.insert(id, true, None, None).await;
    }

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = fx.store.clone();
        handles.push(tokio::spawn(async move { store.claim_batch(8).await }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for item in handle.await.unwrap() {
            assert!(seen.insert(item.id_typed()), "{} claimed twice", item.id_typed());
        }
    }
    // SKIP LOCKED may leave rows for a later call, but never hands one out twice.
    assert!(seen.len() <= 40);
    let rest = fx.store.claim_batch(100).await;
    for item in &rest {
        assert!(!seen.contains(&item.id_typed()));
    }
    assert_eq!(seen.len() + rest.len(), 40);

    fx.drop_table().await;
}

#[tokio::test]
#[ignore = "requires ADPROMPT_TEST_DATABASE_URL"]
async fn persist_writes_once() {
    let Some(fx) = Fixture::create().await else { return };
    fx.insert(1, true, None, None).await;
    fx.store.claim_batch(1).await;

    let id = WorkItemId::new(1);
    fx.store.persist_result(id, r#"{"part1_prompt":"a","part2_prompt":"b"}"#).await.unwrap();
    let err = fx.store.persist_result(id, "{}").await.unwrap_err();
    assert_eq!(err, WorkStoreError::AlreadyCompleted(id));

    let (claim, result, touched) = fx.row(1).await;
    assert_eq!(claim, Some(true));
    assert_eq!(result.as_deref(), Some(r#"{"part1_prompt":"a","part2_prompt":"b"}"#));
    assert!(touched);

    let missing = WorkItemId::new(99);
    assert_eq!(
        fx.store.persist_result(missing, "{}").await.unwrap_err(),
        WorkStoreError::NotFound(missing)
    );

    fx.drop_table().await;
}

#[tokio::test]
#[ignore = "requires ADPROMPT_TEST_DATABASE_URL"]
async fn exhaustion_policies_update_the_claim_flag() {
    let Some(fx) = Fixture::create().await else { return };
    for id in 1..=3 {
        fx.insert(id, true, None, None).await;
    }
    fx.store.claim_batch(3).await;

    for (id, policy) in [
        (1, ExhaustionPolicy::LeaveClaimed),
        (2, ExhaustionPolicy::Release),
        (3, ExhaustionPolicy::MarkFailed),
    ] {
        fx.store.settle_exhausted(WorkItemId::new(id), policy).await.unwrap();
    }

    assert_eq!(fx.row(1).await.0, Some(true));
    assert_eq!(fx.row(2).await.0, None);
    assert_eq!(fx.row(3).await.0, Some(false));
    assert_eq!(ids(&fx.store.claim_batch(10).await), vec![2]);

    fx.drop_table().await;
}

#[tokio::test]
#[ignore = "requires ADPROMPT_TEST_DATABASE_URL"]
async fn claim_failure_reads_as_empty_batch() {
    let Some(fx) = Fixture::create().await else { return };
    fx.insert(1, true, None, None).await;

    let broken = PostgresWorkItemStore::new(
        fx.store.pool().clone(),
        WorkTable::for_table(format!("{}_missing", fx.table)).unwrap(),
    );
    assert!(matches!(
        broken.try_claim_batch(5).await,
        Err(WorkStoreError::Storage(_))
    ));
    assert!(broken.claim_batch(5).await.is_empty());

    // Nothing was claimed in the real table.
    assert_eq!(fx.row(1).await.0, None);

    fx.drop_table().await;
}

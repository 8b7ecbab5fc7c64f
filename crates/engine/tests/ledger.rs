use chrono::{Duration, Utc};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};

use engine::{
    AddExpenseCmd, AddSettlementCmd, CreateGroupCmd, Currency, Engine, EngineError,
    ExpenseListFilter, MoneyCents, RemoveExpenseCmd, RemoveSettlementCmd, SettlementListFilter,
    Split, UpdateExpenseCmd,
};
use migration::MigratorTrait;

async fn engine_with_users(users: &[&str]) -> (Engine, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let backend = db.get_database_backend();
    for user in users {
        db.execute(Statement::from_sql_and_values(
            backend,
            "INSERT INTO users (username) VALUES (?)",
            vec![(*user).into()],
        ))
        .await
        .unwrap();
    }
    let engine = Engine::builder()
        .database(db.clone())
        .build()
        .await
        .unwrap();
    (engine, db)
}

fn usd() -> Currency {
    Currency::try_from("USD").unwrap()
}

fn eur() -> Currency {
    Currency::try_from("EUR").unwrap()
}

async fn group_with_members(engine: &Engine, owner: &str, members: &[&str]) -> String {
    let group = engine
        .create_group(CreateGroupCmd::new("Trip", owner, Utc::now()))
        .await
        .unwrap();
    for member in members {
        engine
            .upsert_group_member(&group.id, member, "editor", owner)
            .await
            .unwrap();
    }
    group.id
}

fn even_split(users: &[&str], share: i64) -> Vec<Split> {
    users.iter().map(|u| Split::new(u, share)).collect()
}

#[tokio::test]
async fn create_group_initializes_empty_snapshot() {
    let (engine, _db) = engine_with_users(&["alice"]).await;
    let group_id = group_with_members(&engine, "alice", &[]).await;

    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(snap.version, 0);
    assert!(snap.balances.is_empty());
    assert!(snap.simplified.is_empty());
}

#[tokio::test]
async fn expense_and_settlement_track_who_owes_whom() {
    let (engine, _db) = engine_with_users(&["alice", "bob"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;

    // Alice pays 100.00 USD, split evenly: Bob owes Alice 50.00.
    let total: MoneyCents = "100.00".parse().unwrap();
    engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            total.cents(),
            "alice",
            even_split(&["alice", "bob"], 5_000),
            Utc::now(),
        ))
        .await
        .unwrap();

    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(snap.version, 1);
    let per_user = &snap.balances[&usd()];
    assert_eq!(per_user["alice"], 5_000);
    assert_eq!(per_user["bob"], -5_000);
    let transfers = &snap.simplified[&usd()];
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].from, "bob");
    assert_eq!(transfers[0].to, "alice");
    assert_eq!(transfers[0].amount_minor, 5_000);

    // Bob pays Alice back; the group is settled.
    engine
        .add_settlement(AddSettlementCmd::new(
            &group_id,
            "bob",
            usd(),
            5_000,
            "bob",
            "alice",
            Utc::now(),
        ))
        .await
        .unwrap();

    let snap = engine.snapshot(&group_id, "bob").await.unwrap();
    assert_eq!(snap.version, 2);
    assert!(snap.balances.is_empty());
    assert!(snap.simplified.is_empty());
}

#[tokio::test]
async fn three_way_rounded_split_settles_in_two_transfers() {
    let (engine, _db) = engine_with_users(&["alice", "bob", "carol"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob", "carol"]).await;

    // 100.00 over three people; alice absorbs the extra cent.
    engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            10_000,
            "alice",
            vec![
                Split::new("alice", 3_334),
                Split::new("bob", 3_333),
                Split::new("carol", 3_333),
            ],
            Utc::now(),
        ))
        .await
        .unwrap();

    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    let per_user = &snap.balances[&usd()];
    assert_eq!(per_user["alice"], 6_666);
    assert_eq!(per_user["bob"], -3_333);
    assert_eq!(per_user["carol"], -3_333);
    assert_eq!(per_user.values().sum::<i64>(), 0);
    assert_eq!(snap.simplified[&usd()].len(), 2);
}

#[tokio::test]
async fn update_expense_adjusts_snapshot_by_delta() {
    let (engine, _db) = engine_with_users(&["alice", "bob"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;

    let expense_id = engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            10_000,
            "alice",
            even_split(&["alice", "bob"], 5_000),
            Utc::now(),
        ))
        .await
        .unwrap();

    engine
        .update_expense(
            UpdateExpenseCmd::new(&group_id, expense_id, "alice", Utc::now())
                .amount_minor(6_000)
                .splits(even_split(&["alice", "bob"], 3_000)),
        )
        .await
        .unwrap();

    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(snap.version, 2);
    let per_user = &snap.balances[&usd()];
    assert_eq!(per_user["alice"], 3_000);
    assert_eq!(per_user["bob"], -3_000);
}

#[tokio::test]
async fn stale_expected_updated_at_is_refused() {
    let (engine, _db) = engine_with_users(&["alice", "bob"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;

    let expense_id = engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            10_000,
            "alice",
            even_split(&["alice", "bob"], 5_000),
            Utc::now(),
        ))
        .await
        .unwrap();

    // Timestamp as persisted, not as passed in.
    let stored = engine
        .list_expenses(&group_id, "alice", &ExpenseListFilter::default())
        .await
        .unwrap();
    let stale = stored[0].updated_at;

    engine
        .update_expense(
            UpdateExpenseCmd::new(&group_id, expense_id, "alice", Utc::now())
                .amount_minor(8_000)
                .splits(even_split(&["alice", "bob"], 4_000))
                .expected_updated_at(stale),
        )
        .await
        .unwrap();

    // Second writer still holds the old timestamp.
    let err = engine
        .update_expense(
            UpdateExpenseCmd::new(&group_id, expense_id, "bob", Utc::now())
                .amount_minor(2_000)
                .splits(even_split(&["alice", "bob"], 1_000))
                .expected_updated_at(stale),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EntryConflict(_)));

    // The refused write left no trace.
    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(snap.balances[&usd()]["alice"], 4_000);
}

#[tokio::test]
async fn delete_then_recreate_restores_the_same_balances() {
    let (engine, _db) = engine_with_users(&["alice", "bob"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;

    engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            10_000,
            "alice",
            even_split(&["alice", "bob"], 5_000),
            Utc::now(),
        ))
        .await
        .unwrap();
    let before = engine.snapshot(&group_id, "alice").await.unwrap();

    let second = engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "bob",
            usd(),
            4_000,
            "bob",
            even_split(&["alice", "bob"], 2_000),
            Utc::now(),
        ))
        .await
        .unwrap();
    engine
        .remove_expense(RemoveExpenseCmd::new(&group_id, second, "bob", Utc::now()))
        .await
        .unwrap();

    let after = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(after.balances, before.balances);
    assert_eq!(after.simplified, before.simplified);
    assert_eq!(after.version, before.version + 2);

    // A deleted expense cannot be touched again.
    let err = engine
        .remove_expense(RemoveExpenseCmd::new(&group_id, second, "bob", Utc::now()))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::KeyNotFound("expense not exists".to_string()));
}

#[tokio::test]
async fn removing_a_settlement_restores_the_debt() {
    let (engine, _db) = engine_with_users(&["alice", "bob"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;

    engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            10_000,
            "alice",
            even_split(&["alice", "bob"], 5_000),
            Utc::now(),
        ))
        .await
        .unwrap();
    let settlement_id = engine
        .add_settlement(AddSettlementCmd::new(
            &group_id,
            "bob",
            usd(),
            5_000,
            "bob",
            "alice",
            Utc::now(),
        ))
        .await
        .unwrap();
    assert!(engine.snapshot(&group_id, "alice").await.unwrap().balances.is_empty());

    engine
        .remove_settlement(RemoveSettlementCmd::new(
            &group_id,
            settlement_id,
            "bob",
            Utc::now(),
        ))
        .await
        .unwrap();
    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(snap.balances[&usd()]["bob"], -5_000);

    // The soft delete stamps the settlement's own modification time.
    let all = engine
        .list_settlements(
            &group_id,
            "alice",
            &SettlementListFilter {
                include_deleted: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(all[0].updated_at, all[0].deleted_at.unwrap());
    assert!(all[0].updated_at > all[0].created_at);
}

#[tokio::test]
async fn incremental_snapshot_matches_full_recompute() {
    let (engine, _db) = engine_with_users(&["alice", "bob", "carol"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob", "carol"]).await;
    let base = Utc::now();

    let first = engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            9_000,
            "alice",
            even_split(&["alice", "bob", "carol"], 3_000),
            base,
        ))
        .await
        .unwrap();
    engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "bob",
            usd(),
            4_000,
            "bob",
            even_split(&["bob", "carol"], 2_000),
            base + Duration::seconds(1),
        ))
        .await
        .unwrap();
    engine
        .update_expense(
            UpdateExpenseCmd::new(&group_id, first, "alice", base + Duration::seconds(2))
                .amount_minor(12_000)
                .splits(even_split(&["alice", "bob", "carol"], 4_000)),
        )
        .await
        .unwrap();
    engine
        .add_settlement(AddSettlementCmd::new(
            &group_id,
            "carol",
            usd(),
            2_000,
            "carol",
            "alice",
            base + Duration::seconds(3),
        ))
        .await
        .unwrap();

    let incremental = engine.snapshot(&group_id, "alice").await.unwrap();
    let recomputed = engine.recompute_snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(incremental.balances, recomputed.balances);
    assert_eq!(incremental.simplified, recomputed.simplified);
    assert_eq!(recomputed.version, incremental.version + 1);
}

#[tokio::test]
async fn corrupt_snapshot_is_detected_and_repairable() {
    let (engine, db) = engine_with_users(&["alice", "bob"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;

    engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            10_000,
            "alice",
            even_split(&["alice", "bob"], 5_000),
            Utc::now(),
        ))
        .await
        .unwrap();

    // Corrupt the stored document behind the engine's back.
    let backend = db.get_database_backend();
    db.execute(Statement::from_sql_and_values(
        backend,
        "UPDATE balance_snapshots SET document = ? WHERE group_id = ?",
        vec![
            r#"{"balances":{"USD":{"alice":42}},"simplified":{}}"#.into(),
            group_id.clone().into(),
        ],
    ))
    .await
    .unwrap();

    let err = engine.snapshot(&group_id, "alice").await.unwrap_err();
    assert!(matches!(err, EngineError::CorruptSnapshot(_)));

    let repaired = engine.recompute_snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(repaired.balances[&usd()]["alice"], 5_000);

    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(snap.balances, repaired.balances);
}

#[tokio::test]
async fn currencies_never_mix() {
    let (engine, _db) = engine_with_users(&["alice", "bob"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;

    engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            10_000,
            "alice",
            even_split(&["alice", "bob"], 5_000),
            Utc::now(),
        ))
        .await
        .unwrap();
    engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "bob",
            eur(),
            2_000,
            "bob",
            even_split(&["alice", "bob"], 1_000),
            Utc::now(),
        ))
        .await
        .unwrap();

    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(snap.balances[&usd()]["alice"], 5_000);
    assert_eq!(snap.balances[&eur()]["alice"], -1_000);

    // Settling USD leaves EUR untouched.
    engine
        .add_settlement(AddSettlementCmd::new(
            &group_id,
            "bob",
            usd(),
            5_000,
            "bob",
            "alice",
            Utc::now(),
        ))
        .await
        .unwrap();
    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert!(!snap.balances.contains_key(&usd()));
    assert_eq!(snap.balances[&eur()]["bob"], 1_000);
}

#[tokio::test]
async fn viewers_read_but_cannot_write() {
    let (engine, _db) = engine_with_users(&["alice", "bob", "eve"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;
    engine
        .upsert_group_member(&group_id, "eve", "viewer", "alice")
        .await
        .unwrap();

    engine.snapshot(&group_id, "eve").await.unwrap();

    let err = engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "eve",
            usd(),
            1_000,
            "eve",
            vec![Split::new("eve", 1_000)],
            Utc::now(),
        ))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::KeyNotFound("group not exists".to_string()));
}

#[tokio::test]
async fn outsiders_see_nothing() {
    let (engine, _db) = engine_with_users(&["alice", "bob", "mallory"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;

    let err = engine.snapshot(&group_id, "mallory").await.unwrap_err();
    assert_eq!(err, EngineError::KeyNotFound("group not exists".to_string()));

    // Only the owner manages membership.
    let err = engine
        .upsert_group_member(&group_id, "mallory", "editor", "bob")
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::KeyNotFound("group not exists".to_string()));
}

#[tokio::test]
async fn idempotency_key_replays_instead_of_duplicating() {
    let (engine, _db) = engine_with_users(&["alice", "bob"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;

    let cmd = AddExpenseCmd::new(
        &group_id,
        "alice",
        usd(),
        10_000,
        "alice",
        even_split(&["alice", "bob"], 5_000),
        Utc::now(),
    )
    .idempotency_key("req-1");

    let first = engine.add_expense(cmd.clone()).await.unwrap();
    let second = engine.add_expense(cmd).await.unwrap();
    assert_eq!(first, second);

    let expenses = engine
        .list_expenses(&group_id, "alice", &ExpenseListFilter::default())
        .await
        .unwrap();
    assert_eq!(expenses.len(), 1);

    // The replay did not touch the snapshot again.
    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(snap.version, 1);
}

#[tokio::test]
async fn interfering_snapshot_writer_exhausts_the_retry_budget() {
    let (engine, db) = engine_with_users(&["alice", "bob"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;
    let backend = db.get_database_backend();

    // A rival writer bumps the snapshot version right after every expense
    // insert, so the version read at the start of the transaction is stale
    // by the time it is checked.
    db.execute(Statement::from_string(
        backend,
        "CREATE TRIGGER rival_bump AFTER INSERT ON expenses BEGIN \
         UPDATE balance_snapshots SET version = version + 1 \
         WHERE group_id = NEW.group_id; END"
            .to_string(),
    ))
    .await
    .unwrap();

    let cmd = AddExpenseCmd::new(
        &group_id,
        "alice",
        usd(),
        10_000,
        "alice",
        even_split(&["alice", "bob"], 5_000),
        Utc::now(),
    );
    let err = engine.add_expense(cmd.clone()).await.unwrap_err();
    assert!(matches!(err, EngineError::SnapshotConflict(_)));

    // Every attempt rolled back whole: no expense row, snapshot untouched.
    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(snap.version, 0);
    assert!(snap.balances.is_empty());
    let all = engine
        .list_expenses(
            &group_id,
            "alice",
            &ExpenseListFilter {
                include_deleted: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(all.is_empty());

    // With the rival gone the same command lands on the first attempt.
    db.execute(Statement::from_string(
        backend,
        "DROP TRIGGER rival_bump".to_string(),
    ))
    .await
    .unwrap();
    engine.add_expense(cmd).await.unwrap();
    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(snap.version, 1);
    assert_eq!(snap.balances[&usd()]["alice"], 5_000);
}

#[tokio::test]
async fn idempotency_keys_are_scoped_per_user() {
    let (engine, _db) = engine_with_users(&["alice", "bob"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;

    let first = engine
        .add_expense(
            AddExpenseCmd::new(
                &group_id,
                "alice",
                usd(),
                10_000,
                "alice",
                even_split(&["alice", "bob"], 5_000),
                Utc::now(),
            )
            .idempotency_key("req-1"),
        )
        .await
        .unwrap();

    // Bob reusing the same key records his own expense.
    let second = engine
        .add_expense(
            AddExpenseCmd::new(
                &group_id,
                "bob",
                usd(),
                4_000,
                "bob",
                even_split(&["alice", "bob"], 2_000),
                Utc::now(),
            )
            .idempotency_key("req-1"),
        )
        .await
        .unwrap();
    assert_ne!(first, second);

    let expenses = engine
        .list_expenses(&group_id, "alice", &ExpenseListFilter::default())
        .await
        .unwrap();
    assert_eq!(expenses.len(), 2);
    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(snap.version, 2);
}

#[tokio::test]
async fn malformed_entries_are_rejected_before_any_write() {
    let (engine, _db) = engine_with_users(&["alice", "bob", "mallory"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;

    // Payer outside the splits.
    let err = engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            10_000,
            "bob",
            vec![Split::new("alice", 10_000)],
            Utc::now(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MalformedEntry(_)));

    // Splits off by more than one cent.
    let err = engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            10_000,
            "alice",
            even_split(&["alice", "bob"], 4_999),
            Utc::now(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MalformedEntry(_)));

    // Participant who is not a group member.
    let err = engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            10_000,
            "alice",
            even_split(&["alice", "mallory"], 5_000),
            Utc::now(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MalformedEntry(_)));

    // Self-settlement.
    let err = engine
        .add_settlement(AddSettlementCmd::new(
            &group_id,
            "alice",
            usd(),
            1_000,
            "alice",
            "alice",
            Utc::now(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MalformedEntry(_)));

    // Nothing was recorded.
    let snap = engine.snapshot(&group_id, "alice").await.unwrap();
    assert_eq!(snap.version, 0);
}

#[tokio::test]
async fn lists_hide_deleted_entries_by_default() {
    let (engine, _db) = engine_with_users(&["alice", "bob"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob"]).await;

    let kept = engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            10_000,
            "alice",
            even_split(&["alice", "bob"], 5_000),
            Utc::now(),
        ))
        .await
        .unwrap();
    let dropped = engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "bob",
            usd(),
            4_000,
            "bob",
            even_split(&["alice", "bob"], 2_000),
            Utc::now(),
        ))
        .await
        .unwrap();
    engine
        .remove_expense(RemoveExpenseCmd::new(&group_id, dropped, "bob", Utc::now()))
        .await
        .unwrap();

    let visible = engine
        .list_expenses(&group_id, "alice", &ExpenseListFilter::default())
        .await
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, kept);

    let all = engine
        .list_expenses(
            &group_id,
            "alice",
            &ExpenseListFilter {
                include_deleted: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let by_payer = engine
        .list_expenses(
            &group_id,
            "alice",
            &ExpenseListFilter {
                paid_by: Some("alice".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(by_payer.len(), 1);
    assert_eq!(by_payer[0].paid_by, "alice");

    let settlements = engine
        .list_settlements(&group_id, "alice", &SettlementListFilter::default())
        .await
        .unwrap();
    assert!(settlements.is_empty());
}

#[tokio::test]
async fn splits_survive_the_round_trip() {
    let (engine, _db) = engine_with_users(&["alice", "bob", "carol"]).await;
    let group_id = group_with_members(&engine, "alice", &["bob", "carol"]).await;

    engine
        .add_expense(AddExpenseCmd::new(
            &group_id,
            "alice",
            usd(),
            10_000,
            "alice",
            vec![
                Split::new("alice", 7_000),
                Split::new("bob", 3_000),
                Split::new("carol", 0),
            ],
            Utc::now(),
        ))
        .await
        .unwrap();

    let expenses = engine
        .list_expenses(&group_id, "alice", &ExpenseListFilter::default())
        .await
        .unwrap();
    assert_eq!(expenses[0].splits.len(), 3);
    assert_eq!(
        expenses[0]
            .splits
            .iter()
            .map(|s| (s.user_id.as_str(), s.amount_minor))
            .collect::<Vec<_>>(),
        vec![("alice", 7_000), ("bob", 3_000), ("carol", 0)]
    );
}

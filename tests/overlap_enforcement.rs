use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::join_all;
use ulid::Ulid;

use kennel::compactor::compact_if_needed;
use kennel::{
    IntervalField, ManualClock, ReservationDraft, ReservationPatch, ReservationQuery, ReservationStatus, Span,
    Store, StoreConfig, StoreError,
};

const H: i64 = 3_600_000;
const M: i64 = 60_000;

// ── Test infrastructure ──────────────────────────────────────

fn data_dir() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("kennel_int_test_{}", Ulid::new()))
}

async fn open(config: StoreConfig) -> Arc<Store> {
    Arc::new(Store::with_clock(config, Arc::new(ManualClock::new(1_000))).unwrap())
}

async fn owner_and_pets(store: &Store, n: usize) -> (Ulid, Vec<Ulid>) {
    let owner = store.create_owner(Ulid::new(), "Ana".into()).await.unwrap().id;
    let birthday = NaiveDate::from_ymd_opt(2018, 7, 4).unwrap();
    let mut pets = Vec::new();
    for i in 0..n {
        let pet = store
            .create_pet(Ulid::new(), "cat".into(), format!("cat{i}"), birthday)
            .await
            .unwrap();
        pets.push(pet.id);
    }
    (owner, pets)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_day_for_one_pet() {
    let store = open(StoreConfig::in_dir(data_dir())).await;
    let (owner, pets) = owner_and_pets(&store, 1).await;
    let pet = pets[0];

    let morning = store
        .create_reservation(ReservationDraft::new(owner, pet, 9 * H, 12 * H))
        .await
        .unwrap();
    let afternoon = store
        .create_reservation(ReservationDraft::new(owner, pet, 12 * H, 17 * H))
        .await
        .unwrap();

    let err = store
        .create_reservation(ReservationDraft::new(owner, pet, 11 * H, 13 * H))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "reservation-overlaps");
    match err {
        StoreError::Overlap(e) => {
            assert_eq!(e.field, IntervalField::Since);
            assert!([morning.id, afternoon.id].contains(&e.conflicting_id));
        }
        other => panic!("expected overlap, got {other:?}"),
    }

    // Shrinking the morning and growing the afternoon into the gap is fine.
    store
        .update_reservation(morning.id, ReservationPatch::interval(9 * H, 11 * H))
        .await
        .unwrap();
    let grown = store
        .update_reservation(
            afternoon.id,
            ReservationPatch {
                since: Some(11 * H),
                ..ReservationPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(grown.span(), Span::new(11 * H, 17 * H));

    let free = store
        .free_windows(pet, 8 * H, 18 * H, 30 * M)
        .await
        .unwrap();
    assert_eq!(free, vec![Span::new(8 * H, 9 * H), Span::new(17 * H, 18 * H)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_writers_leave_no_overlaps() {
    let store = open(StoreConfig::in_dir(data_dir())).await;
    let (owner, pets) = owner_and_pets(&store, 3).await;

    // 3 pets x 40 writers, each pet's writers fight over overlapping slots.
    let attempts = pets.iter().flat_map(|&pet| {
        (0..40).map(move |i| {
            let since = (i % 8) * 20 * M;
            (pet, since, since + 45 * M)
        })
    });
    let results = join_all(attempts.map(|(pet, since, until)| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .create_reservation(ReservationDraft::new(owner, pet, since, until))
                .await
        })
    }))
    .await;

    for result in results {
        match result.unwrap() {
            Ok(_) | Err(StoreError::Overlap(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    for pet in pets {
        let booked = store.reservations_for_pet(pet).await.unwrap();
        assert!(!booked.is_empty());
        for (i, a) in booked.iter().enumerate() {
            for b in &booked[i + 1..] {
                assert!(!a.span().overlaps(&b.span()), "{a:?} overlaps {b:?}");
            }
        }
    }
}

#[tokio::test]
async fn state_survives_restart_and_compaction() {
    let config = StoreConfig {
        retry_base: Duration::from_millis(1),
        ..StoreConfig::in_dir(data_dir())
    };
    let store = open(config.clone()).await;
    let (owner, pets) = owner_and_pets(&store, 2).await;

    let mut ids = Vec::new();
    for i in 0..5 {
        let r = store
            .create_reservation(ReservationDraft::new(owner, pets[0], i * H, i * H + 30 * M))
            .await
            .unwrap();
        ids.push(r.id);
    }
    store
        .update_reservation(ids[0], ReservationPatch::status(ReservationStatus::Confirmed))
        .await
        .unwrap();
    store.delete_reservation(ids[1]).await.unwrap();
    assert!(compact_if_needed(&store, 1).await);
    store
        .update_reservation(
            ids[2],
            ReservationPatch {
                pet_id: Some(pets[1]),
                ..ReservationPatch::default()
            },
        )
        .await
        .unwrap();

    let expected = store.query(&ReservationQuery::new()).await.unwrap();
    drop(store);

    let reopened = open(config).await;
    assert_eq!(reopened.query(&ReservationQuery::new()).await.unwrap(), expected);
    assert_eq!(reopened.reservations_for_owner(owner).await.unwrap().len(), 4);
    assert_eq!(reopened.reservations_for_pet(pets[1]).await.unwrap().len(), 1);
    assert_eq!(
        reopened.get_reservation(&ids[0]).await.unwrap().status,
        ReservationStatus::Confirmed
    );
}

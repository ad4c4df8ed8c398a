use assert_matches::assert_matches;
use tokio_test::assert_ok;

use booking_queue_cell::*;
use shared_utils::test_utils::{TestConfig, TEST_INSTITUTION};

use super::{monday, tuesday, Harness};

#[tokio::test]
async fn starting_twice_returns_the_running_shift() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;

    let first = assert_ok!(
        harness
            .live_shifts
            .start_shift(TEST_INSTITUTION, monday(), doctor.id, "Morning")
            .await
    );
    let second = assert_ok!(
        harness
            .live_shifts
            .start_shift(TEST_INSTITUTION, monday(), doctor.id, "Morning")
            .await
    );

    assert_eq!(first.status, LiveShiftStatus::InProgress);
    assert!(first.actual_start_time.is_some());
    assert_eq!(second.actual_start_time, first.actual_start_time);
    assert_eq!(harness.live_shifts.list_for_date(TEST_INSTITUTION, monday()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn planned_times_come_from_the_schedule() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;

    let shift = harness
        .live_shifts
        .ensure_shift(TEST_INSTITUTION, &doctor, monday(), "Evening")
        .await
        .unwrap();
    assert_eq!(shift.planned_start_time, monday().and_hms_opt(17, 0, 0).unwrap().and_utc());
    assert_eq!(shift.planned_end_time, monday().and_hms_opt(19, 0, 0).unwrap().and_utc());
    assert_eq!(shift.max_tokens, 8);
    assert_eq!(shift.status, LiveShiftStatus::Pending);
}

#[tokio::test]
async fn complete_requires_a_started_shift() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;

    let missing = harness
        .live_shifts
        .complete_shift(TEST_INSTITUTION, monday(), doctor.id, "Morning")
        .await;
    assert_matches!(missing, Err(BookingQueueError::NotFound(_)));

    harness.book(&doctor, "Morning", "Kavya").await;
    let pending = harness
        .live_shifts
        .complete_shift(TEST_INSTITUTION, monday(), doctor.id, "Morning")
        .await;
    assert_matches!(
        pending,
        Err(BookingQueueError::InvalidTransition { ref from, .. }) if from == "PENDING"
    );
}

#[tokio::test]
async fn cancelled_shift_cannot_be_started() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;

    let cancelled = harness
        .live_shifts
        .cancel_shift(TEST_INSTITUTION, monday(), doctor.id, "Evening", Some("Flooding".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, LiveShiftStatus::Cancelled);
    assert!(cancelled.actual_end_time.is_some());

    let start = harness
        .live_shifts
        .start_shift(TEST_INSTITUTION, monday(), doctor.id, "Evening")
        .await;
    assert_matches!(start, Err(BookingQueueError::InvalidTransition { .. }));
}

#[tokio::test]
async fn shift_the_doctor_does_not_run_is_rejected() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;

    let result = harness
        .live_shifts
        .start_shift(TEST_INSTITUTION, tuesday(), doctor.id, "Morning")
        .await;
    assert_matches!(result, Err(BookingQueueError::ValidationError(_)));
}

#[tokio::test]
async fn concurrent_bookings_share_one_record() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;

    let bookings = (0..10)
        .map(|_| {
            let live_shifts = harness.live_shifts.clone();
            let doctor = doctor.clone();
            tokio::spawn(async move {
                live_shifts
                    .record_booking(TEST_INSTITUTION, &doctor, monday(), "Morning")
                    .await
            })
        })
        .collect::<Vec<_>>();

    for result in futures::future::join_all(bookings).await {
        assert_ok!(result.unwrap());
    }

    let shifts = harness.live_shifts.list_for_date(TEST_INSTITUTION, monday()).await.unwrap();
    assert_eq!(shifts.len(), 1);
    assert_eq!(shifts[0].total_tokens_booked, 10);
}

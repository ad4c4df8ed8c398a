use assert_matches::assert_matches;
use chrono::Utc;
use tokio_test::assert_ok;

use booking_queue_cell::*;
use doctor_cell::OverrideScope;
use shared_utils::test_utils::{TestConfig, TEST_INSTITUTION};

use super::{cancel, monday, tuesday, Harness};

#[tokio::test]
async fn full_day_leave_at_the_limit_is_refused() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;
    harness.set_leaves(&doctor, 12, 12).await;

    let result = harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&[], "Conference"))
        .await;

    assert_matches!(
        result,
        Err(BookingQueueError::QuotaExceeded { leaves_taken: 12, limit: 12 })
    );

    let stored = harness.doctors.get_doctor(TEST_INSTITUTION, doctor.id).await.unwrap();
    assert_eq!(stored.metrics.leaves_taken, 12);
    assert!(stored.override_for(monday()).is_none());
}

#[tokio::test]
async fn listing_every_shift_counts_as_full_day_leave() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;

    let outcome = assert_ok!(
        harness
            .disruption
            .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Morning", "Evening"], "Unwell"))
            .await
    );
    assert_eq!(outcome.classification, DisruptionClass::FullDayLeave);

    let stored = harness.doctors.get_doctor(TEST_INSTITUTION, doctor.id).await.unwrap();
    assert_eq!(stored.metrics.leaves_taken, 1);
    assert_eq!(stored.metrics.cancellations_count, 0);
}

#[tokio::test]
async fn partial_cancellation_and_delay_bump_their_own_counters() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;
    let token = harness.book(&doctor, "Evening", "Kavya").await;

    let partial = harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Morning"], "Surgery"))
        .await
        .unwrap();
    assert_eq!(partial.classification, DisruptionClass::ShiftCancellation);

    let delay = harness
        .disruption
        .apply_override(
            TEST_INSTITUTION,
            doctor.id,
            ApplyOverrideRequest {
                date: monday(),
                shift_names: vec!["Evening".to_string()],
                delay_minutes: 20,
                is_cancelled: false,
                note: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(delay.classification, DisruptionClass::Delay);
    assert_eq!(delay.policy, None);
    assert_eq!(delay.cascade_job_id, None);

    let stored = harness.doctors.get_doctor(TEST_INSTITUTION, doctor.id).await.unwrap();
    assert_eq!(stored.metrics.cancellations_count, 1);
    assert_eq!(stored.metrics.late_count, 1);
    assert_eq!(stored.metrics.leaves_taken, 0);

    // The delay replaced the Morning cancellation for that date.
    let active = stored.override_for(monday()).unwrap();
    assert_eq!(active.delay_minutes(), 20);
    assert_eq!(stored.overrides.len(), 1);

    // Delays never touch issued tokens.
    let untouched = harness.queue.get_token(TEST_INSTITUTION, token.id).await.unwrap();
    assert_eq!(untouched.status, TokenStatus::Waiting);
    assert_eq!(untouched.estimated_start_time, token.estimated_start_time);
}

#[tokio::test]
async fn auto_next_available_moves_tokens_to_the_next_day() {
    let harness = Harness::new(TestConfig::with_policies("AUTO_NEXT_AVAILABLE", "AUTO_NEXT_AVAILABLE"));
    let doctor = harness.create_doctor().await;
    let first = harness.book(&doctor, "Morning", "Kavya").await;
    let second = harness.book(&doctor, "Morning", "Nikhil").await;
    let evening = harness.book(&doctor, "Evening", "Ravi").await;

    let outcome = harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Morning"], "Emergency surgery"))
        .await
        .unwrap();

    assert_eq!(outcome.policy, Some(CascadePolicy::AutoNextAvailable));
    assert!(!outcome.cascade_pending);
    assert_eq!(outcome.cascaded_token_ids.len(), 2);
    assert!(outcome.cascaded_token_ids.contains(&first.id));
    assert!(outcome.cascaded_token_ids.contains(&second.id));

    for original in [&first, &second] {
        let moved = harness.queue.get_token(TEST_INSTITUTION, original.id).await.unwrap();
        assert_eq!(moved.date, tuesday());
        assert_eq!(moved.original_date, Some(monday()));
        assert!(moved.is_rescheduled);
        assert_eq!(moved.priority, 1);
        assert_eq!(moved.status, TokenStatus::Waiting);
        assert_eq!(moved.sequence, original.sequence);
        assert_eq!(moved.token_code, original.token_code);
        // Tuesday is a day off, so there is no ETA to give.
        assert!(moved.estimated_start_time.is_none());
    }

    let evening_now = harness.queue.get_token(TEST_INSTITUTION, evening.id).await.unwrap();
    assert_eq!(evening_now.date, monday());
    assert!(!evening_now.is_rescheduled);
}

#[tokio::test]
async fn cancel_all_cancels_waiting_and_held_tokens_only() {
    let harness = Harness::new(TestConfig::with_policies("CANCEL_ALL", "MANUAL_ALLOCATION"));
    let doctor = harness.create_doctor().await;
    let waiting = harness.book(&doctor, "Morning", "A").await;
    let held = harness.book(&doctor, "Morning", "B").await;
    let called = harness.book(&doctor, "Evening", "C").await;
    harness.queue.transition(TEST_INSTITUTION, held.id, TokenStatus::Hold).await.unwrap();
    harness.queue.transition(TEST_INSTITUTION, called.id, TokenStatus::Called).await.unwrap();

    let outcome = harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&[], "Family emergency"))
        .await
        .unwrap();
    assert_eq!(outcome.classification, DisruptionClass::FullDayLeave);
    assert_eq!(outcome.policy, Some(CascadePolicy::CancelAll));

    for id in [waiting.id, held.id] {
        let token = harness.queue.get_token(TEST_INSTITUTION, id).await.unwrap();
        assert_eq!(token.status, TokenStatus::Cancelled);
        assert!(!token.pending_reallocation);
        assert!(token.notes.iter().any(|n| n.contains("Family emergency")));
    }
    let still_called = harness.queue.get_token(TEST_INSTITUTION, called.id).await.unwrap();
    assert_eq!(still_called.status, TokenStatus::Called);
}

#[tokio::test]
async fn manual_allocation_feeds_the_reallocation_queue() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;
    let token = harness.book(&doctor, "Evening", "Kavya").await;

    harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Evening"], "Ward round"))
        .await
        .unwrap();

    let cancelled = harness.queue.get_token(TEST_INSTITUTION, token.id).await.unwrap();
    assert_eq!(cancelled.status, TokenStatus::Cancelled);
    assert!(!cancelled.is_rescheduled);
    assert!(cancelled.pending_reallocation);

    let queue = harness.queue.reallocation_queue(TEST_INSTITUTION).await.unwrap();
    assert_eq!(queue.iter().map(|t| t.id).collect::<Vec<_>>(), vec![token.id]);

    harness.queue.resolve_reallocation(TEST_INSTITUTION, token.id).await.unwrap();
    assert!(harness.queue.reallocation_queue(TEST_INSTITUTION).await.unwrap().is_empty());

    // Resolving twice is harmless.
    assert_ok!(harness.queue.resolve_reallocation(TEST_INSTITUTION, token.id).await);
}

#[tokio::test]
async fn reapplying_a_cancellation_changes_nothing_more() {
    let harness = Harness::new(TestConfig::with_policies("MANUAL_ALLOCATION", "AUTO_NEXT_AVAILABLE"));
    let doctor = harness.create_doctor().await;
    let token = harness.book(&doctor, "Morning", "Kavya").await;

    harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Morning"], "Surgery"))
        .await
        .unwrap();
    let after_first = harness.queue.get_token(TEST_INSTITUTION, token.id).await.unwrap();

    let again = harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Morning"], "Surgery"))
        .await
        .unwrap();
    assert!(again.cascaded_token_ids.is_empty());

    let after_second = harness.queue.get_token(TEST_INSTITUTION, token.id).await.unwrap();
    assert_eq!(after_second.date, after_first.date);
    assert_eq!(after_second.date, tuesday());
    assert_eq!(after_second.notes, after_first.notes);
}

#[tokio::test]
async fn policy_is_a_no_op_on_terminal_tokens() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;
    let token = harness.book(&doctor, "Morning", "Kavya").await;
    let mut cancelled = harness
        .queue
        .transition(TEST_INSTITUTION, token.id, TokenStatus::Cancelled)
        .await
        .unwrap();
    let before = cancelled.clone();

    for policy in [
        CascadePolicy::AutoNextAvailable,
        CascadePolicy::CancelAll,
        CascadePolicy::ManualAllocation,
    ] {
        let job = CascadeJob {
            id: uuid::Uuid::new_v4(),
            institution_id: TEST_INSTITUTION.to_string(),
            doctor_id: doctor.id,
            date: monday(),
            scope: OverrideScope::WholeDay,
            policy,
            classification: DisruptionClass::FullDayLeave,
            note: None,
            status: CascadeJobStatus::Pending,
            attempts: 0,
            last_error: None,
            affected_token_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };
        assert!(!cascade_token(&mut cancelled, &job, &doctor));
    }

    assert_eq!(cancelled.status, before.status);
    assert_eq!(cancelled.date, before.date);
    assert_eq!(cancelled.notes, before.notes);
    assert_eq!(cancelled.pending_reallocation, before.pending_reallocation);
}

#[tokio::test]
async fn cancelling_marks_live_shift_and_is_refused_once_completed() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;
    harness.book(&doctor, "Evening", "Kavya").await;

    harness
        .live_shifts
        .start_shift(TEST_INSTITUTION, monday(), doctor.id, "Morning")
        .await
        .unwrap();
    harness
        .live_shifts
        .complete_shift(TEST_INSTITUTION, monday(), doctor.id, "Morning")
        .await
        .unwrap();

    let refused = harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Morning"], "Late notice"))
        .await;
    assert_matches!(refused, Err(BookingQueueError::ValidationError(msg)) if msg.contains("completed"));

    let stored = harness.doctors.get_doctor(TEST_INSTITUTION, doctor.id).await.unwrap();
    assert_eq!(stored.metrics.cancellations_count, 0);

    harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Evening"], "Power outage"))
        .await
        .unwrap();
    let evening = harness
        .live_shifts
        .get_shift(TEST_INSTITUTION, monday(), doctor.id, "Evening")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(evening.status, LiveShiftStatus::Cancelled);
    assert_eq!(evening.cancel_reason.as_deref(), Some("Power outage"));
}

#[tokio::test]
async fn unknown_shift_or_day_off_is_a_validation_error() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;

    let unknown = harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Night"], "x"))
        .await;
    assert_matches!(unknown, Err(BookingQueueError::ValidationError(_)));

    let mut day_off = cancel(&[], "x");
    day_off.date = tuesday();
    let day_off = harness.disruption.apply_override(TEST_INSTITUTION, doctor.id, day_off).await;
    assert_matches!(day_off, Err(BookingQueueError::ValidationError(_)));

    let empty = harness
        .disruption
        .apply_override(
            TEST_INSTITUTION,
            doctor.id,
            ApplyOverrideRequest {
                date: monday(),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(empty, Err(BookingQueueError::ValidationError(_)));
}

#[tokio::test]
async fn institution_settings_override_config_policy() {
    let harness = Harness::new(TestConfig::default());
    let mut settings = harness.settings.get_settings(TEST_INSTITUTION).await.unwrap();
    assert_eq!(settings.shift_policy, CascadePolicy::ManualAllocation);
    settings.shift_policy = CascadePolicy::CancelAll;
    harness.settings.put_settings(TEST_INSTITUTION, settings).await.unwrap();

    let doctor = harness.create_doctor().await;
    let token = harness.book(&doctor, "Morning", "Kavya").await;
    let outcome = harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Morning"], "Surgery"))
        .await
        .unwrap();

    assert_eq!(outcome.policy, Some(CascadePolicy::CancelAll));
    let stored = harness.queue.get_token(TEST_INSTITUTION, token.id).await.unwrap();
    assert!(!stored.pending_reallocation);
}

#[tokio::test]
async fn completed_job_is_recorded_and_retry_is_a_no_op() {
    let harness = Harness::new(TestConfig::default());
    let doctor = harness.create_doctor().await;
    let token = harness.book(&doctor, "Morning", "Kavya").await;

    let outcome = harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Morning"], "Surgery"))
        .await
        .unwrap();
    let job_id = outcome.cascade_job_id.unwrap();

    let job = harness.disruption.get_job(TEST_INSTITUTION, job_id).await.unwrap();
    assert_eq!(job.status, CascadeJobStatus::Completed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.affected_token_ids, vec![token.id]);
    assert!(harness.disruption.pending_jobs(TEST_INSTITUTION).await.unwrap().is_empty());

    let retried = harness.disruption.retry_job(TEST_INSTITUTION, job_id).await.unwrap();
    assert_eq!(retried.attempts, 1);
}

#[tokio::test]
async fn interrupted_cascade_keeps_tokens_changed_before_the_failure() {
    // The second token write of the inline cascade fails.
    let harness = Harness::with_failing_write(TestConfig::with_policies("CANCEL_ALL", "CANCEL_ALL"), TOKENS, 2);
    let doctor = harness.create_doctor().await;
    let first = harness.book(&doctor, "Morning", "Kavya").await;
    let second = harness.book(&doctor, "Morning", "Nikhil").await;

    let outcome = harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Morning"], "Surgery"))
        .await
        .unwrap();
    assert!(outcome.cascade_pending);
    assert_eq!(outcome.cascaded_token_ids.len(), 1);

    let job_id = outcome.cascade_job_id.unwrap();
    let pending = harness.disruption.get_job(TEST_INSTITUTION, job_id).await.unwrap();
    assert_eq!(pending.status, CascadeJobStatus::Pending);
    assert_eq!(pending.affected_token_ids, outcome.cascaded_token_ids);
    assert!(pending.last_error.is_some());
    assert_eq!(harness.disruption.pending_jobs(TEST_INSTITUTION).await.unwrap().len(), 1);

    let done = harness.disruption.retry_job(TEST_INSTITUTION, job_id).await.unwrap();
    assert_eq!(done.status, CascadeJobStatus::Completed);
    assert_eq!(done.attempts, 2);
    assert_eq!(done.affected_token_ids.len(), 2);
    for token in [&first, &second] {
        assert!(done.affected_token_ids.contains(&token.id));
        let stored = harness.queue.get_token(TEST_INSTITUTION, token.id).await.unwrap();
        assert_eq!(stored.status, TokenStatus::Cancelled);
    }
    assert!(harness.disruption.pending_jobs(TEST_INSTITUTION).await.unwrap().is_empty());
}

#[tokio::test]
async fn moved_tokens_leave_the_old_board_and_join_the_new_date() {
    let harness = Harness::new(TestConfig::with_policies("AUTO_NEXT_AVAILABLE", "AUTO_NEXT_AVAILABLE"));
    let doctor = harness.create_doctor().await;
    let token = harness.book(&doctor, "Morning", "Kavya").await;

    harness
        .disruption
        .apply_override(TEST_INSTITUTION, doctor.id, cancel(&["Morning"], "Surgery"))
        .await
        .unwrap();

    let monday_tokens = harness.queue.list_tokens(TEST_INSTITUTION, monday(), |_| true).await.unwrap();
    assert!(monday_tokens.is_empty());
    let tuesday_tokens = harness.queue.list_tokens(TEST_INSTITUTION, tuesday(), |_| true).await.unwrap();
    assert_eq!(tuesday_tokens.len(), 1);
    assert_eq!(tuesday_tokens[0].id, token.id);
}

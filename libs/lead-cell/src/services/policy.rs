// libs/lead-cell/src/services/policy.rs
//
// Pure decision rules for the call pipeline. No I/O.

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::models::{CallOutcome, RETRY_CALL_ACTION};
use crate::stages::{
    FIRST_CALL_IN_PROGRESS, NOT_INTERESTED, NO_ANSWER_FIRST_CALL, NO_ANSWER_SECOND_CALL,
    SECOND_CALL_IN_PROGRESS, SECOND_CALL_SCHEDULED, VISIT_SCHEDULED,
};

/// Outbound attempts before a lead leaves the call pipeline.
pub const MAX_CALL_ATTEMPTS: i32 = 2;

const RETRY_CUTOFF_HOUR: u32 = 14;
const RETRY_SAME_DAY_HOURS: i64 = 6;
const RETRY_NEXT_DAY_HOURS: i64 = 16;

pub fn map_call_outcome_to_stage(outcome: Option<CallOutcome>, attempt_no: i32) -> &'static str {
    let first_attempt = attempt_no <= 1;
    match outcome {
        Some(CallOutcome::AppointmentScheduled) => VISIT_SCHEDULED,
        Some(CallOutcome::NotInterested) => NOT_INTERESTED,
        Some(CallOutcome::NoResponse) if first_attempt => NO_ANSWER_FIRST_CALL,
        Some(CallOutcome::NoResponse) => NO_ANSWER_SECOND_CALL,
        Some(CallOutcome::AppointmentProposed) | Some(CallOutcome::Contacted) => SECOND_CALL_SCHEDULED,
        None if first_attempt => FIRST_CALL_IN_PROGRESS,
        None => SECOND_CALL_SCHEDULED,
    }
}

pub fn call_in_progress_stage(attempt_no: i32) -> &'static str {
    if attempt_no <= 1 {
        FIRST_CALL_IN_PROGRESS
    } else {
        SECOND_CALL_IN_PROGRESS
    }
}

/// Morning no-answers retry the same afternoon; later ones move to the next
/// morning. The hour is read on the clinic's wall clock.
pub fn compute_retry_due_at(reference: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let local_hour = reference.with_timezone(tz).hour();
    let hours = if local_hour < RETRY_CUTOFF_HOUR {
        RETRY_SAME_DAY_HOURS
    } else {
        RETRY_NEXT_DAY_HOURS
    };
    reference + Duration::hours(hours)
}

/// Dedup key for the retry scheduled after `attempt_no` went unanswered.
pub fn retry_idempotency_key(lead_id: Uuid, attempt_no: i32) -> String {
    format!("{}:{}:{}", RETRY_CALL_ACTION, lead_id, attempt_no + 1)
}

pub fn should_schedule_retry(outcome: Option<CallOutcome>, attempt_no: i32) -> bool {
    outcome == Some(CallOutcome::NoResponse) && attempt_no < MAX_CALL_ATTEMPTS
}

/// Whole-cent cost from a per-minute rate.
pub fn estimate_call_cost(duration_sec: i64, eur_per_minute: f64) -> f64 {
    let raw = duration_sec.max(0) as f64 / 60.0 * eur_per_minute;
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Madrid;

    #[test]
    fn outcome_table_first_and_second_attempt() {
        let cases = [
            (Some(CallOutcome::AppointmentScheduled), VISIT_SCHEDULED, VISIT_SCHEDULED),
            (Some(CallOutcome::NotInterested), NOT_INTERESTED, NOT_INTERESTED),
            (Some(CallOutcome::NoResponse), NO_ANSWER_FIRST_CALL, NO_ANSWER_SECOND_CALL),
            (Some(CallOutcome::AppointmentProposed), SECOND_CALL_SCHEDULED, SECOND_CALL_SCHEDULED),
            (Some(CallOutcome::Contacted), SECOND_CALL_SCHEDULED, SECOND_CALL_SCHEDULED),
            (None, FIRST_CALL_IN_PROGRESS, SECOND_CALL_SCHEDULED),
        ];

        for (outcome, first, later) in cases {
            assert_eq!(map_call_outcome_to_stage(outcome, 1), first, "{:?} attempt 1", outcome);
            assert_eq!(map_call_outcome_to_stage(outcome, 2), later, "{:?} attempt 2", outcome);
            assert_eq!(map_call_outcome_to_stage(outcome, 3), later, "{:?} attempt 3", outcome);
        }
    }

    #[test]
    fn no_response_maps_by_attempt() {
        assert_eq!(map_call_outcome_to_stage(CallOutcome::parse("no_response"), 1), "no_answer_first_call");
        assert_eq!(map_call_outcome_to_stage(CallOutcome::parse("no_response"), 2), "no_answer_second_call");
    }

    #[test]
    fn retry_before_cutoff_is_six_hours_later() {
        // 09:30 in Madrid (summer, UTC+2)
        let reference = Utc.with_ymd_and_hms(2024, 6, 10, 7, 30, 0).unwrap();
        assert_eq!(compute_retry_due_at(reference, &Madrid), reference + Duration::hours(6));
    }

    #[test]
    fn retry_after_cutoff_is_sixteen_hours_later() {
        // 14:00 local exactly is past the cutoff
        let reference = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        assert_eq!(compute_retry_due_at(reference, &Madrid), reference + Duration::hours(16));
    }

    #[test]
    fn retry_hour_uses_clinic_wall_clock() {
        // 12:30 UTC is 13:30 in Madrid during winter: still before the cutoff
        let reference = Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap();
        assert_eq!(compute_retry_due_at(reference, &Madrid), reference + Duration::hours(6));
    }

    #[test]
    fn retry_key_targets_next_attempt() {
        let lead_id = Uuid::nil();
        assert_eq!(
            retry_idempotency_key(lead_id, 1),
            "retry_call:00000000-0000-0000-0000-000000000000:2"
        );
        assert!(should_schedule_retry(Some(CallOutcome::NoResponse), 1));
        assert!(!should_schedule_retry(Some(CallOutcome::NoResponse), 2));
        assert!(!should_schedule_retry(Some(CallOutcome::Contacted), 1));
    }

    #[test]
    fn call_cost_rounds_to_cents() {
        assert_eq!(estimate_call_cost(120, 0.13), 0.26);
        assert_eq!(estimate_call_cost(-5, 0.13), 0.0);
    }
}

// libs/appointment-cell/src/services/slot_rules.rs
//
// Business-hours rules for bookable ranges. Every check runs on the clinic's
// local wall clock.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::models::{SlotRange, SlotRuleViolation};

pub const SLOT_MINUTES: i64 = 30;
pub const OPEN_HOUR: u32 = 9;
pub const CLOSE_HOUR: u32 = 19;

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, SlotRuleViolation> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).map_err(|_| SlotRuleViolation::InvalidDate)?;
    let instant = parsed.with_timezone(&Utc);
    if instant.second() != 0 || instant.nanosecond() != 0 {
        return Err(SlotRuleViolation::NonZeroSeconds);
    }
    Ok(instant)
}

fn parse_range(start_at: &str, end_at: Option<&str>) -> Result<SlotRange, SlotRuleViolation> {
    let start = parse_instant(start_at)?;
    let end = match end_at.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => parse_instant(raw)?,
        None => start + Duration::minutes(SLOT_MINUTES),
    };
    Ok(SlotRange { start_at: start, end_at: end })
}

/// Day, weekday, grid and opening-hours checks shared by appointments and
/// busy blocks.
fn check_local_envelope(range: &SlotRange, tz: &Tz) -> Result<(), SlotRuleViolation> {
    let local_start = range.start_at.with_timezone(tz);
    let local_end = range.end_at.with_timezone(tz);

    if local_start.date_naive() != local_end.date_naive() {
        return Err(SlotRuleViolation::CrossesDay);
    }

    if matches!(local_start.weekday(), Weekday::Sat | Weekday::Sun) {
        return Err(SlotRuleViolation::Weekend);
    }

    let start_minutes = local_start.hour() * 60 + local_start.minute();
    let end_minutes = local_end.hour() * 60 + local_end.minute();
    if i64::from(start_minutes) % SLOT_MINUTES != 0 || i64::from(end_minutes) % SLOT_MINUTES != 0 {
        return Err(SlotRuleViolation::OffGrid);
    }

    if start_minutes < OPEN_HOUR * 60 || end_minutes > CLOSE_HOUR * 60 {
        return Err(SlotRuleViolation::OutsideBusinessHours);
    }

    Ok(())
}

/// Validate an appointment range. `end_at` defaults to start plus one slot.
pub fn validate_slot_range(start_at: &str, end_at: Option<&str>, tz: &Tz) -> Result<SlotRange, SlotRuleViolation> {
    let range = parse_range(start_at, end_at)?;
    if range.end_at - range.start_at != Duration::minutes(SLOT_MINUTES) {
        return Err(SlotRuleViolation::InvalidDuration);
    }
    check_local_envelope(&range, tz)?;
    Ok(range)
}

/// Busy blocks may span several slots but obey the same envelope.
pub fn validate_busy_block_range(start_at: &str, end_at: &str, tz: &Tz) -> Result<SlotRange, SlotRuleViolation> {
    let range = parse_range(start_at, Some(end_at))?;
    let minutes = (range.end_at - range.start_at).num_minutes();
    if minutes <= 0 {
        return Err(SlotRuleViolation::EndBeforeStart);
    }
    if minutes % SLOT_MINUTES != 0 {
        return Err(SlotRuleViolation::InvalidBlockDuration);
    }
    check_local_envelope(&range, tz)?;
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono_tz::Europe::Madrid;

    #[test]
    fn accepts_weekday_slot_and_defaults_end() {
        let range = validate_slot_range("2024-06-10T10:00:00+02:00", None, &Madrid).unwrap();
        assert_eq!(range.start_iso(), "2024-06-10T08:00:00.000Z");
        assert_eq!(range.end_iso(), "2024-06-10T08:30:00.000Z");
    }

    #[test]
    fn rejects_saturday() {
        assert_matches!(
            validate_slot_range("2024-06-08T10:00:00+02:00", None, &Madrid),
            Err(SlotRuleViolation::Weekend)
        );
    }

    #[test]
    fn rejects_forty_five_minutes() {
        assert_matches!(
            validate_slot_range("2024-06-10T10:00:00+02:00", Some("2024-06-10T10:45:00+02:00"), &Madrid),
            Err(SlotRuleViolation::InvalidDuration)
        );
    }

    #[test]
    fn rejects_seconds_and_milliseconds() {
        assert_matches!(
            validate_slot_range("2024-06-10T10:00:30+02:00", None, &Madrid),
            Err(SlotRuleViolation::NonZeroSeconds)
        );
        assert_matches!(
            validate_slot_range("2024-06-10T10:00:00.250+02:00", None, &Madrid),
            Err(SlotRuleViolation::NonZeroSeconds)
        );
    }

    #[test]
    fn rejects_off_grid_and_garbage() {
        assert_matches!(
            validate_slot_range("2024-06-10T10:15:00+02:00", None, &Madrid),
            Err(SlotRuleViolation::OffGrid)
        );
        assert_matches!(validate_slot_range("next tuesday", None, &Madrid), Err(SlotRuleViolation::InvalidDate));
    }

    #[test]
    fn business_hours_are_inclusive_of_edges() {
        assert!(validate_slot_range("2024-06-10T09:00:00+02:00", None, &Madrid).is_ok());
        assert!(validate_slot_range("2024-06-10T18:30:00+02:00", None, &Madrid).is_ok());
        assert_matches!(
            validate_slot_range("2024-06-10T08:30:00+02:00", None, &Madrid),
            Err(SlotRuleViolation::OutsideBusinessHours)
        );
        assert_matches!(
            validate_slot_range("2024-06-10T19:00:00+02:00", None, &Madrid),
            Err(SlotRuleViolation::OutsideBusinessHours)
        );
    }

    #[test]
    fn opening_hour_follows_spring_dst_change() {
        // 07:30Z is 08:30 in winter time and 09:30 in summer time.
        assert_matches!(
            validate_slot_range("2024-03-29T07:30:00Z", None, &Madrid),
            Err(SlotRuleViolation::OutsideBusinessHours)
        );
        assert!(validate_slot_range("2024-04-01T07:30:00Z", None, &Madrid).is_ok());
    }

    #[test]
    fn closing_hour_follows_autumn_dst_change() {
        // 17:00Z is 19:00 in summer time and 18:00 in winter time.
        assert_matches!(
            validate_slot_range("2024-10-25T17:00:00Z", None, &Madrid),
            Err(SlotRuleViolation::OutsideBusinessHours)
        );
        assert!(validate_slot_range("2024-10-28T17:00:00Z", None, &Madrid).is_ok());
    }

    #[test]
    fn weekday_is_taken_from_local_date() {
        // Friday 22:00Z is already Saturday in Madrid.
        assert_matches!(
            validate_slot_range("2024-06-07T22:00:00Z", None, &Madrid),
            Err(SlotRuleViolation::Weekend)
        );
    }

    #[test]
    fn busy_blocks_span_multiple_slots() {
        let range =
            validate_busy_block_range("2024-06-10T09:00:00+02:00", "2024-06-10T12:00:00+02:00", &Madrid).unwrap();
        assert_eq!((range.end_at - range.start_at).num_minutes(), 180);

        assert_matches!(
            validate_busy_block_range("2024-06-10T09:00:00+02:00", "2024-06-10T09:40:00+02:00", &Madrid),
            Err(SlotRuleViolation::InvalidBlockDuration)
        );
        assert_matches!(
            validate_busy_block_range("2024-06-10T10:00:00+02:00", "2024-06-10T10:00:00+02:00", &Madrid),
            Err(SlotRuleViolation::EndBeforeStart)
        );
        assert_matches!(
            validate_busy_block_range("2024-06-10T17:00:00+02:00", "2024-06-11T10:00:00+02:00", &Madrid),
            Err(SlotRuleViolation::CrossesDay)
        );
        assert_matches!(
            validate_busy_block_range("2024-06-10T17:00:00+02:00", "2024-06-10T20:00:00+02:00", &Madrid),
            Err(SlotRuleViolation::OutsideBusinessHours)
        );
    }
}

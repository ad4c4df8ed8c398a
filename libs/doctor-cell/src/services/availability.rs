use chrono::{NaiveDate, NaiveTime, Timelike};
use tracing::debug;

use crate::models::{Break, DaySchedule, Doctor, Shift, MINUTES_PER_DAY};

/// Lazily walks a day's shifts in `slot_duration` steps, skipping breaks.
///
/// A slot overlaps a break when `start < break_end && start + duration > break_start`;
/// the walk then jumps straight to `break_end`. Slots never run past the end of
/// their shift and are emitted in strictly increasing order. A duration of
/// zero or longer than a day yields nothing.
pub fn compute_slots(day: &DaySchedule, slot_duration_minutes: u32) -> Slots<'_> {
    let usable = (1..=MINUTES_PER_DAY).contains(&slot_duration_minutes);
    let mut shifts: Vec<&Shift> = if day.is_available && usable {
        day.shifts.iter().collect()
    } else {
        Vec::new()
    };
    shifts.sort_by_key(|s| s.start_time);

    Slots {
        shifts,
        breaks: &day.breaks,
        duration: slot_duration_minutes,
        shift_idx: 0,
        cursor: None,
        floor: 0,
    }
}

#[derive(Debug, Clone)]
pub struct Slots<'a> {
    shifts: Vec<&'a Shift>,
    breaks: &'a [Break],
    duration: u32,
    shift_idx: usize,
    cursor: Option<u32>,
    // End of the last emitted slot; keeps output increasing even if shifts overlap.
    floor: u32,
}

impl Iterator for Slots<'_> {
    type Item = NaiveTime;

    fn next(&mut self) -> Option<NaiveTime> {
        loop {
            let shift = *self.shifts.get(self.shift_idx)?;
            let shift_end = minute_of_day(shift.end_time);
            let floor = self.floor;
            let cursor = *self
                .cursor
                .get_or_insert_with(|| minute_of_day(shift.start_time).max(floor));

            let slot_end = match cursor.checked_add(self.duration) {
                Some(end) if end <= shift_end => end,
                _ => {
                    self.shift_idx += 1;
                    self.cursor = None;
                    continue;
                }
            };

            if let Some(brk) = self.breaks.iter().find(|b| {
                cursor < minute_of_day(b.end_time) && slot_end > minute_of_day(b.start_time)
            }) {
                self.cursor = Some(minute_of_day(brk.end_time));
                continue;
            }

            self.cursor = Some(slot_end);
            self.floor = slot_end;
            if let Some(time) = time_of_day(cursor) {
                return Some(time);
            }
        }
    }
}

/// Bookable slots for a concrete date: the weekday schedule with the date's
/// override applied. Cancelled shifts disappear and delayed shifts start late.
pub fn slots_for_date(doctor: &Doctor, date: NaiveDate, slot_duration_minutes: u32) -> Vec<NaiveTime> {
    let Some(day) = doctor.schedule_for(date) else {
        debug!("Doctor {} has no schedule on {}", doctor.id, date);
        return Vec::new();
    };

    let Some(active) = doctor.override_for(date) else {
        return compute_slots(day, slot_duration_minutes).collect();
    };

    let delay = active.delay_minutes();
    let shifts = day
        .shifts
        .iter()
        .filter(|shift| !(active.is_cancellation() && active.applies_to(&shift.name)))
        .filter_map(|shift| {
            if !active.applies_to(&shift.name) || delay == 0 {
                return Some(shift.clone());
            }
            let start = minute_of_day(shift.start_time)
                .checked_add(delay)
                .filter(|start| *start < minute_of_day(shift.end_time))?;
            Some(Shift {
                start_time: time_of_day(start)?,
                ..shift.clone()
            })
        })
        .collect();

    let adjusted = DaySchedule {
        is_available: day.is_available,
        shifts,
        breaks: day.breaks.clone(),
    };
    compute_slots(&adjusted, slot_duration_minutes).collect()
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight() / 60
}

fn time_of_day(minute: u32) -> Option<NaiveTime> {
    if minute >= MINUTES_PER_DAY {
        return None;
    }
    NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)
}

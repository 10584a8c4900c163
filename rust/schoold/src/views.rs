//! Read-only views derived from a [`DomainState`] snapshot.
//!
//! These are the lookups the console screens recompute on every change:
//! sections of a grade, roster of a section, the timetable cell under a
//! (day, slot) pair and the working attendance selection.

use crate::model::{
    hhmm, AttendanceRecord, AttendanceStatus, DomainState, Grade, NewAttendanceRecord,
    SchoolSettings, Section, Session, Student, TimetableEntry,
};
use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::Serialize;
use std::collections::BTreeMap;

/// Day columns of the timetable screen, Monday first. Sunday has no column.
pub const DAY_NAMES: [&str; 6] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

pub fn grade_of_section<'a>(state: &'a DomainState, section_id: &str) -> Option<&'a Grade> {
    state
        .grades
        .iter()
        .find(|g| g.sections.iter().any(|s| s.id == section_id))
}

pub fn sections_of<'a>(state: &'a DomainState, grade_id: &str) -> &'a [Section] {
    state
        .grades
        .iter()
        .find(|g| g.id == grade_id)
        .map(|g| g.sections.as_slice())
        .unwrap_or(&[])
}

/// Students of a section in insertion order.
pub fn students_of<'a>(state: &'a DomainState, section_id: &str) -> Vec<&'a Student> {
    state
        .students
        .iter()
        .filter(|s| s.section_id == section_id)
        .collect()
}

/// Students of a section ordered by roll number.
pub fn roster_of<'a>(state: &'a DomainState, section_id: &str) -> Vec<&'a Student> {
    let mut out = students_of(state, section_id);
    out.sort_by_key(|s| s.roll_number);
    out
}

/// Maps a timetable column (0 = Monday) to the stored `day_of_week`
/// (Sunday = 0, Monday = 1).
pub fn day_of_week_for_index(day_index: usize) -> Option<u8> {
    if day_index < DAY_NAMES.len() {
        Some(day_index as u8 + 1)
    } else {
        None
    }
}

/// The entry shown in the timetable cell (section, column, slot).
pub fn timetable_entry<'a>(
    state: &'a DomainState,
    section_id: &str,
    day_index: usize,
    slot_id: &str,
) -> Option<&'a TimetableEntry> {
    let dow = day_of_week_for_index(day_index)?;
    state.timetable.iter().find(|e| {
        e.section_id == section_id && e.day_of_week == dow && e.time_slot_id == slot_id
    })
}

pub fn section_timetable<'a>(state: &'a DomainState, section_id: &str) -> Vec<&'a TimetableEntry> {
    sorted_entries(state, |e| e.section_id == section_id)
}

pub fn teacher_schedule<'a>(state: &'a DomainState, teacher_id: &str) -> Vec<&'a TimetableEntry> {
    sorted_entries(state, |e| e.teacher_id == teacher_id)
}

fn sorted_entries<'a>(
    state: &'a DomainState,
    keep: impl Fn(&TimetableEntry) -> bool,
) -> Vec<&'a TimetableEntry> {
    let slots = time_slots(&state.settings);
    let slot_pos = |id: &str| {
        slots
            .iter()
            .position(|s| s.id == id)
            .unwrap_or(usize::MAX)
    };
    let mut out: Vec<&TimetableEntry> = state.timetable.iter().filter(|e| keep(e)).collect();
    out.sort_by_key(|e| (e.day_of_week, slot_pos(&e.time_slot_id)));
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolDay {
    pub day_index: usize,
    pub day_of_week: u8,
    pub name: &'static str,
}

/// Timetable columns for the configured working days.
pub fn school_days(settings: &SchoolSettings) -> Vec<SchoolDay> {
    DAY_NAMES
        .into_iter()
        .enumerate()
        .filter_map(|(day_index, name)| {
            let day_of_week = day_of_week_for_index(day_index)?;
            settings.working_days[day_of_week as usize].then_some(SchoolDay {
                day_index,
                day_of_week,
                name,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Period,
    Interval,
    Lunch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub id: String,
    pub label: String,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    pub kind: SlotKind,
}

pub(crate) fn minutes(t: NaiveTime) -> u32 {
    t.num_seconds_from_midnight() / 60
}

fn clock(m: u32) -> NaiveTime {
    NaiveTime::from_num_seconds_from_midnight_opt(m.saturating_mul(60), 0).unwrap_or(NaiveTime::MIN)
}

/// Lays out the school day from the settings.
///
/// Periods run back to back from `start_time`, separated by an interval. The
/// lunch break takes the first period boundary at or after
/// `lunch_break_start` and replaces the interval there. Nothing may end after
/// `end_time`.
pub fn time_slots(settings: &SchoolSettings) -> Vec<TimeSlot> {
    let mut out = Vec::new();
    let period = settings.period_duration;
    if period == 0 {
        return out;
    }
    let end = minutes(settings.end_time);
    let lunch_start = minutes(settings.lunch_break_start);
    let mut lunch_pending = settings.lunch_break_duration > 0;
    let mut cursor = minutes(settings.start_time);
    let mut periods = 0;
    let mut intervals = 0;

    loop {
        if lunch_pending && cursor >= lunch_start {
            let lunch_end = cursor.saturating_add(settings.lunch_break_duration);
            if lunch_end > end {
                break;
            }
            out.push(TimeSlot {
                id: "lunch".to_string(),
                label: "Lunch Break".to_string(),
                start: clock(cursor),
                end: clock(lunch_end),
                kind: SlotKind::Lunch,
            });
            cursor = lunch_end;
            lunch_pending = false;
            continue;
        }

        let period_end = cursor.saturating_add(period);
        if period_end > end {
            break;
        }
        periods += 1;
        out.push(TimeSlot {
            id: format!("p{periods}"),
            label: format!("Period {periods}"),
            start: clock(cursor),
            end: clock(period_end),
            kind: SlotKind::Period,
        });
        cursor = period_end;

        let lunch_next = lunch_pending && cursor >= lunch_start;
        if settings.interval_duration > 0 && !lunch_next {
            let interval_end = cursor.saturating_add(settings.interval_duration);
            if interval_end.saturating_add(period) > end {
                break;
            }
            intervals += 1;
            out.push(TimeSlot {
                id: format!("i{intervals}"),
                label: "Interval".to_string(),
                start: clock(cursor),
                end: clock(interval_end),
                kind: SlotKind::Interval,
            });
            cursor = interval_end;
        }
    }
    out
}

pub fn is_period_slot(settings: &SchoolSettings, slot_id: &str) -> bool {
    time_slots(settings)
        .iter()
        .any(|s| s.kind == SlotKind::Period && s.id == slot_id)
}

/// Stored attendance of a section's students for one date and session.
pub fn attendance_for_section<'a>(
    state: &'a DomainState,
    section_id: &str,
    date: NaiveDate,
    session: Session,
) -> Vec<&'a AttendanceRecord> {
    state
        .attendance
        .iter()
        .filter(|r| r.date == date && r.session == session)
        .filter(|r| {
            state
                .students
                .iter()
                .any(|s| s.id == r.student_id && s.section_id == section_id)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceTally {
    pub present: usize,
    pub absent: usize,
    pub total: usize,
}

/// The attendance sheet being filled in: student id to status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceSelection {
    marks: BTreeMap<String, AttendanceStatus>,
}

impl AttendanceSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a AttendanceRecord>) -> Self {
        let marks = records
            .into_iter()
            .map(|r| (r.student_id.clone(), r.status))
            .collect();
        Self { marks }
    }

    pub fn set(&mut self, student_id: impl Into<String>, status: AttendanceStatus) {
        self.marks.insert(student_id.into(), status);
    }

    pub fn clear(&mut self, student_id: &str) -> Option<AttendanceStatus> {
        self.marks.remove(student_id)
    }

    pub fn status(&self, student_id: &str) -> Option<AttendanceStatus> {
        self.marks.get(student_id).copied()
    }

    /// Assigns `status` to every student in the (already filtered) set.
    pub fn select_all<'a>(
        &mut self,
        students: impl IntoIterator<Item = &'a Student>,
        status: AttendanceStatus,
    ) {
        for s in students {
            self.marks.insert(s.id.clone(), status);
        }
    }

    pub fn tally(&self) -> AttendanceTally {
        let present = self
            .marks
            .values()
            .filter(|s| **s == AttendanceStatus::Present)
            .count();
        AttendanceTally {
            present,
            absent: self.marks.len() - present,
            total: self.marks.len(),
        }
    }

    pub fn to_records(
        &self,
        date: NaiveDate,
        session: Session,
        marked_by: &str,
    ) -> Vec<NewAttendanceRecord> {
        self.marks
            .iter()
            .map(|(student_id, status)| NewAttendanceRecord {
                student_id: student_id.clone(),
                date,
                session,
                status: *status,
                marked_by: marked_by.to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StudentStatus;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("time")
    }

    fn student(id: &str, section: &str, roll: u32) -> Student {
        Student {
            id: id.to_string(),
            student_id: format!("CODE-{id}"),
            first_name: "F".to_string(),
            last_name: id.to_uppercase(),
            section_id: section.to_string(),
            roll_number: roll,
            status: StudentStatus::Active,
        }
    }

    fn entry(id: &str, section: &str, dow: u8, slot: &str, teacher: &str) -> TimetableEntry {
        TimetableEntry {
            id: id.to_string(),
            section_id: section.to_string(),
            subject_id: "math".to_string(),
            teacher_id: teacher.to_string(),
            time_slot_id: slot.to_string(),
            day_of_week: dow,
        }
    }

    #[test]
    fn default_day_layout() {
        let slots = time_slots(&SchoolSettings::default());
        let periods: Vec<_> = slots.iter().filter(|s| s.kind == SlotKind::Period).collect();
        let intervals = slots.iter().filter(|s| s.kind == SlotKind::Interval).count();
        let lunch: Vec<_> = slots.iter().filter(|s| s.kind == SlotKind::Lunch).collect();

        assert_eq!(periods.len(), 8);
        assert_eq!(intervals, 6);
        assert_eq!(lunch.len(), 1);
        assert_eq!((periods[0].start, periods[0].end), (t(8, 0), t(8, 45)));
        assert_eq!((lunch[0].start, lunch[0].end), (t(12, 5), t(12, 35)));
        assert_eq!(periods[7].id, "p8");
        assert_eq!(periods[7].end, t(15, 0));
        // Lunch directly follows period 5 with no interval in between.
        let lunch_pos = slots.iter().position(|s| s.kind == SlotKind::Lunch).expect("lunch");
        assert_eq!(slots[lunch_pos - 1].id, "p5");
    }

    #[test]
    fn slots_are_contiguous_and_within_the_day() {
        let settings = SchoolSettings {
            start_time: t(7, 45),
            end_time: t(13, 10),
            period_duration: 40,
            interval_duration: 10,
            lunch_break_duration: 45,
            lunch_break_start: t(11, 0),
            ..SchoolSettings::default()
        };
        let slots = time_slots(&settings);
        assert_eq!(slots[0].start, t(7, 45));
        for w in slots.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
        assert!(slots.last().map(|s| s.end <= t(13, 10)).unwrap_or(false));
        assert_eq!(slots.last().map(|s| s.kind), Some(SlotKind::Period));
    }

    #[test]
    fn zero_period_gives_no_slots() {
        let settings = SchoolSettings {
            period_duration: 0,
            ..SchoolSettings::default()
        };
        assert!(time_slots(&settings).is_empty());
        assert!(!is_period_slot(&settings, "p1"));
    }

    #[test]
    fn oversized_durations_yield_no_slots_instead_of_wrapping() {
        let mut settings = SchoolSettings::default();
        settings.period_duration = u32::MAX;
        assert!(time_slots(&settings).is_empty());

        settings.period_duration = 45;
        settings.interval_duration = u32::MAX;
        let slots = time_slots(&settings);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].id, "p1");

        settings.interval_duration = 5;
        settings.lunch_break_duration = u32::MAX;
        settings.lunch_break_start = t(8, 0);
        assert!(time_slots(&settings).is_empty());
    }

    #[test]
    fn school_days_follow_working_days_monday_first() {
        let mut settings = SchoolSettings::default();
        let days = school_days(&settings);
        assert_eq!(days.len(), 5);
        assert_eq!(days[0].name, "Monday");
        assert_eq!((days[0].day_index, days[0].day_of_week), (0, 1));

        settings.working_days[6] = true;
        settings.working_days[3] = false;
        let names: Vec<_> = school_days(&settings).iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec!["Monday", "Tuesday", "Thursday", "Friday", "Saturday"]
        );
    }

    #[test]
    fn cell_lookup_uses_one_based_day_of_week() {
        let mut state = DomainState::default();
        state.timetable.push(entry("e-mon", "s1", 1, "p1", "t1"));
        state.timetable.push(entry("e-sun", "s1", 0, "p1", "t1"));

        assert_eq!(
            timetable_entry(&state, "s1", 0, "p1").map(|e| e.id.as_str()),
            Some("e-mon")
        );
        assert!(timetable_entry(&state, "s1", 1, "p1").is_none());
        assert!(timetable_entry(&state, "s1", 6, "p1").is_none());
        assert!(timetable_entry(&state, "s2", 0, "p1").is_none());
    }

    #[test]
    fn schedules_sort_by_day_then_slot_order() {
        let mut state = DomainState::default();
        state.timetable.push(entry("a", "s1", 2, "p10", "t1"));
        state.timetable.push(entry("b", "s2", 2, "p2", "t1"));
        state.timetable.push(entry("c", "s1", 1, "p3", "t1"));
        state.timetable.push(entry("d", "s1", 1, "p1", "t2"));

        let ids: Vec<_> = teacher_schedule(&state, "t1").iter().map(|e| e.id.as_str()).collect();
        // p10 does not exist in the default day, so it sorts after p2.
        assert_eq!(ids, vec!["c", "b", "a"]);

        let ids: Vec<_> = section_timetable(&state, "s1").iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "a"]);
    }

    #[test]
    fn roster_orders_by_roll_number() {
        let mut state = DomainState::default();
        state.students.push(student("b", "s1", 2));
        state.students.push(student("x", "s2", 1));
        state.students.push(student("a", "s1", 1));

        let ids: Vec<_> = students_of(&state, "s1").iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        let ids: Vec<_> = roster_of(&state, "s1").iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(students_of(&state, "nope").is_empty());
    }

    #[test]
    fn selection_tally_and_select_all() {
        let a = student("a", "s1", 1);
        let b = student("b", "s1", 2);
        let c = student("c", "s1", 3);

        let mut sel = AttendanceSelection::new();
        assert_eq!(sel.tally(), AttendanceTally::default());

        sel.select_all([&a, &b, &c], AttendanceStatus::Present);
        sel.set("b", AttendanceStatus::Absent);
        assert_eq!(
            sel.tally(),
            AttendanceTally {
                present: 2,
                absent: 1,
                total: 3
            }
        );

        assert_eq!(sel.clear("c"), Some(AttendanceStatus::Present));
        assert_eq!(sel.tally().total, 2);

        let date = NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
        let recs = sel.to_records(date, Session::Morning, "u1");
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|r| r.marked_by == "u1" && r.date == date));
        assert_eq!(
            recs.iter().find(|r| r.student_id == "b").map(|r| r.status),
            Some(AttendanceStatus::Absent)
        );
    }

    #[test]
    fn section_attendance_filters_by_membership_date_and_session() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).expect("date");
        let mut state = DomainState::default();
        state.students.push(student("a", "s1", 1));
        state.students.push(student("z", "s2", 1));
        for (id, sid, session) in [
            ("r1", "a", Session::Morning),
            ("r2", "a", Session::Afternoon),
            ("r3", "z", Session::Morning),
        ] {
            state.attendance.push(AttendanceRecord {
                id: id.to_string(),
                student_id: sid.to_string(),
                date,
                session,
                status: AttendanceStatus::Present,
                marked_by: "u1".to_string(),
            });
        }

        let recs = attendance_for_section(&state, "s1", date, Session::Morning);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].id, "r1");

        let sel = AttendanceSelection::from_records(recs);
        assert_eq!(sel.status("a"), Some(AttendanceStatus::Present));
        assert_eq!(sel.len(), 1);
    }
}

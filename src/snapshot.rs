use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    ActiveStudent, DailySnapshot, DayAttendance, Level, Mark, MarkResult, RawEvent,
    SectionAttendance,
};

/// Reduce one day's raw check-in/out punches into the canonical per-classroom
/// snapshot for a level.
///
/// Pure over its inputs. Every active student appears exactly once: a student
/// with no matching punch is recorded as absent for the mark, never omitted.
/// Duplicate punches for one `(student, mark)` keep the smallest offset — the
/// earliest arrival wins, which is the reading most favorable to the student.
/// Exit marks are emitted for all students or for none, per `track_exit`.
pub fn build_daily_snapshot(
    active_students: &[ActiveStudent],
    raw_events: &[RawEvent],
    level: Level,
    date: NaiveDate,
    track_exit: bool,
) -> DailySnapshot {
    debug!(%level, %date, track_exit, students = active_students.len(), "building daily snapshot");

    let mut best_offsets: HashMap<(Uuid, Mark), i32> = HashMap::new();
    for event in raw_events {
        best_offsets
            .entry((event.student_id, event.mark))
            .and_modify(|current| {
                if event.offset_seconds < *current {
                    *current = event.offset_seconds;
                }
            })
            .or_insert(event.offset_seconds);
    }

    let mut grades: BTreeMap<i16, BTreeMap<String, SectionAttendance>> = BTreeMap::new();
    for student in active_students {
        let classroom = &student.classroom;
        let section = grades
            .entry(classroom.grade)
            .or_default()
            .entry(classroom.section.clone())
            .or_insert_with(|| SectionAttendance {
                classroom: classroom.clone(),
                students: BTreeMap::new(),
            });

        let attendance = DayAttendance {
            entry: MarkResult {
                offset_seconds: best_offsets.get(&(student.id, Mark::Entry)).copied(),
            },
            exit: track_exit.then(|| MarkResult {
                offset_seconds: best_offsets.get(&(student.id, Mark::Exit)).copied(),
            }),
        };
        section.students.insert(student.id, attendance);
    }

    let snapshot = DailySnapshot { level, date, grades };

    let (with_entry, without_entry) = snapshot.mark_tally(Mark::Entry);
    info!(%level, %date, with_entry, without_entry, "daily snapshot built");
    if track_exit {
        let (with_exit, without_exit) = snapshot.mark_tally(Mark::Exit);
        info!(%level, %date, with_exit, without_exit, "exit control included");
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classroom;

    fn classroom(grade: i16, section: &str) -> Classroom {
        Classroom {
            id: Uuid::new_v4(),
            level: Level::Secondary,
            grade,
            section: section.to_string(),
            color: "green".to_string(),
            homeroom_teacher_id: Some(Uuid::new_v4()),
        }
    }

    fn student(grade: i16, section: &str) -> ActiveStudent {
        ActiveStudent {
            id: Uuid::new_v4(),
            first_names: "Ana".to_string(),
            last_names: "Quispe".to_string(),
            classroom: classroom(grade, section),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 6).unwrap()
    }

    fn entry_offset(snapshot: &DailySnapshot, student_id: Uuid) -> Option<i32> {
        snapshot
            .iter_students()
            .find(|(_, id, _)| **id == student_id)
            .and_then(|(_, _, att)| att.entry.offset_seconds)
    }

    #[test]
    fn duplicate_punches_keep_the_earliest_arrival() {
        let s = student(3, "B");
        let events = vec![
            RawEvent {
                student_id: s.id,
                mark: Mark::Entry,
                offset_seconds: 240,
            },
            RawEvent {
                student_id: s.id,
                mark: Mark::Entry,
                offset_seconds: -15,
            },
            RawEvent {
                student_id: s.id,
                mark: Mark::Entry,
                offset_seconds: 600,
            },
        ];

        let snapshot =
            build_daily_snapshot(&[s.clone()], &events, Level::Secondary, date(), false);
        assert_eq!(entry_offset(&snapshot, s.id), Some(-15));
    }

    #[test]
    fn students_without_punches_are_recorded_absent() {
        let present = student(1, "A");
        let missing = student(1, "A");
        let events = vec![RawEvent {
            student_id: present.id,
            mark: Mark::Entry,
            offset_seconds: 0,
        }];

        let snapshot = build_daily_snapshot(
            &[present.clone(), missing.clone()],
            &events,
            Level::Secondary,
            date(),
            false,
        );

        assert_eq!(snapshot.iter_students().count(), 2);
        assert_eq!(entry_offset(&snapshot, present.id), Some(0));
        assert_eq!(entry_offset(&snapshot, missing.id), None);
    }

    #[test]
    fn empty_event_set_yields_an_all_absent_snapshot() {
        let roster = vec![student(2, "A"), student(2, "B"), student(4, "C")];
        let snapshot = build_daily_snapshot(&roster, &[], Level::Primary, date(), true);

        assert_eq!(snapshot.iter_students().count(), 3);
        for (_, _, attendance) in snapshot.iter_students() {
            assert_eq!(attendance.entry.offset_seconds, None);
            assert_eq!(attendance.exit.unwrap().offset_seconds, None);
        }
    }

    #[test]
    fn exit_marks_are_omitted_when_untracked() {
        let s = student(5, "A");
        let events = vec![RawEvent {
            student_id: s.id,
            mark: Mark::Exit,
            offset_seconds: 120,
        }];

        let snapshot = build_daily_snapshot(&[s], &events, Level::Primary, date(), false);
        for (_, _, attendance) in snapshot.iter_students() {
            assert!(attendance.exit.is_none());
        }
    }

    #[test]
    fn exit_marks_are_kept_when_tracked() {
        let s = student(5, "A");
        let events = vec![
            RawEvent {
                student_id: s.id,
                mark: Mark::Entry,
                offset_seconds: -10,
            },
            RawEvent {
                student_id: s.id,
                mark: Mark::Exit,
                offset_seconds: 90,
            },
        ];

        let snapshot = build_daily_snapshot(&[s.clone()], &events, Level::Secondary, date(), true);
        let (_, _, attendance) = snapshot
            .iter_students()
            .find(|(_, id, _)| **id == s.id)
            .unwrap();
        assert_eq!(attendance.exit.unwrap().offset_seconds, Some(90));
    }

    #[test]
    fn students_group_under_their_grade_and_section() {
        let a1 = student(1, "A");
        let a2 = ActiveStudent {
            id: Uuid::new_v4(),
            first_names: "Luis".to_string(),
            last_names: "Mamani".to_string(),
            classroom: a1.classroom.clone(),
        };
        let b = student(2, "C");

        let snapshot = build_daily_snapshot(
            &[a1.clone(), a2.clone(), b.clone()],
            &[],
            Level::Secondary,
            date(),
            false,
        );

        assert_eq!(snapshot.grades.len(), 2);
        let first = &snapshot.grades[&1]["A"];
        assert_eq!(first.students.len(), 2);
        assert_eq!(first.classroom.id, a1.classroom.id);
        let second = &snapshot.grades[&2]["C"];
        assert_eq!(second.students.len(), 1);
        assert_eq!(second.classroom.color, "green");
    }
}

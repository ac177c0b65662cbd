use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Educational level — the top partition for rosters, configuration and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Primary,
    Secondary,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Primary => "primary",
            Level::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attendance checkpoint within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    Entry,
    Exit,
}

impl Mark {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mark::Entry => "entry",
            Mark::Exit => "exit",
        }
    }

    pub fn parse(value: &str) -> Option<Mark> {
        match value {
            "entry" => Some(Mark::Entry),
            "exit" => Some(Mark::Exit),
            _ => None,
        }
    }
}

/// Result of one mark for one student. `offset_seconds` is signed seconds
/// relative to the official class start; `None` means absent for that mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkResult {
    pub offset_seconds: Option<i32>,
}

/// One student's marks for one day. `exit` is omitted entirely when the level
/// does not track exit control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayAttendance {
    pub entry: MarkResult,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exit: Option<MarkResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classroom {
    pub id: Uuid,
    pub level: Level,
    pub grade: i16,
    pub section: String,
    pub color: String,
    pub homeroom_teacher_id: Option<Uuid>,
}

/// All attendance for one grade/section bucket, with the classroom descriptor
/// denormalized in so reporting needs no second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionAttendance {
    pub classroom: Classroom,
    pub students: BTreeMap<Uuid, DayAttendance>,
}

/// Canonical attendance record for one school day at one level, keyed
/// grade -> section -> student. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub level: Level,
    pub date: NaiveDate,
    pub grades: BTreeMap<i16, BTreeMap<String, SectionAttendance>>,
}

impl DailySnapshot {
    /// Iterate every `(classroom, student_id, attendance)` triple in key order.
    pub fn iter_students(&self) -> impl Iterator<Item = (&Classroom, &Uuid, &DayAttendance)> {
        self.grades.values().flat_map(|sections| {
            sections.values().flat_map(|section| {
                section
                    .students
                    .iter()
                    .map(move |(id, att)| (&section.classroom, id, att))
            })
        })
    }

    /// Present/absent tallies for a mark, for post-build logging.
    pub fn mark_tally(&self, mark: Mark) -> (usize, usize) {
        let mut present = 0;
        let mut absent = 0;
        for (_, _, attendance) in self.iter_students() {
            let result = match mark {
                Mark::Entry => Some(attendance.entry),
                Mark::Exit => attendance.exit,
            };
            match result {
                Some(MarkResult {
                    offset_seconds: Some(_),
                }) => present += 1,
                Some(MarkResult {
                    offset_seconds: None,
                }) => absent += 1,
                None => {}
            }
        }
        (present, absent)
    }
}

/// An enrolled-and-active student on the day's roster, with classroom assignment.
#[derive(Debug, Clone)]
pub struct ActiveStudent {
    pub id: Uuid,
    pub first_names: String,
    pub last_names: String,
    pub classroom: Classroom,
}

/// One raw check-in/out punch, already reduced to an offset against class start.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub student_id: Uuid,
    pub mark: Mark,
    pub offset_seconds: i32,
}

/// Per-level report configuration. The core trusts the caller to supply sane
/// values; thresholds are not validated here.
#[derive(Debug, Clone, Copy)]
pub struct ReportConfig {
    pub absence_threshold: usize,
    pub tardiness_threshold: usize,
    pub tolerance_seconds: i32,
    pub class_start: NaiveTime,
}

impl ReportConfig {
    /// How many daily snapshots the level must retain to serve its
    /// longest-configured streak check.
    pub fn retention_bound(&self) -> usize {
        self.absence_threshold.max(self.tardiness_threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemKind {
    Absence,
    Tardy,
}

/// One qualifying day within a streak. Arrival time and excess offset are only
/// present for tardy days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemDay {
    pub date: NaiveDate,
    pub kind: ProblemKind,
    pub arrival_time: Option<NaiveTime>,
    pub excess_seconds: Option<i32>,
}

/// Analysis output record for one student whose streak crossed a threshold.
#[derive(Debug, Clone)]
pub struct StudentWithProblem {
    pub student_id: Uuid,
    pub first_names: String,
    pub last_names: String,
    pub grade: i16,
    pub section: String,
    pub classroom_color: String,
    pub consecutive_days: Vec<ProblemDay>,
}

/// Roster lookup entry used to enrich analysis output.
#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub first_names: String,
    pub last_names: String,
    pub classroom_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_parse_round_trips() {
        assert_eq!(Mark::parse("entry"), Some(Mark::Entry));
        assert_eq!(Mark::parse("exit"), Some(Mark::Exit));
        assert_eq!(Mark::parse("lunch"), None);
        assert_eq!(Mark::parse(Mark::Entry.as_str()), Some(Mark::Entry));
    }

    #[test]
    fn retention_bound_takes_larger_threshold() {
        let config = ReportConfig {
            absence_threshold: 3,
            tardiness_threshold: 5,
            tolerance_seconds: 300,
            class_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        };
        assert_eq!(config.retention_bound(), 5);
    }

    #[test]
    fn day_attendance_omits_exit_when_untracked() {
        let attendance = DayAttendance {
            entry: MarkResult {
                offset_seconds: Some(-30),
            },
            exit: None,
        };
        let json = serde_json::to_string(&attendance).unwrap();
        assert!(!json.contains("exit"));

        let parsed: DayAttendance = serde_json::from_str(&json).unwrap();
        assert!(parsed.exit.is_none());
    }
}

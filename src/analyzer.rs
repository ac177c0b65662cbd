use std::collections::{BTreeSet, HashMap};

use chrono::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    Classroom, DailySnapshot, ProblemDay, ProblemKind, ReportConfig, RosterStudent,
    StudentWithProblem,
};
use crate::retention::AvailableSnapshot;
use crate::store::SnapshotStore;

/// Output of one analysis run: threshold-crossing students for each track plus
/// the classrooms any of them belong to (drives downstream recipient
/// selection).
#[derive(Debug, Clone, Default)]
pub struct AnalysisResults {
    pub students_with_absence_streak: Vec<StudentWithProblem>,
    pub students_with_tardy_streak: Vec<StudentWithProblem>,
    pub affected_classrooms: BTreeSet<Uuid>,
}

/// Per-student running streaks, rebuilt from scratch on every run. No entry
/// for a student means a zero-length run — currently clean.
#[derive(Debug, Default)]
struct StreakRuns {
    absence: HashMap<Uuid, Vec<ProblemDay>>,
    tardy: HashMap<Uuid, Vec<ProblemDay>>,
}

/// Fold snapshots oldest to newest, classifying each student's entry mark into
/// exactly one of four cases:
///
/// - absent: grows the absence run and breaks any tardy run (a student who
///   never showed up cannot be tardy that day);
/// - on time or early (`offset <= 0`): breaks both runs;
/// - late within tolerance: counts as punctual, breaks both runs;
/// - late beyond tolerance (strictly `> tolerance_seconds`): breaks the
///   absence run and grows the tardy run.
///
/// Exit marks never influence streaks. Because every day breaks or grows each
/// run, surviving runs are trailing streaks as of the newest snapshot.
fn fold_snapshots(
    snapshots: &[DailySnapshot],
    config: &ReportConfig,
    want_absences: bool,
    want_tardies: bool,
) -> StreakRuns {
    let mut runs = StreakRuns::default();

    for snapshot in snapshots {
        for (_, student_id, attendance) in snapshot.iter_students() {
            match attendance.entry.offset_seconds {
                None => {
                    if want_absences {
                        runs.absence.entry(*student_id).or_default().push(ProblemDay {
                            date: snapshot.date,
                            kind: ProblemKind::Absence,
                            arrival_time: None,
                            excess_seconds: None,
                        });
                    }
                    if want_tardies {
                        runs.tardy.remove(student_id);
                    }
                }
                Some(offset) if offset <= 0 => {
                    if want_absences {
                        runs.absence.remove(student_id);
                    }
                    if want_tardies {
                        runs.tardy.remove(student_id);
                    }
                }
                Some(offset) => {
                    // Showed up, so any absence run is over.
                    if want_absences {
                        runs.absence.remove(student_id);
                    }
                    if want_tardies {
                        if offset > config.tolerance_seconds {
                            runs.tardy.entry(*student_id).or_default().push(ProblemDay {
                                date: snapshot.date,
                                kind: ProblemKind::Tardy,
                                arrival_time: Some(
                                    config.class_start + Duration::seconds(offset as i64),
                                ),
                                excess_seconds: Some(offset - config.tolerance_seconds),
                            });
                        } else {
                            runs.tardy.remove(student_id);
                        }
                    }
                }
            }
        }
    }

    runs
}

/// Walk the retained snapshot window and report every student whose trailing
/// absence or tardy streak reached its configured threshold.
///
/// `available` comes from the retention index, newest first; at most
/// `max(want_absences ? A : 0, want_tardies ? T : 0)` of its newest entries
/// are fetched. A snapshot that fails to fetch is logged and skipped — the
/// remaining window still gets analyzed. Students missing from the roster or
/// classroom maps are logged and excluded rather than failing the run.
pub fn analyze_consecutive(
    available: &[AvailableSnapshot],
    config: &ReportConfig,
    want_absences: bool,
    want_tardies: bool,
    store: &dyn SnapshotStore,
    students: &HashMap<Uuid, RosterStudent>,
    classrooms: &HashMap<Uuid, Classroom>,
) -> AnalysisResults {
    let window = usize::max(
        if want_absences { config.absence_threshold } else { 0 },
        if want_tardies { config.tardiness_threshold } else { 0 },
    );

    let mut snapshots: Vec<DailySnapshot> = Vec::with_capacity(window.min(available.len()));
    for entry in available.iter().take(window) {
        match store.get(&entry.reference) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(err) => {
                warn!(date = %entry.date, reference = %entry.reference, error = %err,
                    "skipping unreadable snapshot");
            }
        }
    }

    // Chronological replay is mandatory: streak state is direction-sensitive.
    snapshots.sort_by_key(|snapshot| snapshot.date);
    debug!(fetched = snapshots.len(), window, "snapshot window materialized");

    let runs = fold_snapshots(&snapshots, config, want_absences, want_tardies);

    let absence_ids: BTreeSet<Uuid> = if want_absences {
        runs.absence
            .iter()
            .filter(|(_, days)| days.len() >= config.absence_threshold)
            .map(|(id, _)| *id)
            .collect()
    } else {
        BTreeSet::new()
    };
    let tardy_ids: BTreeSet<Uuid> = if want_tardies {
        runs.tardy
            .iter()
            .filter(|(_, days)| days.len() >= config.tardiness_threshold)
            .map(|(id, _)| *id)
            .collect()
    } else {
        BTreeSet::new()
    };

    let mut results = AnalysisResults::default();
    for student_id in absence_ids.union(&tardy_ids) {
        let Some(student) = students.get(student_id) else {
            warn!(%student_id, "streak student missing from roster, excluded");
            continue;
        };
        let Some(classroom) = classrooms.get(&student.classroom_id) else {
            warn!(%student_id, classroom_id = %student.classroom_id,
                "streak student's classroom not found, excluded");
            continue;
        };

        results.affected_classrooms.insert(classroom.id);

        let base = StudentWithProblem {
            student_id: *student_id,
            first_names: student.first_names.clone(),
            last_names: student.last_names.clone(),
            grade: classroom.grade,
            section: classroom.section.clone(),
            classroom_color: classroom.color.clone(),
            consecutive_days: Vec::new(),
        };

        if absence_ids.contains(student_id) {
            let mut record = base.clone();
            record.consecutive_days = runs.absence.get(student_id).cloned().unwrap_or_default();
            results.students_with_absence_streak.push(record);
        }
        if tardy_ids.contains(student_id) {
            let mut record = base;
            record.consecutive_days = runs.tardy.get(student_id).cloned().unwrap_or_default();
            results.students_with_tardy_streak.push(record);
        }
    }

    let order = |a: &StudentWithProblem, b: &StudentWithProblem| {
        a.grade
            .cmp(&b.grade)
            .then_with(|| a.section.cmp(&b.section))
            .then_with(|| {
                format!("{} {}", a.last_names, a.first_names)
                    .cmp(&format!("{} {}", b.last_names, b.first_names))
            })
    };
    results.students_with_absence_streak.sort_by(order);
    results.students_with_tardy_streak.sort_by(order);

    info!(
        absence_streaks = results.students_with_absence_streak.len(),
        tardy_streaks = results.students_with_tardy_streak.len(),
        affected_classrooms = results.affected_classrooms.len(),
        "consecutive analysis complete"
    );
    results
}

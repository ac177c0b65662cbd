use std::fmt::Write;

use crate::analyzer::AnalysisResults;
use crate::models::{Level, ReportConfig, StudentWithProblem};

fn write_student_lines(output: &mut String, students: &[StudentWithProblem]) {
    for student in students {
        let days: Vec<String> = student
            .consecutive_days
            .iter()
            .map(|day| match day.arrival_time {
                Some(arrival) => format!("{} (arrived {})", day.date, arrival),
                None => day.date.to_string(),
            })
            .collect();
        let _ = writeln!(
            output,
            "- {} {} ({}{}, {} classroom): {} consecutive days — {}",
            student.last_names,
            student.first_names,
            student.grade,
            student.section,
            student.classroom_color,
            student.consecutive_days.len(),
            days.join(", ")
        );
    }
}

pub fn build_report(level: Level, config: &ReportConfig, results: &AnalysisResults) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Attendance Streak Report — {level}");
    let _ = writeln!(
        output,
        "Thresholds: {} consecutive absences, {} consecutive tardies (tolerance {}s, class start {})",
        config.absence_threshold,
        config.tardiness_threshold,
        config.tolerance_seconds,
        config.class_start
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Consecutive Absences");
    if results.students_with_absence_streak.is_empty() {
        let _ = writeln!(output, "No students at or above the absence threshold.");
    } else {
        write_student_lines(&mut output, &results.students_with_absence_streak);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Consecutive Tardies");
    if results.students_with_tardy_streak.is_empty() {
        let _ = writeln!(output, "No students at or above the tardiness threshold.");
    } else {
        write_student_lines(&mut output, &results.students_with_tardy_streak);
    }

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "{} classroom(s) affected.",
        results.affected_classrooms.len()
    );

    output
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use uuid::Uuid;

    use super::*;
    use crate::models::{ProblemDay, ProblemKind};

    fn config() -> ReportConfig {
        ReportConfig {
            absence_threshold: 3,
            tardiness_threshold: 2,
            tolerance_seconds: 300,
            class_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn empty_results_render_placeholder_sections() {
        let report = build_report(Level::Primary, &config(), &AnalysisResults::default());
        assert!(report.contains("# Attendance Streak Report — primary"));
        assert!(report.contains("No students at or above the absence threshold."));
        assert!(report.contains("No students at or above the tardiness threshold."));
        assert!(report.contains("0 classroom(s) affected."));
    }

    #[test]
    fn tardy_lines_include_arrival_times() {
        let classroom_id = Uuid::new_v4();
        let mut results = AnalysisResults::default();
        results.affected_classrooms.insert(classroom_id);
        results.students_with_tardy_streak.push(StudentWithProblem {
            student_id: Uuid::new_v4(),
            first_names: "Lucia".to_string(),
            last_names: "Vega".to_string(),
            grade: 2,
            section: "B".to_string(),
            classroom_color: "green".to_string(),
            consecutive_days: vec![ProblemDay {
                date: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
                kind: ProblemKind::Tardy,
                arrival_time: NaiveTime::from_hms_opt(8, 6, 40),
                excess_seconds: Some(100),
            }],
        });

        let report = build_report(Level::Secondary, &config(), &results);
        assert!(report.contains("Vega Lucia (2B, green classroom)"));
        assert!(report.contains("arrived 08:06:40"));
        assert!(report.contains("1 classroom(s) affected."));
    }
}

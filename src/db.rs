use std::collections::HashMap;

use anyhow::Context;
use chrono::{NaiveDate, NaiveTime};
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::models::{ActiveStudent, Classroom, Level, Mark, RawEvent, ReportConfig, RosterStudent};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let classrooms = vec![
        (
            Uuid::parse_str("7f1c8a52-6a1d-4f0e-9b3c-2d5e8a917f04")?,
            Level::Secondary,
            1i16,
            "A",
            "blue",
        ),
        (
            Uuid::parse_str("a3d94b7e-1c25-4b8f-8e61-9f0c2b6d4a18")?,
            Level::Secondary,
            2i16,
            "B",
            "green",
        ),
        (
            Uuid::parse_str("c58e21f9-7b43-4d06-a2f7-31e6d90c8b52")?,
            Level::Primary,
            3i16,
            "A",
            "yellow",
        ),
    ];

    for &(id, level, grade, section, color) in &classrooms {
        sqlx::query(
            r#"
            INSERT INTO attendance_streaks.classrooms (id, level, grade, section, color)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET level = EXCLUDED.level, grade = EXCLUDED.grade,
                section = EXCLUDED.section, color = EXCLUDED.color
            "#,
        )
        .bind(id)
        .bind(level.as_str())
        .bind(grade)
        .bind(section)
        .bind(color)
        .execute(pool)
        .await?;
    }

    let students = vec![
        (
            Uuid::parse_str("11f3b0aa-94d2-4c6e-8a5b-7e1d09c3f286")?,
            "Valeria",
            "Huaman",
            classrooms[0].0,
        ),
        (
            Uuid::parse_str("2b84c5d1-e706-4a39-bf28-50a1e9d7c643")?,
            "Diego",
            "Ramos",
            classrooms[0].0,
        ),
        (
            Uuid::parse_str("39a7e2c8-5f14-4d0b-9c67-81b2f4a0e595")?,
            "Camila",
            "Flores",
            classrooms[1].0,
        ),
        (
            Uuid::parse_str("480dfb63-21c9-4e87-a54d-96c3e0b17af2")?,
            "Mateo",
            "Paredes",
            classrooms[2].0,
        ),
    ];

    for &(id, first_names, last_names, classroom_id) in &students {
        sqlx::query(
            r#"
            INSERT INTO attendance_streaks.students (id, first_names, last_names, classroom_id, active)
            VALUES ($1, $2, $3, $4, TRUE)
            ON CONFLICT (id) DO UPDATE
            SET first_names = EXCLUDED.first_names, last_names = EXCLUDED.last_names,
                classroom_id = EXCLUDED.classroom_id, active = TRUE
            "#,
        )
        .bind(id)
        .bind(first_names)
        .bind(last_names)
        .bind(classroom_id)
        .execute(pool)
        .await?;
    }

    let settings = vec![
        (Level::Secondary, "absence_streak_threshold", "3"),
        (Level::Secondary, "tardy_streak_threshold", "3"),
        (Level::Secondary, "tardy_tolerance_minutes", "5"),
        (Level::Secondary, "class_start_time", "08:00:00"),
        (Level::Primary, "absence_streak_threshold", "3"),
        (Level::Primary, "tardy_streak_threshold", "3"),
        (Level::Primary, "tardy_tolerance_minutes", "5"),
        (Level::Primary, "class_start_time", "08:30:00"),
    ];

    for (level, name, value) in settings {
        sqlx::query(
            r#"
            INSERT INTO attendance_streaks.report_settings (level, name, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (level, name) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(level.as_str())
        .bind(name)
        .bind(value)
        .execute(pool)
        .await?;
    }

    let events = vec![
        (
            "seed-evt-001",
            students[0].0,
            Mark::Entry,
            -120,
            NaiveDate::from_ymd_opt(2026, 3, 2).context("invalid date")?,
        ),
        (
            "seed-evt-002",
            students[1].0,
            Mark::Entry,
            720,
            NaiveDate::from_ymd_opt(2026, 3, 2).context("invalid date")?,
        ),
        (
            "seed-evt-003",
            students[2].0,
            Mark::Entry,
            45,
            NaiveDate::from_ymd_opt(2026, 3, 2).context("invalid date")?,
        ),
    ];

    for (source_key, student_id, mark, offset_seconds, event_date) in events {
        sqlx::query(
            r#"
            INSERT INTO attendance_streaks.attendance_events
            (id, student_id, mark, offset_seconds, event_date, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(mark.as_str())
        .bind(offset_seconds)
        .bind(event_date)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    Ok(())
}

fn classroom_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<Classroom> {
    let level: String = row.get("level");
    let level = match level.as_str() {
        "primary" => Level::Primary,
        "secondary" => Level::Secondary,
        other => anyhow::bail!("unknown level {other} in classrooms table"),
    };
    Ok(Classroom {
        id: row.get("classroom_id"),
        level,
        grade: row.get("grade"),
        section: row.get("section"),
        color: row.get("color"),
        homeroom_teacher_id: row.get("homeroom_teacher_id"),
    })
}

pub async fn fetch_active_students(
    pool: &PgPool,
    level: Level,
) -> anyhow::Result<Vec<ActiveStudent>> {
    let rows = sqlx::query(
        r#"
        SELECT st.id, st.first_names, st.last_names,
               c.id AS classroom_id, c.level, c.grade, c.section, c.color,
               c.homeroom_teacher_id
        FROM attendance_streaks.students st
        JOIN attendance_streaks.classrooms c ON c.id = st.classroom_id
        WHERE st.active AND c.level = $1
        "#,
    )
    .bind(level.as_str())
    .fetch_all(pool)
    .await
    .context("failed to fetch active students")?;

    let mut students = Vec::with_capacity(rows.len());
    for row in rows {
        students.push(ActiveStudent {
            id: row.get("id"),
            first_names: row.get("first_names"),
            last_names: row.get("last_names"),
            classroom: classroom_from_row(&row)?,
        });
    }
    Ok(students)
}

pub async fn fetch_raw_events(
    pool: &PgPool,
    level: Level,
    date: NaiveDate,
) -> anyhow::Result<Vec<RawEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT e.student_id, e.mark, e.offset_seconds
        FROM attendance_streaks.attendance_events e
        JOIN attendance_streaks.students st ON st.id = e.student_id
        JOIN attendance_streaks.classrooms c ON c.id = st.classroom_id
        WHERE c.level = $1 AND e.event_date = $2
        "#,
    )
    .bind(level.as_str())
    .bind(date)
    .fetch_all(pool)
    .await
    .context("failed to fetch raw attendance events")?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let mark_text: String = row.get("mark");
        let Some(mark) = Mark::parse(&mark_text) else {
            warn!(mark = %mark_text, "skipping event with unknown mark");
            continue;
        };
        events.push(RawEvent {
            student_id: row.get("student_id"),
            mark,
            offset_seconds: row.get("offset_seconds"),
        });
    }
    Ok(events)
}

/// Roster and classroom lookup maps for enriching analysis output.
pub async fn fetch_roster_maps(
    pool: &PgPool,
    level: Level,
) -> anyhow::Result<(HashMap<Uuid, RosterStudent>, HashMap<Uuid, Classroom>)> {
    let students = fetch_active_students(pool, level).await?;

    let mut roster = HashMap::with_capacity(students.len());
    let mut classrooms = HashMap::new();
    for student in students {
        classrooms
            .entry(student.classroom.id)
            .or_insert_with(|| student.classroom.clone());
        roster.insert(
            student.id,
            RosterStudent {
                first_names: student.first_names,
                last_names: student.last_names,
                classroom_id: student.classroom.id,
            },
        );
    }
    Ok((roster, classrooms))
}

pub async fn fetch_report_config(pool: &PgPool, level: Level) -> anyhow::Result<ReportConfig> {
    let rows = sqlx::query(
        r#"
        SELECT name, value
        FROM attendance_streaks.report_settings
        WHERE level = $1
        "#,
    )
    .bind(level.as_str())
    .fetch_all(pool)
    .await
    .context("failed to fetch report settings")?;

    let mut values: HashMap<String, String> = HashMap::new();
    for row in rows {
        values.insert(row.get("name"), row.get("value"));
    }

    let parse_count = |name: &str, default: usize| -> anyhow::Result<usize> {
        match values.get(name) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("setting {name} is not a number: {raw}")),
            None => Ok(default),
        }
    };

    let tolerance_minutes: i32 = match values.get("tardy_tolerance_minutes") {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("setting tardy_tolerance_minutes is not a number: {raw}"))?,
        None => 5,
    };

    let class_start = match values.get("class_start_time") {
        Some(raw) => NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .with_context(|| format!("setting class_start_time is not a time: {raw}"))?,
        None => NaiveTime::from_hms_opt(8, 0, 0).context("invalid fallback class start")?,
    };

    Ok(ReportConfig {
        absence_threshold: parse_count("absence_streak_threshold", 3)?,
        tardiness_threshold: parse_count("tardy_streak_threshold", 3)?,
        tolerance_seconds: tolerance_minutes * 60,
        class_start,
    })
}

pub async fn import_events_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: Uuid,
        mark: String,
        offset_seconds: i32,
        event_date: NaiveDate,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let Some(mark) = Mark::parse(&row.mark) else {
            warn!(mark = %row.mark, student_id = %row.student_id, "skipping row with unknown mark");
            continue;
        };

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO attendance_streaks.attendance_events
            (id, student_id, mark, offset_seconds, event_date, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.student_id)
        .bind(mark.as_str())
        .bind(row.offset_seconds)
        .bind(row.event_date)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

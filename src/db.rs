use anyhow::Context;
use sqlx::PgPool;
use tracing::info;

use crate::models::{LessonRecord, LessonSubmission, NewStudent, ReportRecord, Student};

const STUDENT_COLUMNS: &str = "id, first_name, last_name, first_name_he, last_name_he";

const LESSON_COLUMNS: &str = "id, student_id, year, month, grammar_e, reading_e, speaking_e, \
     writing_e, hours_studied, created_at, updated_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Inserts the starter students, but only into an empty table.
pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM english_lessons.students")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        info!(existing, "students table not empty, skipping seed");
        return Ok(0);
    }

    let students = [
        ("Адели", "Рабинович", "אדל", "רבינוביץ'"),
        ("Ривки", "Забродски", "רבקה", "זברודסקי"),
        ("Ципоры", "Херман", "ציפורה", "הרמן"),
    ];

    for (first_name, last_name, first_name_he, last_name_he) in students {
        create_student(
            pool,
            &NewStudent {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                first_name_he: first_name_he.to_string(),
                last_name_he: last_name_he.to_string(),
            },
        )
        .await?;
    }

    Ok(students.len())
}

pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

pub async fn create_student(pool: &PgPool, student: &NewStudent) -> Result<Student, sqlx::Error> {
    let query = format!(
        "INSERT INTO english_lessons.students (first_name, last_name, first_name_he, last_name_he) \
         VALUES ($1, $2, $3, $4) \
         RETURNING {STUDENT_COLUMNS}"
    );

    sqlx::query_as::<_, Student>(&query)
        .bind(&student.first_name)
        .bind(&student.last_name)
        .bind(&student.first_name_he)
        .bind(&student.last_name_he)
        .fetch_one(pool)
        .await
}

pub async fn list_students(pool: &PgPool) -> Result<Vec<Student>, sqlx::Error> {
    let query = format!(
        "SELECT {STUDENT_COLUMNS} FROM english_lessons.students \
         ORDER BY last_name, first_name"
    );
    sqlx::query_as::<_, Student>(&query).fetch_all(pool).await
}

pub async fn get_student(pool: &PgPool, student_id: i64) -> Result<Option<Student>, sqlx::Error> {
    let query = format!("SELECT {STUDENT_COLUMNS} FROM english_lessons.students WHERE id = $1");
    sqlx::query_as::<_, Student>(&query)
        .bind(student_id)
        .fetch_optional(pool)
        .await
}

/// Creates the record for (student, year, month) or overwrites the existing one.
pub async fn upsert_lesson(
    pool: &PgPool,
    lesson: &LessonSubmission,
) -> Result<LessonRecord, sqlx::Error> {
    let query = format!(
        r#"
        INSERT INTO english_lessons.lesson_records
        (student_id, year, month, grammar_e, reading_e, speaking_e, writing_e, hours_studied)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (student_id, year, month) DO UPDATE
        SET grammar_e = EXCLUDED.grammar_e,
            reading_e = EXCLUDED.reading_e,
            speaking_e = EXCLUDED.speaking_e,
            writing_e = EXCLUDED.writing_e,
            hours_studied = EXCLUDED.hours_studied,
            updated_at = now()
        RETURNING {LESSON_COLUMNS}
        "#
    );

    sqlx::query_as::<_, LessonRecord>(&query)
        .bind(lesson.student_id)
        .bind(lesson.year)
        .bind(lesson.month)
        .bind(&lesson.grammar_e)
        .bind(&lesson.reading_e)
        .bind(&lesson.speaking_e)
        .bind(&lesson.writing_e)
        .bind(lesson.hours_studied)
        .fetch_one(pool)
        .await
}

pub async fn fetch_lesson(
    pool: &PgPool,
    student_id: i64,
    year: i32,
    month: i32,
) -> Result<Option<LessonRecord>, sqlx::Error> {
    let query = format!(
        "SELECT {LESSON_COLUMNS} FROM english_lessons.lesson_records \
         WHERE student_id = $1 AND year = $2 AND month = $3"
    );
    sqlx::query_as::<_, LessonRecord>(&query)
        .bind(student_id)
        .bind(year)
        .bind(month)
        .fetch_optional(pool)
        .await
}

/// Looks up the lesson for the key together with its student.
pub async fn fetch_report_record(
    pool: &PgPool,
    student_id: i64,
    year: i32,
    month: i32,
) -> Result<Option<ReportRecord>, sqlx::Error> {
    sqlx::query_as::<_, ReportRecord>(
        r#"
        SELECT l.student_id, s.first_name, s.last_name, s.first_name_he, s.last_name_he,
               l.year, l.month, l.grammar_e, l.reading_e, l.speaking_e, l.writing_e,
               l.hours_studied
        FROM english_lessons.lesson_records l
        JOIN english_lessons.students s ON s.id = l.student_id
        WHERE l.student_id = $1 AND l.year = $2 AND l.month = $3
        "#,
    )
    .bind(student_id)
    .bind(year)
    .bind(month)
    .fetch_optional(pool)
    .await
}

/// Upserts every row of a lesson CSV. Rows for unknown students or with
/// out-of-range values abort the import.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: i64,
        year: i32,
        month: i32,
        #[serde(default)]
        grammar_e: String,
        #[serde(default)]
        reading_e: String,
        #[serde(default)]
        speaking_e: String,
        #[serde(default)]
        writing_e: String,
        hours_studied: i32,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut upserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let lesson = LessonSubmission {
            student_id: row.student_id,
            year: row.year,
            month: row.month,
            grammar_e: row.grammar_e,
            reading_e: row.reading_e,
            speaking_e: row.speaking_e,
            writing_e: row.writing_e,
            hours_studied: row.hours_studied,
        };
        lesson
            .validate()
            .map_err(|reason| anyhow::anyhow!("row {}: {reason}", line + 1))?;

        if get_student(pool, lesson.student_id).await?.is_none() {
            anyhow::bail!("row {}: student {} not found", line + 1, lesson.student_id);
        }

        upsert_lesson(pool, &lesson).await?;
        upserted += 1;
    }

    Ok(upserted)
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NAME_MAX_LEN: usize = 100;
pub const SKILL_MAX_LEN: usize = 255;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Student {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub first_name_he: Option<String>,
    pub last_name_he: Option<String>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn full_name_he(&self) -> String {
        format!(
            "{} {}",
            self.first_name_he.as_deref().unwrap_or(""),
            self.last_name_he.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }
}

/// Student as returned by the API, with the derived display names.
#[derive(Debug, Clone, Serialize)]
pub struct StudentView {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub first_name_he: String,
    pub last_name_he: String,
    pub full_name: String,
    pub full_name_he: String,
}

impl From<Student> for StudentView {
    fn from(student: Student) -> Self {
        let full_name = student.full_name();
        let full_name_he = student.full_name_he();
        Self {
            id: student.id,
            first_name: student.first_name,
            last_name: student.last_name,
            first_name_he: student.first_name_he.unwrap_or_default(),
            last_name_he: student.last_name_he.unwrap_or_default(),
            full_name,
            full_name_he,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub first_name_he: String,
    #[serde(default)]
    pub last_name_he: String,
}

impl NewStudent {
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{field} is required"));
            }
        }
        for (field, value) in [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("first_name_he", &self.first_name_he),
            ("last_name_he", &self.last_name_he),
        ] {
            check_len(field, value, NAME_MAX_LEN)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LessonRecord {
    pub id: i64,
    pub student_id: i64,
    pub year: i32,
    pub month: i32,
    pub grammar_e: Option<String>,
    pub reading_e: Option<String>,
    pub speaking_e: Option<String>,
    pub writing_e: Option<String>,
    pub hours_studied: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload of "submit lesson data". Upserted on (student_id, year, month).
#[derive(Debug, Clone, Deserialize)]
pub struct LessonSubmission {
    pub student_id: i64,
    pub year: i32,
    pub month: i32,
    #[serde(default)]
    pub grammar_e: String,
    #[serde(default)]
    pub reading_e: String,
    #[serde(default)]
    pub speaking_e: String,
    #[serde(default)]
    pub writing_e: String,
    #[serde(default = "default_hours_studied")]
    pub hours_studied: i32,
}

fn default_hours_studied() -> i32 {
    1
}

impl LessonSubmission {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=12).contains(&self.month) {
            return Err(format!("month must be between 1 and 12, got {}", self.month));
        }
        if !(1..=12).contains(&self.hours_studied) {
            return Err(format!(
                "hours_studied must be between 1 and 12, got {}",
                self.hours_studied
            ));
        }
        check_len("grammar_e", &self.grammar_e, SKILL_MAX_LEN)?;
        check_len("reading_e", &self.reading_e, SKILL_MAX_LEN)?;
        check_len("speaking_e", &self.speaking_e, SKILL_MAX_LEN)?;
        check_len("writing_e", &self.writing_e, SKILL_MAX_LEN)?;
        Ok(())
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len > max {
        return Err(format!("{field} is {len} characters, limit is {max}"));
    }
    Ok(())
}

/// A lesson record joined with its student: everything a report needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportRecord {
    pub student_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub first_name_he: Option<String>,
    pub last_name_he: Option<String>,
    pub year: i32,
    pub month: i32,
    pub grammar_e: Option<String>,
    pub reading_e: Option<String>,
    pub speaking_e: Option<String>,
    pub writing_e: Option<String>,
    pub hours_studied: Option<i32>,
}

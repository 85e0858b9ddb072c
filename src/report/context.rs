use tracing::warn;

use crate::models::ReportRecord;
use crate::report::placeholder::Context;

/// Month names in Russian, index 1..=12; index 0 unused.
pub const MONTHS_RU: [&str; 13] = [
    "",
    "январь",
    "февраль",
    "март",
    "апрель",
    "май",
    "июнь",
    "июль",
    "август",
    "сентябрь",
    "октябрь",
    "ноябрь",
    "декабрь",
];

/// Gregorian month names in Hebrew, index 1..=12; index 0 unused.
pub const MONTHS_HE: [&str; 13] = [
    "",
    "ינואר",
    "פברואר",
    "מרץ",
    "אפריל",
    "מאי",
    "יוני",
    "יולי",
    "אוגוסט",
    "ספטמבר",
    "אוקטובר",
    "נובמבר",
    "דצמבר",
];

/// Every key `build_context` fills in.
pub const CONTEXT_KEYS: [&str; 13] = [
    "first_name",
    "last_name",
    "first_name_he",
    "last_name_he",
    "year",
    "month",
    "month_ru",
    "month_he",
    "GrammarE",
    "ReadingE",
    "SpeakingE",
    "WritingE",
    "hours_studied",
];

fn month_name(table: &[&'static str; 13], month: i32) -> &'static str {
    match usize::try_from(month) {
        Ok(index @ 1..=12) => table[index],
        _ => "",
    }
}

/// Flattens a record into the string context the template sees.
pub fn build_context(record: &ReportRecord) -> Context {
    if !(1..=12).contains(&record.month) {
        warn!(
            student_id = record.student_id,
            year = record.year,
            month = record.month,
            "lesson record has out-of-range month, month names left empty"
        );
    }

    let text = |value: &Option<String>| value.clone().unwrap_or_default();

    Context::from([
        ("first_name".to_string(), record.first_name.clone()),
        ("last_name".to_string(), record.last_name.clone()),
        ("first_name_he".to_string(), text(&record.first_name_he)),
        ("last_name_he".to_string(), text(&record.last_name_he)),
        ("year".to_string(), record.year.to_string()),
        ("month".to_string(), record.month.to_string()),
        (
            "month_ru".to_string(),
            month_name(&MONTHS_RU, record.month).to_string(),
        ),
        (
            "month_he".to_string(),
            month_name(&MONTHS_HE, record.month).to_string(),
        ),
        ("GrammarE".to_string(), text(&record.grammar_e)),
        ("ReadingE".to_string(), text(&record.reading_e)),
        ("SpeakingE".to_string(), text(&record.speaking_e)),
        ("WritingE".to_string(), text(&record.writing_e)),
        (
            "hours_studied".to_string(),
            record.hours_studied.unwrap_or(0).to_string(),
        ),
    ])
}

#[cfg(test)]
pub(crate) fn sample_record() -> ReportRecord {
    ReportRecord {
        student_id: 42,
        first_name: "Anna".to_string(),
        last_name: "Ivanova".to_string(),
        first_name_he: None,
        last_name_he: None,
        year: 2024,
        month: 3,
        grammar_e: Some("Present Perfect".to_string()),
        reading_e: None,
        speaking_e: None,
        writing_e: None,
        hours_studied: Some(4),
    }
}

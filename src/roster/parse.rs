//! Answer ingestion: turns raw pasted text or per-student documents into a
//! structured `Student` roster.
//!
//! Two modes share one line rule: a line is an answer line when, after
//! trimming, it starts with a bullet marker. Everything else is either a
//! student name (pasted mode) or noise (file mode).

use crate::roster::{Student, new_student_id};

const BULLET_MARKERS: [char; 4] = ['•', '-', '–', '*'];

/// Parser output plus the recoverable warnings accumulated along the way.
/// Warnings never abort ingestion; the caller decides how to surface them.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub students: Vec<Student>,
    pub warnings: Vec<String>,
}

/// Drops control and other non-printable characters and trims the line.
/// Pasted text frequently carries zero-width or control junk from word
/// processors, which would otherwise break name/answer classification.
fn sanitize_line(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() && !is_invisible(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Zero-width and directional format characters that survive `is_control`.
fn is_invisible(c: char) -> bool {
    matches!(c, '\u{200b}'..='\u{200f}' | '\u{2060}' | '\u{feff}')
}

/// Returns the answer text if the line is bullet-prefixed, `None` otherwise.
fn answer_text(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let marker = trimmed.chars().next()?;
    if BULLET_MARKERS.contains(&marker) {
        Some(trimmed[marker.len_utf8()..].trim().to_string())
    } else {
        None
    }
}

/// Mode B: one pasted block containing all students.
///
/// A non-empty, non-bullet line opens a new student record; bullet lines
/// append to the current student's answers. A student is committed only once
/// it has accumulated at least one answer, so back-to-back name lines drop
/// the earlier one silently.
pub fn parse_pasted_block(text: &str) -> IngestOutcome {
    let mut outcome = IngestOutcome::default();
    let mut current: Option<Student> = None;

    for raw_line in text.lines() {
        let line = sanitize_line(raw_line);
        if line.is_empty() {
            continue;
        }

        if let Some(answer) = answer_text(&line) {
            if let Some(student) = current.as_mut() {
                student.answers.push(answer);
            }
            // A bullet before any name line has no student to attach to.
            continue;
        }

        commit(&mut outcome.students, current.take());
        current = Some(Student {
            id: new_student_id(outcome.students.len()),
            name: line,
            answers: Vec::new(),
        });
    }

    commit(&mut outcome.students, current.take());
    outcome
}

/// Mode A: one extracted document per student, given as (display name, text).
///
/// Each document yields at most one student. Non-bullet lines are discarded
/// rather than treated as names, and a document without a single bullet line
/// produces a warning instead of a student.
pub fn parse_student_files<I>(documents: I) -> IngestOutcome
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut outcome = IngestOutcome::default();

    for (name, text) in documents {
        let answers: Vec<String> = text
            .lines()
            .map(sanitize_line)
            .filter_map(|line| answer_text(&line))
            .collect();

        if answers.is_empty() {
            outcome.warnings.push(format!(
                "No bulleted answers found for \"{}\"; the file was skipped.",
                name
            ));
            continue;
        }

        outcome.students.push(Student {
            id: new_student_id(outcome.students.len()),
            name,
            answers,
        });
    }

    outcome
}

/// Caller-side count validation. Mismatches are warnings, never errors: the
/// user can continue anyway or go back and fix the input.
pub fn validate_roster(
    students: &[Student],
    expected_students: Option<usize>,
    question_count: usize,
) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(expected) = expected_students {
        if students.len() != expected {
            warnings.push(format!(
                "Expected {} students but parsed {}.",
                expected,
                students.len()
            ));
        }
    }

    for student in students {
        if student.answers.len() != question_count {
            warnings.push(format!(
                "{} has {} answers for {} questions.",
                student.name,
                student.answers.len(),
                question_count
            ));
        }
    }

    warnings
}

fn commit(students: &mut Vec<Student>, candidate: Option<Student>) {
    if let Some(student) = candidate {
        if !student.answers.is_empty() {
            students.push(student);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pasted_block_parses_two_students_in_order() {
        let outcome = parse_pasted_block("Alice\n• A1\n• A2\n\nBob\n• B1\n• B2");
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.students.len(), 2);
        assert_eq!(outcome.students[0].name, "Alice");
        assert_eq!(outcome.students[0].answers, vec!["A1", "A2"]);
        assert_eq!(outcome.students[1].name, "Bob");
        assert_eq!(outcome.students[1].answers, vec!["B1", "B2"]);
    }

    #[test]
    fn all_bullet_markers_are_accepted() {
        let outcome = parse_pasted_block("Carol\n• one\n- two\n– three\n* four");
        assert_eq!(
            outcome.students[0].answers,
            vec!["one", "two", "three", "four"]
        );
    }

    #[test]
    fn name_without_answers_is_dropped() {
        let outcome = parse_pasted_block("Ghost\nAlice\n• A1");
        assert_eq!(outcome.students.len(), 1);
        assert_eq!(outcome.students[0].name, "Alice");
    }

    #[test]
    fn trailing_name_without_answers_is_dropped() {
        let outcome = parse_pasted_block("Alice\n• A1\nGhost");
        assert_eq!(outcome.students.len(), 1);
    }

    #[test]
    fn leading_bullets_without_a_name_are_ignored() {
        let outcome = parse_pasted_block("• orphan\nAlice\n• A1");
        assert_eq!(outcome.students.len(), 1);
        assert_eq!(outcome.students[0].answers, vec!["A1"]);
    }

    #[test]
    fn control_characters_are_stripped_before_classification() {
        let outcome = parse_pasted_block("Alice\u{0007}\n\u{200b}\t• A1\u{0000}");
        assert_eq!(outcome.students.len(), 1);
        assert_eq!(outcome.students[0].name, "Alice");
        assert_eq!(outcome.students[0].answers, vec!["A1"]);
    }

    #[test]
    fn bullet_indented_with_whitespace_is_an_answer() {
        let outcome = parse_pasted_block("Alice\n   • A1");
        assert_eq!(outcome.students[0].answers, vec!["A1"]);
    }

    #[test]
    fn empty_input_yields_empty_roster() {
        let outcome = parse_pasted_block("");
        assert!(outcome.students.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn files_map_to_at_most_one_student_each() {
        let outcome = parse_student_files(vec![
            (
                "Alice".to_string(),
                "Intro paragraph\n• A1\nMore prose\n• A2".to_string(),
            ),
            ("Bob".to_string(), "• B1".to_string()),
        ]);
        assert_eq!(outcome.students.len(), 2);
        assert_eq!(outcome.students[0].answers, vec!["A1", "A2"]);
        assert_eq!(outcome.students[1].answers, vec!["B1"]);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn file_without_bullets_warns_and_is_skipped() {
        let outcome = parse_student_files(vec![
            ("Alice".to_string(), "just prose, no bullets?".to_string()),
            ("Bob".to_string(), "• B1".to_string()),
        ]);
        assert_eq!(outcome.students.len(), 1);
        assert_eq!(outcome.students[0].name, "Bob");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("Alice"));
    }

    #[test]
    fn validate_roster_reports_count_mismatches() {
        let outcome = parse_pasted_block("Alice\n• A1\n• A2\nBob\n• B1");
        let warnings = validate_roster(&outcome.students, Some(3), 2);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("Expected 3 students"));
        assert!(warnings[1].contains("Bob"));
    }

    #[test]
    fn validate_roster_is_quiet_when_counts_line_up() {
        let outcome = parse_pasted_block("Alice\n• A1\n• A2");
        assert!(validate_roster(&outcome.students, Some(1), 2).is_empty());
    }
}

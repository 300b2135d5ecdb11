//! Adapter from delimited text to typed rows
//!
//! Reading is strict about structure (a malformed record aborts) and
//! separates content validation: `validate_rows` reports every bad row,
//! `to_dataset` stops at the first one.

use crate::config::PositionScheme;
use crate::error::AnalysisError;
use crate::schema::raw_row::{ParsedRow, RawRow, RowError, REQUIRED_COLUMNS};
use crate::types::ComprehensionAnswer;
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A raw row with its 1-based line number in the input
#[derive(Debug, Clone, PartialEq)]
pub struct NumberedRow {
    pub line: u64,
    pub row: RawRow,
}

/// Typed contents of one input file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// Every row in file order
    pub rows: Vec<ParsedRow>,
    /// Every row that carries a comprehension answer
    pub answers: Vec<ComprehensionAnswer>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One invalid row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowIssue {
    pub line: u64,
    pub participant: String,
    pub error: String,
}

/// Adapter for reading and converting input rows
pub struct RowAdapter;

impl RowAdapter {
    /// Delimiter for a path: the configured one, else tab for `.tsv`/`.txt`, else comma
    pub fn delimiter_for(path: Option<&Path>, configured: Option<char>) -> u8 {
        if let Some(c) = configured {
            if c.is_ascii() {
                return c as u8;
            }
        }
        let ext = path
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("tsv") | Some("txt") => b'\t',
            _ => b',',
        }
    }

    /// Header columns the reader needs but the input lacks
    pub fn missing_columns(headers: &csv::StringRecord) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|col| !headers.iter().any(|h| h.trim() == *col))
            .collect()
    }

    /// Read every record from a delimited stream
    pub fn parse_reader<R: Read>(reader: R, delimiter: u8) -> Result<Vec<NumberedRow>, AnalysisError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let missing = Self::missing_columns(&headers);
        if !missing.is_empty() {
            return Err(AnalysisError::InvalidRow {
                line: 1,
                message: format!("missing column(s): {}", missing.join(", ")),
            });
        }

        let mut rows = Vec::new();
        let mut record = csv::StringRecord::new();
        while reader.read_record(&mut record)? {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            if record.iter().all(|f| f.is_empty()) {
                continue;
            }
            let row: RawRow = record.deserialize(Some(&headers)).map_err(|e| AnalysisError::InvalidRow {
                line,
                message: e.to_string(),
            })?;
            rows.push(NumberedRow { line, row });
        }
        Ok(rows)
    }

    /// Read every record from an in-memory document
    pub fn parse_str(text: &str, delimiter: u8) -> Result<Vec<NumberedRow>, AnalysisError> {
        Self::parse_reader(text.as_bytes(), delimiter)
    }

    /// Read every record from a file
    pub fn parse_path(path: &Path, delimiter: Option<char>) -> Result<Vec<NumberedRow>, AnalysisError> {
        let file = File::open(path).map_err(|e| {
            AnalysisError::Io(std::io::Error::new(
                e.kind(),
                format!("cannot open '{}': {}", path.display(), e),
            ))
        })?;
        Self::parse_reader(file, Self::delimiter_for(Some(path), delimiter))
    }

    /// Report every invalid row
    pub fn validate_rows(rows: &[NumberedRow], positions: &PositionScheme) -> Vec<RowIssue> {
        rows.iter()
            .filter_map(|r| {
                r.row.validate(positions).err().map(|e| RowIssue {
                    line: r.line,
                    participant: r.row.participant_key().to_string(),
                    error: e.to_string(),
                })
            })
            .collect()
    }

    /// Type every row, stopping at the first invalid one
    pub fn to_dataset(rows: &[NumberedRow], positions: &PositionScheme) -> Result<Dataset, AnalysisError> {
        let mut dataset = Dataset::default();
        for r in rows {
            let parsed = r.row.parse(positions).map_err(|e| row_error(r.line, e))?;
            if let Some(correct) = parsed.answer {
                dataset.answers.push(ComprehensionAnswer {
                    participant: parsed.participant.clone(),
                    item_type: parsed.item_type,
                    item: parsed.item,
                    correct,
                });
            }
            dataset.rows.push(parsed);
        }
        Ok(dataset)
    }
}

fn row_error(line: u64, error: RowError) -> AnalysisError {
    match error {
        RowError::UnknownPosition(label) => AnalysisError::UnknownPosition(format!("{} (line {})", label, line)),
        other => AnalysisError::InvalidRow {
            line,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, ItemType};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const HEADER: &str =
        "Participant,List,ParticipantId,ItemType,ItemNumber,Condition,WordPosition,Word,Answer,RT,Antecedent,VerbType";

    fn sample() -> String {
        [
            HEADER,
            "1,1,P01,target,4,OPT-Ant,main_verb,waited,,385,Ant,OPT",
            "1,1,P01,target,4,OPT-Ant,question,?,1,,Ant,OPT",
            "1,1,P01,filler,30,Control,final,home.,0,512,,",
            "2,2,P02,target,5,OT-NoAnt,spillover_1,for,NA,402,NoAnt,OT",
        ]
        .join("\n")
    }

    #[test]
    fn test_parse_str_numbers_lines() {
        let rows = RowAdapter::parse_str(&sample(), b',').unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[3].line, 5);
        assert_eq!(rows[3].row.participant_id, "P02");
    }

    #[test]
    fn test_missing_required_column() {
        let err = RowAdapter::parse_str("Participant,RT\n1,300", b',').unwrap_err();
        match err {
            AnalysisError::InvalidRow { line, message } => {
                assert_eq!(line, 1);
                assert!(message.contains("ItemType"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_validate_rows_accepts_target_question_row() {
        let rows = RowAdapter::parse_str(&sample(), b',').unwrap();
        assert!(RowAdapter::validate_rows(&rows, &PositionScheme::default()).is_empty());
    }

    #[test]
    fn test_validate_rows_reports_unknown_timed_position() {
        let mut text = sample();
        text.push_str("\n2,2,P02,target,5,OT-NoAnt,nowhere,for,,410,NoAnt,OT");
        let rows = RowAdapter::parse_str(&text, b',').unwrap();
        let issues = RowAdapter::validate_rows(&rows, &PositionScheme::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, 6);
        assert_eq!(issues[0].participant, "P02");
    }

    #[test]
    fn test_to_dataset_collects_answers() {
        let mut positions = PositionScheme::default();
        positions
            .aliases
            .insert("question".to_string(), "final".to_string());

        let rows = RowAdapter::parse_str(&sample(), b',').unwrap();
        let dataset = RowAdapter::to_dataset(&rows, &positions).unwrap();

        assert_eq!(dataset.rows.len(), 4);
        assert_eq!(dataset.rows[0].condition, Condition::OptAnt);
        assert_eq!(dataset.answers.len(), 2);
        assert_eq!(dataset.answers[1].item_type, ItemType::Filler);
        assert!(!dataset.answers[1].correct);
    }

    #[test]
    fn test_to_dataset_aborts_with_line() {
        let mut text = sample();
        text.push_str("\n2,2,P02,target,5,OT-NoAnt,nowhere,for,,410,NoAnt,OT");
        let rows = RowAdapter::parse_str(&text, b',').unwrap();
        let err = RowAdapter::to_dataset(&rows, &PositionScheme::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::UnknownPosition(ref m) if m.contains("line 6")));
    }

    #[test]
    fn test_to_dataset_keeps_target_question_rows() {
        let rows = RowAdapter::parse_str(&sample(), b',').unwrap();
        let dataset = RowAdapter::to_dataset(&rows, &PositionScheme::default()).unwrap();
        assert_eq!(dataset.rows[1].category, None);
        assert_eq!(dataset.rows[1].rt_ms, None);
        assert_eq!(dataset.answers[0].item_type, ItemType::Target);
    }

    #[test]
    fn test_parse_path_detects_tabs() {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        writeln!(file, "{}", HEADER.replace(',', "\t")).unwrap();
        writeln!(file, "1\t1\tP01\ttarget\t4\tOT-Ant\tverb_ot\tdemanded\t\t455\tAnt\tOT").unwrap();

        let rows = RowAdapter::parse_path(file.path(), None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row.rt, "455");
        assert_eq!(RowAdapter::delimiter_for(Some(Path::new("a.csv")), Some(';')), b';');
    }
}

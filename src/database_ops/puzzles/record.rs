//! Puzzle dump rows: quote-aware line splitting and the typed record.
//!
//! Dump columns, in order:
//! `PuzzleId,FEN,Moves,Rating,Popularity,NbPlays,Themes,GameUrl`.
//! Only the first seven are persisted; the game URL is read and dropped.

use serde::Serialize;

use super::error::RecordError;

const MIN_COLUMNS: usize = 7;

/// One row of `chess_puzzles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PuzzleRecord {
    pub id: i64,
    pub position: String,
    pub move_sequence: String,
    pub rating: i32,
    pub popularity: i32,
    pub play_count: i32,
    pub themes: Option<String>,
    pub ply_count: i32,
    /// Ingestion time, unix seconds.
    pub created_at: i64,
}

/// Inclusive rating window applied before a record reaches the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingRange {
    pub min: i32,
    pub max: i32,
}

impl RatingRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, rating: i32) -> bool {
        rating >= self.min && rating <= self.max
    }
}

impl Default for RatingRange {
    fn default() -> Self {
        Self::new(300, 3000)
    }
}

/// Split one CSV line.
///
/// A `"` toggles quoted state and is dropped; a `,` separates fields only
/// outside quotes. Each field is trimmed.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::with_capacity(8);
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// True for the dump's column header row.
pub fn is_header_line(line: &str) -> bool {
    line.trim_start_matches('\u{feff}')
        .trim_start()
        .starts_with("PuzzleId")
}

/// Numeric id: one leading non-digit prefix character is dropped (`g123` -> `123`).
fn parse_id(raw: &str) -> Result<i64, RecordError> {
    let digits = match raw.chars().next() {
        Some(c) if !c.is_ascii_digit() => &raw[c.len_utf8()..],
        _ => raw,
    };
    digits
        .parse::<i64>()
        .map_err(|_| RecordError::InvalidId(raw.to_string()))
}

fn strip_quotes(s: &str) -> String {
    s.replace('"', "")
}

/// Half-moves in a space-separated move list; 0 for an empty list.
pub fn count_plies(moves: &str) -> i32 {
    moves.split_whitespace().count() as i32
}

/// Turns split fields into a [`PuzzleRecord`] stamped with `created_at`.
pub fn parse_record(fields: &[String], created_at: i64) -> Result<PuzzleRecord, RecordError> {
    if fields.len() < MIN_COLUMNS {
        return Err(RecordError::TooFewColumns(fields.len()));
    }

    let id = parse_id(&fields[0])?;
    let rating = fields[3]
        .parse::<i32>()
        .map_err(|_| RecordError::InvalidRating(fields[3].clone()))?;

    let position = strip_quotes(&fields[1]);
    let move_sequence = strip_quotes(&fields[2]);
    let themes = Some(strip_quotes(&fields[6])).filter(|t| !t.is_empty());
    let ply_count = count_plies(&move_sequence);

    Ok(PuzzleRecord {
        id,
        position,
        move_sequence,
        rating,
        popularity: fields[4].parse().unwrap_or(0),
        play_count: fields[5].parse().unwrap_or(0),
        themes,
        ply_count,
        created_at,
    })
}

/// Parse a raw line straight into a record.
pub fn parse_line(line: &str, created_at: i64) -> Result<PuzzleRecord, RecordError> {
    parse_record(&split_csv_line(line), created_at)
}

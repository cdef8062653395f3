//! A1-style ("XC") text for cells and zones.
//!
//! `A1`, `$B$7`, `A1:C9`, `A:C` and `3:5` are all accepted by
//! [`parse_zone`]. Absolute markers are ignored here; the formula parser
//! keeps them on its references.

use thiserror::Error;

use crate::zone::Zone;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XcError {
    #[error("empty reference")]
    Empty,
    #[error("invalid cell reference: {0}")]
    InvalidCell(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
}

/// Convert column index to letter(s): 0 -> A, 25 -> Z, 26 -> AA, etc.
pub fn col_to_letters(col: usize) -> String {
    let mut result = String::new();
    let mut n = col + 1;
    while n > 0 {
        n -= 1;
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }
    result
}

/// Convert column letters (case-insensitive) to a 0-based index.
pub fn letters_to_col(letters: &str) -> Option<usize> {
    if letters.is_empty() || letters.len() > 7 {
        return None;
    }
    let mut col = 0usize;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(col - 1)
}

/// Render a single cell, e.g. `(1, 2)` -> `B3`.
pub fn cell_xc(col: usize, row: usize) -> String {
    format!("{}{}", col_to_letters(col), row + 1)
}

/// Parse a cell like `B3` or `$B$3` into `(col, row)`.
pub fn parse_cell(s: &str) -> Result<(usize, usize), XcError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(XcError::Empty);
    }
    let bad = || XcError::InvalidCell(s.to_string());
    let body = s.trim_start_matches('$');
    let split = body.find(|c: char| !c.is_ascii_alphabetic()).ok_or_else(bad)?;
    let (letters, rest) = body.split_at(split);
    let digits = rest.strip_prefix('$').unwrap_or(rest);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    let col = letters_to_col(letters).ok_or_else(bad)?;
    let row: usize = digits.parse().map_err(|_| bad())?;
    if row == 0 {
        return Err(bad());
    }
    Ok((col, row - 1))
}

/// Parse a zone: a cell, a bounded range, full columns or full rows.
pub fn parse_zone(s: &str) -> Result<Zone, XcError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(XcError::Empty);
    }
    let Some((start, end)) = s.split_once(':') else {
        let (col, row) = parse_cell(s)?;
        return Ok(Zone::cell(col, row));
    };
    let start = start.trim().trim_start_matches('$');
    let end = end.trim().trim_start_matches('$');
    let bad = || XcError::InvalidRange(s.to_string());

    if start.chars().all(|c| c.is_ascii_alphabetic()) && end.chars().all(|c| c.is_ascii_alphabetic()) {
        let left = letters_to_col(start).ok_or_else(bad)?;
        let right = letters_to_col(end).ok_or_else(bad)?;
        return Ok(Zone::columns(left, right));
    }
    if start.chars().all(|c| c.is_ascii_digit()) && end.chars().all(|c| c.is_ascii_digit()) {
        let top: usize = start.parse().map_err(|_| bad())?;
        let bottom: usize = end.parse().map_err(|_| bad())?;
        if top == 0 || bottom == 0 {
            return Err(bad());
        }
        return Ok(Zone::rows(top - 1, bottom - 1));
    }
    let (left, top) = parse_cell(start).map_err(|_| bad())?;
    let (right, bottom) = parse_cell(end).map_err(|_| bad())?;
    Ok(Zone::new(left, top, right, bottom))
}

/// Render a zone without absolute markers.
pub fn zone_to_xc(zone: &Zone) -> String {
    match (zone.right, zone.bottom) {
        (Some(r), Some(b)) if r == zone.left && b == zone.top => cell_xc(zone.left, zone.top),
        (Some(r), Some(b)) => format!("{}:{}", cell_xc(zone.left, zone.top), cell_xc(r, b)),
        (Some(r), None) => format!("{}:{}", col_to_letters(zone.left), col_to_letters(r)),
        (None, Some(b)) => format!("{}:{}", zone.top + 1, b + 1),
        (None, None) => format!("{}:{}", col_to_letters(zone.left), col_to_letters(zone.left)),
    }
}

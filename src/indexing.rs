//! Indexing-solution table parser.
//!
//! Parses the fixed-width lattice-character table produced by indexing
//! programs into a two-line header plus raw solution lines. Only the
//! IDXREF format is defined; anything else is rejected outright.

use miette::Diagnostic;
use thiserror::Error;

/// Format tag of the IDXREF solution table.
pub const IDXREF_FORMAT: &str = "IDXREF";

/// Literal marking the first header line of the table.
const HEADER_MARKER: &str = "BRAVAIS-";

#[derive(Debug, Error, Diagnostic)]
pub enum IndexingError {
    #[error("indexing format {format:?} is not known")]
    #[diagnostic(
        code(gphl_workflow::indexing::unknown_format),
        help("Only the IDXREF solution table format is supported.")
    )]
    UnknownFormat { format: String },

    #[error("substring 'BRAVAIS-' missing in IDXREF indexing solution")]
    #[diagnostic(code(gphl_workflow::indexing::missing_header))]
    MissingHeader,
}

/// Parsed solution table: header plus raw solution lines, in table
/// order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexingSolutions {
    /// The two captured header lines, joined by a newline.
    pub header: String,
    pub solutions: Vec<String>,
}

/// Parse a solution table of the given format.
pub fn parse_indexing_solution(
    format: &str,
    text: &str,
) -> Result<IndexingSolutions, IndexingError> {
    if format != IDXREF_FORMAT {
        return Err(IndexingError::UnknownFormat {
            format: format.to_string(),
        });
    }

    let lines: Vec<&str> = text.lines().collect();
    let header_index = lines
        .iter()
        .position(|line| line.contains(HEADER_MARKER))
        .ok_or(IndexingError::MissingHeader)?;
    let header = format!(
        "{}\n{}",
        lines[header_index],
        lines.get(header_index + 1).copied().unwrap_or_default()
    );

    let mut solutions: Vec<String> = Vec::new();
    for line in &lines[header_index..] {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            // The first real line starts with a '*'; subsequent
            // non-empty lines are also used.
            if !solutions.is_empty() || trimmed.starts_with('*') {
                solutions.push((*line).to_string());
            }
        } else if !solutions.is_empty() {
            // Finished: empty non-initial line.
            break;
        }
    }

    Ok(IndexingSolutions { header, solutions })
}

/// Which solution lines to visually distinguish: any line containing one
/// of the lattice names, or, when no lattices are given, the crystal
/// system, as a literal substring.
pub fn highlight_solutions(
    solutions: &[String],
    lattices: &[String],
    crystal_system: Option<&str>,
) -> Vec<bool> {
    let mut check: Vec<&str> = lattices.iter().map(|s| s.as_str()).collect();
    if check.is_empty() {
        if let Some(system) = crystal_system {
            check.push(system);
        }
    }
    solutions
        .iter()
        .map(|line| check.iter().any(|token| line.contains(token)))
        .collect()
}

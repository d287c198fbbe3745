//! CNF formula model and DIMACS parsing.
//!
//! Parses the DIMACS CNF format: comment lines starting with `c`, a
//! `p cnf <variables> <clauses>` problem line, then one clause per line
//! terminated by `0`. Clauses are normalised at parse time (literals sorted
//! by variable, duplicate literals removed, tautological clauses dropped)
//! so downstream consumers can rely on strictly increasing variable ids
//! within every clause. Optional variable compaction remaps the used
//! variables to a dense range in first-appearance order.

use std::{fmt, io::BufRead};

use thiserror::Error;
use tracing::debug;

/// Stable codes describing [`CnfError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CnfErrorCode {
    /// Reading from the input stream failed.
    Io,
    /// No `p cnf` problem line was found.
    MissingProblemLine,
    /// The problem line did not match `p cnf <variables> <clauses>`.
    InvalidProblemLine,
    /// A clause token was not a valid signed integer literal.
    InvalidLiteral,
    /// The number of parsed clauses differs from the declared count.
    ClauseCountMismatch,
}

impl CnfErrorCode {
    /// Returns the stable machine-readable representation of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Io => "CNF_IO",
            Self::MissingProblemLine => "CNF_MISSING_PROBLEM_LINE",
            Self::InvalidProblemLine => "CNF_INVALID_PROBLEM_LINE",
            Self::InvalidLiteral => "CNF_INVALID_LITERAL",
            Self::ClauseCountMismatch => "CNF_CLAUSE_COUNT_MISMATCH",
        }
    }
}

impl fmt::Display for CnfErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while parsing a DIMACS CNF stream.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CnfError {
    /// Reading from the input stream failed.
    #[error("failed to read CNF input: {source}")]
    Io {
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// No `p cnf` problem line was found before the clauses.
    #[error("no `p cnf` problem line found")]
    MissingProblemLine,
    /// The problem line did not match `p cnf <variables> <clauses>`.
    #[error("invalid problem line `{line}`")]
    InvalidProblemLine {
        /// The offending line.
        line: String,
    },
    /// A clause token was not a valid signed integer literal.
    #[error("invalid literal token `{token}`")]
    InvalidLiteral {
        /// The offending token.
        token: String,
    },
    /// The number of parsed clauses differs from the declared count.
    #[error("problem line declares {declared} clauses but {parsed} were parsed")]
    ClauseCountMismatch {
        /// Clause count declared by the problem line.
        declared: usize,
        /// Number of clauses actually parsed.
        parsed: usize,
    },
}

impl CnfError {
    /// Retrieves the stable [`CnfErrorCode`] for this error.
    #[must_use]
    pub const fn code(&self) -> CnfErrorCode {
        match self {
            Self::Io { .. } => CnfErrorCode::Io,
            Self::MissingProblemLine => CnfErrorCode::MissingProblemLine,
            Self::InvalidProblemLine { .. } => CnfErrorCode::InvalidProblemLine,
            Self::InvalidLiteral { .. } => CnfErrorCode::InvalidLiteral,
            Self::ClauseCountMismatch { .. } => CnfErrorCode::ClauseCountMismatch,
        }
    }
}

/// A parsed CNF formula.
///
/// Clauses hold nonzero signed literals; the variable id of literal `lit` is
/// `lit.unsigned_abs() - 1`. Within every clause the variable ids are
/// strictly increasing.
///
/// # Examples
/// ```
/// use vigseg_core::Cnf;
///
/// let input = "c tiny example\np cnf 3 2\n1 -2 0\n2 3 0\n";
/// let cnf = Cnf::from_reader(input.as_bytes(), true).expect("input is valid DIMACS");
/// assert_eq!(cnf.variable_count(), 3);
/// assert_eq!(cnf.clause_count(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cnf {
    variable_count: u32,
    clauses: Vec<Vec<i32>>,
}

impl Cnf {
    /// Builds a formula directly from pre-parsed clauses.
    ///
    /// Applies the same normalisation as the DIMACS parser: literals are
    /// sorted by variable id, duplicates removed, and tautological clauses
    /// dropped.
    #[must_use]
    pub fn from_clauses(variable_count: u32, clauses: Vec<Vec<i32>>) -> Self {
        let clauses = normalize_clauses(clauses);
        Self {
            variable_count,
            clauses,
        }
    }

    /// Parses a DIMACS CNF stream.
    ///
    /// With `variable_compaction` enabled the used variables are remapped to
    /// a dense `1..=k` range in first-appearance order and the variable count
    /// becomes `k`. Without compaction the declared count is kept, raised to
    /// the highest variable actually referenced.
    ///
    /// # Errors
    /// Returns [`CnfError`] when the stream cannot be read, the problem line
    /// is missing or malformed, a literal token is not a signed integer, or
    /// the clause count does not match the declaration.
    pub fn from_reader(reader: impl BufRead, variable_compaction: bool) -> Result<Self, CnfError> {
        let mut lines = reader.lines();

        let (mut variable_count, declared_clauses) = parse_problem_line(&mut lines)?;

        let mut clauses: Vec<Vec<i32>> = Vec::with_capacity(declared_clauses);
        for line in lines {
            let line = line.map_err(|source| CnfError::Io { source })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('c') {
                continue;
            }
            if let Some(clause) = parse_clause_line(trimmed)? {
                clauses.push(clause);
            }
        }

        if clauses.len() != declared_clauses {
            return Err(CnfError::ClauseCountMismatch {
                declared: declared_clauses,
                parsed: clauses.len(),
            });
        }

        if variable_compaction {
            variable_count = compact_variables(&mut clauses, variable_count);
        } else {
            let max_var = clauses
                .iter()
                .flatten()
                .map(|lit| lit.unsigned_abs())
                .max()
                .unwrap_or(0);
            variable_count = variable_count.max(max_var);
        }

        let clauses = normalize_clauses(clauses);
        debug!(
            variables = variable_count,
            clauses = clauses.len(),
            compaction = variable_compaction,
            "parsed CNF"
        );

        Ok(Self {
            variable_count,
            clauses,
        })
    }

    /// Number of variables in the formula.
    #[must_use]
    pub fn variable_count(&self) -> u32 {
        self.variable_count
    }

    /// Number of clauses after normalisation.
    #[must_use]
    pub fn clause_count(&self) -> usize {
        self.clauses.len()
    }

    /// The normalised clauses.
    #[must_use]
    pub fn clauses(&self) -> &[Vec<i32>] {
        &self.clauses
    }
}

fn parse_problem_line(
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
) -> Result<(u32, usize), CnfError> {
    for line in lines {
        let line = line.map_err(|source| CnfError::Io { source })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('c') {
            continue;
        }
        if !trimmed.starts_with('p') {
            return Err(CnfError::MissingProblemLine);
        }

        let mut tokens = trimmed.split_whitespace();
        let header = (tokens.next(), tokens.next(), tokens.next(), tokens.next());
        return match header {
            (Some("p"), Some("cnf"), Some(vars), Some(clauses)) => {
                let variables: u32 = vars.parse().map_err(|_| CnfError::InvalidProblemLine {
                    line: trimmed.to_owned(),
                })?;
                let clauses: usize = clauses.parse().map_err(|_| CnfError::InvalidProblemLine {
                    line: trimmed.to_owned(),
                })?;
                Ok((variables, clauses))
            }
            _ => Err(CnfError::InvalidProblemLine {
                line: trimmed.to_owned(),
            }),
        };
    }
    Err(CnfError::MissingProblemLine)
}

fn parse_clause_line(line: &str) -> Result<Option<Vec<i32>>, CnfError> {
    let mut clause = Vec::new();
    for token in line.split_whitespace() {
        let literal: i32 = token.parse().map_err(|_| CnfError::InvalidLiteral {
            token: token.to_owned(),
        })?;
        if literal == 0 {
            break;
        }
        clause.push(literal);
    }
    Ok((!clause.is_empty()).then_some(clause))
}

/// Remaps used variables to a dense `1..=k` range in first-appearance order.
fn compact_variables(clauses: &mut [Vec<i32>], declared: u32) -> u32 {
    let mut map: Vec<u32> = vec![0; declared as usize];
    let mut next = 1u32;
    for clause in clauses.iter_mut() {
        for literal in clause.iter_mut() {
            let var = (literal.unsigned_abs() - 1) as usize;
            if var >= map.len() {
                // The file used more variables than it declared.
                map.resize(var + 1, 0);
            }
            if map[var] == 0 {
                map[var] = next;
                next += 1;
            }
            *literal = literal.signum() * map[var] as i32;
        }
    }
    next - 1
}

/// Sorts literals by variable, removes duplicates, and drops tautologies.
fn normalize_clauses(clauses: Vec<Vec<i32>>) -> Vec<Vec<i32>> {
    clauses
        .into_iter()
        .filter_map(|mut clause| {
            clause.sort_unstable_by_key(|lit| (lit.unsigned_abs(), lit.signum()));
            clause.dedup();
            let tautology = clause
                .windows(2)
                .any(|pair| pair[0].unsigned_abs() == pair[1].unsigned_abs());
            (!tautology).then_some(clause)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    fn parse(input: &str, compaction: bool) -> Result<Cnf, CnfError> {
        Cnf::from_reader(input.as_bytes(), compaction)
    }

    #[test]
    fn parses_comments_header_and_clauses() {
        let cnf = parse("c comment\nc more\np cnf 4 2\n1 -3 0\n2 4 0\n", false)
            .expect("valid input must parse");
        assert_eq!(cnf.variable_count(), 4);
        assert_eq!(cnf.clauses(), &[vec![1, -3], vec![2, 4]]);
    }

    #[test]
    fn normalizes_literal_order_and_duplicates() {
        let cnf = parse("p cnf 3 1\n3 1 1 -2 0\n", false).expect("valid input must parse");
        assert_eq!(cnf.clauses(), &[vec![1, -2, 3]]);
    }

    #[test]
    fn drops_tautological_clauses() {
        let cnf = parse("p cnf 2 2\n1 -1 0\n1 2 0\n", false).expect("valid input must parse");
        assert_eq!(cnf.clause_count(), 1);
        assert_eq!(cnf.clauses(), &[vec![1, 2]]);
    }

    #[test]
    fn compaction_renames_variables_in_first_appearance_order() {
        let cnf = parse("p cnf 100 2\n50 -70 0\n70 3 0\n", true).expect("valid input must parse");
        assert_eq!(cnf.variable_count(), 3);
        assert_eq!(cnf.clauses(), &[vec![1, -2], vec![2, 3]]);
    }

    #[test]
    fn without_compaction_variable_count_covers_used_variables() {
        let cnf = parse("p cnf 2 1\n1 5 0\n", false).expect("valid input must parse");
        assert_eq!(cnf.variable_count(), 5);
    }

    #[rstest]
    #[case::missing_header("1 2 0\n", CnfErrorCode::MissingProblemLine)]
    #[case::empty_input("", CnfErrorCode::MissingProblemLine)]
    #[case::bad_header("p cnf x 2\n", CnfErrorCode::InvalidProblemLine)]
    #[case::truncated_header("p cnf 3\n", CnfErrorCode::InvalidProblemLine)]
    #[case::bad_literal("p cnf 2 1\n1 two 0\n", CnfErrorCode::InvalidLiteral)]
    #[case::count_mismatch("p cnf 2 3\n1 2 0\n", CnfErrorCode::ClauseCountMismatch)]
    fn rejects_malformed_input(#[case] input: &str, #[case] expected: CnfErrorCode) {
        let err = parse(input, true).expect_err("malformed input must not parse");
        assert_eq!(err.code(), expected);
    }

    #[test]
    fn from_clauses_applies_normalisation() {
        let cnf = Cnf::from_clauses(3, vec![vec![3, 1], vec![2, -2]]);
        assert_eq!(cnf.clauses(), &[vec![1, 3]]);
    }
}

//! Conflict detection helpers
//!
//! Two inputs are parsed here: `git status --porcelain` output (which paths
//! are unmerged) and file contents carrying conflict markers (how many
//! conflicting hunks each path has).

use std::collections::BTreeSet;

/// Porcelain status codes git uses for unmerged paths
const UNMERGED_CODES: [&str; 7] = ["DD", "AU", "UD", "UA", "DU", "AA", "UU"];

/// One `<<<<<<< ... ======= ... >>>>>>>` region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictHunk {
    /// 1-based line of the opening marker
    pub start_line: usize,
    /// 1-based line of the closing marker
    pub end_line: usize,
    pub ours_lines: usize,
    pub theirs_lines: usize,
}

/// Unmerged paths from `git status --porcelain`, sorted and deduplicated
pub fn parse_unmerged_paths(porcelain: &str) -> Vec<String> {
    let paths: BTreeSet<String> = porcelain
        .lines()
        .filter(|line| line.len() > 3)
        .filter(|line| UNMERGED_CODES.contains(&&line[..2]))
        .map(|line| line[3..].trim().to_string())
        .filter(|path| !path.is_empty())
        .collect();
    paths.into_iter().collect()
}

#[derive(Clone, Copy)]
enum Section {
    Outside,
    Ours { start: usize, ours: usize },
    Base { start: usize, ours: usize },
    Theirs { start: usize, ours: usize, theirs: usize },
}

/// Parse conflict hunks out of file contents
///
/// Handles the diff3 style (`|||||||` base section) as well. Hunks left
/// unterminated at end of file are not reported.
pub fn parse_conflict_hunks(content: &str) -> Vec<ConflictHunk> {
    let mut hunks = Vec::new();
    let mut section = Section::Outside;

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        section = match section {
            Section::Outside if line.starts_with("<<<<<<<") => Section::Ours {
                start: line_no,
                ours: 0,
            },
            Section::Outside => Section::Outside,
            Section::Ours { start, ours } if line.starts_with("|||||||") => {
                Section::Base { start, ours }
            }
            Section::Ours { start, ours } | Section::Base { start, ours }
                if line.starts_with("=======") =>
            {
                Section::Theirs {
                    start,
                    ours,
                    theirs: 0,
                }
            }
            Section::Ours { start, ours } => Section::Ours {
                start,
                ours: ours + 1,
            },
            Section::Base { .. } => section,
            Section::Theirs { start, ours, theirs } if line.starts_with(">>>>>>>") => {
                hunks.push(ConflictHunk {
                    start_line: start,
                    end_line: line_no,
                    ours_lines: ours,
                    theirs_lines: theirs,
                });
                Section::Outside
            }
            Section::Theirs { start, ours, theirs } => Section::Theirs {
                start,
                ours,
                theirs: theirs + 1,
            },
        };
    }

    hunks
}

/// Number of complete conflict hunks in `content`
pub fn count_conflict_hunks(content: &str) -> usize {
    parse_conflict_hunks(content).len()
}

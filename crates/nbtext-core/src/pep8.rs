//! # PEP8 Spacing
//!
//! Number of blank lines expected between two cells of a Python script:
//! two around function and class definitions, one otherwise.

use crate::stringparser::StringParser;

fn starts_definition(line: &str) -> bool {
    line.starts_with("def ") || line.starts_with("async ") || line.starts_with("class ")
}

/// Is the first instruction of the cell a function or class definition?
#[must_use]
pub fn next_instruction_is_function_or_class(lines: &[String]) -> bool {
    let mut parser = StringParser::new(Some("python"));
    for (i, line) in lines.iter().enumerate() {
        if parser.is_quoted() {
            parser.read_line(line);
            continue;
        }
        parser.read_line(line);
        if line.trim().is_empty() {
            if i > 0 && lines[i - 1].trim().is_empty() {
                return false;
            }
            continue;
        }
        if starts_definition(line) {
            return true;
        }
        if line.starts_with(['#', '@', ' ', ')']) {
            continue;
        }
        return false;
    }
    false
}

/// Does the cell end inside a function or class definition?
#[must_use]
pub fn cell_ends_with_function_or_class(lines: &[String]) -> bool {
    let mut parser = StringParser::new(Some("python"));
    let mut non_quoted: Vec<&str> = Vec::new();
    for line in lines {
        if !parser.is_quoted() {
            non_quoted.push(line);
        }
        parser.read_line(line);
    }

    non_quoted.reverse();
    for (i, line) in non_quoted.iter().enumerate() {
        if line.trim().is_empty() {
            if i > 0 && non_quoted[i - 1].trim().is_empty() {
                return false;
            }
            continue;
        }
        if line.starts_with(['#', ' ', ')']) {
            continue;
        }
        return starts_definition(line);
    }
    false
}

/// Is the last line of the cell a line of code?
#[must_use]
pub fn cell_ends_with_code(lines: &[String]) -> bool {
    lines
        .last()
        .is_some_and(|last| !last.trim().is_empty() && !last.starts_with('#'))
}

/// Is there any code in the cell before two consecutive blank lines?
#[must_use]
pub fn cell_has_code(lines: &[String]) -> bool {
    for (i, line) in lines.iter().enumerate() {
        let stripped = line.trim();
        if stripped.starts_with('#') {
            continue;
        }
        if stripped.is_empty() {
            if i > 0 && lines[i - 1].trim().is_empty() {
                return false;
            }
            continue;
        }
        return true;
    }
    false
}

/// How many blank lines make the junction of two Python paragraphs PEP8
/// compliant?
#[must_use]
pub fn pep8_lines_between_cells(prev_lines: &[String], next_lines: &[String], ext: &str) -> usize {
    if next_lines.is_empty() {
        return 1;
    }
    if prev_lines.is_empty() {
        return 0;
    }
    if ext != ".py" {
        return 1;
    }
    if cell_ends_with_function_or_class(prev_lines) {
        return if cell_has_code(next_lines) { 2 } else { 1 };
    }
    if cell_ends_with_code(prev_lines) && next_instruction_is_function_or_class(next_lines) {
        return 2;
    }
    1
}

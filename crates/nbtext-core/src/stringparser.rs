//! # String Parser
//!
//! Tells, line after line, whether the next line starts inside a string
//! literal. Magic commands and cell markers are never looked for inside
//! quoted text.

use crate::languages::comment_for_language;

/// Line-by-line tracker of single and triple-quoted strings.
#[derive(Debug, Clone)]
pub struct StringParser {
    ignore: bool,
    python: bool,
    comment: Option<&'static str>,
    single: Option<char>,
    triple: Option<char>,
}

impl StringParser {
    /// A parser for `language`. Without a language, nothing is ever quoted.
    /// Every language but `R` has Python-like quotes; `R` strings are not tracked.
    #[must_use]
    pub fn new(language: Option<&str>) -> Self {
        Self {
            ignore: language.is_none(),
            python: language != Some("R"),
            comment: language.and_then(comment_for_language),
            single: None,
            triple: None,
        }
    }

    /// Does the next line start inside a string?
    #[must_use]
    pub fn is_quoted(&self) -> bool {
        !self.ignore && (self.single.is_some() || self.triple.is_some())
    }

    /// Consume one line.
    pub fn read_line(&mut self, line: &str) {
        if self.ignore {
            return;
        }

        if !self.is_quoted()
            && self
                .comment
                .is_some_and(|comment| line.trim_start().starts_with(comment))
        {
            return;
        }

        let chars: Vec<char> = line.chars().collect();
        let mut triple_start: Option<usize> = None;

        for (i, &c) in chars.iter().enumerate() {
            if self.single.is_none() && self.triple.is_none() {
                if let Some(comment) = self.comment {
                    let rest: String = chars[i..].iter().collect();
                    if rest.starts_with(comment) {
                        break;
                    }
                }
            }
            if c != '"' && c != '\'' {
                continue;
            }
            if i > 0 && chars[i - 1] == '\\' {
                continue;
            }

            if self.single == Some(c) {
                self.single = None;
                continue;
            }
            if self.single.is_some() || !self.python {
                continue;
            }

            let closes_triple = i >= 2
                && chars[i - 2] == c
                && chars[i - 1] == c
                && triple_start.is_none_or(|start| i >= start + 3);
            if closes_triple {
                if self.triple == Some(c) {
                    self.triple = None;
                    triple_start = Some(i);
                    continue;
                }
                if self.triple.is_some() {
                    continue;
                }
                self.triple = Some(c);
                triple_start = Some(i);
                continue;
            }

            if self.triple.is_some() {
                continue;
            }

            self.single = Some(c);
        }

        if self.python {
            self.single = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quoted_lines(language: Option<&str>, text: &str) -> Vec<usize> {
        let mut parser = StringParser::new(language);
        let mut quoted = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if parser.is_quoted() {
                quoted.push(i);
            }
            parser.read_line(line);
        }
        quoted
    }

    #[test]
    fn long_string() {
        let text = "'''This is a multiline\ncomment with \"quotes\", 'single quotes'\n# and comments\nand line breaks\n\n\nand it ends here'''\n\n\n1 + 1\n";
        assert_eq!(quoted_lines(Some("python"), text), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn single_chars() {
        let text = "'This is a single line comment'''\n'and another one'\n# and comments\n\"and line breaks\"\n\n\n\"and it ends here'''\"\n\n\n1 + 1\n";
        assert!(quoted_lines(Some("python"), text).is_empty());
    }

    #[test]
    fn long_string_with_four_quotes() {
        let text = "''''This is a multiline\ncomment that starts with four quotes\n'''\n\n1 + 1\n";
        assert_eq!(quoted_lines(Some("python"), text), vec![1, 2]);
    }

    #[test]
    fn long_string_ends_with_four_quotes() {
        let text = "'''This is a multiline\ncomment that ends with four quotes\n''''\n\n1 + 1\n";
        assert_eq!(quoted_lines(Some("python"), text), vec![1, 2]);
    }

    #[test]
    fn comments_are_not_parsed() {
        let text = "# it's a comment\nx = 1  # don't\n";
        assert!(quoted_lines(Some("python"), text).is_empty());
    }

    #[test]
    fn r_strings_are_not_tracked() {
        let text = "x <- 'a\nb'\n";
        assert!(quoted_lines(Some("R"), text).is_empty());
    }

    #[test]
    fn no_language_is_never_quoted() {
        assert!(quoted_lines(None, "'''\nx\n'''\n").is_empty());
    }
}

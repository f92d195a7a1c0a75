//! # Magic Commands
//!
//! Jupyter magics (`%time`, `%%bash`, `!ls`, `?obj`) are not valid code in
//! the script language, so they are commented out in scripts and restored
//! when reading. Lines ending with `# escape` or `# noescape` force the
//! decision either way.
//!
//! The same module escapes code lines that would otherwise be read back as a
//! cell marker (`# +` in light scripts, fences in Markdown).

use crate::languages::{SCRIPT_EXTENSIONS, comment_for_language, usual_language_name};
use crate::stringparser::StringParser;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

// =============================================================================
// REGEXES
// =============================================================================

/// The three magic regexes of a language.
struct MagicPatterns {
    magic: Regex,
    force_escape: Regex,
    no_escape: Regex,
}

impl MagicPatterns {
    fn new(prefix: &str, comment: &str) -> Self {
        let build = |suffix: &str| {
            Regex::new(&format!(r"^\s*({comment} |{comment})*{prefix}{suffix}"))
                .expect("valid magic regex")
        };
        Self {
            magic: build(""),
            force_escape: build(&format!(r"(.*){comment}\s*escape")),
            no_escape: build(&format!(r"(.*){comment}\s*noescape")),
        }
    }
}

static MAGIC_PATTERNS: Lazy<BTreeMap<&'static str, MagicPatterns>> = Lazy::new(|| {
    let mut patterns = BTreeMap::new();
    for script in &SCRIPT_EXTENSIONS {
        let comment = regex::escape(script.comment);
        let prefix = match script.language {
            "rust" => ":[a-zA-Z]",
            "csharp" => "#![a-zA-Z]",
            "go" => r"(!|!\*|%|%%|%%%)[a-zA-Z]",
            _ => "(%|%%|%%%)[a-zA-Z]",
        };
        patterns
            .entry(script.language)
            .or_insert_with(|| MagicPatterns::new(prefix, &comment));
    }
    patterns
});

static LINE_CONTINUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r".*\\\s*$").expect("valid line continuation regex"));

static PYTHON_HELP_OR_BASH_CMD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(# |#)*\s*(\?|!)\s*[A-Za-z.~$\\/{}]").expect("valid python help regex")
});

static PYTHON_MAGIC_CMD: Lazy<Regex> = Lazy::new(|| {
    let commands = [
        "cat", "cd", "cp", "mv", "rm", "rmdir", "mkdir", "copy", "ddir", "echo", "ls", "ldir",
        "ren",
    ];
    Regex::new(&format!(r"^(# |#)*({})($|\s$|\s[^=,])", commands.join("|")))
        .expect("valid magic command regex")
});

static IPYTHON_MAGIC_HELP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(# )*[^\s]*\?\s*$").expect("valid magic help regex"));

static PYTHON_MAGIC_ASSIGN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(# |#)*\s*([a-zA-Z_][a-zA-Z_$0-9]*)\s*=\s*(%|%%|%%%|!)[a-zA-Z](.*)")
        .expect("valid magic assignment regex")
});

static MARKDOWN_CODE_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(# |#)*```").expect("valid markdown code start regex"));

static SCRIPT_CODE_START: Lazy<BTreeMap<&'static str, Regex>> = Lazy::new(|| {
    SCRIPT_EXTENSIONS
        .iter()
        .map(|script| {
            let c = regex::escape(script.comment);
            let re = Regex::new(&format!(r"^({c} |{c})*({c}|{c} )\+"))
                .expect("valid code start regex");
            (script.extension, re)
        })
        .collect()
});

fn comment_of(language: &str) -> &'static str {
    comment_for_language(language)
        .or_else(|| comment_for_language(&usual_language_name(language)))
        .unwrap_or("#")
}

// =============================================================================
// MAGICS
// =============================================================================

/// Is the line a (possibly commented) Jupyter magic that should be commented
/// in a script?
///
/// `explicitly_code` allows `obj?` help requests, which are ambiguous in
/// cells without an explicit marker. Octave, Matlab, SAS and languages
/// without a script extension have no magics.
#[must_use]
pub fn is_magic(line: &str, language: &str, global_escape_flag: bool, explicitly_code: bool) -> bool {
    let language = usual_language_name(language);
    if matches!(language.as_str(), "octave" | "matlab" | "sas") {
        return false;
    }
    let Some(patterns) = MAGIC_PATTERNS.get(language.as_str()) else {
        return false;
    };
    if patterns.force_escape.is_match(line) {
        return true;
    }
    if !global_escape_flag || patterns.no_escape.is_match(line) {
        return false;
    }
    if patterns.magic.is_match(line) {
        return true;
    }
    if language != "python" {
        return false;
    }
    PYTHON_HELP_OR_BASH_CMD.is_match(line)
        || PYTHON_MAGIC_ASSIGN.is_match(line)
        || (explicitly_code && IPYTHON_MAGIC_HELP.is_match(line))
        || PYTHON_MAGIC_CMD.is_match(line)
}

/// Does this Python code need an explicit cell marker, because one of its
/// lines is only recognized as a magic inside an explicit code cell?
#[must_use]
pub fn need_explicit_marker(source: &[String], language: &str, global_escape_flag: bool) -> bool {
    if language != "python" || !global_escape_flag {
        return false;
    }
    let mut parser = StringParser::new(Some(language));
    for line in source {
        if !parser.is_quoted()
            && is_magic(line, language, global_escape_flag, true)
            && !is_magic(line, language, global_escape_flag, false)
        {
            return true;
        }
        parser.read_line(line);
    }
    false
}

/// Comment out the magics in `source`. Continuation lines of a Python magic
/// are commented too.
pub fn comment_magic(source: &mut [String], language: &str, global_escape_flag: bool, explicitly_code: bool) {
    let comment = comment_of(language);
    let mut parser = StringParser::new(Some(language));
    let mut next_is_magic = false;
    for line in source.iter_mut() {
        let original = line.clone();
        if !parser.is_quoted()
            && (next_is_magic || is_magic(&original, language, global_escape_flag, explicitly_code))
        {
            *line = if next_is_magic {
                format!("{comment} {original}")
            } else {
                let unindented = original.trim_start();
                let indent = &original[..original.len() - unindented.len()];
                format!("{indent}{comment} {unindented}")
            };
            next_is_magic = language == "python" && LINE_CONTINUATION.is_match(&original);
        }
        parser.read_line(&original);
    }
}

/// Remove one level of comment from `line`, keeping its indentation.
#[must_use]
pub fn unesc(line: &str, language: &str) -> String {
    let comment = comment_of(language);
    let unindented = line.trim_start();
    let indent = &line[..line.len() - unindented.len()];
    if let Some(rest) = unindented.strip_prefix(comment) {
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        return format!("{indent}{rest}");
    }
    line.to_string()
}

/// Uncomment the commented magics in `source`.
pub fn uncomment_magic(source: &mut [String], language: &str, global_escape_flag: bool, explicitly_code: bool) {
    let mut parser = StringParser::new(Some(language));
    let mut next_is_magic = false;
    for line in source.iter_mut() {
        let original = line.clone();
        let magic_line =
            next_is_magic || is_magic(&original, language, global_escape_flag, explicitly_code);
        if !parser.is_quoted() && magic_line {
            *line = unesc(&original, language);
            next_is_magic = language == "python" && LINE_CONTINUATION.is_match(&original);
        }
        parser.read_line(&original);
    }
}

// =============================================================================
// CODE START ESCAPING
// =============================================================================

/// Is the line a (possibly commented) cell start marker in a file with
/// extension `ext`?
#[must_use]
pub fn is_escaped_code_start(line: &str, ext: &str) -> bool {
    match ext {
        ".md" | ".markdown" => MARKDOWN_CODE_START.is_match(line),
        _ => SCRIPT_CODE_START
            .get(ext)
            .is_some_and(|re| re.is_match(line)),
    }
}

/// Comment the lines of `source` that would be read as a cell start.
/// Without a language, strings are not tracked.
pub fn escape_code_start(source: &mut [String], ext: &str, language: Option<&str>) {
    let comment = crate::languages::comment_for_extension(ext);
    let mut parser = StringParser::new(language);
    for line in source.iter_mut() {
        let original = line.clone();
        if !parser.is_quoted() && is_escaped_code_start(&original, ext) {
            *line = format!("{comment} {original}");
        }
        parser.read_line(&original);
    }
}

/// Undo `escape_code_start`.
pub fn unescape_code_start(source: &mut [String], ext: &str, language: &str) {
    let mut parser = StringParser::new(Some(language));
    for line in source.iter_mut() {
        let original = line.clone();
        if !parser.is_quoted() && is_escaped_code_start(&original, ext) {
            let unescaped = unesc(&original, language);
            if is_escaped_code_start(&unescaped, ext) {
                *line = unescaped;
            }
        }
        parser.read_line(&original);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn line_and_cell_magics() {
        assert!(is_magic("%matplotlib inline", "python", true, false));
        assert!(is_magic("# %%time", "python", true, false));
        assert!(is_magic("%%R -w 400", "python", true, false));
        assert!(!is_magic("x = 1 % 2", "python", true, false));
        assert!(is_magic("  %time f()", "python", true, false));
    }

    #[test]
    fn escape_annotations() {
        assert!(!is_magic("%matplotlib inline # noescape", "python", true, false));
        assert!(is_magic("%matplotlib inline # escape", "python", false, false));
        assert!(!is_magic("%matplotlib inline", "python", false, false));
    }

    #[test]
    fn python_shell_and_help() {
        assert!(is_magic("!ls", "python", true, false));
        assert!(is_magic("?print", "python", true, false));
        assert!(is_magic("cd ..", "python", true, false));
        assert!(!is_magic("cd = 1", "python", true, false));
        assert!(is_magic("files = !ls", "python", true, false));
        assert!(!is_magic("print?", "python", true, false));
        assert!(is_magic("print?", "python", true, true));
    }

    #[test]
    fn language_specific_magics() {
        assert!(is_magic(":dep serde", "rust", true, false));
        assert!(is_magic("#!fsharp", "csharp", true, false));
        assert!(is_magic("!*go get x", "go", true, false));
        assert!(is_magic("%%html", "c++", true, false));
        assert!(!is_magic("%matplotlib", "matlab", true, false));
        assert!(!is_magic("%matplotlib", "unknown", true, false));
        assert!(!is_magic("!ls", "R", true, false));
    }

    #[test]
    fn help_needs_explicit_marker() {
        assert!(need_explicit_marker(&lines("print?"), "python", true));
        assert!(!need_explicit_marker(&lines("%time f()"), "python", true));
        assert!(!need_explicit_marker(&lines("print?"), "R", true));
    }

    #[test]
    fn comment_and_uncomment_magics() {
        let mut source = lines("%matplotlib inline\nx = 1\n    !ls \\\n    -l");
        comment_magic(&mut source, "python", true, true);
        assert_eq!(source, lines("# %matplotlib inline\nx = 1\n    # !ls \\\n#     -l"));
        uncomment_magic(&mut source, "python", true, true);
        assert_eq!(source, lines("%matplotlib inline\nx = 1\n    !ls \\\n    -l"));
    }

    #[test]
    fn magics_in_strings_are_not_commented() {
        let mut source = lines("x = '''\n%matplotlib inline\n'''");
        comment_magic(&mut source, "python", true, true);
        assert_eq!(source[1], "%matplotlib inline");
    }

    #[test]
    fn comment_magic_in_cpp() {
        let mut source = lines("%%html\n<b>x</b>");
        comment_magic(&mut source, "c++", true, true);
        assert_eq!(source[0], "// %%html");
    }

    #[test]
    fn unesc_keeps_indentation() {
        assert_eq!(unesc("    # x", "python"), "    x");
        assert_eq!(unesc("#x", "python"), "x");
        assert_eq!(unesc("x", "python"), "x");
    }

    #[test]
    fn code_start_escaping() {
        assert!(is_escaped_code_start("# +", ".py"));
        assert!(is_escaped_code_start("# # +", ".py"));
        assert!(!is_escaped_code_start("x + 1", ".py"));
        assert!(is_escaped_code_start("```python", ".md"));
        assert!(!is_escaped_code_start("# +", ".txt"));

        let mut source = lines("# +\nx = 1");
        escape_code_start(&mut source, ".py", Some("python"));
        assert_eq!(source[0], "# # +");
        unescape_code_start(&mut source, ".py", "python");
        assert_eq!(source[0], "# +");
    }
}

//! # Languages
//!
//! Script extensions, their comment syntax, and the cell magics that switch
//! a single cell to another language (`%%R`, `%%bash`, `#!fsharp`, ...).

use crate::types::{Cell, Metadata, section, section_mut, section_str};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;

// =============================================================================
// SCRIPT EXTENSIONS
// =============================================================================

/// A script extension, the language it holds and how that language comments
/// a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLanguage {
    pub extension: &'static str,
    pub language: &'static str,
    pub comment: &'static str,
    pub comment_suffix: &'static str,
}

const fn script(
    extension: &'static str,
    language: &'static str,
    comment: &'static str,
) -> ScriptLanguage {
    ScriptLanguage {
        extension,
        language,
        comment,
        comment_suffix: "",
    }
}

const fn block_script(
    extension: &'static str,
    language: &'static str,
    comment: &'static str,
    comment_suffix: &'static str,
) -> ScriptLanguage {
    ScriptLanguage {
        extension,
        language,
        comment,
        comment_suffix,
    }
}

/// Every script extension the converter can read and write.
///
/// `.m` is Matlab; Wolfram Mathematica uses the made-up `.wolfram`.
pub const SCRIPT_EXTENSIONS: [ScriptLanguage; 40] = [
    script(".py", "python", "#"),
    script(".coco", "coconut", "#"),
    script(".R", "R", "#"),
    script(".r", "R", "#"),
    script(".jl", "julia", "#"),
    script(".cpp", "c++", "//"),
    script(".ss", "scheme", ";;"),
    script(".clj", "clojure", ";;"),
    script(".scm", "scheme", ";;"),
    script(".sh", "bash", "#"),
    script(".ps1", "powershell", "#"),
    script(".q", "q", "/"),
    script(".m", "matlab", "%"),
    block_script(".wolfram", "wolfram language", "(*", "*)"),
    script(".pro", "idl", ";"),
    script(".js", "javascript", "//"),
    script(".ts", "typescript", "//"),
    script(".scala", "scala", "//"),
    script(".rs", "rust", "//"),
    script(".robot", "robotframework", "#"),
    script(".resource", "robotframework", "#"),
    script(".cs", "csharp", "//"),
    script(".fsx", "fsharp", "//"),
    script(".fs", "fsharp", "//"),
    script(".sos", "sos", "#"),
    script(".java", "java", "//"),
    script(".groovy", "groovy", "//"),
    script(".sage", "sage", "#"),
    block_script(".ml", "ocaml", "(*", "*)"),
    script(".hs", "haskell", "--"),
    script(".tcl", "tcl", "#"),
    block_script(".mac", "maxima", "/*", "*/"),
    script(".gp", "gnuplot", "#"),
    script(".do", "stata", "//"),
    block_script(".sas", "sas", "/*", "*/"),
    script(".xsh", "xonsh", "#"),
    script(".lgt", "logtalk", "%"),
    script(".logtalk", "logtalk", "%"),
    script(".lua", "lua", "--"),
    script(".go", "go", "//"),
];

/// Cell magics that are also language names.
const JUPYTER_MAGIC_LANGUAGES: [&str; 29] = [
    "R",
    "bash",
    "sh",
    "python",
    "python2",
    "python3",
    "coconut",
    "javascript",
    "js",
    "perl",
    "html",
    "latex",
    "markdown",
    "pypy",
    "ruby",
    "script",
    "svg",
    "matlab",
    "octave",
    "idl",
    "robotframework",
    "sas",
    "spark",
    "sql",
    "cython",
    "haskell",
    "tcl",
    "gnuplot",
    "wolfram language",
];

static JUPYTER_LANGUAGES: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    JUPYTER_MAGIC_LANGUAGES
        .iter()
        .copied()
        .chain(SCRIPT_EXTENSIONS.iter().map(|s| s.language))
        .chain(["c#", "f#", "cs", "fs"])
        .collect()
});

static GO_DOUBLE_PERCENT_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(%%\s*|%%\s+-.*)$").expect("valid go magic regex"));

/// The script language registered for `ext`.
#[must_use]
pub fn script_for_extension(ext: &str) -> Option<&'static ScriptLanguage> {
    SCRIPT_EXTENSIONS.iter().find(|s| s.extension == ext)
}

/// Is `ext` a script extension?
#[must_use]
pub fn is_script_extension(ext: &str) -> bool {
    script_for_extension(ext).is_some()
}

/// The line comment of the language registered for `ext` (`#` by default).
#[must_use]
pub fn comment_for_extension(ext: &str) -> &'static str {
    script_for_extension(ext).map_or("#", |s| s.comment)
}

/// The comment prefix of a language, when it is a script language.
#[must_use]
pub fn comment_for_language(language: &str) -> Option<&'static str> {
    SCRIPT_EXTENSIONS
        .iter()
        .find(|s| s.language == language)
        .map(|s| s.comment)
}

/// All comment prefixes other than `#`, in table order.
#[must_use]
pub fn non_hash_comments() -> Vec<&'static str> {
    let mut comments: Vec<&'static str> = Vec::new();
    for script in &SCRIPT_EXTENSIONS {
        if script.comment != "#" && !comments.contains(&script.comment) {
            comments.push(script.comment);
        }
    }
    comments
}

/// Is `language` a known cell magic language (exact case)?
#[must_use]
pub fn is_jupyter_language(language: &str) -> bool {
    JUPYTER_LANGUAGES.contains(language)
}

/// Is `language` a known cell magic language, either as registered or in
/// upper case?
#[must_use]
pub fn is_jupyter_language_any_case(language: &str) -> bool {
    is_jupyter_language(language)
        || JUPYTER_LANGUAGES
            .iter()
            .any(|lang| lang.to_uppercase() == language)
}

/// Every cell magic language, both as registered and in upper case.
#[must_use]
pub fn jupyter_languages_any_case() -> BTreeSet<String> {
    JUPYTER_LANGUAGES
        .iter()
        .flat_map(|lang| [lang.to_string(), lang.to_uppercase()])
        .collect()
}

/// Is `language` a known cell magic language, ignoring case?
#[must_use]
pub fn is_jupyter_language_ignore_case(language: &str) -> bool {
    let language = language.to_lowercase();
    JUPYTER_LANGUAGES
        .iter()
        .any(|lang| lang.to_lowercase() == language)
}

// =============================================================================
// NOTEBOOK LANGUAGE
// =============================================================================

/// The default language of a notebook: `jupytext.main_language`, then the
/// kernel language, then the language of the extension.
///
/// With `pop_main_language`, a `main_language` equal to the kernel language
/// is removed from the metadata.
pub fn default_language_from_metadata_and_ext(
    metadata: &mut Metadata,
    ext: &str,
    pop_main_language: bool,
) -> Option<String> {
    let from_ext = script_for_extension(ext).map(|s| s.language.to_string());
    let main_language = section_str(metadata, "jupytext", "main_language").map(str::to_string);
    let default_language = section_str(metadata, "kernelspec", "language")
        .filter(|lang| !lang.is_empty())
        .map(str::to_string)
        .or(from_ext);

    if pop_main_language && main_language.is_some() && main_language == default_language {
        section_mut(metadata, "jupytext").shift_remove("main_language");
    }

    let language = main_language.filter(|l| !l.is_empty()).or(default_language)?;
    Some(normalize_language(&language))
}

fn normalize_language(language: &str) -> String {
    if language == "R" || language == "sas" {
        return language.to_string();
    }
    if language.starts_with("C++") {
        return "c++".to_string();
    }
    language.to_lowercase().replace('#', "sharp")
}

/// The usual name of a language, the one found in the extension table.
#[must_use]
pub fn usual_language_name(language: &str) -> String {
    let language = language.to_lowercase();
    match language.as_str() {
        "r" => "R".to_string(),
        "octave" => "matlab".to_string(),
        "cs" | "c#" => "csharp".to_string(),
        "fs" | "f#" => "fsharp".to_string(),
        "sas" => "SAS".to_string(),
        lang if lang.starts_with("c++") => "c++".to_string(),
        _ => language,
    }
}

/// Do both names refer to the same language?
#[must_use]
pub fn same_language(kernel_language: &str, language: &str) -> bool {
    usual_language_name(kernel_language) == usual_language_name(language)
}

/// Set the main language of a collection of cells, and turn the `language`
/// metadata of cells written in another language into a cell magic.
///
/// Without a kernel language, the main language is the most frequent cell
/// language, python counting for half a cell.
pub fn set_main_and_cell_language(
    metadata: &mut Metadata,
    cells: &mut [Cell],
    ext: &str,
    custom_cell_magics: &[String],
) {
    let main_language = default_language_from_metadata_and_ext(metadata, ext, false)
        .unwrap_or_else(|| majority_language(cells));

    let kernel_has_language = section(metadata, "kernelspec").is_some_and(|k| k.contains_key("language"));
    if !kernel_has_language && !cells.is_empty() {
        section_mut(metadata, "jupytext")
            .insert("main_language".to_string(), Value::String(main_language.clone()));
    }

    for cell in cells.iter_mut() {
        let Some(language) = cell.metadata.get("language").and_then(Value::as_str) else {
            continue;
        };
        let language = language.to_string();
        if language == main_language {
            cell.metadata.shift_remove("language");
            continue;
        }
        if usual_language_name(&language) == main_language {
            continue;
        }
        if is_jupyter_language(&language) || custom_cell_magics.contains(&language) {
            cell.metadata.shift_remove("language");
            let magic = if main_language == "csharp" { "#!" } else { "%%" };
            let first_line = match cell.metadata.shift_remove("magic_args") {
                Some(Value::String(args)) => format!("{magic}{language} {args}\n"),
                Some(other) => format!("{magic}{language} {other}\n"),
                None => format!("{magic}{language}\n"),
            };
            cell.source = first_line + &cell.source;
        }
    }
}

/// Weighted majority of the cell languages: python weighs 1 to start with
/// and every cell adds 2 to its own language. Ties go to the language seen
/// first.
fn majority_language(cells: &[Cell]) -> String {
    let mut counts: Vec<(String, u64)> = vec![("python".to_string(), 1)];
    for cell in cells {
        let Some(language) = cell.metadata.get("language").and_then(Value::as_str) else {
            continue;
        };
        let language = usual_language_name(language);
        match counts.iter_mut().find(|(name, _)| *name == language) {
            Some((_, count)) => *count += 2,
            None => counts.push((language, 2)),
        }
    }
    let mut best = ("python".to_string(), 0);
    for (language, count) in counts {
        if count > best.1 {
            best = (language, count);
        }
    }
    best.0
}

/// The language and magic arguments of a cell that starts with a cell magic
/// (`%%lang args`, or `#!lang` in C#). The magic line is removed from
/// `source` when a language is found.
pub fn cell_language(
    source: &mut Vec<String>,
    default_language: Option<&str>,
    custom_cell_magics: &[String],
) -> Option<(String, String)> {
    let line = source.first()?.clone();
    if default_language == Some("go") && GO_DOUBLE_PERCENT_COMMAND.is_match(&line) {
        return None;
    }
    if default_language == Some("csharp") {
        let lang = line.strip_prefix("#!")?.trim();
        if is_jupyter_language(lang) {
            let lang = lang.to_string();
            source.remove(0);
            return Some((lang, String::new()));
        }
        return None;
    }
    let magic = line.strip_prefix("%%")?;
    let (lang, magic_args) = magic.split_once(' ').unwrap_or((magic, ""));
    if is_jupyter_language(lang) || custom_cell_magics.iter().any(|m| m == lang) {
        let found = (lang.to_string(), magic_args.to_string());
        source.remove(0);
        return Some(found);
    }
    None
}

/// Comment every line with `prefix` (and `suffix` for block comments).
/// Empty lines get the bare prefix.
#[must_use]
pub fn comment_lines(lines: &[String], prefix: &str, suffix: &str) -> Vec<String> {
    if prefix.is_empty() {
        return lines.to_vec();
    }
    lines
        .iter()
        .map(|line| match (line.is_empty(), suffix.is_empty()) {
            (true, true) => prefix.to_string(),
            (true, false) => format!("{prefix} {suffix}"),
            (false, true) => format!("{prefix} {line}"),
            (false, false) => format!("{prefix} {line} {suffix}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn extension_table() {
        assert_eq!(comment_for_extension(".cpp"), "//");
        assert_eq!(comment_for_extension(".unknown"), "#");
        assert_eq!(script_for_extension(".ml").map(|s| s.comment_suffix), Some("*)"));
        assert!(non_hash_comments().contains(&";;"));
        assert!(!non_hash_comments().contains(&"#"));
    }

    #[test]
    fn jupyter_languages_include_script_languages() {
        assert!(is_jupyter_language("R"));
        assert!(is_jupyter_language("julia"));
        assert!(is_jupyter_language("c#"));
        assert!(!is_jupyter_language("timeit"));
        assert!(is_jupyter_language_any_case("SQL"));
        assert!(!is_jupyter_language_any_case("Sql"));
        assert!(is_jupyter_language_ignore_case("Sql"));
    }

    #[test]
    fn default_language_prefers_main_language() {
        let mut md = metadata(json!({"jupytext": {"main_language": "R"}, "kernelspec": {"language": "python"}}));
        assert_eq!(
            default_language_from_metadata_and_ext(&mut md, ".py", false).as_deref(),
            Some("R")
        );
    }

    #[test]
    fn default_language_normalizes_names() {
        let mut md = metadata(json!({"kernelspec": {"language": "C++14"}}));
        assert_eq!(
            default_language_from_metadata_and_ext(&mut md, ".cpp", false).as_deref(),
            Some("c++")
        );
        let mut md = metadata(json!({"kernelspec": {"language": "C#"}}));
        assert_eq!(
            default_language_from_metadata_and_ext(&mut md, ".cs", false).as_deref(),
            Some("csharp")
        );
        let mut md = Metadata::new();
        assert_eq!(default_language_from_metadata_and_ext(&mut md, ".txt", false), None);
    }

    #[test]
    fn default_language_pops_redundant_main_language() {
        let mut md = metadata(json!({"jupytext": {"main_language": "python"}, "kernelspec": {"language": "python"}}));
        default_language_from_metadata_and_ext(&mut md, ".py", true);
        assert_eq!(md["jupytext"], json!({}));
    }

    #[test]
    fn usual_names() {
        assert_eq!(usual_language_name("C++17"), "c++");
        assert_eq!(usual_language_name("F#"), "fsharp");
        assert_eq!(usual_language_name("octave"), "matlab");
        assert!(same_language("r", "R"));
        assert!(!same_language("python", "R"));
    }

    #[test]
    fn cell_language_from_double_percent_magic() {
        let mut source = vec!["%%R -i x".to_string(), "plot(x)".to_string()];
        assert_eq!(
            cell_language(&mut source, Some("python"), &[]),
            Some(("R".to_string(), "-i x".to_string()))
        );
        assert_eq!(source, vec!["plot(x)"]);
    }

    #[test]
    fn cell_language_ignores_other_magics() {
        let mut source = vec!["%%timeit".to_string(), "f()".to_string()];
        assert_eq!(cell_language(&mut source, Some("python"), &[]), None);
        assert_eq!(source.len(), 2);
        let custom = vec!["timeit".to_string()];
        assert!(cell_language(&mut source, Some("python"), &custom).is_some());
    }

    #[test]
    fn cell_language_in_csharp_and_go() {
        let mut source = vec!["#!fsharp".to_string(), "let x = 1".to_string()];
        assert_eq!(
            cell_language(&mut source, Some("csharp"), &[]),
            Some(("fsharp".to_string(), String::new()))
        );
        let mut source = vec!["%% -args".to_string()];
        assert_eq!(cell_language(&mut source, Some("go"), &[]), None);
    }

    #[test]
    fn main_language_from_majority_of_cells() {
        let mut md = Metadata::new();
        let mut cells = vec![
            Cell::code("x <- 1").with_metadata(metadata(json!({"language": "R"}))),
            Cell::code("1 + 1"),
        ];
        set_main_and_cell_language(&mut md, &mut cells, ".md", &[]);
        assert_eq!(md["jupytext"]["main_language"], json!("R"));
        assert!(cells[0].metadata.is_empty());
    }

    #[test]
    fn other_languages_become_magics() {
        let mut md = metadata(json!({"kernelspec": {"language": "python"}}));
        let mut cells = vec![Cell::code("ls").with_metadata(metadata(
            json!({"language": "bash", "magic_args": "--out x"}),
        ))];
        set_main_and_cell_language(&mut md, &mut cells, ".md", &[]);
        assert_eq!(cells[0].source, "%%bash --out x\nls");
        assert!(!md.contains_key("jupytext"));
    }

    #[test]
    fn comment_lines_with_and_without_suffix() {
        let lines = vec!["a".to_string(), String::new()];
        assert_eq!(comment_lines(&lines, "#", ""), vec!["# a", "#"]);
        assert_eq!(comment_lines(&lines, "(*", "*)"), vec!["(* a *)", "(* *)"]);
        assert_eq!(comment_lines(&lines, "", ""), lines);
    }
}

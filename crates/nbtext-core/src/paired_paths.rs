//! # Paired Paths
//!
//! A notebook paired to several formats has one *base path* from which
//! every paired file is derived:
//!
//! ```text
//! notebooks/nb.ipynb     <- base "notebooks/nb", format "ipynb"
//! notebooks/nb.pct.py    <- base "notebooks/nb", format ".pct.py:percent"
//! notebooks/py/nb.py     <- base "notebooks/nb", format "py//py"
//! ```
//!
//! A format prefix is a directory (`scripts/`), a file name prefix
//! (`script_`), a relative directory (`../scripts/`) or a prefix root
//! (`nb//scripts/`, meaning: replace the `nb` directory with `scripts`
//! anywhere above the notebook).

use crate::config::find_jupytext_configuration_file;
use crate::formats::{
    JupytextFormat, NOTEBOOK_EXTENSIONS, long_form_multiple_formats, short_form_multiple_formats,
    short_form_one_format,
};
use crate::types::{NbTextError, Result};
use serde_json::Value;
use std::path::Path;

// =============================================================================
// PATH HELPERS
// =============================================================================

/// Split a path into its base and its extension, like `os.path.splitext`:
/// `nb.pct.py` gives `("nb.pct", ".py")`, `.jupytext` has no extension.
#[must_use]
pub fn split_extension(path: &str) -> (String, String) {
    let name_start = path.rfind(['/', '\\']).map_or(0, |i| i + 1);
    let name = &path[name_start..];
    match name.rfind('.') {
        Some(dot) if !name[..dot].chars().all(|c| c == '.') => {
            let split = name_start + dot;
            (path[..split].to_string(), path[split..].to_string())
        }
        _ => (path.to_string(), String::new()),
    }
}

/// The last component of a path.
#[must_use]
pub fn file_name(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
}

/// Split at the last `sep`; no `sep` gives an empty left side.
fn split<'a>(path: &'a str, sep: &str) -> (&'a str, &'a str) {
    path.rsplit_once(sep).unwrap_or(("", path))
}

fn join(left: &str, right: &str, sep: &str) -> String {
    if left.is_empty() {
        right.to_string()
    } else {
        format!("{left}{sep}{right}")
    }
}

/// `\` for Windows paths that use it, `/` otherwise.
fn separator(path: &str) -> &'static str {
    if cfg!(windows) && path.contains('\\') { "\\" } else { "/" }
}

fn inconsistent(message: String) -> NbTextError {
    NbTextError::InconsistentPath(message)
}

// =============================================================================
// BASE PATH
// =============================================================================

/// The base path of a notebook, given the format of its file.
///
/// When `formats` is given, the prefix and suffix of the first format with
/// the same extension (and a compatible name) complete `fmt`.
pub fn base_path(main_path: &str, fmt: &JupytextFormat, formats: Option<&[JupytextFormat]>) -> Result<String> {
    let (mut base, ext) = split_extension(main_path);
    let mut fmt = fmt.clone();
    if fmt.extension.is_empty() {
        if !NOTEBOOK_EXTENSIONS.contains(&ext.as_str()) {
            return Err(inconsistent(format!(
                "'{}' is not a notebook. Supported extensions are '{}'.",
                main_path,
                NOTEBOOK_EXTENSIONS.join("', '")
            )));
        }
        fmt.extension.clone_from(&ext);
    }
    if ext != fmt.extension {
        return Err(inconsistent(format!(
            "Notebook path '{}' was expected to have extension '{}'",
            main_path, fmt.extension
        )));
    }

    let candidates = formats.map_or_else(|| vec![fmt.clone()], <[JupytextFormat]>::to_vec);
    for f in &candidates {
        if f.extension != fmt.extension {
            continue;
        }
        if let (Some(a), Some(b)) = (f.name(), fmt.name()) {
            if a != b {
                continue;
            }
        }
        fmt.prefix = fmt.prefix.or_else(|| f.prefix.clone());
        fmt.suffix = fmt.suffix.or_else(|| f.suffix.clone());
        break;
    }

    if let Some(suffix) = fmt.suffix.as_deref().filter(|s| !s.is_empty()) {
        let Some(stripped) = base.strip_suffix(suffix) else {
            return Err(inconsistent(format!(
                "Notebook name '{}' was expected to end with suffix '{}'",
                base, suffix
            )));
        };
        base = stripped.to_string();
    }

    let Some(prefix) = fmt.prefix.as_deref().filter(|p| !p.is_empty()) else {
        return Ok(base);
    };
    let (prefix_root, prefix) = prefix.rsplit_once("//").unwrap_or(("", prefix));

    let sep = separator(&base);
    let (notebook_dir, notebook_file_name) = split(&base, sep);
    let mut notebook_dir = notebook_dir.to_string();
    let mut notebook_file_name = notebook_file_name.to_string();
    let (prefix_dir, prefix_file_name) = split(prefix, "/");

    // prefixes are relative to the directory of the configuration file
    let mut base_dir = None;
    let search_dir = if notebook_dir.is_empty() { "." } else { notebook_dir.as_str() };
    if let Some(config_file) = find_jupytext_configuration_file(Path::new(search_dir), true)? {
        let config_dir = config_file
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !config_dir.is_empty() && config_dir != "." && notebook_dir.starts_with(&config_dir) {
            notebook_dir = notebook_dir[config_dir.len()..].to_string();
            base_dir = Some(config_dir);
        }
    }

    if !prefix_file_name.is_empty() {
        let Some(stripped) = notebook_file_name.strip_prefix(prefix_file_name) else {
            return Err(inconsistent(format!(
                "Notebook name '{}' was expected to start with prefix '{}'",
                notebook_file_name, prefix_file_name
            )));
        };
        notebook_file_name = stripped.to_string();
    }

    if !prefix_dir.is_empty() {
        let mut parent_notebook_dir = notebook_dir.clone();
        let mut parent_prefix_dir = prefix_dir.to_string();
        let mut actual_folders: Vec<String> = Vec::new();
        while !parent_prefix_dir.is_empty() {
            let (rest, expected_folder) = split(&parent_prefix_dir, "/");
            let (rest, expected_folder) = (rest.to_string(), expected_folder.to_string());
            parent_prefix_dir = rest;
            if expected_folder == ".." {
                let Some(folder) = actual_folders.pop() else {
                    return Err(inconsistent(format!(
                        "Notebook directory '{}' does not match prefix '{}'",
                        notebook_dir, prefix_dir
                    )));
                };
                parent_notebook_dir = join(&parent_notebook_dir, &folder, sep);
            } else {
                let (rest, actual_folder) = split(&parent_notebook_dir, sep);
                let (rest, actual_folder) = (rest.to_string(), actual_folder.to_string());
                parent_notebook_dir = rest;
                if actual_folder != expected_folder {
                    return Err(inconsistent(format!(
                        "Notebook directory '{}' does not match prefix '{}'",
                        notebook_dir, prefix_dir
                    )));
                }
                actual_folders.push(actual_folder);
            }
        }
        notebook_dir = parent_notebook_dir;
    }

    if !prefix_root.is_empty() {
        let long_prefix_root = format!("{sep}{prefix_root}{sep}");
        let long_notebook_dir = format!("{sep}{notebook_dir}{sep}");
        let Some((left, right)) = long_notebook_dir.rsplit_once(&long_prefix_root) else {
            return Err(inconsistent(format!(
                "Notebook directory '{}' does not match prefix root '{}'",
                notebook_dir, prefix_root
            )));
        };
        let dir = format!("{left}{sep}//{right}");
        notebook_dir = dir
            .get(sep.len()..dir.len().saturating_sub(sep.len()))
            .unwrap_or_default()
            .to_string();
    }

    if let Some(base_dir) = base_dir {
        notebook_dir = base_dir + &notebook_dir;
    }
    if notebook_dir.is_empty() {
        return Ok(notebook_file_name);
    }
    Ok(format!("{notebook_dir}{sep}{notebook_file_name}"))
}

// =============================================================================
// FULL PATH
// =============================================================================

/// The path of the file in format `fmt`, given the base path.
pub fn full_path(base: &str, fmt: &JupytextFormat) -> Result<String> {
    let mut full = base.to_string();

    if let Some(prefix) = fmt.prefix.as_deref().filter(|p| !p.is_empty()) {
        let (prefix_root, prefix) = prefix.rsplit_once("//").unwrap_or(("", prefix));
        let (prefix_dir, prefix_file_name) = split(prefix, "/");
        let sep = separator(base);
        let mut prefix_dir = prefix_dir.replace('/', sep);

        if prefix_root.is_empty() == base.contains("//") {
            return Err(inconsistent(format!(
                "Notebook base name '{}' is not compatible with fmt={}. Make sure you use prefix \
                 roots in either none, or all of the paired formats",
                base,
                short_form_one_format(fmt)
            )));
        }

        let (mut notebook_dir, mut notebook_file_name) = if prefix_root.is_empty() {
            let (dir, name) = split(base, sep);
            (dir.to_string(), name.to_string())
        } else {
            let (left, right) = base.rsplit_once("//").unwrap_or(("", base));
            let (right_dir, name) = split(right, sep);
            (format!("{left}{prefix_root}{sep}{right_dir}"), name.to_string())
        };

        if !prefix_file_name.is_empty() {
            notebook_file_name = format!("{prefix_file_name}{notebook_file_name}");
        }

        if !prefix_dir.is_empty() {
            let dotdot = format!("..{sep}");
            while let Some(rest) = prefix_dir.strip_prefix(&dotdot) {
                prefix_dir = rest.to_string();
                notebook_dir = split(&notebook_dir, sep).0.to_string();
            }
            if !notebook_dir.is_empty() && !notebook_dir.ends_with(sep) {
                notebook_dir.push_str(sep);
            }
            notebook_dir.push_str(&prefix_dir);
        }

        if !notebook_dir.is_empty() && !notebook_dir.ends_with(sep) {
            notebook_dir.push_str(sep);
        }
        full = notebook_dir + &notebook_file_name;
    }

    if let Some(suffix) = &fmt.suffix {
        full.push_str(suffix);
    }
    full.push_str(&fmt.extension);
    Ok(full)
}

// =============================================================================
// PAIRED PATHS
// =============================================================================

/// The base path, and the first of `formats` that matches `main_path`.
pub fn find_base_path_and_format(main_path: &str, formats: &[JupytextFormat]) -> Result<(String, JupytextFormat)> {
    for fmt in formats {
        match base_path(main_path, fmt, None) {
            Ok(base) => return Ok((base, fmt.clone())),
            Err(NbTextError::InconsistentPath(_)) => {}
            Err(e) => return Err(e),
        }
    }
    let ext = split_extension(main_path).1;
    Err(inconsistent(format!(
        "Path '{}' matches none of the export formats. Please make sure that jupytext.formats \
         covers the current file (e.g. add '{}' to the export formats)",
        main_path,
        ext.strip_prefix('.').unwrap_or(&ext)
    )))
}

/// Every file paired with `main_path`, with its format.
pub fn paired_paths(main_path: &str, fmt: &JupytextFormat, formats: &Value) -> Result<Vec<(String, JupytextFormat)>> {
    let formats = long_form_multiple_formats(formats, None, true)?;
    if formats.is_empty() {
        let ext = split_extension(main_path).1;
        return Ok(vec![(main_path.to_string(), JupytextFormat::with_extension(ext))]);
    }

    let base = base_path(main_path, fmt, Some(&formats))?;
    let paths = formats
        .iter()
        .map(|f| full_path(&base, f))
        .collect::<Result<Vec<_>>>()?;

    if !paths.iter().any(|p| p == main_path) {
        return Err(inconsistent(format!(
            "Paired paths '{}' do not include the current notebook path '{}'. Current format is \
             '{}', and paired formats are '{}'.",
            paths.join("','"),
            main_path,
            short_form_one_format(fmt),
            short_form_multiple_formats(&formats)
        )));
    }

    let mut unique = paths.clone();
    unique.sort();
    unique.dedup();
    if unique.len() < paths.len() {
        return Err(inconsistent(
            "Duplicate paired paths for this notebook. Please fix jupytext.formats.".to_string(),
        ));
    }

    Ok(paths.into_iter().zip(formats).collect())
}

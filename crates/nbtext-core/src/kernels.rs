//! # Kernel Specifications
//!
//! Finds the Jupyter kernels installed on this machine, so that a notebook
//! created from a script gets a `kernelspec` for its language.
//!
//! Kernels are directories holding a `kernel.json` file, under the
//! `kernels` directory of each Jupyter data directory: the entries of
//! `JUPYTER_PATH`, then `JUPYTER_DATA_DIR` (or the user data directory),
//! then the system directories. The first kernel found with a given name
//! wins.

use crate::languages::same_language;
use crate::types::{Metadata, NbTextError, Notebook, Result, pop_from_section, section_str};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const KERNEL_FILE: &str = "kernel.json";

/// The content of a `kernel.json` file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KernelSpec {
    #[serde(default)]
    pub argv: Vec<String>,
    pub display_name: String,
    #[serde(default)]
    pub language: String,
    #[serde(skip)]
    pub resource_dir: PathBuf,
}

/// The Jupyter data directories, in order of precedence.
#[must_use]
pub fn jupyter_data_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::env::var_os("JUPYTER_PATH")
        .map(|paths| std::env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()).collect())
        .unwrap_or_default();

    if let Some(data_dir) = std::env::var_os("JUPYTER_DATA_DIR") {
        dirs.push(PathBuf::from(data_dir));
    } else if let Some(home) = std::env::var_os("HOME") {
        let home = PathBuf::from(home);
        if cfg!(target_os = "macos") {
            dirs.push(home.join("Library").join("Jupyter"));
        } else {
            dirs.push(home.join(".local").join("share").join("jupyter"));
        }
    }

    dirs.push(PathBuf::from("/usr/local/share/jupyter"));
    dirs.push(PathBuf::from("/usr/share/jupyter"));
    dirs
}

fn find_kernel_specs_in(data_dirs: &[PathBuf]) -> BTreeMap<String, PathBuf> {
    let mut specs = BTreeMap::new();
    for data_dir in data_dirs {
        let Ok(entries) = std::fs::read_dir(data_dir.join("kernels")) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.join(KERNEL_FILE).is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            specs.entry(name.to_lowercase()).or_insert(path);
        }
    }
    specs
}

/// Installed kernels: name to resource directory.
#[must_use]
pub fn find_kernel_specs() -> BTreeMap<String, PathBuf> {
    find_kernel_specs_in(&jupyter_data_dirs())
}

fn load_kernel_spec(resource_dir: &Path) -> Result<KernelSpec> {
    let path = resource_dir.join(KERNEL_FILE);
    let text = std::fs::read_to_string(&path).map_err(|e| NbTextError::IoError(format!("{}: {}", path.display(), e)))?;
    let mut spec: KernelSpec = serde_json::from_str(&text)
        .map_err(|e| NbTextError::KernelError(format!("{}: {}", path.display(), e)))?;
    spec.resource_dir = resource_dir.to_path_buf();
    Ok(spec)
}

/// The kernel specification of an installed kernel.
pub fn get_kernel_spec(name: &str) -> Result<KernelSpec> {
    let specs = find_kernel_specs();
    let resource_dir = specs
        .get(&name.to_lowercase())
        .ok_or_else(|| NbTextError::KernelError(format!("No such kernel named {}", name)))?;
    load_kernel_spec(resource_dir)
}

fn kernelspec_metadata(name: &str, language: &str, spec: &KernelSpec) -> Metadata {
    let mut kernelspec = Metadata::new();
    kernelspec.insert("name".to_string(), Value::String(name.to_string()));
    kernelspec.insert("language".to_string(), Value::String(language.to_string()));
    kernelspec.insert("display_name".to_string(), Value::String(spec.display_name.clone()));
    kernelspec
}

fn kernelspec_from_language_in(specs: &BTreeMap<String, PathBuf>, language: &str) -> Result<Metadata> {
    // python3 is the usual Python kernel, try it first
    let preferred = specs.get_key_value("python3").filter(|_| language == "python");
    for (name, resource_dir) in preferred.into_iter().chain(specs.iter()) {
        let spec = match load_kernel_spec(resource_dir) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("skipping kernel {}: {}", name, e);
                continue;
            }
        };
        if same_language(&spec.language, language) {
            debug!(kernel = name.as_str(), language, "found kernel");
            return Ok(kernelspec_metadata(name, language, &spec));
        }
    }
    Err(NbTextError::KernelError(format!("No kernel found for the language {}", language)))
}

/// A `kernelspec` metadata entry for the first installed kernel of the
/// given language.
pub fn kernelspec_from_language(language: &str) -> Result<Metadata> {
    kernelspec_from_language_in(&find_kernel_specs(), language)
}

/// Give a notebook without a kernel the kernel of its `main_language`.
///
/// Returns whether a kernel was set. Nothing changes when no kernel
/// matches the language.
pub fn set_kernelspec_from_language(nb: &mut Notebook) -> bool {
    if nb.metadata.contains_key("kernelspec") {
        return false;
    }
    let Some(language) = section_str(&nb.metadata, "jupytext", "main_language").map(str::to_string) else {
        return false;
    };
    match kernelspec_from_language(&language) {
        Ok(kernelspec) => {
            nb.metadata.insert("kernelspec".to_string(), Value::Object(kernelspec));
            pop_from_section(&mut nb.metadata, "jupytext", "main_language");
            true
        }
        Err(e) => {
            debug!("{}", e);
            false
        }
    }
}

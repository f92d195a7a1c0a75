//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use nbtext_core::compare::{compare, unified_diff};
use nbtext_core::config::notebook_formats;
use nbtext_core::formats::{check_auto_ext, check_file_version};
use nbtext_core::json::recursive_update;
use nbtext_core::jupytext::create_prefix_dir;
use nbtext_core::kernels::{find_kernel_specs, get_kernel_spec, kernelspec_from_language};
use nbtext_core::languages::script_for_extension;
use nbtext_core::paired_paths::{find_base_path_and_format, split_extension};
use nbtext_core::pairs::{get_timestamp, latest_inputs_and_outputs};
use nbtext_core::types::{pop_from_section, section, section_str};
use nbtext_core::{
    JupytextConfiguration, JupytextFormat, Metadata, NbTextError, Notebook, NotebookComparison,
    base_path, combine_inputs_with_outputs, full_path, load_jupytext_config, long_form_multiple_formats,
    long_form_one_format, paired_paths, read, read_pair, reads, short_form_multiple_formats,
    short_form_one_format, test_round_trip_conversion, write, write_pair, writes,
};
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::time::SystemTime;
use tracing::{info, warn};

// =============================================================================
// CONVERSION ARGUMENTS
// =============================================================================

/// How strictly a round trip is compared with the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTripTest {
    /// Up to the expected differences, and ignoring text headers
    Lenient,
    /// Byte for byte
    Strict,
}

/// The actions applied to each notebook given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConversionArgs {
    pub input_format: Option<JupytextFormat>,
    pub output_format: Option<JupytextFormat>,
    pub output: Option<String>,
    pub format_options: Vec<(String, String)>,
    pub update_metadata: Metadata,
    pub set_kernel: Option<String>,
    pub sync: bool,
    pub update: bool,
    pub test: Option<RoundTripTest>,
    pub stop_on_first_error: bool,
    pub show_changes: bool,
    pub quiet: bool,
}

/// Apply `--opt key=value` options to a format.
pub fn set_format_options(fmt: &mut JupytextFormat, options: &[(String, String)]) -> Result<(), NbTextError> {
    for (key, value) in options {
        fmt.options.set_from_str(key, value)?;
    }
    Ok(())
}

fn log(quiet: bool, message: &str) {
    if !quiet {
        info!("{}", message);
    }
}

fn io_error(path: &str, e: std::io::Error) -> NbTextError {
    NbTextError::IoError(format!("{}: {}", path, e))
}

/// The format recorded in `jupytext.text_representation`, for text notebooks.
fn text_representation_format(metadata: &Metadata) -> Option<JupytextFormat> {
    let representation = section(metadata, "jupytext").and_then(|j| section(j, "text_representation"))?;
    let ext = representation
        .get("extension")
        .and_then(Value::as_str)
        .filter(|ext| *ext != ".ipynb")?;
    let mut fmt = JupytextFormat::with_extension(ext);
    fmt.format_name = representation
        .get("format_name")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(fmt)
}

fn same_file(a: &str, b: &str) -> bool {
    match (Path::new(a).canonicalize(), Path::new(b).canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

// =============================================================================
// PAIRED PATHS COMMAND
// =============================================================================

/// List the files paired with a notebook.
pub fn cmd_paired_paths(
    nb_file: &str,
    fmt: Option<&JupytextFormat>,
    json_mode: bool,
) -> Result<(), NbTextError> {
    let notebook = read(nb_file, fmt, None)?;
    let mut paths = Vec::new();
    if let Some(formats) = notebook
        .jupytext()
        .and_then(|j| j.get("formats"))
        .filter(|f| !f.is_null())
    {
        let fmt = fmt.cloned().unwrap_or_default();
        for (path, _) in paired_paths(nb_file, &fmt, formats)? {
            if path != nb_file {
                paths.push(path);
            }
        }
    }

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&paths).unwrap_or_default());
        return Ok(());
    }
    for path in paths {
        println!("{}", path);
    }
    Ok(())
}

// =============================================================================
// DIFF COMMAND
// =============================================================================

/// Show the differences between the inputs of two notebooks, in the
/// format of the first text notebook (Markdown when both are `.ipynb`).
pub fn cmd_diff(first: &str, second: &str, diff_format: Option<&str>) -> Result<(), NbTextError> {
    let nb1 = read(first, None, None)?;
    let nb2 = read(second, None, None)?;

    let fmt = match diff_format {
        Some(text) => long_form_one_format(text, None, true)?,
        None => match text_representation_format(&nb1.metadata)
            .or_else(|| text_representation_format(&nb2.metadata))
        {
            Some(fmt) => fmt,
            None => long_form_one_format("md", None, true)?,
        },
    };

    let diff = unified_diff(&writes(&nb2, &fmt, None)?, &writes(&nb1, &fmt, None)?, second, first);
    print!("{}", diff);
    Ok(())
}

// =============================================================================
// KERNEL
// =============================================================================

/// The `kernelspec` for `--set-kernel`: an installed kernel, or with `-`,
/// the first kernel of the notebook language.
fn kernelspec_for(name: &str, notebook: &Notebook) -> Result<Metadata, NbTextError> {
    if name == "-" {
        let language = section_str(&notebook.metadata, "jupytext", "main_language")
            .or_else(|| section_str(&notebook.metadata, "kernelspec", "language"))
            .filter(|language| !language.is_empty())
            .ok_or_else(|| {
                NbTextError::KernelError("Cannot infer a kernel as notebook language is not defined".to_string())
            })?;
        return kernelspec_from_language(language);
    }

    let spec = get_kernel_spec(name).map_err(|_| {
        let names: Vec<String> = find_kernel_specs().into_keys().collect();
        NbTextError::KernelError(format!("Please choose a kernel name among {}", names.join(", ")))
    })?;
    let mut kernelspec = Metadata::new();
    kernelspec.insert("name".to_string(), Value::String(name.to_string()));
    kernelspec.insert("language".to_string(), Value::String(spec.language));
    kernelspec.insert("display_name".to_string(), Value::String(spec.display_name));
    Ok(kernelspec)
}

// =============================================================================
// ROUND TRIP TESTS
// =============================================================================

/// The YAML header of a text document, with its comment prefix.
fn yaml_header(ext: &str) -> Result<Regex, NbTextError> {
    let comment = script_for_extension(ext).map_or(String::new(), |s| format!(r"{}\s*", regex::escape(s.comment)));
    Regex::new(&format!(r"(?ms)^{c}---\s*\n.*\n{c}---\s*\n", c = comment))
        .map_err(|e| NbTextError::InvalidFormat(format!("YAML header pattern: {}", e)))
}

fn test_round_trip(
    nb_file: &str,
    notebook: &Notebook,
    fmt: &JupytextFormat,
    dest_fmt: &JupytextFormat,
    config: Option<&JupytextConfiguration>,
    args: &ConversionArgs,
    test: RoundTripTest,
) -> Result<(), NbTextError> {
    if fmt.extension == ".ipynb" {
        let options = NotebookComparison {
            allow_expected_differences: test == RoundTripTest::Lenient,
            raise_on_first_difference: args.stop_on_first_error,
            ..NotebookComparison::default()
        };
        return test_round_trip_conversion(notebook, dest_fmt, None, args.update, &options);
    }

    let org_text = std::fs::read_to_string(nb_file).map_err(|e| io_error(nb_file, e))?;
    let mut notebook = notebook.clone();
    if dest_fmt.extension != ".ipynb" {
        let dest_text = writes(&notebook, dest_fmt, None)?;
        notebook = reads(&dest_text, Some(dest_fmt), None)?;
    }
    let text = writes(&notebook, fmt, config)?;

    match test {
        RoundTripTest::Strict => compare(&text, &org_text),
        RoundTripTest::Lenient => {
            let header = yaml_header(&fmt.extension)?;
            compare(&header.replace_all(&text, ""), &header.replace_all(&org_text, ""))
        }
    }
}

// =============================================================================
// OUTPUT FILES
// =============================================================================

/// Writes the notebook to files whose content changed.
struct OutputWriter<'a> {
    notebook: &'a Notebook,
    config: Option<&'a JupytextConfiguration>,
    quiet: bool,
    sync: bool,
    show_changes: bool,
}

impl OutputWriter<'_> {
    fn write(&self, path: &str, fmt: Option<&JupytextFormat>, action: Option<&str>) -> Result<(), NbTextError> {
        if path == "-" {
            return write(self.notebook, "-", fmt, self.config);
        }

        let mut fmt = fmt.cloned().unwrap_or_default();
        fmt.extension = split_extension(path).1;
        let mut new_content = writes(self.notebook, &fmt, self.config)?;
        if !new_content.ends_with('\n') {
            new_content.push('\n');
        }

        let (modified, diff) = if Path::new(path).is_file() {
            let current = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
            let diff = if self.show_changes { unified_diff(&new_content, &current, "", "") } else { String::new() };
            (new_content != current, diff)
        } else {
            (true, "(file did not exist)".to_string())
        };

        if !modified {
            if path.ends_with(".ipynb") || self.sync {
                log(self.quiet, &format!("Unchanged {}", path));
                return Ok(());
            }
            return self.touch(path);
        }

        let mut message = match action {
            None => format!("Updating {}", path),
            Some(action) => {
                let in_format = if fmt.format_name.is_some() {
                    format!(" in format {}", short_form_one_format(&fmt))
                } else {
                    String::new()
                };
                format!("Writing {}{}{}", path, in_format, action)
            }
        };
        if self.show_changes {
            message.push_str(" with this change:\n");
            message.push_str(&diff);
        }
        log(self.quiet, &message);

        create_prefix_dir(path, &fmt)?;
        std::fs::write(path, new_content).map_err(|e| io_error(path, e))
    }

    /// Keep a text file more recent than its paired `.ipynb` file.
    fn refresh_timestamp(&self, path: &str) -> Result<(), NbTextError> {
        if self.sync {
            log(self.quiet, &format!("Unchanged {}", path));
            return Ok(());
        }
        self.touch(path)
    }

    fn touch(&self, path: &str) -> Result<(), NbTextError> {
        log(self.quiet, &format!("Updating the timestamp of {}", path));
        std::fs::File::options()
            .write(true)
            .open(path)
            .and_then(|file| file.set_modified(SystemTime::now()))
            .map_err(|e| io_error(path, e))
    }
}

// =============================================================================
// CONVERT COMMAND
// =============================================================================

/// Apply the command line actions to one notebook.
///
/// Returns 1 when the notebook fails its round trip test, 0 otherwise.
pub fn cmd_convert(nb_file: &str, args: &ConversionArgs) -> Result<usize, NbTextError> {
    if nb_file == "-" && args.sync {
        return Err(NbTextError::IoError("Missing notebook path.".to_string()));
    }

    let input_format = args.input_format.clone().unwrap_or_default();
    let mut nb_dest = match (&args.output, &args.output_format) {
        (Some(output), _) => Some(output.clone()),
        _ if nb_file == "-" => Some("-".to_string()),
        (None, Some(to)) => Some(full_path(&base_path(nb_file, &input_format, None)?, to)?),
        (None, None) => {
            base_path(nb_file, &input_format, None)?;
            None
        }
    };

    let absolute = std::path::absolute(nb_file).map_err(|e| io_error(nb_file, e))?;
    let config = load_jupytext_config(&absolute)?;

    // only acting on metadata: save in place
    let save_in_place = nb_dest.is_none() && !args.sync;
    if save_in_place {
        nb_dest = Some(nb_file.to_string());
    }
    let quiet = args.quiet || nb_dest.as_deref() == Some("-");

    // I. Read the notebook
    let mut fmt = input_format.clone();
    if fmt.extension.is_empty() && nb_file != "-" {
        fmt.extension = split_extension(nb_file).1;
    }
    set_format_options(&mut fmt, &args.format_options)?;
    log(
        quiet,
        &format!(
            "Reading {}{}",
            if nb_file == "-" { "stdin" } else { nb_file },
            if fmt.extension.is_empty() { String::new() } else { format!(" in format {}", short_form_one_format(&fmt)) }
        ),
    );

    let mut notebook = read(nb_file, Some(&fmt), config.as_ref())?;
    let representation = text_representation_format(&notebook.metadata);
    if fmt.extension.is_empty() {
        // stdin: keep the detected format
        let options = fmt.options;
        fmt = representation.unwrap_or_else(|| JupytextFormat::with_extension(".ipynb"));
        fmt.options = options;
    } else if fmt.format_name.is_none() {
        if let Some(representation) = representation.filter(|r| r.extension == fmt.extension) {
            fmt.format_name = representation.format_name;
        }
    }

    let mut dest_fmt = match &args.output_format {
        Some(to) if to.extension == ".auto" => {
            let resolved = check_auto_ext(to, &notebook.metadata, "--to")?;
            if args.output.is_none() && nb_file != "-" {
                nb_dest = Some(full_path(&base_path(nb_file, &input_format, None)?, &resolved)?);
            }
            Some(resolved)
        }
        other => other.clone(),
    };

    // II. Update the metadata
    let mut update_metadata = args.update_metadata.clone();
    if let Some(kernel) = &args.set_kernel {
        let kernelspec = kernelspec_for(kernel, &notebook)?;
        log(
            quiet,
            &format!("Setting kernel {}", kernelspec.get("name").and_then(Value::as_str).unwrap_or_default()),
        );
        update_metadata.insert("kernelspec".to_string(), Value::Object(kernelspec));
    }

    if (!update_metadata.is_empty() || !args.format_options.is_empty())
        && section_str(&notebook.metadata, "jupytext", "notebook_metadata_filter") == Some("-all")
    {
        pop_from_section(&mut notebook.metadata, "jupytext", "notebook_metadata_filter");
    }

    if !update_metadata.is_empty() {
        log(
            quiet,
            &format!("Updating notebook metadata with '{}'", Value::Object(update_metadata.clone())),
        );
        if update_metadata.contains_key("kernelspec") {
            pop_from_section(&mut notebook.metadata, "jupytext", "main_language");
        }
        recursive_update(&mut notebook.metadata, &update_metadata, true);
    }

    // III. Read the paired files
    let mut formats = Vec::new();
    if args.sync {
        let Some(paired) = notebook_formats(&notebook, config.as_ref(), nb_file, false)? else {
            warn!("{} is not a paired notebook", nb_file);
            return Ok(0);
        };
        formats = paired;

        let (_, paired_fmt) = find_base_path_and_format(nb_file, &formats)?;
        let mut merged = paired_fmt;
        merged.options.merge_defaults(&fmt.options);
        if merged.format_name.is_none() {
            merged.format_name = fmt.format_name.take();
        }
        fmt = merged;

        let formats_value = Value::String(short_form_multiple_formats(&formats));
        let (inputs, outputs) = latest_inputs_and_outputs(nb_file, &fmt, &formats_value, get_timestamp)?;
        notebook = read_pair(&inputs, &outputs, |path, alt_fmt| {
            if path == nb_file {
                return Ok(notebook.clone());
            }
            log(quiet, &format!("Loading {}", path));
            read(path, Some(alt_fmt), config.as_ref())
        })?;
    }

    // IV. Test the round trip
    if let Some(test) = args.test {
        let dest_fmt = dest_fmt
            .clone()
            .or_else(|| nb_dest.as_deref().map(|p| JupytextFormat::with_extension(split_extension(p).1)))
            .ok_or_else(|| NbTextError::InvalidFormat("--test requires --to or --output".to_string()))?;
        return match test_round_trip(nb_file, &notebook, &fmt, &dest_fmt, config.as_ref(), args, test) {
            Ok(()) => Ok(0),
            Err(NbTextError::NotebookDifference(diff)) => {
                println!("{}: {}", nb_file, diff);
                Ok(1)
            }
            Err(e) => Err(e),
        };
    }

    // V. Write the destination, or the paired files
    if let Some(nb_dest) = nb_dest {
        if nb_dest == nb_file && dest_fmt.is_none() {
            dest_fmt = Some(fmt.clone());
        }
        if let Some(dest) = dest_fmt.as_ref().filter(|_| nb_dest != "-") {
            base_path(&nb_dest, dest, None)?;
        }

        let dest_exists = Path::new(&nb_dest).is_file();
        let action = if save_in_place || !dest_exists {
            String::new()
        } else if args.update {
            if !nb_dest.ends_with(".ipynb") {
                return Err(NbTextError::InvalidFormat("--update is only for ipynb files".to_string()));
            }
            let insert_version_number = config.as_ref().is_none_or(|c| c.insert_version_number);
            check_file_version(&notebook, nb_file, &nb_dest, insert_version_number)?;
            let outputs = read(&nb_dest, None, config.as_ref())?;
            notebook = combine_inputs_with_outputs(&notebook, &outputs, Some(&fmt))?;
            " (destination file updated)".to_string()
        } else if nb_dest.ends_with(".ipynb") {
            " (destination file replaced [use --update to preserve cell outputs and ids])".to_string()
        } else {
            " (destination file replaced)".to_string()
        };

        // drop the pairing when the destination is not one of the paired files
        let mut paired = match notebook.jupytext().and_then(|j| j.get("formats")) {
            Some(formats) => long_form_multiple_formats(formats, None, true)?,
            None => Vec::new(),
        };
        if !paired.is_empty() {
            match find_base_path_and_format(&nb_dest, &paired) {
                Ok(_) => {}
                Err(NbTextError::InconsistentPath(_)) => {
                    paired.clear();
                    pop_from_section(&mut notebook.metadata, "jupytext", "formats");
                }
                Err(e) => return Err(e),
            }
        }

        let writer = OutputWriter {
            notebook: &notebook,
            config: config.as_ref(),
            quiet,
            sync: args.sync,
            show_changes: args.show_changes,
        };
        writer.write(&nb_dest, dest_fmt.as_ref(), Some(&action))?;

        let formats_value = Value::String(short_form_multiple_formats(&paired));
        let dest_in_pair = !paired.is_empty()
            && paired_paths(nb_file, &fmt, &formats_value)
                .is_ok_and(|paths| paths.iter().any(|(alt_path, _)| same_file(&nb_dest, alt_path)));
        if dest_in_pair
            && Path::new(nb_file).is_file()
            && !nb_file.ends_with(".ipynb")
            && Path::new(&nb_dest).is_file()
            && nb_dest.ends_with(".ipynb")
        {
            writer.refresh_timestamp(nb_file)?;
        }
    } else if args.sync {
        let writer = OutputWriter {
            notebook: &notebook,
            config: config.as_ref(),
            quiet,
            sync: true,
            show_changes: args.show_changes,
        };
        write_pair(nb_file, &formats, |path, alt_fmt| writer.write(path, Some(alt_fmt), None))?;
    }

    Ok(0)
}

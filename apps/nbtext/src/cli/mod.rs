//! # nbtext CLI Module
//!
//! This module implements the command line interface of nbtext.
//!
//! ## Actions
//!
//! - `--to` / `-o` - Convert notebooks to another format or file
//! - `--set-formats` / `--sync` - Pair notebooks and synchronise paired files
//! - `--paired-paths` - List the files paired with a notebook
//! - `--update-metadata` / `--opt` / `--set-kernel` - Edit a notebook in place
//! - `--diff` - Show the differences between two notebooks
//! - `--test` / `--test-strict` - Test round trip conversions

mod commands;

use clap::Parser;
use nbtext_core::types::section_mut;
use nbtext_core::{JupytextFormat, Metadata, NbTextError, long_form_one_format};
use serde_json::Value;
use tracing::{error, warn};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// nbtext - Jupyter notebooks as Markdown documents or scripts
///
/// Notebooks are read from stdin when no notebook is given.
#[derive(Parser, Debug, Default)]
#[command(name = "nbtext")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// One or more notebooks
    pub notebooks: Vec<String>,

    /// Format of the inputs, inferred from the file extension and content when missing
    #[arg(long = "from")]
    pub input_format: Option<String>,

    /// Destination format: 'ipynb', 'md', 'py:percent', 'auto:light', ...
    #[arg(long = "to")]
    pub output_format: Option<String>,

    /// Destination file. Use '-' to print the notebook on stdout
    #[arg(short, long, allow_hyphen_values = true)]
    pub output: Option<String>,

    /// Preserve the outputs and cell ids of an existing .ipynb destination
    #[arg(long)]
    pub update: bool,

    /// Pair the notebook with other formats, e.g. 'ipynb,py:percent', and write the paired files
    #[arg(long)]
    pub set_formats: Option<String>,

    /// Synchronise the paired files of the notebook
    #[arg(short, long, conflicts_with_all = ["paired_paths", "test", "test_strict"])]
    pub sync: bool,

    /// List the files paired with the notebook
    #[arg(short, long)]
    pub paired_paths: bool,

    /// Format options, e.g. 'comment_magics=true'
    #[arg(long = "opt", visible_alias = "format-options", value_name = "KEY=VALUE")]
    pub format_options: Vec<String>,

    /// Update the notebook metadata with a JSON object
    #[arg(long, value_name = "JSON")]
    pub update_metadata: Option<String>,

    /// Set the kernel with the given name, or '-' for a kernel matching the notebook language
    #[arg(short = 'k', long, allow_hyphen_values = true)]
    pub set_kernel: Option<String>,

    /// Show the differences between the inputs of two notebooks
    #[arg(short, long)]
    pub diff: bool,

    /// The text format used to show differences
    #[arg(long)]
    pub diff_format: Option<String>,

    /// Test that the notebook is stable under a round trip, up to expected changes
    #[arg(long, conflicts_with = "test_strict")]
    pub test: bool,

    /// Test that the notebook is strictly stable under a round trip
    #[arg(long)]
    pub test_strict: bool,

    /// Stop on the first difference in round trip tests
    #[arg(short = 'x', long = "stop")]
    pub stop_on_first_error: bool,

    /// Continue with the other notebooks when a conversion fails
    #[arg(short, long)]
    pub warn_only: bool,

    /// Display the diff of each updated file
    #[arg(long)]
    pub show_changes: bool,

    /// Do not report on the files being read or written
    #[arg(short, long)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long)]
    pub json_mode: bool,
}

// =============================================================================
// ARGUMENT VALIDATION
// =============================================================================

fn invalid(message: &str) -> NbTextError {
    NbTextError::InvalidFormat(message.to_string())
}

/// Parse `--opt key=value` arguments.
fn parse_format_options(options: &[String]) -> Result<Vec<(String, String)>, NbTextError> {
    options
        .iter()
        .map(|opt| match opt.split_once('=') {
            Some((key, value)) if !value.contains('=') => Ok((key.to_string(), value.to_string())),
            _ => Err(NbTextError::InvalidFormat(format!(
                "Format options are expected to be of the form key=value, not '{}'",
                opt
            ))),
        })
        .collect()
}

fn parse_update_metadata(text: Option<&str>) -> Result<Metadata, NbTextError> {
    let Some(text) = text else {
        return Ok(Metadata::new());
    };
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(update)) => Ok(update),
        Ok(other) => Err(NbTextError::InvalidFormat(format!(
            "--update-metadata expects a JSON object, not '{}'",
            other
        ))),
        Err(e) => Err(NbTextError::DeserializationError(format!("--update-metadata: {}", e))),
    }
}

fn parse_format(text: Option<&str>) -> Result<Option<JupytextFormat>, NbTextError> {
    text.map(|t| long_form_one_format(t, None, true)).transpose()
}

/// Turn the command line into the actions applied to each notebook.
pub fn conversion_args(cli: &Cli) -> Result<ConversionArgs, NbTextError> {
    let mut update_metadata = parse_update_metadata(cli.update_metadata.as_deref())?;
    let mut sync = cli.sync;
    if let Some(formats) = &cli.set_formats {
        // null unpairs the notebook
        let formats = if formats.is_empty() { Value::Null } else { Value::String(formats.clone()) };
        section_mut(&mut update_metadata, "jupytext").insert("formats".to_string(), formats);
        sync = true;
    }

    let test = match (cli.test, cli.test_strict) {
        (_, true) => Some(RoundTripTest::Strict),
        (true, false) => Some(RoundTripTest::Lenient),
        _ => None,
    };
    if test.is_some() && cli.output_format.is_none() && cli.output.is_none() {
        return Err(invalid("Please provide one of --to or --output with --test"));
    }

    let format_options = parse_format_options(&cli.format_options)?;
    if cli.output_format.is_none()
        && cli.output.is_none()
        && !sync
        && update_metadata.is_empty()
        && format_options.is_empty()
        && cli.set_kernel.is_none()
    {
        return Err(invalid(
            "Please provide one of --to, --output, --set-formats, --sync, --diff, \
             --update-metadata, --opt or --set-kernel",
        ));
    }
    if cli.output.is_some() && cli.notebooks.len() > 1 {
        return Err(invalid("Please input a single notebook when using --output"));
    }

    if let Some(to) = &cli.output_format {
        if cli.output.is_none()
            && to.contains('.')
            && !to.starts_with(['.', '-', '_'])
            && !to.contains("//")
        {
            warn!(
                "You might have passed a file name to the '--to' option, when a format \
                 description was expected. Maybe you want to use the '-o' option instead?"
            );
        }
    }

    let mut output_format = parse_format(cli.output_format.as_deref())?;
    if let Some(fmt) = output_format.as_mut() {
        set_format_options(fmt, &format_options)?;
    }

    Ok(ConversionArgs {
        input_format: parse_format(cli.input_format.as_deref())?,
        output_format,
        output: cli.output.clone(),
        format_options,
        update_metadata,
        set_kernel: cli.set_kernel.clone(),
        sync,
        update: cli.update,
        test,
        stop_on_first_error: cli.stop_on_first_error,
        show_changes: cli.show_changes,
        quiet: cli.quiet,
    })
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
///
/// Returns the number of notebooks that failed their round trip test.
pub fn execute(cli: Cli) -> Result<usize, NbTextError> {
    let notebooks = if cli.notebooks.is_empty() { vec!["-".to_string()] } else { cli.notebooks.clone() };

    if cli.paired_paths {
        let [nb_file] = notebooks.as_slice() else {
            return Err(invalid("--paired-paths applies to a single notebook"));
        };
        let input_format = parse_format(cli.input_format.as_deref())?;
        return cmd_paired_paths(nb_file, input_format.as_ref(), cli.json_mode).map(|()| 0);
    }

    if cli.diff {
        let [first, second] = notebooks.as_slice() else {
            return Err(invalid("Please provide two notebooks after 'nbtext --diff'"));
        };
        if cli.output_format.is_some() || cli.output.is_some() || cli.sync || cli.set_kernel.is_some() {
            return Err(invalid("--diff cannot be combined with other actions"));
        }
        return cmd_diff(first, second, cli.diff_format.as_deref()).map(|()| 0);
    }

    let args = conversion_args(&cli)?;
    let mut failures = 0;
    for nb_file in &notebooks {
        match cmd_convert(nb_file, &args) {
            Ok(failed) => failures += failed,
            Err(e) if cli.warn_only => error!("{}: {}", nb_file, e),
            Err(e) => return Err(e),
        }
    }
    Ok(failures)
}

//! `validate` command handler
//!
//! Loads each file through the regular pipeline and reports every problem,
//! not just the first.

use std::path::Path;

use serde_json::json;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::ConfigLoader;
use crate::error::{ConfigError, DrillError, Severity, ValidationIssue};

/// Outcome for one file.
#[derive(Debug)]
struct FileReport {
    file: String,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl FileReport {
    fn passed(&self, strict: bool) -> bool {
        self.errors.is_empty() && (!strict || self.warnings.is_empty())
    }
}

/// Validates every file in `args.files`.
///
/// # Errors
///
/// Returns a validation error naming the first failing file once all files
/// have been reported. With `--strict`, warnings count as failures.
pub fn run(args: &ValidateArgs) -> Result<(), DrillError> {
    let loader = ConfigLoader::new();
    let reports: Vec<FileReport> = args.files.iter().map(|p| check(&loader, p)).collect();

    match args.format {
        OutputFormat::Human => {
            for report in &reports {
                print_human(report, args.strict);
            }
        }
        OutputFormat::Json => {
            let value: Vec<_> = reports
                .iter()
                .map(|r| {
                    json!({
                        "file": r.file,
                        "valid": r.passed(args.strict),
                        "errors": r.errors,
                        "warnings": r.warnings,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    match reports.into_iter().find(|r| !r.passed(args.strict)) {
        Some(failed) => Err(ConfigError::ValidationError {
            path: failed.file,
            errors: failed
                .errors
                .into_iter()
                .map(|message| issue(message, Severity::Error))
                .chain(
                    failed
                        .warnings
                        .into_iter()
                        .map(|message| issue(message, Severity::Warning)),
                )
                .collect(),
        }
        .into()),
        None => Ok(()),
    }
}

fn check(loader: &ConfigLoader, path: &Path) -> FileReport {
    tracing::info!(file = %path.display(), "validating configuration");
    let file = path.display().to_string();

    if !path.exists() {
        return FileReport {
            errors: vec![format!("file not found: {file}")],
            file,
            warnings: Vec::new(),
        };
    }

    match loader.load(Some(path)) {
        Ok(result) => FileReport {
            file,
            errors: Vec::new(),
            warnings: result.warnings.iter().map(ToString::to_string).collect(),
        },
        Err(ConfigError::ValidationError { errors, .. }) => FileReport {
            file,
            errors: errors.iter().map(ToString::to_string).collect(),
            warnings: Vec::new(),
        },
        Err(e) => FileReport {
            file,
            errors: vec![e.to_string()],
            warnings: Vec::new(),
        },
    }
}

fn print_human(report: &FileReport, strict: bool) {
    let mark = if report.passed(strict) { "ok" } else { "FAILED" };
    println!("{}: {mark}", report.file);
    for error in &report.errors {
        println!("  error: {error}");
    }
    for warning in &report.warnings {
        println!("  {warning}");
    }
}

fn issue(message: String, severity: Severity) -> ValidationIssue {
    ValidationIssue {
        path: String::new(),
        message,
        severity,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use tempfile::NamedTempFile;

    use super::*;

    fn yaml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn args(files: Vec<PathBuf>, strict: bool) -> ValidateArgs {
        ValidateArgs {
            files,
            format: OutputFormat::Json,
            strict,
        }
    }

    #[test]
    fn test_valid_file_passes() {
        let file = yaml_file("api_base: https://drill.example.org\n");
        assert!(run(&args(vec![file.path().to_path_buf()], false)).is_ok());
    }

    #[test]
    fn test_missing_file_fails() {
        let err = run(&args(vec![PathBuf::from("/nonexistent/drill.yaml")], false)).unwrap_err();
        assert!(matches!(
            err,
            DrillError::Config(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_strict_turns_warnings_into_failures() {
        let file = yaml_file("api_base: http://localhost:8080\n");
        let files = vec![file.path().to_path_buf()];
        assert!(run(&args(files.clone(), false)).is_ok());
        assert!(run(&args(files, true)).is_err());
    }

    #[test]
    fn test_invalid_duration_fails() {
        let file = yaml_file("timing:\n  display_delay: 0s\n");
        assert!(run(&args(vec![file.path().to_path_buf()], false)).is_err());
    }
}

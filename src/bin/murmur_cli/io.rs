#![deny(clippy::all, clippy::pedantic)]

use std::fs;
use std::path::PathBuf;

use crate::client::CliError;

/// Resolve text given inline or as a file; the file wins when both are set.
pub fn read_text(inline: Option<String>, file: Option<PathBuf>) -> Result<String, CliError> {
    if let Some(path) = file {
        return fs::read_to_string(&path).map_err(|source| CliError::InputFile {
            path: path.display().to_string(),
            source,
        });
    }
    inline.ok_or_else(|| CliError::InvalidInput("--text or --text-file is required".into()))
}

//! Bulk endpoint import from a plain text list.
//!
//! One endpoint per line, `NAME,URL` or `NAME<TAB>URL`. Blank lines and
//! lines starting with `#` are skipped.

use thiserror::Error;

use super::store::is_valid_url;

#[derive(Error, Debug, PartialEq)]
pub enum ImportError {
    #[error("line {line}: expected NAME,URL or NAME<TAB>URL")]
    Malformed { line: usize },
    #[error("line {line}: endpoint name cannot be empty")]
    EmptyName { line: usize },
    #[error("line {line}: invalid URL: {url}")]
    InvalidUrl { line: usize, url: String },
}

/// A parsed, not yet registered endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEndpoint {
    pub name: String,
    pub url: String,
}

/// Parse an endpoint list. Fails on the first malformed line.
pub fn parse_endpoint_list(text: &str) -> Result<Vec<NewEndpoint>, ImportError> {
    let mut endpoints = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        // URLs may contain commas in their query string, so split on the first separator only
        let (name, url) = trimmed
            .split_once('\t')
            .or_else(|| trimmed.split_once(','))
            .ok_or(ImportError::Malformed { line })?;

        let name = name.trim();
        let url = url.trim();
        if name.is_empty() {
            return Err(ImportError::EmptyName { line });
        }
        if !is_valid_url(url) {
            return Err(ImportError::InvalidUrl {
                line,
                url: url.to_string(),
            });
        }

        endpoints.push(NewEndpoint {
            name: name.to_string(),
            url: url.to_string(),
        });
    }

    Ok(endpoints)
}

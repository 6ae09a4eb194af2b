// src/prefix.rs

//! Install-prefix placeholder replacement
//!
//! Packages are built under a long placeholder prefix that is rewritten to
//! the real install prefix. Text files are rewritten freely. Binary files
//! must keep their length: each placeholder occurrence, together with the
//! rest of its NUL-terminated string, is rewritten in place and padded
//! with NUL bytes, so the placeholder must be at least as long as the
//! replacement.

use crate::error::Error;
use crate::package::PackageRecord;

/// Binary replacement failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaddingError {
    #[error("{file}: replacement of {replacement_len} bytes does not fit placeholder of {placeholder_len} bytes")]
    TooLong {
        file: String,
        placeholder_len: usize,
        replacement_len: usize,
    },

    #[error("{file}: empty prefix placeholder")]
    EmptyPlaceholder { file: String },
}

impl From<PaddingError> for Error {
    fn from(err: PaddingError) -> Self {
        Error::Staging(err.to_string())
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Replace every `placeholder` in `data`, preserving its length
///
/// Returns the number of occurrences replaced. `file` names the file in
/// errors. On error `data` is left untouched.
pub fn binary_replace(
    data: &mut [u8],
    placeholder: &[u8],
    replacement: &[u8],
    file: &str,
) -> Result<usize, PaddingError> {
    if placeholder.is_empty() {
        return Err(PaddingError::EmptyPlaceholder {
            file: file.to_string(),
        });
    }
    if replacement.len() > placeholder.len() {
        return Err(PaddingError::TooLong {
            file: file.to_string(),
            placeholder_len: placeholder.len(),
            replacement_len: replacement.len(),
        });
    }

    let mut count = 0;
    let mut pos = 0;
    while let Some(start) = find(data, placeholder, pos) {
        let tail_start = start + placeholder.len();
        let end = data[tail_start..]
            .iter()
            .position(|b| *b == 0)
            .map_or(data.len(), |p| tail_start + p);

        let mut rewritten = Vec::with_capacity(end - start);
        rewritten.extend_from_slice(replacement);
        rewritten.extend_from_slice(&data[tail_start..end]);
        rewritten.resize(end - start, 0);
        data[start..end].copy_from_slice(&rewritten);

        count += 1;
        pos = end.max(start + 1);
    }
    Ok(count)
}

/// Replace every `placeholder` in text content
pub fn text_replace(text: &str, placeholder: &str, replacement: &str) -> String {
    text.replace(placeholder, replacement)
}

/// Check the recorded placeholders of a package
///
/// Binary placeholders must be non-empty and at least `min_len` bytes so
/// that prefixes of that length can be patched in.
pub fn validate_placeholders(record: &PackageRecord, min_len: usize) -> Result<(), PaddingError> {
    for p in &record.prefix_placeholders {
        let file = format!("{}:{}", record.dist(), p.path);
        if p.placeholder.is_empty() {
            return Err(PaddingError::EmptyPlaceholder { file });
        }
        if p.mode == "binary" && p.placeholder.len() < min_len {
            return Err(PaddingError::TooLong {
                file,
                placeholder_len: p.placeholder.len(),
                replacement_len: min_len,
            });
        }
    }
    Ok(())
}

use crate::crypto::code::CodeFormat;
use crate::error::{AppError, Result};

/// Validates deposited content.
///
/// # Arguments
///
/// * `content` - The content, `None` when the field was absent or not a string.
/// * `max_bytes` - The largest accepted payload.
///
/// # Returns
///
/// The content, if it is valid.
pub fn validate_content(content: Option<String>, max_bytes: usize) -> Result<String> {
    let content = content.ok_or_else(|| {
        AppError::validation(
            "content",
            "invalid input format or use only 'content' for POST request",
        )
    })?;

    if content.len() > max_bytes {
        return Err(content_too_large(max_bytes));
    }

    Ok(content)
}

/// The error for content over `max_bytes`, whether caught here or by the
/// body limit.
pub fn content_too_large(max_bytes: usize) -> AppError {
    AppError::validation(
        "content",
        format!("content must be at most {} bytes", max_bytes),
    )
}

/// Validates a code presented for redemption.
///
/// # Arguments
///
/// * `code` - The code, `None` when the query parameter was absent.
/// * `format` - The format codes are generated in.
///
/// # Returns
///
/// A `Result<()>` indicating whether the code is well formed.
pub fn validate_code(code: Option<&str>, format: &CodeFormat) -> Result<()> {
    let code = code.ok_or_else(|| {
        AppError::validation(
            "userCode",
            "invalid input format or use only 'userCode' for GET request",
        )
    })?;

    format
        .check(code)
        .map_err(|message| AppError::validation("userCode", message))
}

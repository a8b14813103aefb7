use regex::Regex;
use std::sync::OnceLock;

use crate::commands::{PendingFile, UploadTarget};
use crate::errors::{AppError, AppResult};
use crate::image_processor;

const MAX_EXPERIMENT_ID_LEN: usize = 128;

fn experiment_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("valid experiment id regex"))
}

fn unsafe_filename_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("valid filename regex"))
}

pub struct InputValidator;

impl InputValidator {
    /// Checks a target before anything is submitted for it.
    pub fn validate_target(target: &UploadTarget, variation_count: u32) -> AppResult<()> {
        let experiment = target.experiment.trim();

        if experiment.is_empty() {
            return Err(AppError::invalid_target(
                &target.experiment,
                target.variation,
                "Experiment id cannot be empty",
            ));
        }

        if experiment.len() > MAX_EXPERIMENT_ID_LEN {
            return Err(AppError::invalid_target(
                &target.experiment,
                target.variation,
                "Experiment id too long (max 128 characters)",
            ));
        }

        // The id is interpolated into a resource path
        if !experiment_id_pattern().is_match(&target.experiment) {
            return Err(AppError::invalid_target(
                &target.experiment,
                target.variation,
                "Experiment id contains invalid characters",
            ));
        }

        if target.variation >= variation_count {
            return Err(AppError::invalid_target(
                &target.experiment,
                target.variation,
                &format!(
                    "Variation index out of range (experiment has {} variations)",
                    variation_count
                ),
            ));
        }

        Ok(())
    }

    pub fn validate_pending_file(file: &PendingFile, max_bytes: u64) -> AppResult<()> {
        if file.name.trim().is_empty() {
            return Err(AppError::validation("name", "File name cannot be empty"));
        }

        if file.is_empty() {
            return Err(AppError::validation("bytes", "File is empty"));
        }

        let size = file.len() as u64;
        if size > max_bytes {
            return Err(AppError::FileTooLarge {
                name: file.name.clone(),
                size,
                limit: max_bytes,
            });
        }

        if !file.mime_type.starts_with("image/")
            || image_processor::sniff_image_format(&file.bytes).is_none()
        {
            return Err(AppError::InvalidFileType {
                name: file.name.clone(),
            });
        }

        Ok(())
    }

    pub fn validate_api_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("url", "URL cannot be empty"));
        }

        if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
            return Err(AppError::validation("url", "URL must start with http:// or https://"));
        }

        if trimmed.len() > 500 {
            return Err(AppError::validation("url", "URL too long"));
        }

        if trimmed.chars().any(char::is_whitespace) {
            return Err(AppError::validation("url", "URL cannot contain whitespace"));
        }

        Ok(())
    }

    pub fn sanitize_filename(filename: &str) -> String {
        let sanitized = unsafe_filename_chars().replace_all(filename.trim(), "_");

        // Limit length
        if sanitized.len() > 255 {
            let mut end = 252;
            while !sanitized.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &sanitized[..end])
        } else {
            sanitized.to_string()
        }
    }
}

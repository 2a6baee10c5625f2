//! Local checks run before a file is handed to the transport.

use crate::config::QueueConfig;
use crate::error::ValidationError;
use crate::types::FilePayload;

/// Rejects files the backend is known to refuse.
#[derive(Debug, Clone)]
pub struct Validator {
    max_file_size: Option<u64>,
    allowed_extensions: Vec<String>,
}

impl Validator {
    pub fn new(max_file_size: Option<u64>, allowed_extensions: &[String]) -> Self {
        let allowed_extensions = allowed_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            max_file_size,
            allowed_extensions,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.max_file_size, &config.allowed_extensions)
    }

    pub fn validate(&self, payload: &FilePayload) -> Result<(), ValidationError> {
        let size = payload.data.len() as u64;
        if size == 0 {
            return Err(ValidationError::EmptyFile {
                name: payload.name.clone(),
            });
        }

        if let Some(limit) = self.max_file_size {
            if size > limit {
                return Err(ValidationError::TooLarge {
                    name: payload.name.clone(),
                    size,
                    limit,
                });
            }
        }

        if !self.allowed_extensions.is_empty() {
            let accepted = payload
                .extension()
                .map(|ext| self.allowed_extensions.contains(&ext))
                .unwrap_or(false);
            if !accepted {
                return Err(ValidationError::UnsupportedType {
                    name: payload.name.clone(),
                    allowed: self
                        .allowed_extensions
                        .iter()
                        .map(|ext| format!(".{}", ext))
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
        }

        Ok(())
    }
}

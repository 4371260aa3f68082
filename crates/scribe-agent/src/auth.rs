//! API key lookup for the completion service
//!
//! The variable name comes from `completion.api_key_env`. Local
//! OpenAI-compatible servers usually accept requests without a key, so a
//! missing variable is not an error here; the service rejects the request
//! with 401 if it needs one.

use std::env;

/// Read the API key from the named environment variable
///
/// Empty values count as unset.
pub fn get_api_key(var_name: &str) -> Option<String> {
    match env::var(var_name) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from {}", var_name);
            Some(key)
        }
        _ => {
            tracing::debug!("{} not set, sending unauthenticated requests", var_name);
            None
        }
    }
}

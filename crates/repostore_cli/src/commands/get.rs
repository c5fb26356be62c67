//! Get command.

use super::{CommandError, Target};
use tracing::info;

/// Prints the document, or the value stored under `key`.
pub async fn run(target: &Target, key: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "Reading {} from {}/{}",
        target.config.filename, target.config.owner, target.config.repository
    );

    let document = super::edit(target, Vec::new()).await?;
    match key {
        None => super::print(&serde_json::Value::Object(document)),
        Some(key) => {
            let value = document
                .get(key)
                .ok_or_else(|| CommandError::KeyNotFound(key.to_string()))?;
            super::print(value)
        }
    }
}

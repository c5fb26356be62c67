//! Unset command.

use super::document::Edit;
use super::Target;
use tracing::info;

/// Removes `key` and prints the resulting document.
pub async fn run(target: &Target, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("Removing {:?} from {}", key, target.config.filename);

    let document = super::edit(
        target,
        vec![Edit::Remove {
            key: key.to_string(),
        }],
    )
    .await?;
    super::print(&serde_json::Value::Object(document))
}

//! Set command.

use super::document::{parse_value, Edit};
use super::Target;
use tracing::info;

/// Sets `key` to `raw_value` and prints the resulting document.
pub async fn run(
    target: &Target,
    key: &str,
    raw_value: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let value = parse_value(raw_value);
    info!("Setting {:?} in {}", key, target.config.filename);

    let edit = Edit::Set {
        key: key.to_string(),
        value,
    };
    let document = super::edit(target, vec![edit]).await?;
    super::print(&serde_json::Value::Object(document))
}

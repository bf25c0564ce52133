//! Operator tool: recover the secrets service after an encryption key change
//!
//! Usage:
//!   SSO_SECRETS_ENCRYPTION_KEY="<new>,<old>" cargo run --bin rotate-secrets-key
//!
//! Loads every container. If they no longer decrypt with the write key, they
//! are read with the previous key and re-encrypted with the new one.

use anyhow::{anyhow, bail, Result};
use strongbox_config::SecretsConfig;
use strongbox_logging::{init_console_logging, init_logging};
use strongbox_secrets::{RotationOutcome, SecretsService, ServiceMode};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = SecretsConfig::from_env()
        .map_err(|e| anyhow!("Failed to load configuration: {}", e))?;

    if config.log_json {
        init_logging("rotate-secrets-key", config.log_level());
    } else {
        init_console_logging("rotate-secrets-key", config.log_level());
    }

    info!(path = %config.secrets_dir().display(), "Loading secrets containers");
    let service = SecretsService::from_config(&config).await?;

    if service.mode() == ServiceMode::Active {
        info!("All containers decrypt with the write key");
    }

    match service.rotate_key().await? {
        RotationOutcome::NotRequired => info!("No rotation required"),
        RotationOutcome::Completed => info!("Secrets re-encrypted with the new key"),
        RotationOutcome::NotPossible => {
            bail!("Containers don't decrypt and no previous key is configured")
        }
        RotationOutcome::WrongKey => {
            bail!("The previous key (second in the list) doesn't decrypt the containers")
        }
    }

    Ok(())
}

//! Account creation

use anyhow::Context;
use dialoguer::Password;
use sensorlog_core::{credentials, Config, KnowledgeBase};
use tracing::info;

/// Ask for the new password twice
pub fn prompt_password() -> anyhow::Result<String> {
    let password = Password::new()
        .with_prompt("Password for new sensorlog user")
        .with_confirmation("Please re-enter the password", "Passwords do not match")
        .interact()?;
    Ok(password)
}

/// Hash `password` and store the account. Returns false if the user could
/// not be added (empty or taken name).
pub async fn run(config: &Config, username: &str, password: &str) -> anyhow::Result<bool> {
    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }
    let hash = credentials::hash_password(password)?;

    let kb = KnowledgeBase::open(&config.storage).with_context(|| {
        format!(
            "Failed to open storage at {}",
            config.storage.file.display()
        )
    })?;
    let added = kb.add_user(username, &hash).await;
    kb.shutdown().await;

    if added {
        info!(username, "User added");
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.storage.file = dir.path().join("sensorlog.db");
        config
    }

    #[tokio::test]
    async fn test_useradd_stores_verifiable_hash() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);

        assert!(run(&config, "alice", "secret").await.unwrap());

        let kb = KnowledgeBase::open(&config.storage).unwrap();
        let hash = kb.get_hash("alice").await.unwrap();
        assert!(credentials::verify_password("secret", &hash).is_ok());
        kb.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_user_not_added() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);

        assert!(run(&config, "alice", "secret").await.unwrap());
        assert!(!run(&config, "alice", "other").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_password_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);

        assert!(run(&config, "alice", "").await.is_err());
    }
}

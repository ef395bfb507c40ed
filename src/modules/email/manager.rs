use keyring::Entry;
use std::time::{SystemTime, UNIX_EPOCH};

use super::smtp::SmtpCredentials;

/// Structure to manage SMTP credentials in the system keyring
pub struct MailCredentialManager {
    // Keyring entry for storing credentials
    keyring: Result<Entry, keyring::Error>,
}

impl MailCredentialManager {
    // Create a new instance of MailCredentialManager
    pub fn new() -> Self {
        Self {
            keyring: Entry::new("latchkey", "smtp-credentials"),
        }
    }

    fn entry(&self) -> Result<&Entry, String> {
        self.keyring
            .as_ref()
            .map_err(|e| format!("Keyring unavailable: {}", e))
    }

    // Store new SMTP credentials in the system keyring
    pub fn store_credentials(
        &self,
        username: &str,
        password: &str,
        host: &str,
        port: u16,
    ) -> Result<(), String> {
        // Create new credentials structure
        let credentials = SmtpCredentials {
            username: username.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
            last_updated: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };

        // Serialize credentials to JSON string
        let creds_json = serde_json::to_string(&credentials)
            .map_err(|e| format!("Failed to serialize credentials: {}", e))?;

        // Store in system keyring
        self.entry()?
            .set_password(&creds_json)
            .map_err(|e| format!("Failed to store credentials: {}", e))
    }

    // Retrieve stored SMTP credentials from the system keyring
    pub fn get_credentials(&self) -> Result<SmtpCredentials, String> {
        // Get credentials JSON from keyring
        let creds_json = self
            .entry()?
            .get_password()
            .map_err(|e| format!("Failed to retrieve credentials: {}", e))?;

        // Deserialize JSON to SmtpCredentials structure
        serde_json::from_str(&creds_json).map_err(|e| format!("Failed to parse credentials: {}", e))
    }

    // Delete stored credentials from the system keyring
    pub fn delete_credentials(&self) -> Result<(), String> {
        self.entry()?
            .delete_password()
            .map_err(|e| format!("Failed to delete credentials: {}", e))
    }
}

impl Default for MailCredentialManager {
    fn default() -> Self {
        Self::new()
    }
}

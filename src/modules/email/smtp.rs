use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::PoolConfig;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};

use super::manager::MailCredentialManager;
use super::Mailer;

/// Structure to hold SMTP credentials with metadata
#[derive(Serialize, Deserialize)]
pub struct SmtpCredentials {
    // The email address/username for SMTP authentication
    pub username: String,
    // The password or app-specific password for SMTP
    pub password: String,
    // SMTP server hostname (e.g., smtp.gmail.com)
    pub host: String,
    // SMTP server port (typically 587 for TLS)
    pub port: u16,
    // When these credentials were last updated
    pub last_updated: u64,
}

/// Mailer that relays through an SMTP server using securely stored
/// credentials
pub struct SmtpMailer {
    manager: MailCredentialManager,
    sender_name: String,
}

impl SmtpMailer {
    pub fn new() -> Self {
        Self {
            manager: MailCredentialManager::new(),
            sender_name: "Latchkey".to_string(),
        }
    }
}

impl Default for SmtpMailer {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        // Retrieve stored credentials
        let creds = self.manager.get_credentials()?;

        // Create email message
        let email = Message::builder()
            .from(
                format!("{} <{}>", self.sender_name, creds.username)
                    .parse()
                    .map_err(|e| format!("Invalid from address: {}", e))?,
            )
            .to(to
                .parse()
                .map_err(|e| format!("Invalid to address: {}", e))?)
            .subject(subject)
            .header(lettre::message::header::ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| format!("Failed to create email: {}", e))?;

        // Configure TLS parameters
        let tls_parameters = TlsParameters::builder(creds.host.clone())
            .build()
            .map_err(|e| format!("Failed to build TLS parameters: {}", e))?;

        // Set up SMTP transport with explicit TLS configuration
        let mailer = SmtpTransport::relay(&creds.host)
            .map_err(|e| format!("Failed to create SMTP transport: {}", e))?
            .credentials(Credentials::new(creds.username, creds.password))
            .port(creds.port)
            .tls(Tls::Required(tls_parameters))
            .pool_config(PoolConfig::new().max_size(1))
            .timeout(Some(std::time::Duration::from_secs(10)))
            .build();

        // Send the email
        match mailer.send(&email) {
            Ok(_) => {
                log::info!("Email sent to: {}", to);
                Ok(())
            }
            Err(e) => Err(format!("Failed to send email: {}", e)),
        }
    }
}

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum MailerError {
    #[error("Invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Sends account-verification mail over SMTP. Without SMTP configuration the
/// mailer logs the verification link instead of sending it.
#[derive(Clone)]
pub struct Mailer {
    transport: Option<SmtpTransport>,
    from: Mailbox,
    base_url: String,
}

impl Mailer {
    pub fn from_config(config: &Config) -> Result<Self, MailerError> {
        let from: Mailbox = config.smtp_from.parse()?;

        let transport = match &config.smtp_host {
            Some(host) => {
                let mut builder = SmtpTransport::relay(host)?;
                if let (Some(username), Some(password)) =
                    (&config.smtp_username, &config.smtp_password)
                {
                    builder =
                        builder.credentials(Credentials::new(username.clone(), password.clone()));
                }
                Some(builder.build())
            }
            None => None,
        };

        Ok(Self {
            transport,
            from,
            base_url: config.public_base_url.clone(),
        })
    }

    /// Blocking send; call from `spawn_blocking` inside handlers.
    pub fn send_verification(&self, to: &str, token: &str) -> Result<(), MailerError> {
        let link = format!("{}/api/auth/verify-email?token={}", self.base_url, token);

        let Some(transport) = &self.transport else {
            log::info!("SMTP not configured; verification link for {}: {}", to, link);
            return Ok(());
        };

        let mail = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject("Verify your pharmacy account")
            .body(format!(
                "Welcome!\n\nPlease confirm your email address by opening the link \
                 below within 24 hours:\n\n{}\n\nIf you did not create an account, \
                 you can ignore this message.\n",
                link
            ))?;

        transport.send(&mail)?;
        log::info!("verification mail sent to {}", to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envconfig::Envconfig;
    use std::collections::HashMap;

    fn test_config() -> Config {
        let vars: HashMap<String, String> = [
            ("DATABASE_URL", "postgres://localhost/medicart_test"),
            ("JWT_SECRET", "test-secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Config::init_from_hashmap(&vars).unwrap()
    }

    #[test]
    fn logs_instead_of_sending_without_smtp() {
        let mailer = Mailer::from_config(&test_config()).unwrap();
        assert!(mailer.send_verification("new-user@example.com", "abc123").is_ok());
    }

    #[test]
    fn rejects_invalid_recipient() {
        let mut config = test_config();
        config.smtp_host = Some("smtp.example.com".to_string());
        let mailer = Mailer::from_config(&config).unwrap();
        assert!(mailer.send_verification("not an address", "abc123").is_err());
    }
}

//! Email delivery for account lifecycle messages.

use std::path::Path;
use std::sync::Arc;

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
};

use crate::config::Config;
use crate::db::models::users::UserId;
use crate::errors::Error;

#[derive(Clone)]
pub struct Mailer {
    transport: Arc<MailTransport>,
    sender: String,
}

enum MailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl Mailer {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let mail_config = &config.mail;

        let transport = match &mail_config.host {
            Some(host) => {
                let smtp_builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                    .map_err(|e| Error::Internal {
                        operation: format!("create SMTP transport: {e}"),
                    })?
                    .port(mail_config.port)
                    .credentials(Credentials::new(
                        mail_config.username.clone(),
                        mail_config.password.clone(),
                    ));
                MailTransport::Smtp(smtp_builder.build())
            }
            None => {
                // No SMTP host configured: write messages to disk instead,
                // which is what development and the test suite use
                let mail_dir = Path::new(&mail_config.file_dir);
                if !mail_dir.exists() {
                    std::fs::create_dir_all(mail_dir).map_err(|e| Error::Internal {
                        operation: format!("create mail directory: {e}"),
                    })?;
                }
                MailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(mail_dir))
            }
        };

        Ok(Self {
            transport: Arc::new(transport),
            sender: mail_config.sender.clone(),
        })
    }

    /// Welcome email sent after registration, carrying the activation
    /// token the client submits to `PUT /v1/users/activated`.
    pub async fn send_welcome(
        &self,
        to_email: &str,
        to_name: &str,
        user_id: UserId,
        activation_token: &str,
    ) -> Result<(), Error> {
        let plain = format!(
            "Hi {to_name},\n\n\
             Thanks for signing up for a Cinelog account. We're excited to have you on board!\n\n\
             For future reference, your user ID number is {user_id}.\n\n\
             Please send a request to the PUT /v1/users/activated endpoint with the following JSON \
             body to activate your account:\n\n\
             {{\"token\": \"{activation_token}\"}}\n\n\
             Please note that this is a one-time use token and it will expire in 3 days.\n\n\
             Thanks,\n\
             The Cinelog Team\n"
        );
        let html = format!(
            "<html>\n<body>\n\
             <p>Hi {to_name},</p>\n\
             <p>Thanks for signing up for a Cinelog account. We're excited to have you\n\
             on board!</p>\n\
             <p>For future reference, your user ID number is {user_id}.</p>\n\
             <p>Please send a request to the <code>PUT /v1/users/activated</code> endpoint\n\
             with the following JSON body to activate your account:</p>\n\
             <pre><code>{{\"token\": \"{activation_token}\"}}</code></pre>\n\
             <p>Please note that this is a one-time use token and it will expire in 3 days.</p>\n\
             <p>Thanks,</p>\n\
             <p>The Cinelog Team</p>\n\
             </body>\n</html>\n"
        );
        self.send(to_email, "Welcome to Cinelog!", plain, html).await
    }

    /// Replacement activation token for an account that is not yet
    /// activated.
    pub async fn send_activation_token(
        &self,
        to_email: &str,
        to_name: &str,
        activation_token: &str,
    ) -> Result<(), Error> {
        let plain = format!(
            "Hi {to_name},\n\n\
             Please send a request to the PUT /v1/users/activated endpoint with the following JSON \
             body to activate your account:\n\n\
             {{\"token\": \"{activation_token}\"}}\n\n\
             Please note that this is a one-time use token and it will expire in 3 hours.\n\n\
             Thanks,\n\
             The Cinelog Team\n"
        );
        let html = format!(
            "<html>\n<body>\n\
             <p>Hi {to_name},</p>\n\
             <p>Please send a request to the <code>PUT /v1/users/activated</code> endpoint\n\
             with the following JSON body to activate your account:</p>\n\
             <pre><code>{{\"token\": \"{activation_token}\"}}</code></pre>\n\
             <p>Please note that this is a one-time use token and it will expire in 3 hours.</p>\n\
             <p>Thanks,</p>\n\
             <p>The Cinelog Team</p>\n\
             </body>\n</html>\n"
        );
        self.send(to_email, "Activate your Cinelog account", plain, html).await
    }

    /// Password-reset token, submitted to `PUT /v1/users/password`.
    pub async fn send_password_reset_token(
        &self,
        to_email: &str,
        to_name: &str,
        reset_token: &str,
    ) -> Result<(), Error> {
        let plain = format!(
            "Hi {to_name},\n\n\
             Please send a request to the PUT /v1/users/password endpoint with the following JSON \
             body to set a new password:\n\n\
             {{\"password\": \"your new password\", \"token\": \"{reset_token}\"}}\n\n\
             Please note that this is a one-time use token and it will expire in 45 minutes. If you \
             didn't request a password reset you can safely ignore this email.\n\n\
             Thanks,\n\
             The Cinelog Team\n"
        );
        let html = format!(
            "<html>\n<body>\n\
             <p>Hi {to_name},</p>\n\
             <p>Please send a request to the <code>PUT /v1/users/password</code> endpoint\n\
             with the following JSON body to set a new password:</p>\n\
             <pre><code>{{\"password\": \"your new password\", \"token\": \"{reset_token}\"}}</code></pre>\n\
             <p>Please note that this is a one-time use token and it will expire in 45\n\
             minutes. If you didn't request a password reset you can safely ignore this\n\
             email.</p>\n\
             <p>Thanks,</p>\n\
             <p>The Cinelog Team</p>\n\
             </body>\n</html>\n"
        );
        self.send(to_email, "Reset your Cinelog password", plain, html).await
    }

    /// Messages go out as multipart/alternative with a plain-text part
    /// first and an HTML part for clients that render it.
    async fn send(&self, to_email: &str, subject: &str, plain: String, html: String) -> Result<(), Error> {
        let from = self.sender.parse::<Mailbox>().map_err(|e| Error::Internal {
            operation: format!("parse sender address: {e}"),
        })?;
        let to = to_email.parse::<Mailbox>().map_err(|e| Error::Internal {
            operation: format!("parse recipient address: {e}"),
        })?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(plain, html))
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        match self.transport.as_ref() {
            MailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            MailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("write email to file: {e}"),
                })?;
            }
        }

        Ok(())
    }
}

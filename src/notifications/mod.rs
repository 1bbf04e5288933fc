mod dispatcher;
mod mailgun;
pub mod templates;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use dispatcher::{channel, DispatcherSettings, NotificationDispatcher, NotificationHandle, MAIL_TIMEOUT};
pub use mailgun::{MailgunMailer, MailgunSettings};
pub use templates::{EmailTemplate, EmailVars};

/// key: notification-job -> in-memory, lost on restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationJob {
    pub template: String,
    pub recipient: String,
    pub vars: EmailVars,
}

impl NotificationJob {
    pub fn new(template: &str, recipient: impl Into<String>, vars: EmailVars) -> Self {
        Self {
            template: template.to_string(),
            recipient: recipient.into(),
            vars,
        }
    }

    /// Resolves the template and merges the sparse variables. Unknown template names render an
    /// empty template rather than failing.
    pub fn render(&self) -> OutboundEmail {
        let template = templates::lookup(&self.template);
        OutboundEmail {
            to: self.recipient.clone(),
            subject: template.subject.to_string(),
            template: template.template.to_string(),
            variables: self.vars.sparse(),
        }
    }
}

/// A fully rendered message ready for the mail provider.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub template: String,
    pub variables: Map<String, Value>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> anyhow::Result<()>;
}

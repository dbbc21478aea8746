//! Mailer Adapter: delivers a rendered report to its recipients.
//!
//! Two transports are implemented for real: piping to the local `sendmail`
//! binary, and a dry-run transport that writes the message to stdout
//! instead of sending it. A full SMTP+TLS transport is left as an open
//! seam on the `Mailer` trait (see DESIGN.md).

use std::io::Write;
use std::process::{Command, Stdio};

use either::Either;

use crate::error::MailError;

/// One outbound message, already rendered to its final text.
pub struct Message<'a> {
    pub from: &'a str,
    pub to: &'a [String],
    pub subject: &'a str,
    pub body: &'a str,
}

pub trait Mailer {
    fn send(&self, message: &Message) -> Result<(), MailError>;
}

/// Pipes an RFC 5322 message into `sendmail -t`, letting sendmail parse
/// the `To:` header and handle local delivery/routing itself.
pub struct SendmailTransport {
    pub binary: String,
}

impl Default for SendmailTransport {
    fn default() -> Self {
        SendmailTransport { binary: "/usr/sbin/sendmail".to_string() }
    }
}

impl Mailer for SendmailTransport {
    fn send(&self, message: &Message) -> Result<(), MailError> {
        if message.to.is_empty() {
            return Err(MailError::NoRecipients);
        }
        let mut child = Command::new(&self.binary)
            .arg("-t")
            .arg("-oi")
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| MailError::Spawn { source })?;

        {
            let stdin = child.stdin.as_mut().expect("piped stdin");
            let _ = write!(stdin, "From: {}\r\n", message.from);
            let _ = write!(stdin, "To: {}\r\n", message.to.join(", "));
            let _ = write!(stdin, "Subject: {}\r\n", message.subject);
            let _ = write!(stdin, "\r\n{}\r\n", message.body);
        }

        let status = child.wait().map_err(|source| MailError::Spawn { source })?;
        if !status.success() {
            return Err(MailError::SendmailStatus(status.code()));
        }
        Ok(())
    }
}

/// Writes the message to stdout instead of sending it (`--dryrun`).
#[derive(Default)]
pub struct DryRunTransport;

impl Mailer for DryRunTransport {
    fn send(&self, message: &Message) -> Result<(), MailError> {
        if message.to.is_empty() {
            return Err(MailError::NoRecipients);
        }
        println!("From: {}", message.from);
        println!("To: {}", message.to.join(", "));
        println!("Subject: {}", message.subject);
        println!();
        println!("{}", message.body);
        Ok(())
    }
}

/// Lets the run pick sendmail or dry-run at runtime without a trait
/// object: `Either` forwards `send` to whichever side is active.
impl<L: Mailer, R: Mailer> Mailer for Either<L, R> {
    fn send(&self, message: &Message) -> Result<(), MailError> {
        either::for_both!(self, m => m.send(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_rejects_no_recipients() {
        let mailer = DryRunTransport::default();
        let message = Message { from: "a@example.com", to: &[], subject: "s", body: "b" };
        assert!(matches!(mailer.send(&message), Err(MailError::NoRecipients)));
    }

    #[test]
    fn dry_run_accepts_recipients() {
        let mailer = DryRunTransport::default();
        let to = vec!["a@example.com".to_string()];
        let message = Message { from: "a@example.com", to: &to, subject: "s", body: "b" };
        assert!(mailer.send(&message).is_ok());
    }
}

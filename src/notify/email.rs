// src/notify/email.rs
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message, MultiPart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::format::{render_lines, Flavor};
use super::{ChannelKind, Notifier, ReportPayload};
use crate::config::app::ChannelsConfig;

/// `(host, port)` for well-known providers, keyed by sender domain.
fn known_smtp(domain: &str) -> Option<(&'static str, u16)> {
    let entry = match domain {
        "gmail.com" => ("smtp.gmail.com", 587),
        "outlook.com" | "hotmail.com" | "live.com" => ("smtp-mail.outlook.com", 587),
        "qq.com" => ("smtp.qq.com", 465),
        "163.com" => ("smtp.163.com", 465),
        "126.com" => ("smtp.126.com", 465),
        "sina.com" => ("smtp.sina.com", 465),
        "sohu.com" => ("smtp.sohu.com", 465),
        "yahoo.com" => ("smtp.mail.yahoo.com", 465),
        "icloud.com" | "me.com" => ("smtp.mail.me.com", 587),
        _ => return None,
    };
    Some(entry)
}

/// Explicit server/port win; otherwise the sender's domain decides, falling
/// back to `smtp.<domain>:587`.
pub(crate) fn resolve_smtp(from: &str, server: &str, port: &str) -> Result<(String, u16)> {
    let domain = from
        .rsplit_once('@')
        .map(|(_, d)| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| anyhow!("sender address has no domain: {from}"))?;
    let known = known_smtp(&domain);

    let host = match server.trim() {
        "" => known.map(|(h, _)| h.to_string()).unwrap_or_else(|| format!("smtp.{domain}")),
        s => s.to_string(),
    };
    let port = match port.trim() {
        "" => known.map(|(_, p)| p).unwrap_or(587),
        p => p.parse().with_context(|| format!("invalid SMTP port: {p}"))?,
    };
    Ok((host, port))
}

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailNotifier {
    pub fn from_settings(ch: &ChannelsConfig) -> Result<Self> {
        let from_addr = ch.email_from.trim();
        let (host, port) = resolve_smtp(from_addr, &ch.email_smtp_server, &ch.email_smtp_port)?;

        let creds = Credentials::new(from_addr.to_string(), ch.email_password.clone());
        // 465 is implicit TLS, everything else upgrades with STARTTLS.
        let builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
        }
        .with_context(|| format!("invalid SMTP host {host}"))?;
        let mailer = builder.port(port).credentials(creds).build();

        let from: Mailbox = from_addr
            .parse()
            .with_context(|| format!("invalid sender address {from_addr}"))?;
        let to = parse_recipients(&ch.email_to)?;

        Ok(Self { mailer, from, to })
    }
}

/// Comma-separated recipient list.
fn parse_recipients(raw: &str) -> Result<Vec<Mailbox>> {
    let to = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Mailbox>()
                .with_context(|| format!("invalid recipient address {s}"))
        })
        .collect::<Result<Vec<_>>>()?;
    if to.is_empty() {
        bail!("no email recipients");
    }
    Ok(to)
}

fn subject(report: &ReportPayload) -> String {
    format!(
        "{} - {}",
        report.report_type,
        report.generated_at.format("%Y-%m-%d %H:%M")
    )
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, report: &ReportPayload) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject(report));
        for to in &self.to {
            builder = builder.to(to.clone());
        }

        let plain = render_lines(report, Flavor::Plain).join("\n");
        let msg = match &report.html_body {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(plain, html.clone())),
            None => builder.header(header::ContentType::TEXT_PLAIN).body(plain),
        }
        .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::tests::sample_report;

    #[test]
    fn smtp_is_detected_from_the_sender_domain() {
        assert_eq!(
            resolve_smtp("me@gmail.com", "", "").unwrap(),
            ("smtp.gmail.com".to_string(), 587)
        );
        assert_eq!(
            resolve_smtp("me@QQ.com", "", "").unwrap(),
            ("smtp.qq.com".to_string(), 465)
        );
        assert_eq!(
            resolve_smtp("me@corp.example", "", "").unwrap(),
            ("smtp.corp.example".to_string(), 587)
        );
    }

    #[test]
    fn explicit_server_and_port_win() {
        assert_eq!(
            resolve_smtp("me@gmail.com", "mail.internal", "2525").unwrap(),
            ("mail.internal".to_string(), 2525)
        );
        assert!(resolve_smtp("me@gmail.com", "", "abc").is_err());
        assert!(resolve_smtp("nobody", "", "").is_err());
    }

    #[test]
    fn recipients_are_comma_separated() {
        let to = parse_recipients("a@x.com, b@y.org,").unwrap();
        assert_eq!(to.len(), 2);
        assert!(parse_recipients(" , ").is_err());
        assert!(parse_recipients("not-an-address").is_err());
    }

    #[tokio::test]
    async fn builds_from_channel_settings() {
        let ch = ChannelsConfig {
            email_from: "bot@gmail.com".into(),
            email_password: "secret".into(),
            email_to: "ops@example.com".into(),
            ..ChannelsConfig::default()
        };
        let n = EmailNotifier::from_settings(&ch).unwrap();
        assert_eq!(n.to.len(), 1);
        assert_eq!(n.channel(), ChannelKind::Email);
    }

    #[test]
    fn subject_carries_type_and_time() {
        assert_eq!(subject(&sample_report()), "Daily Summary - 2025-03-01 09:30");
    }
}

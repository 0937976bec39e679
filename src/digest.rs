//! Unread-notification digest.
//!
//! Collects everything unread, groups it by obligation kind, and renders a
//! subject plus text, HTML, and JSON bodies for a delivery channel. Delivery
//! is at-least-once: notifications are only marked read after the channel
//! accepts the digest, so a failed send leaves them in the next digest.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::clock::Clock;
use crate::error::Result;
use crate::model::{Notification, ObligationKind};
use crate::store::NotificationStore;

/// Items due within this many days (or overdue) are flagged urgent.
pub const URGENT_WITHIN_DAYS: i64 = 7;

/// One notification prepared for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct DigestItem {
    pub notification_id: String,
    pub vehicle_id: i64,
    pub message: String,
    pub due_date: NaiveDate,
    /// Negative when overdue.
    pub days_until_due: i64,
    pub urgent: bool,
}

/// All items of one obligation kind.
#[derive(Debug, Clone, Serialize)]
pub struct DigestSection {
    pub kind: ObligationKind,
    pub items: Vec<DigestItem>,
}

/// A composed digest; never empty (composition returns `None` instead).
#[derive(Debug, Clone, Serialize)]
pub struct Digest {
    pub generated_on: NaiveDate,
    pub sections: Vec<DigestSection>,
}

impl Digest {
    pub fn total(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    pub fn urgent_count(&self) -> usize {
        self.sections
            .iter()
            .flat_map(|s| &s.items)
            .filter(|i| i.urgent)
            .count()
    }

    fn notification_ids(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .flat_map(|s| &s.items)
            .map(|i| i.notification_id.as_str())
    }
}

/// Rendered digest ready for a delivery channel.
#[derive(Debug, Clone)]
pub struct RenderedDigest {
    pub subject: String,
    pub text: String,
    pub html: String,
    /// Structured payload for channels that post JSON (webhooks, push).
    pub json: String,
}

/// Outbound transport for a rendered digest (email, push, test recorder).
pub trait DeliveryChannel: Send + Sync {
    fn deliver(&self, digest: &RenderedDigest) -> Result<()>;
}

/// Builds and sends unread-notification digests.
pub struct DigestComposer {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
}

impl DigestComposer {
    pub fn new(store: Arc<dyn NotificationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Compose a digest from the current unread set.
    ///
    /// Returns `None` when there is nothing unread. Sections appear in the
    /// order their kind is first encountered in the (due-date-ordered)
    /// unread list, so the most pressing kind leads.
    pub fn compose(&self) -> Result<Option<Digest>> {
        let today = self.clock.today();
        let unread = self.store.unread_notifications()?;
        if unread.is_empty() {
            return Ok(None);
        }

        let mut sections: Vec<DigestSection> = Vec::new();
        for notification in &unread {
            let item = to_item(notification, today);
            match sections.iter_mut().find(|s| s.kind == notification.kind) {
                Some(section) => section.items.push(item),
                None => sections.push(DigestSection {
                    kind: notification.kind,
                    items: vec![item],
                }),
            }
        }

        Ok(Some(Digest {
            generated_on: today,
            sections,
        }))
    }

    /// Render subject and bodies for a composed digest.
    pub fn render(&self, digest: &Digest) -> Result<RenderedDigest> {
        let total = digest.total();
        let urgent = digest.urgent_count();
        let subject = if urgent > 0 {
            format!("GarageLog: {total} pending item(s), {urgent} urgent")
        } else {
            format!("GarageLog: {total} pending item(s)")
        };

        let mut text = format!("Vehicle digest for {}\n", digest.generated_on);
        let mut html = format!("<h1>Vehicle digest for {}</h1>\n", digest.generated_on);
        for section in &digest.sections {
            let label = section.kind.label();
            text.push_str(&format!("\n{label}:\n"));
            html.push_str(&format!("<h2>{label}</h2>\n<ul>\n"));
            for item in &section.items {
                let marker = if item.urgent { " [urgent]" } else { "" };
                text.push_str(&format!("  - {}{marker}\n", item.message));
                if item.urgent {
                    html.push_str(&format!("<li><strong>{}</strong></li>\n", item.message));
                } else {
                    html.push_str(&format!("<li>{}</li>\n", item.message));
                }
            }
            html.push_str("</ul>\n");
        }

        let json = serde_json::to_string(digest)?;
        Ok(RenderedDigest {
            subject,
            text,
            html,
            json,
        })
    }

    /// Compose, render, and deliver one digest.
    ///
    /// Returns `false` without touching the channel when nothing is unread.
    /// On successful delivery every digested notification is marked read.
    pub fn send(&self, channel: &dyn DeliveryChannel) -> Result<bool> {
        let Some(digest) = self.compose()? else {
            info!("no unread notifications, digest skipped");
            return Ok(false);
        };

        let rendered = self.render(&digest)?;
        channel.deliver(&rendered)?;

        let now = self.clock.now();
        for id in digest.notification_ids() {
            self.store.mark_read(id, now)?;
        }
        info!(
            items = digest.total(),
            urgent = digest.urgent_count(),
            "digest delivered and notifications marked read"
        );
        Ok(true)
    }
}

fn to_item(notification: &Notification, today: NaiveDate) -> DigestItem {
    let days_until_due = (notification.due_date - today).num_days();
    DigestItem {
        notification_id: notification.id.clone(),
        vehicle_id: notification.vehicle_id,
        message: notification.message.clone(),
        due_date: notification.due_date,
        days_until_due,
        urgent: days_until_due <= URGENT_WITHIN_DAYS,
    }
}

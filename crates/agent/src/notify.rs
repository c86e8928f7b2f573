use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use callhook_core::domain::business::Business;
use callhook_core::notifications::{plan_delivery, render, NotificationData, NotificationEvent};
use callhook_core::ports::{EmailSender, SmsSender};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NotificationReport {
    pub sms_sent: bool,
    pub email_sent: bool,
}

/// Owner alerts over SMS and email. Each channel is attempted on its own;
/// a failure on one never stops the other.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sms: Arc<dyn SmsSender>,
    email: Arc<dyn EmailSender>,
}

impl NotificationDispatcher {
    pub fn new(sms: Arc<dyn SmsSender>, email: Arc<dyn EmailSender>) -> Self {
        Self { sms, email }
    }

    pub async fn notify(
        &self,
        business: &Business,
        event: NotificationEvent,
        data: &NotificationData,
        now: DateTime<Utc>,
    ) -> NotificationReport {
        let local = business.local_time(now).time();
        let plan = plan_delivery(&business.notification_prefs, event, local);
        let rendered = render(event, data);
        let mut report = NotificationReport::default();

        if plan.is_empty() {
            debug!(
                event_name = "notification.suppressed",
                business_id = %business.id,
                notification = event.as_str(),
                "no channel enabled for this notification"
            );
            return report;
        }

        if plan.sms && !business.owner_phone.trim().is_empty() {
            match self.sms.send_sms(&business.owner_phone, &business.twilio_number, &rendered.body).await
            {
                Ok(_) => report.sms_sent = true,
                Err(error) => warn!(
                    event_name = "notification.sms.failed",
                    business_id = %business.id,
                    notification = event.as_str(),
                    error = %error,
                    "owner sms notification failed"
                ),
            }
        }

        if plan.email && !business.owner_email.trim().is_empty() {
            match self.email.send_email(&business.owner_email, &rendered.subject, &rendered.body).await
            {
                Ok(()) => report.email_sent = true,
                Err(error) => warn!(
                    event_name = "notification.email.failed",
                    business_id = %business.id,
                    notification = event.as_str(),
                    error = %error,
                    "owner email notification failed"
                ),
            }
        }

        info!(
            event_name = "notification.dispatched",
            business_id = %business.id,
            lead_id = data.lead_id.as_ref().map(|id| id.as_str()).unwrap_or_default(),
            notification = event.as_str(),
            sms = report.sms_sent,
            email = report.email_sent,
            "owner notified"
        );
        report
    }
}

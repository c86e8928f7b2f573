//! Timed sequence policies: follow-up nudges, review requests and retry backoff.

use chrono::{DateTime, Duration, Utc};

use crate::config::{FollowUpConfig, SchedulerConfig};

/// Number of automated follow-up texts before a conversation closes as unresponsive.
pub const FOLLOW_UP_SEQUENCE_LEN: usize = DEFAULT_FOLLOW_UPS.len();

const DEFAULT_FOLLOW_UPS: [&str; 3] = [
    "Hi, just checking in from {business}. Still need help with your heating or cooling? Reply here and we'll get you taken care of.",
    "Hey, it's {business} again. We still have openings this week if you need service. Just reply to this text.",
    "Last check-in from {business}. If you ever need help, reply anytime and we'll get right back to you.",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FollowUpDecision {
    /// Send `text`, bump the counter to `next_count`, and re-arm after `next_delay`.
    Send { text: String, next_count: u32, next_delay: Duration },
    /// Sequence exhausted; close the conversation as unresponsive.
    Close,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FollowUpPolicy {
    pub reply_window: Duration,
    pub messages: Vec<String>,
    pub delays: Vec<Duration>,
}

impl FollowUpPolicy {
    pub fn from_config(config: &FollowUpConfig) -> Self {
        Self {
            reply_window: minutes(config.reply_window_minutes),
            messages: DEFAULT_FOLLOW_UPS.iter().map(|text| (*text).to_string()).collect(),
            delays: config.delays_minutes.iter().copied().map(minutes).collect(),
        }
    }

    pub fn sequence_len(&self) -> u32 {
        u32::try_from(self.messages.len()).unwrap_or(u32::MAX)
    }

    /// Decides what a firing nudge does given the live `follow_up_count`.
    /// The delay table is indexed by the same counter as the message list.
    pub fn decide(&self, follow_up_count: u32, business_name: &str) -> FollowUpDecision {
        let index = follow_up_count as usize;
        let Some(template) = self.messages.get(index) else {
            return FollowUpDecision::Close;
        };
        let next_delay = self
            .delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(self.reply_window);
        FollowUpDecision::Send {
            text: template.replace("{business}", business_name),
            next_count: follow_up_count + 1,
            next_delay,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReviewPolicy {
    pub request_delay: Duration,
    pub reminder_delay: Duration,
}

impl ReviewPolicy {
    pub fn from_config(config: &FollowUpConfig) -> Self {
        Self {
            request_delay: minutes(config.review_request_delay_minutes),
            reminder_delay: minutes(config.review_reminder_delay_minutes),
        }
    }

    pub fn request_at(&self, job_completed_at: DateTime<Utc>) -> DateTime<Utc> {
        job_completed_at + self.request_delay
    }

    /// Anchored on job completion, not on when the first request went out.
    pub fn reminder_at(&self, job_completed_at: DateTime<Utc>) -> DateTime<Utc> {
        job_completed_at + self.reminder_delay
    }
}

pub fn review_message(business_name: &str, lead_name: Option<&str>, link: &str) -> String {
    let greeting = match lead_name.map(str::trim) {
        Some(name) if !name.is_empty() => format!("Hi {name}"),
        _ => "Hi".to_string(),
    };
    format!(
        "{greeting}, thanks for choosing {business_name}! If you have a minute, we'd really appreciate a quick review: {link}"
    )
}

pub fn review_reminder_message(business_name: &str, link: &str) -> String {
    format!(
        "Quick reminder from {business_name}: we'd love to hear how your service went. Leave a review here: {link}"
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::seconds(i64::try_from(config.retry_base_delay_secs).unwrap_or(30)),
        }
    }

    /// `None` once `attempts` has reached the limit.
    pub fn next_retry(&self, attempts: u32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        let factor = 2_i32.saturating_pow(attempts.saturating_sub(1).min(16));
        Some(self.base_delay * factor)
    }
}

fn minutes(value: u32) -> Duration {
    Duration::minutes(i64::from(value))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{FollowUpDecision, FollowUpPolicy, RetryPolicy, ReviewPolicy};
    use crate::config::FollowUpConfig;

    #[test]
    fn follow_up_sequence_terminates_after_last_message() {
        let policy = FollowUpPolicy::from_config(&FollowUpConfig::default());
        let mut count = 0;
        let mut sent = Vec::new();

        loop {
            match policy.decide(count, "Cool Breeze") {
                FollowUpDecision::Send { text, next_count, next_delay } => {
                    assert!(text.contains("Cool Breeze"));
                    sent.push(next_delay);
                    count = next_count;
                }
                FollowUpDecision::Close => break,
            }
            assert!(count <= policy.sequence_len());
        }

        assert_eq!(count, 3);
        assert_eq!(sent, vec![Duration::minutes(1440), Duration::minutes(4320), Duration::minutes(4320)]);
    }

    #[test]
    fn counter_past_the_end_closes() {
        let policy = FollowUpPolicy::from_config(&FollowUpConfig::default());
        assert_eq!(policy.decide(7, "x"), FollowUpDecision::Close);
    }

    #[test]
    fn review_reminder_is_anchored_on_completion() {
        let policy = ReviewPolicy::from_config(&FollowUpConfig::default());
        let done = Utc.with_ymd_and_hms(2026, 5, 1, 15, 0, 0).single().expect("time");
        assert_eq!(policy.request_at(done), done + Duration::hours(2));
        assert_eq!(policy.reminder_at(done), done + Duration::hours(48));
    }

    #[test]
    fn retry_backoff_doubles_until_limit() {
        let policy = RetryPolicy { max_attempts: 4, base_delay: Duration::seconds(30) };
        assert_eq!(policy.next_retry(1), Some(Duration::seconds(30)));
        assert_eq!(policy.next_retry(2), Some(Duration::seconds(60)));
        assert_eq!(policy.next_retry(3), Some(Duration::seconds(120)));
        assert_eq!(policy.next_retry(4), None);
    }
}

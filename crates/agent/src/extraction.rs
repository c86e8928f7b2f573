//! Qualification field extraction from free text.
//!
//! Extractors are advisory: whatever they return goes through
//! [`callhook_core::qualification::merge`], which never overwrites a known field.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use callhook_core::domain::business::Service;
use callhook_core::domain::lead::{Lead, Urgency};
use callhook_core::qualification::QualificationUpdate;

use crate::llm::{ChatMessage, CompletionRequest, LlmClient};

pub struct ExtractionContext<'a> {
    pub text: &'a str,
    pub lead: &'a Lead,
    pub services: &'a [Service],
}

#[async_trait]
pub trait QualificationExtractor: Send + Sync {
    /// Never fails; an extractor that cannot read the text returns an empty update.
    async fn extract(&self, context: ExtractionContext<'_>) -> QualificationUpdate;
}

const SERVICE_PHRASES: [(&str, &str); 14] = [
    ("furnace", "Furnace Repair"),
    ("heat pump", "Heat Pump Service"),
    ("boiler", "Boiler Repair"),
    ("water heater", "Water Heater Service"),
    ("thermostat", "Thermostat Installation"),
    ("duct", "Duct Cleaning"),
    ("tune up", "AC Tune-Up"),
    ("tune-up", "AC Tune-Up"),
    ("maintenance", "HVAC Maintenance"),
    ("install", "HVAC Installation"),
    ("air conditioning", "AC Repair"),
    ("air conditioner", "AC Repair"),
    ("a/c", "AC Repair"),
    ("ac ", "AC Repair"),
];

const EMERGENCY_PHRASES: [&str; 8] = [
    "gas smell",
    "smell gas",
    "smells like gas",
    "carbon monoxide",
    "co detector",
    "co alarm",
    "flooding",
    "smoke",
];

const HIGH_URGENCY_PHRASES: [&str; 8] =
    ["no heat", "no ac", "not working", "stopped working", "asap", "urgent", "right away", "today"];

const LOW_URGENCY_PHRASES: [&str; 4] = ["no rush", "whenever", "next week", "not urgent"];

/// Regex and keyword extraction. Cheap and deterministic; used on its own in
/// tests and as the fallback when the language model is unavailable.
#[derive(Clone, Debug)]
pub struct HeuristicExtractor {
    name: Regex,
    email: Regex,
    address: Regex,
    preferred_time: Regex,
}

impl HeuristicExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            name: Regex::new(
                r"(?:(?i:my name is|my name's|name is|this is|call me)\s+)([A-Z][a-zA-Z'\-]+(?:\s+[A-Z][a-zA-Z'\-]+)?)",
            )?,
            email: Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}")?,
            address: Regex::new(
                r"\b\d{1,6}\s+(?:[A-Za-z0-9.']+\s+){0,4}(?i:street|st|avenue|ave|road|rd|drive|dr|lane|ln|boulevard|blvd|court|ct|way|place|pl|circle|cir|parkway|pkwy|highway|hwy|terrace|ter)\b\.?(?:,?\s+(?:[A-Za-z]+\s?){1,3})?",
            )?,
            preferred_time: Regex::new(
                r"(?i)\b(?:(?:this|tomorrow)\s+(?:morning|afternoon|evening)|tomorrow|today|tonight|(?:mon|tues|wednes|thurs|fri|satur|sun)day(?:\s+(?:morning|afternoon|evening))?)(?:\s+(?:at|around|after|before)\s+\d{1,2}(?::\d{2})?\s*(?:am|pm)?)?",
            )?,
        })
    }

    pub fn extract_text(&self, text: &str, services: &[Service]) -> QualificationUpdate {
        let lowered = format!("{} ", text.to_lowercase());
        QualificationUpdate {
            name: self
                .name
                .captures(text)
                .and_then(|captures| captures.get(1))
                .map(|name| name.as_str().trim().to_string()),
            email: self.email.find(text).map(|email| email.as_str().to_string()),
            service_needed: service_phrase(&lowered, services),
            urgency: urgency(&lowered),
            address: self
                .address
                .find(text)
                .map(|address| address.as_str().trim().trim_end_matches(['.', ',']).to_string()),
            preferred_time: self
                .preferred_time
                .find(text)
                .map(|time| time.as_str().trim().to_string()),
            additional_notes: None,
        }
    }
}

#[async_trait]
impl QualificationExtractor for HeuristicExtractor {
    async fn extract(&self, context: ExtractionContext<'_>) -> QualificationUpdate {
        self.extract_text(context.text, context.services)
    }
}

/// A business's own service names win over the generic HVAC vocabulary.
fn service_phrase(lowered: &str, services: &[Service]) -> Option<String> {
    let mut own: Vec<&Service> = services.iter().filter(|service| service.is_active).collect();
    own.sort_by_key(|service| service.sort_order);
    if let Some(service) =
        own.into_iter().find(|service| lowered.contains(&service.name.to_lowercase()))
    {
        return Some(service.name.clone());
    }

    SERVICE_PHRASES
        .iter()
        .find(|(phrase, _)| lowered.contains(phrase))
        .map(|(_, service)| (*service).to_string())
        .or_else(|| {
            (lowered.contains("heat") || lowered.contains("heating"))
                .then(|| "Heating Repair".to_string())
        })
}

fn urgency(lowered: &str) -> Option<Urgency> {
    if EMERGENCY_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        Some(Urgency::Emergency)
    } else if HIGH_URGENCY_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        Some(Urgency::High)
    } else if LOW_URGENCY_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        Some(Urgency::Low)
    } else {
        None
    }
}

/// Asks the language model for a JSON object of lead fields and reads it
/// field by field. Falls back to the heuristic extractor on any failure.
pub struct LlmExtractor {
    client: Arc<dyn LlmClient>,
    fallback: HeuristicExtractor,
    max_tokens: u32,
}

impl LlmExtractor {
    pub fn new(client: Arc<dyn LlmClient>, fallback: HeuristicExtractor) -> Self {
        Self { client, fallback, max_tokens: 200 }
    }

    fn request(&self, context: &ExtractionContext<'_>) -> CompletionRequest {
        let known = |value: &Option<String>| value.clone().unwrap_or_else(|| "unknown".to_string());
        let system = format!(
            "Extract service-call details from the customer's text message. Reply with a single \
             JSON object using only these keys: name, email, service_needed, urgency \
             (low|medium|high|emergency), address, preferred_time, additional_notes. Use null \
             for anything not stated. Already known: name={}, service_needed={}, address={}.",
            known(&context.lead.name),
            known(&context.lead.service_needed),
            known(&context.lead.address),
        );
        CompletionRequest {
            messages: vec![ChatMessage::system(system), ChatMessage::user(context.text)],
            max_tokens: self.max_tokens,
            temperature: 0.0,
        }
    }
}

#[async_trait]
impl QualificationExtractor for LlmExtractor {
    async fn extract(&self, context: ExtractionContext<'_>) -> QualificationUpdate {
        let request = self.request(&context);
        match self.client.complete(&request).await {
            Ok(raw) => match parse_json_object(&raw) {
                Some(value) => QualificationUpdate::from_json(&value),
                None => {
                    warn!(
                        event_name = "extraction.llm.unparseable",
                        lead_id = %context.lead.id,
                        "extraction output was not a JSON object; using heuristics"
                    );
                    self.fallback.extract_text(context.text, context.services)
                }
            },
            Err(error) => {
                warn!(
                    event_name = "extraction.llm.failed",
                    lead_id = %context.lead.id,
                    error = %error,
                    "extraction request failed; using heuristics"
                );
                self.fallback.extract_text(context.text, context.services)
            }
        }
    }
}

/// Models like to wrap JSON in prose or code fences; take the outermost object.
fn parse_json_object(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Value>(&raw[start..=end]).ok().filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use callhook_core::domain::business::{BusinessId, Service, ServiceId};
    use callhook_core::domain::lead::{Lead, LeadSource, Urgency};

    use super::{
        parse_json_object, ExtractionContext, HeuristicExtractor, LlmExtractor,
        QualificationExtractor,
    };
    use crate::llm::{CompletionRequest, LlmClient};

    fn lead() -> Lead {
        Lead::new(BusinessId::from("biz"), "+15551234567", LeadSource::Sms, Utc::now())
    }

    fn extractor() -> HeuristicExtractor {
        HeuristicExtractor::new().expect("patterns compile")
    }

    #[test]
    fn heuristics_pick_up_the_usual_fields() {
        let update = extractor().extract_text(
            "Hi this is Maria Lopez, our furnace stopped working. We're at 42 Oak Street, \
             tomorrow morning works. maria@example.com",
            &[],
        );
        assert_eq!(update.name.as_deref(), Some("Maria Lopez"));
        assert_eq!(update.service_needed.as_deref(), Some("Furnace Repair"));
        assert_eq!(update.urgency, Some(Urgency::High));
        assert!(update.address.as_deref().is_some_and(|address| address.starts_with("42 Oak Street")));
        assert_eq!(update.preferred_time.as_deref(), Some("tomorrow morning"));
        assert_eq!(update.email.as_deref(), Some("maria@example.com"));
    }

    #[test]
    fn gas_smell_is_an_emergency() {
        let update = extractor().extract_text("I smell gas near the furnace", &[]);
        assert_eq!(update.urgency, Some(Urgency::Emergency));
    }

    #[test]
    fn business_services_take_priority_over_generic_phrases() {
        let services = vec![Service {
            id: ServiceId::from("svc"),
            business_id: BusinessId::from("biz"),
            name: "Furnace Tune-Up".to_string(),
            price: Some(Decimal::new(129, 0)),
            duration_minutes: 60,
            is_bookable: true,
            is_active: true,
            sort_order: 0,
        }];
        let update = extractor().extract_text("can you do a furnace tune-up next week", &services);
        assert_eq!(update.service_needed.as_deref(), Some("Furnace Tune-Up"));
        assert_eq!(update.urgency, Some(Urgency::Low));
    }

    #[test]
    fn small_talk_yields_nothing() {
        let update = extractor().extract_text("ok thanks", &[]);
        assert!(update.is_empty());
    }

    #[test]
    fn json_is_found_inside_prose() {
        let value = parse_json_object("Sure! ```json\n{\"name\": \"Pat\"}\n```").expect("object");
        assert_eq!(value["name"], "Pat");
        assert!(parse_json_object("[1, 2]").is_none());
        assert!(parse_json_object("no json here").is_none());
    }

    struct CannedClient(anyhow::Result<String>);

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn complete(&self, _request: &CompletionRequest) -> anyhow::Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(error) => Err(anyhow::anyhow!(error.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn llm_output_is_read_field_by_field() {
        let client = CannedClient(Ok(
            r#"{"name": "Pat", "urgency": "sometime", "address": null, "service_needed": "AC Repair"}"#
                .to_string(),
        ));
        let extractor = LlmExtractor::new(Arc::new(client), extractor());
        let lead = lead();
        let update = extractor
            .extract(ExtractionContext { text: "hi", lead: &lead, services: &[] })
            .await;
        assert_eq!(update.name.as_deref(), Some("Pat"));
        assert_eq!(update.service_needed.as_deref(), Some("AC Repair"));
        assert_eq!(update.urgency, None, "unknown urgency is dropped, not fatal");
        assert_eq!(update.address, None);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_heuristics() {
        let extractor =
            LlmExtractor::new(Arc::new(CannedClient(Err(anyhow::anyhow!("timeout")))), extractor());
        let lead = lead();
        let update = extractor
            .extract(ExtractionContext { text: "my name is Sam", lead: &lead, services: &[] })
            .await;
        assert_eq!(update.name.as_deref(), Some("Sam"));
    }
}

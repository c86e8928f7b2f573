//! Incremental lead qualification: additive merge of extracted fields and the
//! name + service + address rule.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::business::Service;
use crate::domain::lead::{is_present, Lead, LeadStatus, Urgency};

const FUZZY_THRESHOLD: f64 = 0.88;

/// Partial lead fields produced by an extractor. Every field is advisory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub service_needed: Option<String>,
    pub urgency: Option<Urgency>,
    pub address: Option<String>,
    pub preferred_time: Option<String>,
    pub additional_notes: Option<String>,
}

impl QualificationUpdate {
    /// Reads a loosely-typed JSON object field by field. Values of the wrong
    /// type or an unknown urgency are dropped without failing the rest.
    pub fn from_json(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        let text = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| object.get(*key))
                .filter_map(Value::as_str)
                .map(str::trim)
                .find(|value| !value.is_empty() && !is_placeholder(value))
                .map(str::to_string)
        };
        Self {
            name: text(&["name", "caller_name"]),
            email: text(&["email"]).filter(|email| email.contains('@')),
            service_needed: text(&["service_needed", "service"]),
            urgency: text(&["urgency"]).as_deref().and_then(Urgency::parse),
            address: text(&["address", "service_address"]),
            preferred_time: text(&["preferred_time"]),
            additional_notes: text(&["additional_notes", "notes"]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn is_placeholder(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "unknown" | "null" | "none" | "n/a")
}

/// Applies `update` to `lead` without overwriting known fields. Urgency may
/// escalate or change; notes are appended once. Returns whether anything changed.
pub fn merge(lead: &mut Lead, update: &QualificationUpdate) -> bool {
    let mut changed = false;
    changed |= fill(&mut lead.name, &update.name);
    changed |= fill(&mut lead.email, &update.email);
    changed |= fill(&mut lead.service_needed, &update.service_needed);
    changed |= fill(&mut lead.address, &update.address);
    changed |= fill(&mut lead.preferred_time, &update.preferred_time);

    if let Some(urgency) = update.urgency {
        if lead.urgency != Some(urgency) {
            lead.urgency = Some(urgency);
            changed = true;
        }
    }

    if let Some(note) = update.additional_notes.as_deref().map(str::trim) {
        if !note.is_empty() {
            match lead.notes.as_mut() {
                Some(existing) if existing.lines().any(|line| line.trim() == note) => {}
                Some(existing) if !existing.trim().is_empty() => {
                    existing.push('\n');
                    existing.push_str(note);
                    changed = true;
                }
                _ => {
                    lead.notes = Some(note.to_string());
                    changed = true;
                }
            }
        }
    }
    changed
}

fn fill(slot: &mut Option<String>, candidate: &Option<String>) -> bool {
    if is_present(slot) {
        return false;
    }
    match candidate.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => {
            *slot = Some(value.to_string());
            true
        }
        _ => false,
    }
}

pub fn is_qualified(lead: &Lead) -> bool {
    is_present(&lead.name) && is_present(&lead.service_needed) && is_present(&lead.address)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualificationOutcome {
    pub qualified: bool,
    /// True only when this evaluation moved the lead into `qualified`.
    pub newly_qualified: bool,
    pub status_change: Option<LeadStatus>,
    pub estimated_value: Option<Decimal>,
}

/// Applies the qualification rule to an already-merged lead and writes the
/// resulting status and estimate back onto it.
pub fn evaluate(lead: &mut Lead, services: &[Service], avg_job_value: Decimal) -> QualificationOutcome {
    let qualified = is_qualified(lead);
    let mut outcome = QualificationOutcome {
        qualified,
        newly_qualified: false,
        status_change: None,
        estimated_value: None,
    };

    let promoted = if qualified { promote(lead, services, avg_job_value) } else { None };
    if let Some(estimate) = promoted {
        outcome.newly_qualified = true;
        outcome.status_change = Some(LeadStatus::Qualified);
        outcome.estimated_value = Some(estimate);
    } else if !qualified && lead.status == LeadStatus::New {
        lead.status = LeadStatus::Qualifying;
        outcome.status_change = Some(LeadStatus::Qualifying);
    }
    outcome
}

/// Moves a lead into `qualified` and prices it from the matched service, or
/// `avg_job_value` when nothing matches. Leads already qualified or booked are
/// left alone; a completed customer with a new job qualifies again.
pub fn promote(lead: &mut Lead, services: &[Service], avg_job_value: Decimal) -> Option<Decimal> {
    if matches!(lead.status, LeadStatus::Qualified | LeadStatus::Booked) {
        return None;
    }
    let estimate = lead
        .service_needed
        .as_deref()
        .and_then(|phrase| match_service(services, phrase))
        .and_then(|service| service.price)
        .unwrap_or(avg_job_value);
    lead.status = LeadStatus::Qualified;
    lead.estimated_value = Some(estimate);
    Some(estimate)
}

/// Finds the first quotable service matching `phrase`, scanning in sort order.
/// Containment in either direction wins over a Jaro-Winkler near miss.
pub fn match_service<'a>(services: &'a [Service], phrase: &str) -> Option<&'a Service> {
    let needle = normalize(phrase);
    if needle.is_empty() {
        return None;
    }

    let mut candidates: Vec<&Service> =
        services.iter().filter(|service| service.is_quotable()).collect();
    candidates.sort_by_key(|service| service.sort_order);

    candidates
        .iter()
        .find(|service| {
            let name = normalize(&service.name);
            !name.is_empty() && (needle.contains(&name) || name.contains(&needle))
        })
        .or_else(|| {
            candidates.iter().find(|service| {
                strsim::jaro_winkler(&needle, &normalize(&service.name)) >= FUZZY_THRESHOLD
            })
        })
        .copied()
}

fn normalize(value: &str) -> String {
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

//! TwiML documents returned to Twilio webhooks.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Verb {
    Say(String),
    Dial { number: String, timeout_secs: u32, action: String, caller_id: Option<String> },
    Message(String),
    Hangup,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Twiml {
    verbs: Vec<Verb>,
}

impl Twiml {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: &str) -> Self {
        self.verbs.push(Verb::Say(text.to_string()));
        self
    }

    /// Rings `number`; Twilio posts the outcome to `action` once the dial ends.
    pub fn dial(
        mut self,
        number: &str,
        timeout_secs: u32,
        action: &str,
        caller_id: Option<&str>,
    ) -> Self {
        self.verbs.push(Verb::Dial {
            number: number.to_string(),
            timeout_secs,
            action: action.to_string(),
            caller_id: caller_id.map(str::to_string),
        });
        self
    }

    pub fn message(mut self, body: &str) -> Self {
        self.verbs.push(Verb::Message(body.to_string()));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    pub fn build(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>");
        for verb in &self.verbs {
            match verb {
                Verb::Say(text) => {
                    xml.push_str(&format!("<Say>{}</Say>", xml_escape(text)));
                }
                Verb::Dial { number, timeout_secs, action, caller_id } => {
                    xml.push_str(&format!(
                        "<Dial timeout=\"{timeout_secs}\" action=\"{}\" method=\"POST\"",
                        xml_escape(action)
                    ));
                    if let Some(caller_id) = caller_id {
                        xml.push_str(&format!(" callerId=\"{}\"", xml_escape(caller_id)));
                    }
                    xml.push_str(&format!("><Number>{}</Number></Dial>", xml_escape(number)));
                }
                Verb::Message(body) => {
                    xml.push_str(&format!("<Message>{}</Message>", xml_escape(body)));
                }
                Verb::Hangup => xml.push_str("<Hangup/>"),
            }
        }
        xml.push_str("</Response>");
        xml
    }
}

impl IntoResponse for Twiml {
    fn into_response(self) -> Response {
        (StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], self.build()).into_response()
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

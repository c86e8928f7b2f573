pub const OPT_OUT_KEYWORDS: [&str; 5] = ["STOP", "UNSUBSCRIBE", "CANCEL", "END", "QUIT"];
pub const OPT_IN_KEYWORDS: [&str; 3] = ["START", "YES", "UNSTOP"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    OptOut,
    OptIn,
}

/// Classifies an inbound SMS body. The whole trimmed body must be a keyword.
pub fn classify(body: &str) -> Option<Keyword> {
    let normalized = body.trim().to_uppercase();
    if OPT_OUT_KEYWORDS.contains(&normalized.as_str()) {
        Some(Keyword::OptOut)
    } else if OPT_IN_KEYWORDS.contains(&normalized.as_str()) {
        Some(Keyword::OptIn)
    } else {
        None
    }
}

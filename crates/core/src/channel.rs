//! Line-type classification and the SMS viability decision derived from it.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    Mobile,
    Landline,
    Voip,
    #[default]
    Unknown,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Landline => "landline",
            Self::Voip => "voip",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mobile" => Some(Self::Mobile),
            "landline" => Some(Self::Landline),
            "voip" => Some(Self::Voip),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Maps a carrier lookup `type` value onto a line type.
    pub fn from_carrier_type(raw: &str) -> Self {
        match raw.trim() {
            "mobile" | "personalNumber" => Self::Mobile,
            "landline" | "tollFree" | "premium" | "sharedCost" | "pager" => Self::Landline,
            "fixedVoip" | "nonFixedVoip" | "voip" => Self::Voip,
            _ => Self::Unknown,
        }
    }
}

/// Only a confirmed landline is excluded; unknown numbers are tried optimistically.
pub fn can_receive_sms(line_type: LineType) -> bool {
    !matches!(line_type, LineType::Landline)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FollowUpPath {
    /// Text the caller and arm the follow-up timer.
    Sms,
    /// Skip SMS and ask the owner for a human callback.
    OwnerCallback,
}

pub fn select_follow_up_path(line_type: LineType) -> FollowUpPath {
    if can_receive_sms(line_type) {
        FollowUpPath::Sms
    } else {
        FollowUpPath::OwnerCallback
    }
}

#[cfg(test)]
mod tests {
    use super::{can_receive_sms, select_follow_up_path, FollowUpPath, LineType};

    #[test]
    fn only_landline_blocks_sms() {
        assert!(can_receive_sms(LineType::Mobile));
        assert!(can_receive_sms(LineType::Voip));
        assert!(can_receive_sms(LineType::Unknown));
        assert!(!can_receive_sms(LineType::Landline));
        assert_eq!(select_follow_up_path(LineType::Landline), FollowUpPath::OwnerCallback);
        assert_eq!(select_follow_up_path(LineType::Unknown), FollowUpPath::Sms);
    }

    #[test]
    fn carrier_types_collapse_to_line_types() {
        let cases = [
            ("mobile", LineType::Mobile),
            ("personalNumber", LineType::Mobile),
            ("landline", LineType::Landline),
            ("tollFree", LineType::Landline),
            ("pager", LineType::Landline),
            ("fixedVoip", LineType::Voip),
            ("nonFixedVoip", LineType::Voip),
            ("satellite", LineType::Unknown),
            ("", LineType::Unknown),
        ];
        for (raw, expected) in cases {
            assert_eq!(LineType::from_carrier_type(raw), expected, "carrier type {raw}");
        }
    }
}

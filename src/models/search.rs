use serde::{Deserialize, Serialize};

/// Model verdict on whether an image matches a search description.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchVerdict {
    #[serde(
        default,
        rename = "isMatch",
        alias = "is_match",
        alias = "IsMatch",
        alias = "ismatch"
    )]
    pub is_match: bool,

    #[serde(
        rename = "suggestedName",
        alias = "suggested_name",
        alias = "SuggestedName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub suggested_name: Option<String>,

    #[serde(alias = "Reason", default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(alias = "Confidence", default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<serde_json::Value>,
}

impl SearchVerdict {
    /// Suggested name if the model supplied a non-blank one.
    pub fn usable_name(&self) -> Option<&str> {
        self.suggested_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

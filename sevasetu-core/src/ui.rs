//! Typed views over the structurally open `ui` block of an assistant reply.
//!
//! Every shape keeps an opaque fallback so that fields the agent adds later are
//! passed through to the renderer instead of failing the whole message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UiPayload {
    #[serde(default)]
    pub cards: Vec<UiCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_intent: Option<UiIntent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligibility: Option<EligibilityView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions_mr: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UiCard {
    Scheme(SchemeCard),
    Opaque(Value),
}

impl UiCard {
    pub fn title(&self) -> Option<&str> {
        match self {
            UiCard::Scheme(card) => card.title.as_deref(),
            UiCard::Opaque(raw) => raw.get("title").and_then(|v| v.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemeCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benefits: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UiIntent {
    Chat,
    Question,
    Error,
    Other(String),
}

impl UiIntent {
    pub fn as_str(&self) -> &str {
        match self {
            UiIntent::Chat => "chat",
            UiIntent::Question => "question",
            UiIntent::Error => "error",
            UiIntent::Other(s) => s,
        }
    }
}

impl From<String> for UiIntent {
    fn from(value: String) -> Self {
        match value.as_str() {
            "chat" => UiIntent::Chat,
            "question" => UiIntent::Question,
            "error" => UiIntent::Error,
            _ => UiIntent::Other(value),
        }
    }
}

impl From<UiIntent> for String {
    fn from(value: UiIntent) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EligibilityView {
    Known(Eligibility),
    Opaque(Value),
}

impl EligibilityView {
    pub fn status(&self) -> Option<&EligibilityStatus> {
        match self {
            EligibilityView::Known(e) => e.status.as_ref(),
            EligibilityView::Opaque(_) => None,
        }
    }

    pub fn application_id(&self) -> Option<&str> {
        match self {
            EligibilityView::Known(e) => e
                .apply_result
                .as_ref()
                .and_then(|r| r.application_id.as_deref()),
            EligibilityView::Opaque(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Eligibility {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EligibilityStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons_mr: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_result: Option<ApplyResult>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EligibilityStatus {
    Eligible,
    NotEligible,
    NeedsMoreInfo,
    Other(String),
}

impl EligibilityStatus {
    pub fn as_str(&self) -> &str {
        match self {
            EligibilityStatus::Eligible => "eligible",
            EligibilityStatus::NotEligible => "not_eligible",
            EligibilityStatus::NeedsMoreInfo => "needs_more_info",
            EligibilityStatus::Other(s) => s,
        }
    }
}

impl From<String> for EligibilityStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "eligible" => EligibilityStatus::Eligible,
            "not_eligible" => EligibilityStatus::NotEligible,
            "needs_more_info" => EligibilityStatus::NeedsMoreInfo,
            _ => EligibilityStatus::Other(value),
        }
    }
}

impl From<EligibilityStatus> for String {
    fn from(value: EligibilityStatus) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

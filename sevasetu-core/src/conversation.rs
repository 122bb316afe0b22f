//! Conversation state built from the agent's message stream.
//!
//! The last observed interim transcript is explicit state here: every `stt_result`
//! overwrites it (latest wins), and it is read exactly when `AGENT_START` arrives.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{AgentEventName, AssistantReply, InboundMessage, TtsClip};
use crate::ui::{EligibilityView, UiCard, UiIntent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cards: Vec<UiCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_intent: Option<UiIntent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligibility: Option<EligibilityView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<String>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            cards: Vec::new(),
            ui_intent: None,
            eligibility: None,
            questions: Vec::new(),
        }
    }

    fn assistant(reply: &AssistantReply) -> Self {
        let ui = reply.ui.clone().unwrap_or_default();
        Self {
            role: Role::Assistant,
            text: reply.text.clone(),
            cards: ui.cards,
            ui_intent: ui.ui_intent,
            eligibility: ui.eligibility,
            questions: ui.questions_mr,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Stt,
    AgentEvent,
    Plan,
    ToolCall,
    ToolResult,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub kind: TimelineKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// What a single message did to the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationChange {
    Ignored,
    Timeline,
    InterimUpdated,
    UserTurnCommitted,
    AssistantReplied { tts: Option<TtsClip> },
}

#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
    interim: String,
    timeline: VecDeque<TimelineEvent>,
    timeline_capacity: usize,
}

impl Conversation {
    pub const DEFAULT_TIMELINE_CAPACITY: usize = 60;

    pub fn new(timeline_capacity: usize) -> Self {
        Self {
            turns: Vec::new(),
            interim: String::new(),
            timeline: VecDeque::new(),
            timeline_capacity: timeline_capacity.max(1),
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn interim(&self) -> &str {
        &self.interim
    }

    pub fn timeline(&self) -> impl Iterator<Item = &TimelineEvent> {
        self.timeline.iter()
    }

    pub fn apply(&mut self, msg: &InboundMessage) -> ConversationChange {
        match msg {
            InboundMessage::SttResult { text, confidence } => {
                self.interim = text.clone();
                self.record(
                    TimelineKind::Stt,
                    "stt_result",
                    Some(serde_json::json!({ "text": text, "confidence": confidence })),
                );
                ConversationChange::InterimUpdated
            }
            InboundMessage::AgentEvent { event, payload } => {
                self.record(TimelineKind::AgentEvent, event.as_str(), payload.clone());
                match event {
                    AgentEventName::AgentStart => {
                        if self.commit_interim() {
                            ConversationChange::UserTurnCommitted
                        } else {
                            ConversationChange::Timeline
                        }
                    }
                    AgentEventName::Plan => {
                        self.record(TimelineKind::Plan, "plan", payload.clone());
                        ConversationChange::Timeline
                    }
                    _ => ConversationChange::Timeline,
                }
            }
            InboundMessage::ToolCall { tool, payload } => {
                self.record(TimelineKind::ToolCall, tool, payload.clone());
                ConversationChange::Timeline
            }
            InboundMessage::ToolResult { tool, payload } => {
                self.record(TimelineKind::ToolResult, tool, payload.clone());
                ConversationChange::Timeline
            }
            InboundMessage::AssistantMessage(reply) => {
                self.interim.clear();
                self.turns.push(Turn::assistant(reply));
                ConversationChange::AssistantReplied {
                    tts: reply.tts_clip(),
                }
            }
            InboundMessage::Error { message, .. } => {
                let payload = message.as_ref().map(|m| serde_json::json!({ "message": m }));
                self.record(TimelineKind::Error, "error", payload);
                ConversationChange::Timeline
            }
            InboundMessage::HelloAck { .. } | InboundMessage::Unknown { .. } => {
                ConversationChange::Ignored
            }
        }
    }

    /// Commits the interim transcript as a user turn unless it is blank or repeats
    /// the user turn that is already last.
    fn commit_interim(&mut self) -> bool {
        let text = self.interim.trim();
        if text.is_empty() {
            return false;
        }

        if let Some(last) = self.turns.last() {
            if last.role == Role::User && last.text == text {
                return false;
            }
        }

        self.turns.push(Turn::user(text));
        true
    }

    fn record(&mut self, kind: TimelineKind, name: &str, payload: Option<Value>) {
        if self.timeline.len() == self.timeline_capacity {
            self.timeline.pop_front();
        }
        self.timeline.push_back(TimelineEvent {
            kind,
            name: name.to_string(),
            payload,
        });
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMELINE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(json: &str) -> InboundMessage {
        InboundMessage::parse(json).unwrap()
    }

    #[test]
    fn commits_user_turn_then_assistant_turn_with_card() {
        let mut conv = Conversation::default();
        let frames = [
            r#"{"type":"hello_ack"}"#,
            r#"{"type":"stt_result","text":"मला शिष्यवृत्ती हवी","confidence":0.9}"#,
            r#"{"type":"agent_event","event":"AGENT_START"}"#,
            r#"{"type":"assistant_message","text":"...","ui":{"cards":[{"title":"Scholarship"}]}}"#,
        ];
        for f in frames {
            conv.apply(&msg(f));
        }

        let turns = conv.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].text, "मला शिष्यवृत्ती हवी");
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].cards.len(), 1);
        assert_eq!(turns[1].cards[0].title(), Some("Scholarship"));
        assert_eq!(conv.interim(), "");
    }

    #[test]
    fn duplicate_stt_result_yields_one_user_turn() {
        let mut conv = Conversation::default();
        let stt = msg(r#"{"type":"stt_result","text":"मला शिष्यवृत्ती हवी","confidence":0.9}"#);
        conv.apply(&stt);
        conv.apply(&stt);
        assert_eq!(
            conv.apply(&msg(r#"{"type":"agent_event","event":"AGENT_START"}"#)),
            ConversationChange::UserTurnCommitted
        );
        assert_eq!(conv.turns().len(), 1);
    }

    #[test]
    fn repeated_agent_start_does_not_duplicate_user_turn() {
        let mut conv = Conversation::default();
        conv.apply(&msg(r#"{"type":"stt_result","text":" hello ","confidence":0.5}"#));
        conv.apply(&msg(r#"{"type":"agent_event","event":"AGENT_START"}"#));
        assert_eq!(
            conv.apply(&msg(r#"{"type":"agent_event","event":"AGENT_START"}"#)),
            ConversationChange::Timeline
        );
        assert_eq!(conv.turns().len(), 1);
        assert_eq!(conv.turns()[0].text, "hello");
    }

    #[test]
    fn latest_interim_wins_when_updates_race_turn_start() {
        let mut conv = Conversation::default();
        conv.apply(&msg(r#"{"type":"stt_result","text":"मला","confidence":0.3}"#));
        conv.apply(&msg(r#"{"type":"stt_result","text":"मला योजना","confidence":0.8}"#));
        conv.apply(&msg(r#"{"type":"agent_event","event":"AGENT_START"}"#));
        assert_eq!(conv.turns()[0].text, "मला योजना");
    }

    #[test]
    fn blank_interim_is_not_committed() {
        let mut conv = Conversation::default();
        conv.apply(&msg(r#"{"type":"stt_result","text":"   ","confidence":0.1}"#));
        conv.apply(&msg(r#"{"type":"agent_event","event":"AGENT_START"}"#));
        assert!(conv.turns().is_empty());
    }

    #[test]
    fn plan_and_tools_land_on_the_timeline() {
        let mut conv = Conversation::default();
        conv.apply(&msg(r#"{"type":"agent_event","event":"PLAN","payload":{"next_state":"RESPOND"}}"#));
        conv.apply(&msg(r#"{"type":"tool_call","tool":"scheme_rag","payload":{"q":"x"}}"#));
        conv.apply(&msg(r#"{"type":"tool_result","tool":"scheme_rag","payload":[]}"#));

        let kinds: Vec<_> = conv.timeline().map(|e| (e.kind, e.name.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (TimelineKind::AgentEvent, "PLAN"),
                (TimelineKind::Plan, "plan"),
                (TimelineKind::ToolCall, "scheme_rag"),
                (TimelineKind::ToolResult, "scheme_rag"),
            ]
        );
    }

    #[test]
    fn timeline_is_bounded() {
        let mut conv = Conversation::new(3);
        for i in 0..5 {
            conv.apply(&msg(&format!(r#"{{"type":"tool_call","tool":"t{i}"}}"#)));
        }
        let names: Vec<_> = conv.timeline().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["t2", "t3", "t4"]);
    }

    #[test]
    fn assistant_reply_hands_back_tts_clip() {
        let mut conv = Conversation::default();
        let change = conv.apply(&msg(
            r#"{"type":"assistant_message","text":"ok","ttsAudioB64":"AAAA","ttsMime":"audio/mpeg"}"#,
        ));
        let ConversationChange::AssistantReplied { tts: Some(clip) } = change else {
            panic!("expected tts clip");
        };
        assert_eq!(clip.mime_type, "audio/mpeg");
    }
}

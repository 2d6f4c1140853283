// Events that flow from a platform connection to its supervisor
//
// Platform clients hand over loosely-typed payloads (`RawEvent`), where any
// field may be missing. They are validated exactly once, at ingestion, into
// `LiveEvent`: every actor has a nickname, every quantity has a value, and
// chat text is normalised. Nothing downstream re-checks optional fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Nickname recorded when the platform omits the actor
pub const UNKNOWN_ACTOR: &str = "UnknownUser";

// ─────────────────────────────────────────────────────────────────────────────
// Raw payloads (as emitted by the platform client)
// ─────────────────────────────────────────────────────────────────────────────

/// User block attached to most platform payloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUser {
    pub nickname: Option<String>,
}

/// Platform event before validation
///
/// Mirrors the JSON shape the platform produces, e.g.
/// `{"type": "gift", "user": {"nickname": "bob"}, "giftId": 5655, "repeatCount": 5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RawEvent {
    Chat {
        user: Option<RawUser>,
        comment: Option<String>,
    },
    Gift {
        user: Option<RawUser>,
        gift_id: Option<serde_json::Value>,
        repeat_count: Option<i64>,
    },
    Like {
        user: Option<RawUser>,
        like_count: Option<i64>,
        total_like_count: Option<i64>,
    },
    Share {
        user: Option<RawUser>,
    },
    Member {
        user: Option<RawUser>,
    },
    StreamEnd,
    Disconnected {
        error: Option<String>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Validated events
// ─────────────────────────────────────────────────────────────────────────────

/// Interaction category; selects the event table, the fan statistic and the
/// session counter an interaction feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Comment,
    Gift,
    Like,
    Share,
    Member,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Gift => "gift",
            Self::Like => "like",
            Self::Share => "share",
            Self::Member => "member",
        }
    }
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Type-specific part of an interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionPayload {
    Chat { text: String },
    Gift { gift_id: String, quantity: u32 },
    Like { count: u32, total_count: u64 },
    Share,
    Member,
}

impl InteractionPayload {
    pub fn kind(&self) -> InteractionKind {
        match self {
            Self::Chat { .. } => InteractionKind::Comment,
            Self::Gift { .. } => InteractionKind::Gift,
            Self::Like { .. } => InteractionKind::Like,
            Self::Share => InteractionKind::Share,
            Self::Member => InteractionKind::Member,
        }
    }

    /// Amount added to the open session's counter
    ///
    /// Gifts and likes carry a platform-reported magnitude; everything else
    /// counts once.
    pub fn magnitude(&self) -> u64 {
        match self {
            Self::Gift { quantity, .. } => u64::from(*quantity),
            Self::Like { count, .. } => u64::from(*count),
            Self::Chat { .. } | Self::Share | Self::Member => 1,
        }
    }
}

/// One fan interaction with a live stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub payload: InteractionPayload,
}

/// Validated platform event consumed by the supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Interaction(Interaction),
    StreamEnded,
    Disconnected { reason: String },
}

impl LiveEvent {
    /// Parse-and-default a raw payload received at `timestamp`
    pub fn ingest(raw: RawEvent, timestamp: DateTime<Utc>) -> Self {
        let interaction = |user: Option<RawUser>, payload| {
            LiveEvent::Interaction(Interaction {
                actor: actor_name(user),
                timestamp,
                payload,
            })
        };

        match raw {
            RawEvent::Chat { user, comment } => interaction(
                user,
                InteractionPayload::Chat {
                    text: normalize_comment(comment.as_deref().unwrap_or_default()),
                },
            ),
            RawEvent::Gift {
                user,
                gift_id,
                repeat_count,
            } => interaction(
                user,
                InteractionPayload::Gift {
                    gift_id: gift_id_string(gift_id),
                    quantity: positive_or(repeat_count, 1),
                },
            ),
            RawEvent::Like {
                user,
                like_count,
                total_like_count,
            } => interaction(
                user,
                InteractionPayload::Like {
                    count: positive_or(like_count, 1),
                    total_count: total_like_count
                        .and_then(|v| u64::try_from(v).ok())
                        .unwrap_or(0),
                },
            ),
            RawEvent::Share { user } => interaction(user, InteractionPayload::Share),
            RawEvent::Member { user } => interaction(user, InteractionPayload::Member),
            RawEvent::StreamEnd => LiveEvent::StreamEnded,
            RawEvent::Disconnected { error } => LiveEvent::Disconnected {
                reason: error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "connection closed".to_string()),
            },
        }
    }
}

fn actor_name(user: Option<RawUser>) -> String {
    user.and_then(|u| u.nickname)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| UNKNOWN_ACTOR.to_string())
}

/// Trim and collapse whitespace runs to a single space
fn normalize_comment(comment: &str) -> String {
    comment.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn gift_id_string(gift_id: Option<serde_json::Value>) -> String {
    match gift_id {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Null) | None => "unknown".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Reported count, or `fallback` when absent, zero, negative or out of range
fn positive_or(value: Option<i64>, fallback: u32) -> u32 {
    value
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_gift_json_parses_with_camel_case_fields() {
        let raw: RawEvent = serde_json::from_str(
            r#"{"type": "gift", "user": {"nickname": "bob"}, "giftId": 5655, "repeatCount": 5}"#,
        )
        .unwrap();

        match LiveEvent::ingest(raw, at()) {
            LiveEvent::Interaction(Interaction { actor, payload, .. }) => {
                assert_eq!(actor, "bob");
                assert_eq!(
                    payload,
                    InteractionPayload::Gift {
                        gift_id: "5655".to_string(),
                        quantity: 5
                    }
                );
                assert_eq!(payload.magnitude(), 5);
            }
            other => panic!("Expected interaction, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_actor_uses_placeholder() {
        let raw: RawEvent = serde_json::from_str(r#"{"type": "share"}"#).unwrap();

        match LiveEvent::ingest(raw, at()) {
            LiveEvent::Interaction(interaction) => {
                assert_eq!(interaction.actor, UNKNOWN_ACTOR);
                assert_eq!(interaction.payload.kind(), InteractionKind::Share);
            }
            other => panic!("Expected interaction, got {:?}", other),
        }

        let blank = RawEvent::Member {
            user: Some(RawUser {
                nickname: Some("   ".to_string()),
            }),
        };
        match LiveEvent::ingest(blank, at()) {
            LiveEvent::Interaction(interaction) => assert_eq!(interaction.actor, UNKNOWN_ACTOR),
            other => panic!("Expected interaction, got {:?}", other),
        }
    }

    #[test]
    fn test_chat_text_is_normalized() {
        let raw = RawEvent::Chat {
            user: Some(RawUser {
                nickname: Some("amy".to_string()),
            }),
            comment: Some("  hello \n\n  there\tfriend  ".to_string()),
        };

        match LiveEvent::ingest(raw, at()) {
            LiveEvent::Interaction(interaction) => assert_eq!(
                interaction.payload,
                InteractionPayload::Chat {
                    text: "hello there friend".to_string()
                }
            ),
            other => panic!("Expected interaction, got {:?}", other),
        }
    }

    #[test]
    fn test_long_chat_text_is_kept_whole() {
        let words = vec!["日本語"; 400].join("  ");
        let raw = RawEvent::Chat {
            user: None,
            comment: Some(format!("{words}\n")),
        };

        match LiveEvent::ingest(raw, at()) {
            LiveEvent::Interaction(interaction) => {
                let InteractionPayload::Chat { text } = interaction.payload else {
                    panic!("Expected chat payload");
                };
                assert_eq!(text.len(), 400 * 9 + 399);
                assert_eq!(text, vec!["日本語"; 400].join(" "));
            }
            other => panic!("Expected interaction, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_quantities_fall_back() {
        let gift = RawEvent::Gift {
            user: None,
            gift_id: None,
            repeat_count: Some(-3),
        };
        let like = RawEvent::Like {
            user: None,
            like_count: None,
            total_like_count: None,
        };

        let LiveEvent::Interaction(gift) = LiveEvent::ingest(gift, at()) else {
            panic!("Expected gift interaction");
        };
        assert_eq!(
            gift.payload,
            InteractionPayload::Gift {
                gift_id: "unknown".to_string(),
                quantity: 1
            }
        );

        let LiveEvent::Interaction(like) = LiveEvent::ingest(like, at()) else {
            panic!("Expected like interaction");
        };
        assert_eq!(
            like.payload,
            InteractionPayload::Like {
                count: 1,
                total_count: 0
            }
        );
    }

    #[test]
    fn test_termination_events() {
        let ended: RawEvent = serde_json::from_str(r#"{"type": "stream_end"}"#).unwrap();
        assert_eq!(LiveEvent::ingest(ended, at()), LiveEvent::StreamEnded);

        let dropped = RawEvent::Disconnected { error: None };
        assert_eq!(
            LiveEvent::ingest(dropped, at()),
            LiveEvent::Disconnected {
                reason: "connection closed".to_string()
            }
        );
    }
}

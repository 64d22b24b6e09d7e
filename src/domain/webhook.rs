//! Parser for inbound social-graph webhook envelopes.
//!
//! Envelopes look like `{ "type": "reaction.created" | "cast.created" | "follow.created", "data": {...} }`.
//! Signature verification happens before this point.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::error::ValidationError;
use super::types::{Fid, InteractionEvent, InteractionType};

/// Raw webhook envelope
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UserRef {
    fid: Fid,
}

#[derive(Debug, Deserialize)]
struct CastRef {
    hash: String,
    #[serde(default)]
    author: Option<UserRef>,
    #[serde(default)]
    fid: Option<Fid>,
}

impl CastRef {
    fn author_fid(&self) -> Option<Fid> {
        self.author.as_ref().map(|a| a.fid).or(self.fid)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReactionKind {
    Code(u8),
    Name(String),
}

#[derive(Debug, Deserialize)]
struct ReactionData {
    reaction_type: ReactionKind,
    user: UserRef,
    cast: CastRef,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct EmbedRef {
    #[serde(default)]
    cast_id: Option<EmbeddedCastId>,
    #[serde(default)]
    cast: Option<CastRef>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedCastId {
    fid: Fid,
    hash: String,
}

#[derive(Debug, Deserialize)]
struct CastData {
    author: UserRef,
    #[serde(default)]
    parent_hash: Option<String>,
    #[serde(default)]
    parent_author: Option<ParentAuthor>,
    #[serde(default)]
    embeds: Vec<EmbedRef>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ParentAuthor {
    fid: Option<Fid>,
}

#[derive(Debug, Deserialize)]
struct FollowData {
    user: UserRef,
    target_user: UserRef,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl WebhookEnvelope {
    /// Parse an envelope from a JSON value
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::MalformedEvent(e.to_string()))
    }

    /// Turn the envelope into zero or more interaction events.
    ///
    /// Unknown event types and self-interactions yield no events. A single cast can
    /// be both a reply and a quote, in which case two events are produced.
    pub fn into_interactions(self) -> Result<Vec<InteractionEvent>, ValidationError> {
        let fallback_time = self
            .created_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        let events = match self.event_type.as_str() {
            "reaction.created" => {
                let data: ReactionData = parse_data(self.data)?;
                let interaction_type = match data.reaction_type {
                    ReactionKind::Code(1) => InteractionType::Like,
                    ReactionKind::Code(2) => InteractionType::Recast,
                    ReactionKind::Name(ref name) if name == "like" => InteractionType::Like,
                    ReactionKind::Name(ref name) if name == "recast" => InteractionType::Recast,
                    other => {
                        return Err(ValidationError::MalformedEvent(format!(
                            "unknown reaction type {:?}",
                            other
                        )));
                    }
                };
                let author_fid = data.cast.author_fid().ok_or_else(|| {
                    ValidationError::MalformedEvent("reaction cast has no author".to_string())
                })?;
                vec![InteractionEvent {
                    interaction_type,
                    author_fid,
                    interactor_fid: data.user.fid,
                    cast_reference: Some(data.cast.hash),
                    observed_at: data.timestamp.unwrap_or(fallback_time),
                }]
            }
            "cast.created" => {
                let data: CastData = parse_data(self.data)?;
                let observed_at = data.timestamp.unwrap_or(fallback_time);
                let mut events = Vec::new();

                if let (Some(parent_hash), Some(parent_fid)) = (
                    data.parent_hash.clone(),
                    data.parent_author.as_ref().and_then(|p| p.fid),
                ) {
                    events.push(InteractionEvent {
                        interaction_type: InteractionType::Reply,
                        author_fid: parent_fid,
                        interactor_fid: data.author.fid,
                        cast_reference: Some(parent_hash),
                        observed_at,
                    });
                }

                for embed in &data.embeds {
                    let quoted = match (&embed.cast_id, &embed.cast) {
                        (Some(id), _) => Some((id.fid, id.hash.clone())),
                        (None, Some(cast)) => cast.author_fid().map(|fid| (fid, cast.hash.clone())),
                        (None, None) => None,
                    };
                    if let Some((quoted_author, quoted_hash)) = quoted {
                        events.push(InteractionEvent {
                            interaction_type: InteractionType::Quote,
                            author_fid: quoted_author,
                            interactor_fid: data.author.fid,
                            cast_reference: Some(quoted_hash),
                            observed_at,
                        });
                        break;
                    }
                }

                events
            }
            "follow.created" => {
                let data: FollowData = parse_data(self.data)?;
                vec![InteractionEvent {
                    interaction_type: InteractionType::Follow,
                    author_fid: data.target_user.fid,
                    interactor_fid: data.user.fid,
                    cast_reference: None,
                    observed_at: data.timestamp.unwrap_or(fallback_time),
                }]
            }
            _ => Vec::new(),
        };

        Ok(events
            .into_iter()
            .filter(|e| e.author_fid != e.interactor_fid)
            .collect())
    }
}

fn parse_data<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, ValidationError> {
    serde_json::from_value(data).map_err(|e| ValidationError::MalformedEvent(e.to_string()))
}

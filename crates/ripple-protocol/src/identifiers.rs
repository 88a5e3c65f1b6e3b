//! Subscription identifier parsing.
//!
//! An identifier is a JSON object naming the channel it addresses,
//! e.g. `{"channel": "Turbo::StreamsChannel", "name": "...", ...}`.
//! The identifier string itself (not its parsed form) is the key a
//! connection uses to deduplicate subscriptions and route commands.

use serde::Deserialize;
use thiserror::Error;

/// Errors from identifier parsing.
#[derive(Debug, Error)]
pub enum IdentifierError {
    #[error("couldn't parse subscription identifier: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("subscription identifier is missing the {0} field")]
    MissingField(&'static str),
}

#[derive(Deserialize)]
struct ChannelFields {
    #[serde(default)]
    channel: String,
}

#[derive(Deserialize)]
struct StreamFields {
    #[serde(default)]
    name: String,
}

/// Extract the channel name from an identifier.
pub fn parse_channel_name(identifier: &str) -> Result<String, IdentifierError> {
    let fields: ChannelFields = serde_json::from_str(identifier)?;
    if fields.channel.is_empty() {
        return Err(IdentifierError::MissingField("channel"));
    }
    Ok(fields.channel)
}

/// Extract the stream name from an identifier.
pub fn parse_stream_name(identifier: &str) -> Result<String, IdentifierError> {
    let fields: StreamFields = serde_json::from_str(identifier)?;
    if fields.name.is_empty() {
        return Err(IdentifierError::MissingField("name"));
    }
    Ok(fields.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_channel_and_stream_names() {
        let identifier = r#"{"channel":"Turbo::StreamsChannel","name":"chat_room:7"}"#;
        assert_eq!(
            parse_channel_name(identifier).unwrap(),
            "Turbo::StreamsChannel"
        );
        assert_eq!(parse_stream_name(identifier).unwrap(), "chat_room:7");
    }

    #[test]
    fn rejects_malformed_identifiers() {
        assert!(matches!(
            parse_channel_name("not json"),
            Err(IdentifierError::Parse(_))
        ));
        assert!(matches!(
            parse_channel_name(r#"{"name":"x"}"#),
            Err(IdentifierError::MissingField("channel"))
        ));
        assert!(matches!(
            parse_stream_name(r#"{"channel":"Chat"}"#),
            Err(IdentifierError::MissingField("name"))
        ));
    }
}

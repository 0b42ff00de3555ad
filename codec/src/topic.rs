// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic names and topic filters.
//!
//! A topic name is the literal routing key of a PUBLISH packet; a topic
//! filter is the pattern a SUBSCRIBE packet carries and may contain the
//! wildcards `+` (exactly one level) and `#` (all remaining levels).

use std::fmt;

use crate::utils::{validate_utf8_string, StringError};
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, QoS, StringData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicError {
    EmptyTopic,

    TooManyData,

    InvalidString,

    /// Topic name contains `+` or `#`.
    WildcardInTopicName,

    /// `+`/`#` mixed into a level, or `#` not at the last level.
    InvalidWildcard,
}

impl From<StringError> for TopicError {
    fn from(e: StringError) -> Self {
        match e {
            StringError::TooManyData => Self::TooManyData,
            _ => Self::InvalidString,
        }
    }
}

/// A topic name used by PUBLISH packets.
///
/// Non-empty, valid UTF-8 and free of wildcard characters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PubTopic(String);

impl PubTopic {
    /// Validate and wrap a topic name.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is empty, too long or contains wildcards.
    pub fn new(topic: &str) -> Result<Self, TopicError> {
        if topic.is_empty() {
            return Err(TopicError::EmptyTopic);
        }
        validate_utf8_string(topic)?;
        if topic.contains(['+', '#']) {
            return Err(TopicError::WildcardInTopicName);
        }
        Ok(Self(topic.to_string()))
    }

    /// Get byte length in packet, including the length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl fmt::Display for PubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let s = StringData::decode(ba)?;
        Self::new(s.as_ref()).map_err(|_err| DecodeError::InvalidTopicName)
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let s = StringData::from(&self.0).map_err(|_err| EncodeError::InvalidTopic)?;
        s.encode(buf)
    }
}

/// One level of a parsed topic filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPart {
    /// Normal level, matched by literal equality. May be the empty string.
    Normal(String),

    /// The `+` wildcard, matching exactly one level.
    SingleWildcard,

    /// The `#` wildcard, matching the remaining zero or more levels.
    /// Only valid as the last level of a filter.
    MultiWildcard,
}

/// A topic filter used by SUBSCRIBE and UNSUBSCRIBE packets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubTopic {
    filter: String,
    parts: Vec<TopicPart>,
}

impl SubTopic {
    /// Parse and validate a topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is empty, too long, or its wildcards are
    /// misplaced.
    pub fn parse(filter: &str) -> Result<Self, TopicError> {
        if filter.is_empty() {
            return Err(TopicError::EmptyTopic);
        }
        validate_utf8_string(filter)?;

        let count = filter.split('/').count();
        let mut parts = Vec::with_capacity(count);
        for (index, level) in filter.split('/').enumerate() {
            let part = match level {
                "+" => TopicPart::SingleWildcard,
                "#" => {
                    // The multi-level wildcard must be the last level
                    // [MQTT-4.7.1-2].
                    if index + 1 != count {
                        return Err(TopicError::InvalidWildcard);
                    }
                    TopicPart::MultiWildcard
                }
                _ => {
                    // Wildcards must occupy an entire level [MQTT-4.7.1-3].
                    if level.contains(['+', '#']) {
                        return Err(TopicError::InvalidWildcard);
                    }
                    TopicPart::Normal(level.to_string())
                }
            };
            parts.push(part);
        }
        Ok(Self {
            filter: filter.to_string(),
            parts,
        })
    }

    /// Get the parsed levels of this filter.
    #[must_use]
    pub fn parts(&self) -> &[TopicPart] {
        &self.parts
    }

    /// Get byte length in packet, including the length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.filter.len()
    }

    /// Check whether a concrete topic name matches this filter.
    ///
    /// Topics whose first level starts with `$` are reserved; they are only
    /// matched by filters whose first level is a literal [MQTT-4.7.2-1].
    #[must_use]
    pub fn is_match(&self, topic: &str) -> bool {
        if topic.starts_with('$')
            && matches!(
                self.parts.first(),
                Some(TopicPart::SingleWildcard | TopicPart::MultiWildcard)
            )
        {
            return false;
        }

        let levels: Vec<&str> = topic.split('/').collect();
        for (index, part) in self.parts.iter().enumerate() {
            match part {
                TopicPart::MultiWildcard => return true,
                TopicPart::SingleWildcard => {
                    if index >= levels.len() {
                        return false;
                    }
                }
                TopicPart::Normal(level) => {
                    if index >= levels.len() || level != levels[index] {
                        return false;
                    }
                }
            }
        }
        self.parts.len() == levels.len()
    }
}

impl fmt::Display for SubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.filter)
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        &self.filter
    }
}

/// A validated subscription entry, one topic filter paired with the maximum
/// QoS the subscriber requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribePattern {
    topic: SubTopic,
    qos: QoS,
}

impl SubscribePattern {
    /// Parse a filter string into a pattern.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is invalid.
    pub fn parse(filter: &str, qos: QoS) -> Result<Self, TopicError> {
        let topic = SubTopic::parse(filter)?;
        Ok(Self { topic, qos })
    }

    #[must_use]
    pub const fn topic(&self) -> &SubTopic {
        &self.topic
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_qos(&mut self, qos: QoS) {
        self.qos = qos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pub_topic_validate() {
        assert!(PubTopic::new("sport/tennis/player1").is_ok());
        assert_eq!(PubTopic::new(""), Err(TopicError::EmptyTopic));
        assert_eq!(
            PubTopic::new("sport/+"),
            Err(TopicError::WildcardInTopicName)
        );
        assert_eq!(PubTopic::new("sport/#"), Err(TopicError::WildcardInTopicName));
    }

    #[test]
    fn test_sub_topic_parse() {
        assert!(SubTopic::parse("sport/tennis/#").is_ok());
        assert!(SubTopic::parse("sport/+/player1").is_ok());
        assert!(SubTopic::parse("#").is_ok());
        assert!(SubTopic::parse("+").is_ok());
        assert!(SubTopic::parse("sport//tennis").is_ok());

        assert_eq!(SubTopic::parse(""), Err(TopicError::EmptyTopic));
        assert_eq!(SubTopic::parse("sport/#/x"), Err(TopicError::InvalidWildcard));
        assert_eq!(SubTopic::parse("sp+rt"), Err(TopicError::InvalidWildcard));
        assert_eq!(SubTopic::parse("sport/ten#"), Err(TopicError::InvalidWildcard));
    }

    #[test]
    fn test_multi_wildcard_match() {
        let filter = SubTopic::parse("sport/tennis/#").unwrap();
        assert!(filter.is_match("sport/tennis"));
        assert!(filter.is_match("sport/tennis/player1"));
        assert!(filter.is_match("sport/tennis/player1/ranking"));
        assert!(!filter.is_match("sport/football"));
    }

    #[test]
    fn test_single_wildcard_match() {
        let filter = SubTopic::parse("sport/+/player1").unwrap();
        assert!(filter.is_match("sport/tennis/player1"));
        assert!(!filter.is_match("sport/tennis/wimbledon/player1"));
        assert!(!filter.is_match("sport/tennis"));

        let filter = SubTopic::parse("sport/+").unwrap();
        assert!(filter.is_match("sport/"));
        assert!(!filter.is_match("sport"));
    }

    #[test]
    fn test_exact_match() {
        let filter = SubTopic::parse("sport/tennis").unwrap();
        assert!(filter.is_match("sport/tennis"));
        assert!(!filter.is_match("sport/tennis/player1"));
        assert!(!filter.is_match("sport"));
    }

    #[test]
    fn test_reserved_topics() {
        // Wildcards at the first level never match $-topics [MQTT-4.7.2-1].
        let filter = SubTopic::parse("#").unwrap();
        assert!(!filter.is_match("$SYS/broker/uptime"));
        let filter = SubTopic::parse("+/broker/uptime").unwrap();
        assert!(!filter.is_match("$SYS/broker/uptime"));
        let filter = SubTopic::parse("$SYS/broker/#").unwrap();
        assert!(filter.is_match("$SYS/broker/uptime"));
    }
}

// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serde helpers for the client frame payload.
//!
//! 64-bit integers travel as decimal strings so that JavaScript clients do
//! not lose precision above 2^53. Numbers are still accepted on input.

use serde::de::{self, Deserialize, Deserializer};
use serde::Serializer;

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum IntRepr {
    Str(String),
    Int(i64),
}

fn parse_repr<E: de::Error>(repr: IntRepr) -> Result<i64, E> {
    match repr {
        IntRepr::Str(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| E::custom(format!("invalid integer string `{s}`: {e}"))),
        IntRepr::Int(n) => Ok(n),
    }
}

/// `#[serde(with = "i64_string")]` for required integer fields.
pub mod i64_string {
    use super::*;

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        parse_repr(IntRepr::deserialize(deserializer)?)
    }
}

/// `#[serde(with = "i64_string_option")]` for optional integer fields.
pub mod i64_string_option {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        match Option::<IntRepr>::deserialize(deserializer)? {
            Some(IntRepr::Str(s)) if s.trim().is_empty() => Ok(None),
            Some(repr) => parse_repr(repr).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Probe {
        #[serde(with = "super::i64_string")]
        id: i64,
        #[serde(default, with = "super::i64_string_option")]
        cursor: Option<i64>,
    }

    #[test]
    fn large_ids_serialize_as_strings() {
        let probe = Probe {
            id: 9_007_199_254_740_993,
            cursor: None,
        };
        let json = serde_json::to_string(&probe).unwrap();
        assert_eq!(json, r#"{"id":"9007199254740993","cursor":null}"#);
    }

    #[test]
    fn numbers_are_accepted_on_input() {
        let probe: Probe = serde_json::from_str(r#"{"id": 42, "cursor": 7}"#).unwrap();
        assert_eq!(probe.id, 42);
        assert_eq!(probe.cursor, Some(7));
    }

    #[test]
    fn empty_optional_string_is_none() {
        let probe: Probe = serde_json::from_str(r#"{"id": "1", "cursor": ""}"#).unwrap();
        assert_eq!(probe.cursor, None);
        let probe: Probe = serde_json::from_str(r#"{"id": "1"}"#).unwrap();
        assert_eq!(probe.cursor, None);
    }

    #[test]
    fn garbage_string_is_rejected() {
        let result: Result<Probe, _> = serde_json::from_str(r#"{"id": "12abc"}"#);
        assert!(result.is_err());
    }
}

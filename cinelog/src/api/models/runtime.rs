//! Human-friendly runtime representation on the wire.
//!
//! A movie runtime serializes as the string `"<minutes> mins"` and only
//! accepts exactly that shape back, so `102`, `"102 minutes"` and
//! `"abc mins"` are all rejected at decode time.

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

const INVALID_FORMAT: &str = "invalid runtime format";

/// Runtime in whole minutes, rendered as `"97 mins"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Runtime(pub i32);

impl From<Runtime> for i32 {
    fn from(runtime: Runtime) -> Self {
        runtime.0
    }
}

impl From<i32> for Runtime {
    fn from(minutes: i32) -> Self {
        Runtime(minutes)
    }
}

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{} mins", self.0))
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RuntimeVisitor;

        impl Visitor<'_> for RuntimeVisitor {
            type Value = Runtime;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a string of the form \"<minutes> mins\"")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Runtime, E> {
                let mut parts = value.split(' ');
                let (Some(minutes), Some("mins"), None) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err(E::custom(INVALID_FORMAT));
                };
                let minutes: i32 = minutes.parse().map_err(|_| E::custom(INVALID_FORMAT))?;
                Ok(Runtime(minutes))
            }
        }

        deserializer.deserialize_str(RuntimeVisitor)
    }
}

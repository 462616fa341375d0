//! Payload encodings and socket helpers.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub mod zmq;

/// List of available encodings for payloads.
///
/// Both are self-describing data formats. Neither runs any code supplied by
/// the peer while decoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Binary encoding, structs written as maps with named fields.
    MsgPack,
    /// Human readable encoding, also the easiest one for foreign peers.
    Json,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::MsgPack
    }
}

impl FromStr for Encoding {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let e = match s.to_lowercase().as_str() {
            "msgpack" | "messagepack" | "binary" => Self::MsgPack,
            "json" => Self::Json,
            _ => return Err(Error::Other(format!("unknown encoding: {}", s))),
        };
        Ok(e)
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Encoding::MsgPack => "msgpack",
            Encoding::Json => "json",
        };
        write!(f, "{}", s)
    }
}

/// Packs serializable object to bytes based on selected encoding.
pub fn pack<S: Serialize>(obj: S, encoding: Encoding) -> Result<Vec<u8>> {
    let packed: Vec<u8> = match encoding {
        Encoding::MsgPack => rmp_serde::to_vec_named(&obj)?,
        Encoding::Json => serde_json::to_vec(&obj)?,
    };
    Ok(packed)
}

/// Unpacks object from bytes based on selected encoding.
///
/// The whole input has to be consumed, trailing bytes are an error.
pub fn unpack<D: DeserializeOwned>(bytes: &[u8], encoding: Encoding) -> Result<D> {
    let unpacked = match encoding {
        Encoding::MsgPack => {
            let mut rest = bytes;
            let value = {
                let mut de = rmp_serde::Deserializer::new(&mut rest);
                D::deserialize(&mut de)?
            };
            if !rest.is_empty() {
                return Err(Error::TrailingBytes(rest.len()));
            }
            value
        }
        Encoding::Json => serde_json::from_slice(bytes)?,
    };
    Ok(unpacked)
}

/// Unpacks object from bytes, trying the binary encoding first and falling
/// back to JSON. Returns the encoding that worked so replies can use it.
pub fn unpack_detect<D: DeserializeOwned>(bytes: &[u8]) -> Result<(D, Encoding)> {
    match unpack(bytes, Encoding::MsgPack) {
        Ok(obj) => Ok((obj, Encoding::MsgPack)),
        Err(binary_err) => match unpack(bytes, Encoding::Json) {
            Ok(obj) => Ok((obj, Encoding::Json)),
            Err(json_err) => {
                trace!("undecodable payload: msgpack: {}, json: {}", binary_err, json_err);
                Err(Error::UndecodablePayload(json_err.to_string()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        value: Value,
    }

    #[test]
    fn detects_json_object() {
        let bytes = br#"{"name": "x", "value": [1, 2]}"#;
        let (s, enc): (Sample, _) = unpack_detect(bytes).unwrap();
        assert_eq!(enc, Encoding::Json);
        assert_eq!(s.value, json!([1, 2]));
    }

    #[test]
    fn detects_msgpack_struct() {
        let sample = Sample {
            name: "x".to_string(),
            value: json!({"a": 1.5}),
        };
        let bytes = pack(&sample, Encoding::MsgPack).unwrap();
        let (s, enc): (Sample, _) = unpack_detect(&bytes).unwrap();
        assert_eq!(enc, Encoding::MsgPack);
        assert_eq!(s, sample);
    }

    #[test]
    fn json_text_is_not_mistaken_for_a_binary_value() {
        // `[` is a valid single-byte msgpack integer, the rest must not be
        // silently ignored
        let (v, enc): (Value, _) = unpack_detect(b"[1,2,3]").unwrap();
        assert_eq!(enc, Encoding::Json);
        assert_eq!(v, json!([1, 2, 3]));
    }

    #[test]
    fn garbage_fails() {
        let res: Result<(Sample, Encoding)> = unpack_detect(&[0xc1, 0xff, 0x00]);
        assert!(matches!(res, Err(Error::UndecodablePayload(_))));
    }

    #[test]
    fn encoding_names() {
        assert_eq!("JSON".parse::<Encoding>().unwrap(), Encoding::Json);
        assert_eq!(Encoding::MsgPack.to_string(), "msgpack");
        assert!("pickle".parse::<Encoding>().is_err());
    }
}

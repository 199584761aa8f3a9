use std::borrow::Cow;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

// Every stored value is prefixed with a one byte tag saying how the rest of
// it was encoded. Tags below FIRST_EXTENSION_TAG belong to DefaultValues;
// codecs that wrap it pick their own tags at or above it.
pub type Tag = u8;

pub const TAG_BYTES: Tag = 0;
pub const TAG_TEXT: Tag = 1;
pub const TAG_OBJECT: Tag = 2;
pub const FIRST_EXTENSION_TAG: Tag = 32;

/// A value ready to be written: its tag plus the payload, possibly split
/// over several chunks so nothing needs to be copied into one buffer.
#[derive(Debug)]
pub struct EncodedValue<'a> {
    pub tag: Tag,
    pub chunks: Vec<Cow<'a, [u8]>>,
}

impl<'a> EncodedValue<'a> {
    pub fn new(tag: Tag, payload: impl Into<Cow<'a, [u8]>>) -> Self {
        EncodedValue {
            tag,
            chunks: vec![payload.into()],
        }
    }

    pub fn payload_len(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }
}

/// Converts keys to the bytes they are stored and compared under. Must be
/// deterministic and injective: two keys are the same key exactly when
/// their encodings are equal.
pub trait KeyCodec {
    type Key;

    fn encode_key<'k>(&self, key: &'k Self::Key) -> Result<Cow<'k, [u8]>>;
    fn decode_key(&self, bytes: &[u8]) -> Result<Self::Key>;
}

/// Converts values to and from tagged bytes.
///
/// Codecs for additional value types wrap [`DefaultValues`]: they encode
/// their own types under tags >= [`FIRST_EXTENSION_TAG`], and hand every
/// tag they don't recognize down to the wrapped codec.
pub trait ValueCodec {
    type Value;

    fn encode_value<'v>(&self, value: &'v Self::Value) -> Result<EncodedValue<'v>>;
    fn decode_value(&self, tag: Tag, bytes: &[u8]) -> Result<Self::Value>;
}

// Splits a raw stored value into its tag and payload.
pub(crate) fn split_tag(raw: &[u8]) -> Result<(Tag, &[u8])> {
    match raw.split_first() {
        Some((tag, payload)) => Ok((*tag, payload)),
        None => Err(Error::corrupt("stored value is missing its tag byte")),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BytesKeys;

impl KeyCodec for BytesKeys {
    type Key = Vec<u8>;

    fn encode_key<'k>(&self, key: &'k Vec<u8>) -> Result<Cow<'k, [u8]>> {
        Ok(Cow::Borrowed(key.as_slice()))
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringKeys;

impl KeyCodec for StringKeys {
    type Key = String;

    fn encode_key<'k>(&self, key: &'k String) -> Result<Cow<'k, [u8]>> {
        Ok(Cow::Borrowed(key.as_bytes()))
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::encoding(format!("key: {}", e)))
    }
}

/// Values understood by [`DefaultValues`]. Anything serde can serialize
/// can be stored as an `Object`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bytes(Vec<u8>),
    Text(String),
    Object(serde_json::Value),
}

impl Value {
    pub fn archive<T: Serialize>(t: &T) -> Result<Self> {
        Ok(Value::Object(serde_json::to_value(t)?))
    }

    pub fn unarchive<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Value::Object(v) => Ok(serde_json::from_value(v.clone())?),
            Value::Text(s) => Ok(serde_json::from_value(serde_json::Value::String(s.clone()))?),
            Value::Bytes(_) => Err(Error::encoding("raw bytes cannot be unarchived")),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValues;

impl ValueCodec for DefaultValues {
    type Value = Value;

    fn encode_value<'v>(&self, value: &'v Value) -> Result<EncodedValue<'v>> {
        Ok(match value {
            Value::Bytes(b) => EncodedValue::new(TAG_BYTES, b.as_slice()),
            Value::Text(s) => EncodedValue::new(TAG_TEXT, s.as_bytes()),
            Value::Object(v) => EncodedValue::new(TAG_OBJECT, serde_json::to_vec(v)?),
        })
    }

    fn decode_value(&self, tag: Tag, bytes: &[u8]) -> Result<Value> {
        match tag {
            TAG_BYTES => Ok(Value::Bytes(bytes.to_vec())),
            TAG_TEXT => String::from_utf8(bytes.to_vec())
                .map(Value::Text)
                .map_err(|e| Error::encoding(format!("text value: {}", e))),
            TAG_OBJECT => Ok(Value::Object(serde_json::from_slice(bytes)?)),
            t if t < FIRST_EXTENSION_TAG => {
                Err(Error::encoding(format!("unknown reserved tag {}", t)))
            }
            t => Err(Error::encoding(format!("no codec for extension tag {}", t))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    // An extension codec that adds counters on top of the default values.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Counted {
        Base(Value),
        Counter(u64),
    }

    pub(crate) const TAG_COUNTER: Tag = FIRST_EXTENSION_TAG;

    #[derive(Debug, Default)]
    pub(crate) struct CountedValues {
        base: DefaultValues,
    }

    impl ValueCodec for CountedValues {
        type Value = Counted;

        fn encode_value<'v>(&self, value: &'v Counted) -> Result<EncodedValue<'v>> {
            match value {
                Counted::Counter(n) => Ok(EncodedValue::new(TAG_COUNTER, n.to_le_bytes().to_vec())),
                Counted::Base(v) => self.base.encode_value(v),
            }
        }

        fn decode_value(&self, tag: Tag, bytes: &[u8]) -> Result<Counted> {
            match tag {
                TAG_COUNTER => {
                    let b: [u8; 8] = bytes
                        .try_into()
                        .map_err(|_| Error::encoding("counter must be 8 bytes"))?;
                    Ok(Counted::Counter(u64::from_le_bytes(b)))
                }
                _ => self.base.decode_value(tag, bytes).map(Counted::Base),
            }
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    fn roundtrip<C: ValueCodec>(codec: &C, v: &C::Value) -> C::Value {
        let encoded = codec.encode_value(v).unwrap();
        let payload: Vec<u8> = encoded.chunks.concat();
        codec.decode_value(encoded.tag, &payload).unwrap()
    }

    #[test]
    fn test_default_values() {
        let codec = DefaultValues;
        for v in [
            Value::from("hello"),
            Value::from(""),
            Value::from(vec![0_u8, 1, 255]),
            Value::archive(&Point { x: 1, y: -2 }).unwrap(),
            Value::archive(&vec!["a", "b"]).unwrap(),
        ] {
            assert_eq!(roundtrip(&codec, &v), v);
        }
    }

    #[test]
    fn test_bytes_and_text_are_not_copied() {
        let v = Value::from("zero copy");
        let encoded = DefaultValues.encode_value(&v).unwrap();
        assert_eq!(encoded.tag, TAG_TEXT);
        assert!(matches!(encoded.chunks[0], Cow::Borrowed(_)));
        assert_eq!(encoded.payload_len(), 9);
    }

    #[test]
    fn test_unarchive() {
        let v = Value::archive(&Point { x: 3, y: 4 }).unwrap();
        assert_eq!(v.unarchive::<Point>().unwrap(), Point { x: 3, y: 4 });
        assert_eq!(Value::from("s").unarchive::<String>().unwrap(), "s");
        assert!(Value::from(vec![1_u8]).unarchive::<String>().is_err());
    }

    #[test]
    fn test_bad_payloads() {
        let codec = DefaultValues;
        assert!(matches!(
            codec.decode_value(TAG_TEXT, &[0xff, 0xfe]),
            Err(Error::Encoding(_))
        ));
        assert!(matches!(
            codec.decode_value(TAG_OBJECT, b"{not json"),
            Err(Error::Encoding(_))
        ));
        assert!(matches!(codec.decode_value(7, b""), Err(Error::Encoding(_))));
        assert!(matches!(
            codec.decode_value(FIRST_EXTENSION_TAG, b""),
            Err(Error::Encoding(_))
        ));
    }

    #[test]
    fn test_extension_chain() {
        let codec = CountedValues::default();
        assert_eq!(
            roundtrip(&codec, &Counted::Counter(42)),
            Counted::Counter(42)
        );
        assert_eq!(
            roundtrip(&codec, &Counted::Base(Value::from("x"))),
            Counted::Base(Value::from("x"))
        );
        assert!(codec.decode_value(TAG_COUNTER, &[1, 2]).is_err());
    }

    #[test]
    fn test_keys() {
        let key = "clé".to_owned();
        let encoded = StringKeys.encode_key(&key).unwrap();
        assert_eq!(StringKeys.decode_key(&encoded).unwrap(), key);
        assert!(StringKeys.decode_key(&[0xff]).is_err());

        let key = vec![0_u8, 1];
        assert_eq!(&*BytesKeys.encode_key(&key).unwrap(), &[0_u8, 1]);
    }

    #[test]
    fn test_split_tag() {
        assert_eq!(split_tag(&[1, b'a']).unwrap(), (1, &b"a"[..]));
        assert!(matches!(split_tag(&[]), Err(Error::CorruptSubstrate(_))));
    }
}

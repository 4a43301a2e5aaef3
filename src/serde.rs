use std::io::Write;

use elliptic_curve::ScalarPrimitive;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};

use crate::compat::{CSCurve, SerializablePoint};

/// Encode an arbitrary serializable value into a vec.
pub fn encode<T: Serialize + ?Sized>(val: &T) -> Vec<u8> {
    rmp_serde::encode::to_vec(val).expect("failed to encode value")
}

/// Encode an arbitrary serializable value with a tag byte in front.
///
/// The tag is the round a message belongs to, and lets the receiving side
/// bin messages before decoding them.
pub fn encode_with_tag<T: Serialize + ?Sized>(tag: u8, val: &T) -> Vec<u8> {
    let mut out = vec![tag];
    rmp_serde::encode::write(&mut out, val).expect("failed to encode value");
    out
}

/// Encode an arbitrary serializable value into a writer.
pub fn encode_writer<T: Serialize + ?Sized, W: Write>(w: &mut W, val: &T) {
    rmp_serde::encode::write(w, val).expect("failed to encode value");
}

/// Decode an arbitrary value from a slice of bytes.
pub fn decode<T: DeserializeOwned>(input: &[u8]) -> Result<T, rmp_serde::decode::Error> {
    rmp_serde::decode::from_slice(input)
}

/// Serialize a single projective point.
pub fn serialize_projective_point<C: CSCurve, S: Serializer>(
    data: &C::ProjectivePoint,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    SerializablePoint::<C>::from_projective(data).serialize(serializer)
}

/// Serialize a scalar, through its canonical big-endian representation.
pub fn serialize_scalar<C: CSCurve, S: Serializer>(
    data: &C::Scalar,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let data: ScalarPrimitive<C> = (*data).into();
    data.serialize(serializer)
}

/// Deserialize a scalar, rejecting non-canonical encodings.
pub fn deserialize_scalar<'de, C: CSCurve, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<C::Scalar, D::Error> {
    let out = ScalarPrimitive::<C>::deserialize(deserializer)?;
    Ok(out.into())
}

#[cfg(any(feature = "k256", test))]
mod k256_impl {
    use super::super::*;

    use digest::{Digest, FixedOutput};
    use ecdsa::hazmat::DigestPrimitive;
    use k256::{FieldBytes, Scalar, Secp256k1, U256};

    impl CSCurve for Secp256k1 {
        const NAME: &'static [u8] = b"Secp256k1-SHA-256";

        fn scalar_hash(msg: &[u8]) -> Scalar {
            let digest = <Secp256k1 as DigestPrimitive>::Digest::new_with_prefix(msg);
            let m_bytes: FieldBytes = digest.finalize_fixed();
            <Scalar as Reduce<U256>>::reduce_bytes(&m_bytes)
        }

        fn serialize_point<S: Serializer>(
            point: &Self::AffinePoint,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            point.serialize(serializer)
        }

        fn deserialize_point<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Self::AffinePoint, D::Error> {
            Self::AffinePoint::deserialize(deserializer)
        }
    }
}

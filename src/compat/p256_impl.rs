#[cfg(any(feature = "p256", test))]
mod p256_impl {
    use super::super::*;

    use digest::{Digest, FixedOutput};
    use ecdsa::hazmat::DigestPrimitive;
    use p256::{FieldBytes, NistP256, Scalar, U256};

    impl CSCurve for NistP256 {
        const NAME: &'static [u8] = b"NistP256-SHA-256";

        fn scalar_hash(msg: &[u8]) -> Scalar {
            let digest = <NistP256 as DigestPrimitive>::Digest::new_with_prefix(msg);
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

use std::ops::AddAssign;

use elliptic_curve::{ops::Reduce, Curve, Field, FieldBytes, Group, PrimeField};
use libpaillier::unknown_order::BigNumber;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::compat::{CSCurve, SerializablePoint};

/// Represents a polynomial with coefficients in the scalar field of the curve.
#[derive(Debug, Clone)]
pub struct Polynomial<C: CSCurve> {
    /// The coefficients of our polynomial, from 0..size-1.
    coefficients: Vec<C::Scalar>,
}

impl<C: CSCurve> Polynomial<C> {
    /// Generate a random polynomial with a certain number of coefficients.
    pub fn random(rng: &mut impl CryptoRngCore, size: usize) -> Self {
        let coefficients = (0..size).map(|_| C::Scalar::random(&mut *rng)).collect();
        Self { coefficients }
    }

    /// Extend a constant to a random polynomial of a certain size.
    ///
    /// This is useful if you want the polynomial to have a certain value, but
    /// otherwise be random.
    pub fn extend_random(rng: &mut impl CryptoRngCore, size: usize, constant: &C::Scalar) -> Self {
        let mut coefficients = Vec::with_capacity(size);
        coefficients.push(*constant);
        for _ in 1..size {
            coefficients.push(C::Scalar::random(&mut *rng));
        }
        Self { coefficients }
    }

    /// Evaluate this polynomial at 0.
    ///
    /// This is much more efficient than evaluating at other points.
    pub fn evaluate_zero(&self) -> C::Scalar {
        self.coefficients.first().copied().unwrap_or(C::Scalar::ZERO)
    }

    /// Evaluate this polynomial at a specific point.
    pub fn evaluate(&self, x: &C::Scalar) -> C::Scalar {
        let mut out = C::Scalar::ZERO;
        for c in self.coefficients.iter().rev() {
            out = out * x + c;
        }
        out
    }

    /// Commit to this polynomial by acting on the generator
    pub fn commit(&self) -> GroupPolynomial<C> {
        let coefficients = self
            .coefficients
            .iter()
            .map(|x| C::ProjectivePoint::generator() * x)
            .collect();
        GroupPolynomial { coefficients }
    }
}

/// A polynomial with group coefficients.
///
/// These are the public counterpart of a [`Polynomial`], i.e. Feldman commitments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPolynomial<C: CSCurve> {
    coefficients: Vec<C::ProjectivePoint>,
}

impl<C: CSCurve> GroupPolynomial<C> {
    /// Evaluate this polynomial at 0.
    pub fn evaluate_zero(&self) -> C::ProjectivePoint {
        self.coefficients
            .first()
            .copied()
            .unwrap_or(C::ProjectivePoint::identity())
    }

    /// Evaluate this polynomial at a specific value.
    pub fn evaluate(&self, x: &C::Scalar) -> C::ProjectivePoint {
        let mut out = C::ProjectivePoint::identity();
        for c in self.coefficients.iter().rev() {
            out = out * x + c;
        }
        out
    }

    /// Return the length of this polynomial.
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }
}

impl<C: CSCurve> AddAssign<&Self> for GroupPolynomial<C> {
    fn add_assign(&mut self, rhs: &Self) {
        self.coefficients
            .iter_mut()
            .zip(rhs.coefficients.iter())
            .for_each(|(a, b)| *a += b);
    }
}

impl<C: CSCurve> Serialize for GroupPolynomial<C> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            self.coefficients
                .iter()
                .map(SerializablePoint::<C>::from_projective),
        )
    }
}

impl<'de, C: CSCurve> Deserialize<'de> for GroupPolynomial<C> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let points: Vec<SerializablePoint<C>> = Vec::deserialize(deserializer)?;
        let coefficients = points.into_iter().map(|p| p.to_projective()).collect();
        Ok(Self { coefficients })
    }
}

/// The order of the scalar field, as a big integer.
pub(crate) fn order<C: CSCurve>() -> BigNumber {
    scalar_to_bn::<C>(&-C::Scalar::ONE) + BigNumber::one()
}

/// Lift a scalar into the integers, as its canonical representative in `[0, q)`.
pub(crate) fn scalar_to_bn<C: CSCurve>(x: &C::Scalar) -> BigNumber {
    BigNumber::from_slice(x.to_repr())
}

/// Reduce an arbitrary non-negative integer into a scalar.
pub(crate) fn bn_to_scalar<C: CSCurve>(x: &BigNumber) -> C::Scalar {
    let reduced = x.nmod(&order::<C>()).to_bytes();
    let mut repr = FieldBytes::<C>::default();
    let offset = repr.len() - reduced.len().min(repr.len());
    let n = repr.len() - offset;
    repr[offset..].copy_from_slice(&reduced[reduced.len() - n..]);
    <C::Scalar as Reduce<<C as Curve>::Uint>>::reduce_bytes(&repr)
}

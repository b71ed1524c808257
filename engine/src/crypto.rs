//! BLS signature-share recombination.
//!
//! Oracles hold Shamir shares of each validator's exit-signature key and
//! publish signature shares over BLS12-381 G2. Given at least `threshold`
//! shares the keeper reconstructs the full signature by Lagrange
//! interpolation at zero over the scalar field. The keeper never verifies
//! the result itself; the beacon node does.

use std::collections::BTreeMap;

use bls12_381::{G2Affine, G2Projective, Scalar};

use crate::errors::CryptoError;

pub const BLS_SIGNATURE_LENGTH: usize = 96;

pub type BlsSignature = [u8; BLS_SIGNATURE_LENGTH];

/// Reconstructs the aggregate signature from shares keyed by their 1-based
/// share index. Lagrange coefficient for share `i`:
/// `λ_i = ∏_{j≠i} x_j · (x_j − x_i)⁻¹ (mod q)` with `x_k = k`.
pub fn reconstruct_shared_bls_signature(
	shares: &BTreeMap<u64, BlsSignature>,
) -> Result<BlsSignature, CryptoError> {
	if shares.is_empty() {
		return Err(CryptoError::NoShares);
	}

	let points = shares
		.iter()
		.map(|(&index, bytes)| {
			let point = Option::<G2Affine>::from(G2Affine::from_compressed(bytes))
				.ok_or(CryptoError::InvalidSharePoint { share_index: index })?;
			Ok((index, point))
		})
		.collect::<Result<Vec<_>, CryptoError>>()?;

	let mut accumulator = G2Projective::identity();
	for (i, point) in &points {
		let x_i = Scalar::from(*i);
		let mut coefficient = Scalar::one();
		for (j, _) in &points {
			if j == i {
				continue;
			}
			let x_j = Scalar::from(*j);
			let denominator = Option::<Scalar>::from((x_j - x_i).invert())
				.ok_or(CryptoError::DuplicateShareIndex { share_index: *j })?;
			coefficient *= x_j * denominator;
		}
		accumulator += G2Projective::from(point) * coefficient;
	}

	Ok(G2Affine::from(accumulator).to_compressed())
}

#[cfg(test)]
mod tests {
	use super::*;
	use bls12_381::{pairing, G1Affine, G1Projective};
	use proptest::prelude::*;

	fn poly_eval(coefficients: &[Scalar], x: u64) -> Scalar {
		let x = Scalar::from(x);
		coefficients.iter().rev().fold(Scalar::zero(), |acc, c| acc * x + c)
	}

	/// Builds signature shares of `message_point * secret` where the secret
	/// is shared with a degree `threshold - 1` polynomial.
	fn build_shares(
		coefficients: &[Scalar],
		message_point: &G2Projective,
		indices: &[u64],
	) -> BTreeMap<u64, BlsSignature> {
		indices
			.iter()
			.map(|&index| {
				let share_scalar = poly_eval(coefficients, index);
				let share_point = message_point * share_scalar;
				(index, G2Affine::from(share_point).to_compressed())
			})
			.collect()
	}

	#[test]
	fn reconstructs_from_known_shares() {
		// Threshold 3 of 5; shares at indices {1, 3, 4}.
		let coefficients =
			vec![Scalar::from(12345u64), Scalar::from(777u64), Scalar::from(31u64)];
		let message_point = G2Projective::generator() * Scalar::from(98765u64);
		let expected =
			G2Affine::from(&message_point * coefficients[0]).to_compressed();

		let shares = build_shares(&coefficients, &message_point, &[1, 3, 4]);
		let reconstructed = reconstruct_shared_bls_signature(&shares).unwrap();

		assert_eq!(reconstructed, expected);
	}

	#[test]
	fn no_shares_is_an_error() {
		let shares = BTreeMap::new();
		assert!(matches!(
			reconstruct_shared_bls_signature(&shares),
			Err(CryptoError::NoShares)
		));
	}

	#[test]
	fn invalid_point_is_rejected() {
		let mut shares = BTreeMap::new();
		shares.insert(1u64, [0xffu8; BLS_SIGNATURE_LENGTH]);
		assert!(matches!(
			reconstruct_shared_bls_signature(&shares),
			Err(CryptoError::InvalidSharePoint { share_index: 1 })
		));
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(16))]

		/// For any committee of 4..=20 and threshold 2..=n/2+1, any subset of
		/// `threshold` shares reconstructs the exact signature, and the result
		/// verifies against the aggregate public key via the pairing check.
		#[test]
		fn reconstruction_round_trips(
			committee_size in 4usize..=20,
			threshold_seed in 0usize..100,
			subset_seed in 0u64..1_000_000,
			secret in 1u64..u64::MAX,
			message in 1u64..u64::MAX,
		) {
			let threshold = 2 + threshold_seed % (committee_size / 2);

			// Secret polynomial of degree threshold - 1.
			let mut coefficients = vec![Scalar::from(secret)];
			for k in 1..threshold {
				coefficients.push(Scalar::from(subset_seed.wrapping_mul(k as u64).wrapping_add(k as u64)));
			}

			let message_point = G2Projective::generator() * Scalar::from(message);

			// Pick `threshold` distinct 1-based indices deterministically from the seed.
			let mut indices: Vec<u64> = (1..=committee_size as u64).collect();
			let mut picked = Vec::new();
			let mut state = subset_seed;
			for _ in 0..threshold {
				state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
				let position = (state % indices.len() as u64) as usize;
				picked.push(indices.remove(position));
			}

			let shares = build_shares(&coefficients, &message_point, &picked);
			let reconstructed = reconstruct_shared_bls_signature(&shares).unwrap();

			let expected_signature = G2Affine::from(&message_point * coefficients[0]);
			prop_assert_eq!(reconstructed, expected_signature.to_compressed());

			// e(pk, H(m)) == e(g1, sig)
			let aggregate_public_key =
				G1Affine::from(G1Projective::generator() * coefficients[0]);
			let message_affine = G2Affine::from(message_point);
			prop_assert_eq!(
				pairing(&aggregate_public_key, &message_affine),
				pairing(&G1Affine::generator(), &expected_signature)
			);
		}
	}
}

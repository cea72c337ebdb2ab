//! Property-based tests for proxim components.
//!
//! These tests verify invariants that should hold regardless of input:
//! - Distance kernels satisfy metric properties
//! - Recall is always in [0, 1]
//! - Scalar quantization error stays within one quantization step
//! - Flat search output is sorted, unique and consistent with the metric

use proptest::prelude::*;

prop_compose! {
    fn arb_vector(dim: usize)(vec in prop::collection::vec(-10.0f32..10.0, dim)) -> Vec<f32> {
        vec
    }
}

mod distance_props {
    use super::*;
    use proxim::simd::{dot, hamming, l2_distance_squared};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn l2_distance_non_negative(a in arb_vector(64), b in arb_vector(64)) {
            let dist = l2_distance_squared(&a, &b);
            prop_assert!(dist >= 0.0, "L2 distance must be non-negative, got {}", dist);
        }

        #[test]
        fn l2_distance_symmetric(a in arb_vector(33), b in arb_vector(33)) {
            let d_ab = l2_distance_squared(&a, &b);
            let d_ba = l2_distance_squared(&b, &a);
            prop_assert!((d_ab - d_ba).abs() <= 1e-4 * d_ab.max(1.0));
        }

        #[test]
        fn l2_distance_self_is_zero(a in arb_vector(37)) {
            prop_assert_eq!(l2_distance_squared(&a, &a), 0.0);
        }

        #[test]
        fn dot_matches_naive(a in arb_vector(29), b in arb_vector(29)) {
            let naive: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
            prop_assert!((dot(&a, &b) - naive).abs() <= 1e-3 * naive.abs().max(1.0));
        }

        #[test]
        fn hamming_counts_differing_bits(
            a in prop::collection::vec(any::<u8>(), 16),
            b in prop::collection::vec(any::<u8>(), 16),
        ) {
            let naive: u32 = a.iter().zip(&b).map(|(x, y)| (x ^ y).count_ones()).sum();
            prop_assert_eq!(hamming(&a, &b), naive);
            prop_assert_eq!(hamming(&a, &a), 0);
        }
    }
}

mod recall_props {
    use super::*;
    use proxim::benchmark::recall_at_k;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn recall_in_unit_interval(
            gt in prop::collection::vec(0i64..1000, 1..50),
            retrieved in prop::collection::vec(0i64..1000, 0..50),
            k in 1usize..50,
        ) {
            let r = recall_at_k(&gt, &retrieved, k);
            prop_assert!((0.0..=1.0).contains(&r), "recall {} out of range", r);
        }

        #[test]
        fn perfect_recall_when_identical(n in 1i64..50) {
            let ids: Vec<i64> = (0..n).collect();
            let r = recall_at_k(&ids, &ids, n as usize);
            prop_assert!((r - 1.0).abs() < 1e-6);
        }

        #[test]
        fn zero_recall_disjoint_sets(n in 1i64..50) {
            let gt: Vec<i64> = (0..n).collect();
            let retrieved: Vec<i64> = (n..2 * n).collect();
            prop_assert_eq!(recall_at_k(&gt, &retrieved, n as usize), 0.0);
        }
    }
}

mod quantizer_props {
    use super::*;
    use proxim::{QuantizerType, ScalarQuantizer};

    fn step(qtype: QuantizerType, range: f32) -> f32 {
        match qtype {
            QuantizerType::QT8bit | QuantizerType::QT8bitUniform => range / 255.0,
            QuantizerType::QT4bit | QuantizerType::QT4bitUniform => range / 15.0,
            QuantizerType::QT1bit => range,
            QuantizerType::QTfp16 => 0.0,
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn decode_error_bounded_by_one_step(
            data in prop::collection::vec(-5.0f32..5.0, 8 * 20),
            qtype in prop::sample::select(vec![
                QuantizerType::QT8bit,
                QuantizerType::QT4bit,
                QuantizerType::QT8bitUniform,
                QuantizerType::QT4bitUniform,
                QuantizerType::QT1bit,
                QuantizerType::QTfp16,
            ]),
        ) {
            let d = 8;
            let mut sq = ScalarQuantizer::new(d, qtype).unwrap();
            sq.train(&data).unwrap();

            let lo = data.iter().copied().fold(f32::INFINITY, f32::min);
            let hi = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let bound = step(qtype, hi - lo) + 1e-2 * hi.abs().max(lo.abs()).max(1.0);

            let codes = sq.encode_batch(&data).unwrap();
            prop_assert_eq!(codes.len(), 20 * sq.code_size());
            let decoded: Vec<f32> = codes
                .chunks_exact(sq.code_size())
                .flat_map(|c| sq.decode(c))
                .collect();
            prop_assert_eq!(decoded.len(), data.len());
            for (x, y) in data.iter().zip(&decoded) {
                prop_assert!((x - y).abs() <= bound, "{:?}: {} -> {} (bound {})", qtype, x, y, bound);
            }
        }
    }
}

mod search_props {
    use super::*;
    use proxim::{DistanceMetric, FlatIndex, VectorIndex};
    use std::collections::HashSet;

    prop_compose! {
        fn arb_database(n: usize, dim: usize)(
            data in prop::collection::vec(-1.0f32..1.0, n * dim)
        ) -> Vec<f32> {
            data
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(40))]

        #[test]
        fn flat_results_sorted_unique_and_exact(
            db in arb_database(60, 6),
            q in prop::collection::vec(-1.0f32..1.0, 6),
            k in 1usize..80,
        ) {
            let d = 6;
            let mut idx = FlatIndex::l2(d).unwrap();
            idx.add(&db).unwrap();
            let res = idx.search(&q, k).unwrap();

            let filled = res.neighbors_of(0);
            prop_assert_eq!(filled.len(), k.min(60));

            let ids: HashSet<i64> = filled.iter().map(|nb| nb.label).collect();
            prop_assert_eq!(ids.len(), filled.len());

            for w in filled.windows(2) {
                prop_assert!(w[0].distance <= w[1].distance);
            }
            for nb in &filled {
                prop_assert!((0..60).contains(&nb.label));
                let row = nb.label as usize;
                let expected = DistanceMetric::L2.distance(&q, &db[row * d..(row + 1) * d]);
                prop_assert_eq!(nb.distance, expected);
            }
        }

        #[test]
        fn failed_add_leaves_index_unchanged(
            db in arb_database(10, 4),
            extra in 1usize..4,
        ) {
            let mut idx = FlatIndex::l2(4).unwrap();
            idx.add(&db).unwrap();
            let bad = vec![0.0f32; 4 * 3 + extra];
            prop_assert!(idx.add(&bad).is_err());
            prop_assert_eq!(idx.ntotal(), 10);
            prop_assert_eq!(idx.vectors(), &db[..]);
        }
    }
}

// Tests for SimpleRng reproducibility and the fill helpers the fixtures
// depend on.

use convnet_engine::utils::SimpleRng;

mod reproducibility_tests {
    use super::*;

    #[test]
    fn test_rng_same_seed_produces_same_sequence() {
        let mut a = SimpleRng::new(12345);
        let mut b = SimpleRng::new(12345);
        for _ in 0..100 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn test_rng_different_seeds_produce_different_sequences() {
        let mut a = SimpleRng::new(1);
        let mut b = SimpleRng::new(2);
        let same = (0..100).filter(|_| a.next_u32() == b.next_u32()).count();
        assert!(same < 5);
    }

    #[test]
    fn test_rng_zero_seed_uses_default() {
        let mut zero = SimpleRng::new(0);
        let mut golden = SimpleRng::new(0x9e3779b97f4a7c15);
        assert_eq!(zero.next_u32(), golden.next_u32());
    }

    #[test]
    fn test_first_values_are_stable() {
        // Regression fixtures are generated from this exact sequence
        let mut rng = SimpleRng::new(1);
        let mut x: u64 = 1;
        for _ in 0..10 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            assert_eq!(rng.next_u32(), (x >> 32) as u32);
        }
    }
}

mod fill_tests {
    use super::*;

    #[test]
    fn test_fill_uniform_bounds_and_spread() {
        let mut rng = SimpleRng::new(42);
        let mut data = vec![0.0f32; 10_000];
        rng.fill_uniform(&mut data, -1.0, 1.0);
        assert!(data.iter().all(|&v| (-1.0..=1.0).contains(&v)));
        let mean = data.iter().sum::<f32>() / data.len() as f32;
        assert!(mean.abs() < 0.05, "mean {}", mean);
        assert!(data.iter().any(|&v| v < -0.9) && data.iter().any(|&v| v > 0.9));
    }

    #[test]
    fn test_fill_ints_hits_every_value() {
        let mut rng = SimpleRng::new(7);
        let mut data = vec![0.0f32; 1_000];
        rng.fill_ints(&mut data, 0, 3);
        for value in 0..=3 {
            assert!(data.contains(&(value as f32)), "missing {}", value);
        }
        assert!(data.iter().all(|&v| v.fract() == 0.0 && (0.0..=3.0).contains(&v)));
    }

    #[test]
    fn test_gen_usize_within_bounds() {
        let mut rng = SimpleRng::new(9);
        for _ in 0..1_000 {
            assert!(rng.gen_usize(10) < 10);
        }
        assert_eq!(rng.gen_usize(0), 0);
    }
}

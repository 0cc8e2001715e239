//! Seeded synthetic reference dataset
//!
//! 1000 "normal" rows and 100 "anomalous" rows in the [`FeatureVector`]
//! layout. Only used to bootstrap the outlier model when no recorded
//! history is available. Same seed, same rows.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::features::FeatureVector;

pub const NORMAL_ROWS: usize = 1000;
pub const ANOMALOUS_ROWS: usize = 100;

const UNUSUAL_HOURS: [f64; 5] = [2.0, 3.0, 4.0, 24.0, 1.0];

/// Build the reference dataset, normal rows first
pub fn reference_dataset(seed: u64) -> Vec<FeatureVector> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(NORMAL_ROWS + ANOMALOUS_ROWS);

    for _ in 0..NORMAL_ROWS {
        rows.push(FeatureVector::from_array([
            lognormal(&mut rng, 3.0, 1.0),
            normal(&mut rng, 3.0, 1.0),
            rng.gen_range(1..5) as f64,
            rng.gen_range(8..22) as f64,
            rng.gen_range(0..7) as f64,
            rng.gen_range(1..100) as f64,
            lognormal(&mut rng, 3.0, 0.5),
            exponential(&mut rng, 50.0),
            lognormal(&mut rng, 3.0, 0.5),
            lognormal(&mut rng, 4.0, 1.0),
            lognormal(&mut rng, 2.0, 0.5),
            exponential(&mut rng, 3600.0),
            exponential(&mut rng, 1800.0),
            beta(&mut rng, 0.1, 1.0),
            poisson(&mut rng, 1.0),
            poisson(&mut rng, 5.0),
            lognormal(&mut rng, 3.0, 1.0),
            lognormal(&mut rng, 4.0, 1.0),
        ]));
    }

    for _ in 0..ANOMALOUS_ROWS {
        let hour = UNUSUAL_HOURS[rng.gen_range(0..UNUSUAL_HOURS.len())];
        rows.push(FeatureVector::from_array([
            lognormal(&mut rng, 6.0, 1.0),
            normal(&mut rng, 6.0, 1.0),
            rng.gen_range(4..8) as f64,
            hour,
            rng.gen_range(0..7) as f64,
            rng.gen_range(1..10) as f64,
            lognormal(&mut rng, 5.0, 1.0),
            exponential(&mut rng, 200.0),
            lognormal(&mut rng, 5.0, 1.0),
            lognormal(&mut rng, 7.0, 1.0),
            lognormal(&mut rng, 4.0, 1.0),
            exponential(&mut rng, 300.0),
            exponential(&mut rng, 100.0),
            beta(&mut rng, 0.8, 0.2),
            poisson(&mut rng, 10.0),
            poisson(&mut rng, 20.0),
            lognormal(&mut rng, 6.0, 1.0),
            lognormal(&mut rng, 7.0, 1.0),
        ]));
    }

    rows
}

/// Box-Muller
fn normal(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>(); // (0, 1]
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}

fn lognormal(rng: &mut StdRng, mu: f64, sigma: f64) -> f64 {
    normal(rng, mu, sigma).exp()
}

fn exponential(rng: &mut StdRng, scale: f64) -> f64 {
    let u: f64 = 1.0 - rng.gen::<f64>();
    -scale * u.ln()
}

/// Knuth's multiplication method; fine for the small rates used here
fn poisson(rng: &mut StdRng, lambda: f64) -> f64 {
    let limit = (-lambda).exp();
    let mut k = 0u32;
    let mut p = 1.0;
    loop {
        p *= rng.gen::<f64>();
        if p <= limit {
            return f64::from(k);
        }
        k += 1;
    }
}

/// Jöhnk's algorithm
fn beta(rng: &mut StdRng, a: f64, b: f64) -> f64 {
    loop {
        let x = rng.gen::<f64>().powf(1.0 / a);
        let y = rng.gen::<f64>().powf(1.0 / b);
        let sum = x + y;
        if sum <= 1.0 && sum > 0.0 {
            return x / sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_shape() {
        let rows = reference_dataset(42);
        assert_eq!(rows.len(), NORMAL_ROWS + ANOMALOUS_ROWS);
        assert!(rows
            .iter()
            .all(|r| r.as_slice().iter().all(|v| v.is_finite())));
    }

    #[test]
    fn test_dataset_is_seeded() {
        assert_eq!(reference_dataset(42), reference_dataset(42));
        assert_ne!(reference_dataset(42), reference_dataset(7));
    }

    #[test]
    fn test_segments_differ() {
        let rows = reference_dataset(42);
        let hours_normal = rows[..NORMAL_ROWS].iter().all(|r| (8.0..22.0).contains(&r.get(3)));
        let hours_anomalous = rows[NORMAL_ROWS..]
            .iter()
            .all(|r| UNUSUAL_HOURS.contains(&r.get(3)));
        assert!(hours_normal);
        assert!(hours_anomalous);

        let mean_amount = |rows: &[FeatureVector]| {
            rows.iter().map(|r| r.get(0)).sum::<f64>() / rows.len() as f64
        };
        assert!(mean_amount(&rows[NORMAL_ROWS..]) > 10.0 * mean_amount(&rows[..NORMAL_ROWS]));
    }

    #[test]
    fn test_distribution_helpers_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            let b = beta(&mut rng, 0.8, 0.2);
            assert!((0.0..=1.0).contains(&b));
            assert!(exponential(&mut rng, 10.0) >= 0.0);
            assert!(poisson(&mut rng, 5.0) >= 0.0);
        }
    }
}

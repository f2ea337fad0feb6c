//! Genome operators: policy parameters as plain keyed arrays.
//!
//! A genome is the flat, serializable form of a [`Policy`](crate::policy::Policy):
//! one entry per structural parameter, each a vector (biases) or a matrix
//! (weights). The evolution loop never touches a network directly; it
//! recombines and mutates these arrays and hands them to a worker, which
//! imports them into a fresh policy.
//!
//! Serialized, a genome is a JSON object of nested number arrays:
//!
//! ```json
//! { "fc1.bias": [0.1, -0.2], "fc1.weight": [[0.3, 0.0], [0.5, -0.1]] }
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A single named parameter array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightArray {
    /// Row-major `[out][in]` weight matrix.
    Matrix(Vec<Vec<f32>>),
    /// Bias vector.
    Vector(Vec<f32>),
}

impl WeightArray {
    /// Dimensions of the array: `[len]` for vectors, `[rows, cols]` for
    /// matrices (cols taken from the first row).
    pub fn shape(&self) -> Vec<usize> {
        match self {
            WeightArray::Vector(v) => vec![v.len()],
            WeightArray::Matrix(rows) => {
                vec![rows.len(), rows.first().map(|r| r.len()).unwrap_or(0)]
            }
        }
    }

    /// Total number of scalars.
    pub fn len(&self) -> usize {
        match self {
            WeightArray::Vector(v) => v.len(),
            WeightArray::Matrix(rows) => rows.iter().map(|r| r.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Structural equality: same variant and identical row lengths.
    pub fn same_shape(&self, other: &WeightArray) -> bool {
        match (self, other) {
            (WeightArray::Vector(a), WeightArray::Vector(b)) => a.len() == b.len(),
            (WeightArray::Matrix(a), WeightArray::Matrix(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(ra, rb)| ra.len() == rb.len())
            }
            _ => false,
        }
    }

    /// Iterate over every scalar in row-major order.
    pub fn scalars(&self) -> Box<dyn Iterator<Item = f32> + '_> {
        match self {
            WeightArray::Vector(v) => Box::new(v.iter().copied()),
            WeightArray::Matrix(rows) => Box::new(rows.iter().flat_map(|r| r.iter().copied())),
        }
    }

    fn for_each_mut(&mut self, mut f: impl FnMut(&mut f32)) {
        match self {
            WeightArray::Vector(v) => v.iter_mut().for_each(&mut f),
            WeightArray::Matrix(rows) => rows.iter_mut().flatten().for_each(&mut f),
        }
    }
}

/// Keyed parameter collection. Ordered so that random operators consume
/// the RNG in a reproducible sequence.
pub type WeightMap = BTreeMap<String, WeightArray>;

/// Errors from combining genomes of different structure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenomeError {
    #[error("parameter {0:?} present in one parent only")]
    KeyMismatch(String),

    #[error("parameter {key:?} has shape {left:?} in one parent and {right:?} in the other")]
    ShapeMismatch {
        key: String,
        left: Vec<usize>,
        right: Vec<usize>,
    },
}

/// Standard normal sample via the Box-Muller transform.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Gaussian point mutation over a flat parameter slice.
///
/// Each scalar independently, with probability `rate`, gets additive
/// `N(0, sigma²)` noise. Unselected scalars are untouched.
pub fn mutate_slice<R: Rng + ?Sized>(values: &mut [f32], rate: f64, sigma: f64, rng: &mut R) {
    for v in values {
        mutate_scalar(v, rate, sigma, rng);
    }
}

fn mutate_scalar<R: Rng + ?Sized>(v: &mut f32, rate: f64, sigma: f64, rng: &mut R) {
    if rng.random::<f64>() < rate {
        *v += (gaussian(rng) * sigma) as f32;
    }
}

/// Gaussian point mutation over every array of a genome.
pub fn mutate<R: Rng + ?Sized>(weights: &mut WeightMap, rate: f64, sigma: f64, rng: &mut R) {
    for array in weights.values_mut() {
        array.for_each_mut(|v| mutate_scalar(v, rate, sigma, rng));
    }
}

/// Uniform crossover.
///
/// For every key, each element is taken from `a` or `b` by an independent
/// fair coin flip. Values are copied, never blended. Both parents must have
/// the same keys and shapes.
pub fn crossover<R: Rng + ?Sized>(
    a: &WeightMap,
    b: &WeightMap,
    rng: &mut R,
) -> Result<WeightMap, GenomeError> {
    if let Some(extra) = b.keys().find(|k| !a.contains_key(*k)) {
        return Err(GenomeError::KeyMismatch(extra.clone()));
    }

    let mut child = WeightMap::new();
    for (key, left) in a {
        let right = b
            .get(key)
            .ok_or_else(|| GenomeError::KeyMismatch(key.clone()))?;
        if !left.same_shape(right) {
            return Err(GenomeError::ShapeMismatch {
                key: key.clone(),
                left: left.shape(),
                right: right.shape(),
            });
        }

        let mixed = match (left, right) {
            (WeightArray::Vector(l), WeightArray::Vector(r)) => {
                WeightArray::Vector(pick_elements(l, r, rng))
            }
            (WeightArray::Matrix(l), WeightArray::Matrix(r)) => WeightArray::Matrix(
                l.iter()
                    .zip(r)
                    .map(|(lr, rr)| pick_elements(lr, rr, rng))
                    .collect(),
            ),
            _ => {
                return Err(GenomeError::ShapeMismatch {
                    key: key.clone(),
                    left: left.shape(),
                    right: right.shape(),
                })
            }
        };
        child.insert(key.clone(), mixed);
    }
    Ok(child)
}

fn pick_elements<R: Rng + ?Sized>(left: &[f32], right: &[f32], rng: &mut R) -> Vec<f32> {
    left.iter()
        .zip(right)
        .map(|(&l, &r)| if rng.random_bool(0.5) { l } else { r })
        .collect()
}

/// Total number of scalars in a genome.
pub fn parameter_count(weights: &WeightMap) -> usize {
    weights.values().map(WeightArray::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn filled(value: f32) -> WeightMap {
        let mut w = WeightMap::new();
        w.insert("layer.weight".into(), WeightArray::Matrix(vec![vec![value; 40]; 25]));
        w.insert("layer.bias".into(), WeightArray::Vector(vec![value; 25]));
        w
    }

    #[test]
    fn zero_rate_mutation_is_identity() {
        let original = filled(0.5);
        let mut mutated = original.clone();
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        mutate(&mut mutated, 0.0, 5.0, &mut rng);
        assert_eq!(original, mutated);
    }

    #[test]
    fn zero_sigma_mutation_is_identity() {
        let original = filled(0.5);
        let mut mutated = original.clone();
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        mutate(&mut mutated, 1.0, 0.0, &mut rng);
        assert_eq!(original, mutated);
    }

    #[test]
    fn full_rate_mutation_touches_every_scalar() {
        let original = filled(0.5);
        let mut mutated = original.clone();
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        mutate(&mut mutated, 1.0, 1.0, &mut rng);

        for (key, array) in &original {
            let changed = array
                .scalars()
                .zip(mutated[key].scalars())
                .filter(|(a, b)| a != b)
                .count();
            assert_eq!(changed, array.len(), "every scalar of {key} should move");
        }
    }

    #[test]
    fn partial_rate_mutates_roughly_that_fraction() {
        let original = filled(0.0);
        let mut mutated = original.clone();
        let mut rng = ChaCha12Rng::seed_from_u64(4);
        mutate(&mut mutated, 0.1, 1.0, &mut rng);

        let total = parameter_count(&original);
        let changed: usize = original
            .iter()
            .map(|(k, a)| a.scalars().zip(mutated[k].scalars()).filter(|(x, y)| x != y).count())
            .sum();
        let fraction = changed as f64 / total as f64;
        assert!((0.05..0.15).contains(&fraction), "mutated fraction {fraction}");
    }

    #[test]
    fn crossover_preserves_shapes() {
        let a = filled(1.0);
        let b = filled(-1.0);
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let child = crossover(&a, &b, &mut rng).unwrap();

        assert_eq!(child.len(), a.len());
        for (key, array) in &a {
            assert!(child[key].same_shape(array));
        }
    }

    #[test]
    fn crossover_copies_without_blending() {
        let a = filled(1.0);
        let b = filled(-1.0);
        let mut rng = ChaCha12Rng::seed_from_u64(6);
        let child = crossover(&a, &b, &mut rng).unwrap();
        assert!(child
            .values()
            .flat_map(|a| a.scalars().collect::<Vec<_>>())
            .all(|v| v == 1.0 || v == -1.0));
    }

    #[test]
    fn crossover_draws_evenly_from_both_parents() {
        let a = filled(1.0);
        let b = filled(-1.0);
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        let samples = 200;
        let positions = a["layer.bias"].len();
        let mut from_a = vec![0usize; positions];

        for _ in 0..samples {
            let child = crossover(&a, &b, &mut rng).unwrap();
            for (i, v) in child["layer.bias"].scalars().enumerate() {
                if v == 1.0 {
                    from_a[i] += 1;
                }
            }
        }

        let overall = from_a.iter().sum::<usize>() as f64 / (samples * positions) as f64;
        assert!((0.45..0.55).contains(&overall), "overall share from A: {overall}");
        for (i, count) in from_a.iter().enumerate() {
            let share = *count as f64 / samples as f64;
            assert!((0.3..0.7).contains(&share), "position {i} share from A: {share}");
        }
    }

    #[test]
    fn crossover_rejects_mismatched_parents() {
        let a = filled(1.0);
        let mut b = filled(1.0);
        b.insert("layer.bias".into(), WeightArray::Vector(vec![0.0; 3]));
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        assert!(matches!(
            crossover(&a, &b, &mut rng),
            Err(GenomeError::ShapeMismatch { .. })
        ));

        let mut c = filled(1.0);
        c.insert("extra".into(), WeightArray::Vector(vec![0.0]));
        assert!(matches!(
            crossover(&a, &c, &mut rng),
            Err(GenomeError::KeyMismatch(_))
        ));
    }

    #[test]
    fn genome_serializes_as_nested_arrays() {
        let mut w = WeightMap::new();
        w.insert("b".into(), WeightArray::Vector(vec![0.5, -1.0]));
        w.insert("w".into(), WeightArray::Matrix(vec![vec![1.0], vec![2.0]]));
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"b":[0.5,-1.0],"w":[[1.0],[2.0]]}"#);

        let back: WeightMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }
}

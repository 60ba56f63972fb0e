use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::SimError;
use crate::worker::cell_label;

const MAX_ITERATIONS: usize = 300;

pub fn kmeans(features: &[Vec<f64>], k: usize, seed: u64) -> Result<Vec<usize>, SimError> {
    let n = features.len();
    if k == 0 {
        return Err(SimError::InvalidArgument("cluster count must be positive".into()));
    }
    if k > n {
        return Err(SimError::InvalidArgument(format!(
            "cannot form {k} clusters from {n} cells"
        )));
    }
    let dim = features[0].len();
    if let Some(idx) = features.iter().position(|f| f.len() != dim) {
        return Err(SimError::Shape(format!(
            "feature vector {} has length {}, expected {}",
            idx,
            features[idx].len(),
            dim
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut centroids = kmeans_pp_init(features, k, &mut rng);
    let mut assignments = vec![usize::MAX; n];

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (point, assignment) in features.iter().zip(assignments.iter_mut()) {
            let nearest = nearest_centroid(point, &centroids);
            if *assignment != nearest {
                *assignment = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (point, &cluster) in features.iter().zip(assignments.iter()) {
            counts[cluster] += 1;
            for (acc, value) in sums[cluster].iter_mut().zip(point.iter()) {
                *acc += value;
            }
        }
        // An emptied cluster keeps its previous centroid.
        for ((centroid, sum), &count) in centroids.iter_mut().zip(sums).zip(counts.iter()) {
            if count > 0 {
                *centroid = sum.into_iter().map(|v| v / count as f64).collect();
            }
        }
    }
    Ok(assignments)
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest_centroid(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (idx, centroid) in centroids.iter().enumerate() {
        let dist = squared_distance(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = idx;
        }
    }
    best
}

fn kmeans_pp_init(features: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(features[rng.gen_range(0..features.len())].clone());

    while centroids.len() < k {
        let distances: Vec<f64> = features
            .iter()
            .map(|point| {
                centroids
                    .iter()
                    .map(|c| squared_distance(point, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = distances.iter().sum();
        let next = if total > 0.0 {
            let mut threshold = rng.r#gen::<f64>() * total;
            let mut chosen = distances.len() - 1;
            for (idx, &dist) in distances.iter().enumerate() {
                threshold -= dist;
                if threshold <= 0.0 && dist > 0.0 {
                    chosen = idx;
                    break;
                }
            }
            chosen
        } else {
            // Every point coincides with a centroid already.
            rng.gen_range(0..features.len())
        };
        centroids.push(features[next].clone());
    }
    centroids
}

pub fn write_cluster_ids(path: &Path, labels: &[usize]) -> Result<(), SimError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["", "cl"])?;
    for (cell_id, label) in labels.iter().enumerate() {
        writer.write_record([cell_label(cell_id), label.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

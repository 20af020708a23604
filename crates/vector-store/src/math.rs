use rayon::prelude::*;

/// Cosine similarity; `0.0` when either vector has zero norm or the widths differ.
#[must_use]
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// `1 - cosine_similarity`, clamped to `[0, 2]`.
#[must_use]
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    (1.0 - cosine_similarity(a, b)).clamp(0.0, 2.0)
}

/// Distance from `direction` to every row, in row order.
#[must_use]
pub fn batch_cosine_distance(direction: &[f64], rows: &[Vec<f64>]) -> Vec<f64> {
    rows.par_iter()
        .map(|row| cosine_distance(direction, row))
        .collect()
}

#[must_use]
pub fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

//! Rank transforms.

/// Ranks (1-based) of `xs` in ascending order, ties receiving the average of the
/// ranks they span. `NaN` input is ranked last.
pub fn average_ranks(xs: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| xs[a].total_cmp(&xs[b]).then(a.cmp(&b)));

    let mut ranks = vec![0.0_f64; n];
    let mut start = 0usize;
    while start < n {
        let mut end = start + 1;
        while end < n && xs[order[end]] == xs[order[start]] {
            end += 1;
        }
        // positions start..end (0-based) share rank mean(start+1 ..= end)
        let avg = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = avg;
        }
        start = end;
    }
    ranks
}

pub struct Math {}
impl Math {
    /// linear interpolation of `a` to `b` at fraction `t` in [0, 1]
    pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
        a + (b - a) * t
    }

    /// fraction of `t` between `t0` and `t1`, 0 when the span is degenerate
    pub fn fraction_between(t: f64, t0: f64, t1: f64) -> f64 {
        let span = t1 - t0;
        if span <= f64::EPSILON {
            0.0
        } else {
            (t - t0) / span
        }
    }

    /// index of the last element with `key(elem) <= target`, None if the
    /// first element is already past the target. `items` must be sorted.
    pub fn last_at_or_before<T, F>(items: &[T], target: f64, key: F) -> Option<usize>
    where
        F: Fn(&T) -> f64,
    {
        if items.is_empty() || key(&items[0]) > target {
            return None;
        }

        let mut lo = 0;
        let mut hi = items.len();
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if key(&items[mid]) <= target {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        Some(lo)
    }
}

//! Burg maximum-entropy AR estimation.
//!
//! Coefficients use the convention `x[t] + sum(a[k] * x[t-1-k]) = e[t]`,
//! so the one-step prediction is `-sum(a[k] * x[t-1-k])`.

/// Reusable Burg estimator. Buffers are sized once for the longest input.
pub struct BurgEstimator {
    order: usize,
    forward: Vec<f64>,
    backward: Vec<f64>,
    step_up: Vec<f64>,
}

impl BurgEstimator {
    pub fn new(order: usize, max_len: usize) -> Self {
        Self {
            order,
            forward: vec![0.0; max_len],
            backward: vec![0.0; max_len],
            step_up: vec![0.0; order],
        }
    }

    /// Fit `order` coefficients to `samples`, writing them into `out`.
    ///
    /// Returns the final prediction-error power. When the residual energy
    /// vanishes the reflection coefficient for that stage is zero, so the
    /// output stays finite on silent or perfectly predictable input.
    pub fn fit(&mut self, samples: &[f64], out: &mut [f64]) -> f64 {
        let n = samples.len();
        let order = self.order.min(out.len());
        out.iter_mut().for_each(|a| *a = 0.0);

        let mut power = samples.iter().map(|x| x * x).sum::<f64>() / n.max(1) as f64;
        if n <= order || order == 0 {
            return power;
        }

        if self.forward.len() < n {
            self.forward.resize(n, 0.0);
            self.backward.resize(n, 0.0);
        }
        let f = &mut self.forward[..n];
        let b = &mut self.backward[..n];
        f.copy_from_slice(samples);
        b.copy_from_slice(samples);

        for m in 0..order {
            let mut num = 0.0;
            let mut den = 0.0;
            for j in (m + 1)..n {
                num += f[j] * b[j - 1];
                den += f[j] * f[j] + b[j - 1] * b[j - 1];
            }

            let k = if den > 1e-30 { -2.0 * num / den } else { 0.0 };

            // Step-up recursion on the direct-form coefficients.
            self.step_up[..m].copy_from_slice(&out[..m]);
            for i in 0..m {
                out[i] = self.step_up[i] + k * self.step_up[m - 1 - i];
            }
            out[m] = k;

            // Descending so b[j - 1] is still the previous stage's value.
            for j in ((m + 1)..n).rev() {
                let fj = f[j];
                let bj = b[j - 1];
                f[j] = fj + k * bj;
                b[j] = bj + k * fj;
            }

            power *= 1.0 - k * k;
        }

        power
    }
}

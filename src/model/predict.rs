//! AR extrapolation of the predicted tail of a transform window.

/// Fill `window[history_len..]` by running the AR recursion forward.
///
/// Each step is `x[t] = -sum(a[k] * x[t-1-k])`, consuming earlier
/// predictions once `t` passes the historical data.
pub fn extrapolate(coefficients: &[f64], window: &mut [f64], history_len: usize) {
    let order = coefficients.len();
    if history_len < order {
        window[history_len..].iter_mut().for_each(|x| *x = 0.0);
        return;
    }

    for t in history_len..window.len() {
        let past = &window[t - order..t];
        let prediction: f64 = past
            .iter()
            .rev()
            .zip(coefficients)
            .map(|(x, a)| x * a)
            .sum();
        window[t] = -prediction;
    }
}

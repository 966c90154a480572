//! FFT-based analytic signal and phase extraction.

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::error::Result;

/// Fixed-length Hilbert transform with reusable plans and buffers.
pub struct AnalyticTransform {
    len: usize,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    spectrum: Vec<Complex64>,
    analytic: Vec<Complex64>,
    forward_scratch: Vec<Complex64>,
    inverse_scratch: Vec<Complex64>,
}

impl AnalyticTransform {
    pub fn new(len: usize) -> Self {
        let mut real_planner = RealFftPlanner::<f64>::new();
        let forward = real_planner.plan_fft_forward(len);
        let mut planner = FftPlanner::<f64>::new();
        let inverse = planner.plan_fft_inverse(len);

        let spectrum = forward.make_output_vec();
        let forward_scratch = forward.make_scratch_vec();
        let inverse_scratch = vec![Complex64::default(); inverse.get_inplace_scratch_len()];

        Self {
            len,
            forward,
            inverse,
            window: vec![0.0; len],
            spectrum,
            analytic: vec![Complex64::default(); len],
            forward_scratch,
            inverse_scratch,
        }
    }

    /// Real input for the next `run`. Its contents are consumed by the
    /// forward transform and must be refilled before every call.
    pub fn window_mut(&mut self) -> &mut [f64] {
        &mut self.window
    }

    /// Compute the analytic signal of the current window.
    pub fn run(&mut self) -> Result<()> {
        self.forward.process_with_scratch(
            &mut self.window,
            &mut self.spectrum,
            &mut self.forward_scratch,
        )?;

        let n = self.len;
        let scale = 1.0 / n as f64;
        // Bins 1..ceil(n/2) are doubled; DC and the even-length Nyquist bin
        // are kept once; negative frequencies are dropped.
        let positive_end = n.div_ceil(2);

        self.analytic[0] = self.spectrum[0] * scale;
        for i in 1..positive_end {
            self.analytic[i] = self.spectrum[i] * (2.0 * scale);
        }
        let mut zero_from = positive_end;
        if n % 2 == 0 {
            self.analytic[n / 2] = self.spectrum[n / 2] * scale;
            zero_from = n / 2 + 1;
        }
        self.analytic[zero_from..]
            .iter_mut()
            .for_each(|c| *c = Complex64::default());

        self.inverse
            .process_with_scratch(&mut self.analytic, &mut self.inverse_scratch);
        Ok(())
    }

    /// Analytic signal produced by the last `run`.
    pub fn analytic(&self) -> &[Complex64] {
        &self.analytic
    }
}

/// Phase of an analytic sample in degrees, within `(-180, 180]`.
#[inline]
pub fn phase_degrees(c: Complex64) -> f32 {
    let deg = c.im.atan2(c.re).to_degrees() as f32;
    if deg <= -180.0 {
        deg + 360.0
    } else {
        deg
    }
}

//! Causal Butterworth band-pass pre-filter.
//!
//! Second-order low-pass prototype transformed to a band-pass, giving two
//! cascaded biquads. Coefficients come from the bilinear transform with
//! prewarped band edges.

use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

/// Highest usable band edge as a fraction of the sample rate.
const MAX_EDGE_FRACTION: f64 = 0.49;

/// One second-order section, transposed direct form II.
#[derive(Debug, Clone, Copy, Default)]
struct Biquad {
    b0: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    s1: f64,
    s2: f64,
}

impl Biquad {
    /// Band-pass section with zeros at z = +1 and z = -1 and the given pole.
    fn with_pole(pole: Complex64, center: f64) -> Self {
        let a1 = -2.0 * pole.re;
        let a2 = pole.norm_sqr();

        // Unity gain at the digital center frequency.
        let z1 = Complex64::from_polar(1.0, -center);
        let z2 = z1 * z1;
        let num = Complex64::new(1.0, 0.0) - z2;
        let den = Complex64::new(1.0, 0.0) + z1 * a1 + z2 * a2;
        let gain = den.norm() / num.norm().max(f64::MIN_POSITIVE);

        Self {
            b0: gain,
            b2: -gain,
            a1,
            a2,
            ..Self::default()
        }
    }

    /// Replace coefficients, keep the delay line.
    fn retune(&mut self, other: &Biquad) {
        self.b0 = other.b0;
        self.b2 = other.b2;
        self.a1 = other.a1;
        self.a2 = other.a2;
    }

    #[inline]
    fn tick(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.s1;
        self.s1 = -self.a1 * y + self.s2;
        self.s2 = self.b2 * x - self.a2 * y;
        y
    }

    #[cfg(test)]
    fn reset(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }
}

pub struct BandPassFilter {
    sections: [Biquad; 2],
}

impl BandPassFilter {
    pub fn new(sample_rate: f64, low_cut_hz: f64, high_cut_hz: f64) -> Self {
        Self {
            sections: design(sample_rate, low_cut_hz, high_cut_hz),
        }
    }

    /// Re-compute coefficients for a new band. State is preserved so the
    /// change applies from the next sample.
    pub fn set_band(&mut self, sample_rate: f64, low_cut_hz: f64, high_cut_hz: f64) {
        let fresh = design(sample_rate, low_cut_hz, high_cut_hz);
        for (section, new) in self.sections.iter_mut().zip(fresh.iter()) {
            section.retune(new);
        }
    }

    /// Filter a block in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let mut y = *sample as f64;
            for section in self.sections.iter_mut() {
                y = section.tick(y);
            }
            *sample = y as f32;
        }
    }

    #[cfg(test)]
    pub(crate) fn reset(&mut self) {
        for section in self.sections.iter_mut() {
            section.reset();
        }
    }
}

/// Order and clamp the band edges into `(0, MAX_EDGE_FRACTION * fs)`.
fn band_edges(sample_rate: f64, low_cut_hz: f64, high_cut_hz: f64) -> (f64, f64) {
    let (lo, hi) = if low_cut_hz <= high_cut_hz {
        (low_cut_hz, high_cut_hz)
    } else {
        (high_cut_hz, low_cut_hz)
    };
    let top = MAX_EDGE_FRACTION * sample_rate;
    let hi = hi.min(top);
    let lo = lo.min(hi * 0.99).max(f64::MIN_POSITIVE);
    // Degenerate band: widen slightly around the requested edge.
    let hi = if hi - lo <= lo * 1e-6 { (lo * 1.01).min(top) } else { hi };
    (lo, hi)
}

fn design(sample_rate: f64, low_cut_hz: f64, high_cut_hz: f64) -> [Biquad; 2] {
    let (lo, hi) = band_edges(sample_rate, low_cut_hz, high_cut_hz);
    let k = 2.0 * sample_rate;

    let w_lo = k * (PI * lo / sample_rate).tan();
    let w_hi = k * (PI * hi / sample_rate).tan();
    let w0_sq = w_lo * w_hi;
    let bw = w_hi - w_lo;
    let center = 2.0 * (w0_sq.sqrt() / k).atan();

    // Upper-half-plane pole of the 2nd order Butterworth prototype; its
    // conjugate yields the conjugate poles of each section.
    let proto = Complex64::from_polar(1.0, 3.0 * PI / 4.0);
    let pb = proto * bw;
    let disc = (pb * pb - 4.0 * w0_sq).sqrt();
    let analog = [(pb + disc) * 0.5, (pb - disc) * 0.5];

    let kc = Complex64::new(k, 0.0);
    analog.map(|s| Biquad::with_pole((kc + s) / (kc - s), center))
}

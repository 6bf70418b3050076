//! # Fast Fourier Transform (FFT) Module
//!
//! FFT-backed autocorrelation for the pitch detector. The autocorrelation of
//! a block is the inverse transform of its power spectrum; zero-padding to at
//! least twice the block length keeps the result linear (no wrap-around), so
//! it matches the direct lag-by-lag sum up to floating point error.

use rustfft::{num_complex::Complex, FftPlanner};

/// Reusable FFT plans and working buffers for autocorrelation.
pub struct Autocorrelator {
    planner: FftPlanner<f64>,
    buffer: Vec<Complex<f64>>,
}

impl Default for Autocorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl Autocorrelator {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            buffer: Vec::new(),
        }
    }

    /// Computes `c[k] = sum_j x[j] * x[j + k]` for every lag `k` in `0..signal.len()`.
    ///
    /// # Arguments
    /// * `signal` - Time-domain block
    /// * `out` - Cleared and filled with one value per lag
    pub fn autocorrelate(&mut self, signal: &[f32], out: &mut Vec<f64>) {
        out.clear();
        let n = signal.len();
        if n == 0 {
            return;
        }

        let fft_len = (2 * n).next_power_of_two();
        self.buffer.clear();
        self.buffer
            .extend(signal.iter().map(|&s| Complex { re: s as f64, im: 0.0 }));
        self.buffer.resize(fft_len, Complex { re: 0.0, im: 0.0 });

        let forward = self.planner.plan_fft_forward(fft_len);
        forward.process(&mut self.buffer);

        for bin in self.buffer.iter_mut() {
            *bin = Complex {
                re: bin.norm_sqr(),
                im: 0.0,
            };
        }

        let inverse = self.planner.plan_fft_inverse(fft_len);
        inverse.process(&mut self.buffer);

        // rustfft does not normalize the inverse transform.
        let scale = 1.0 / fft_len as f64;
        out.extend(self.buffer.iter().take(n).map(|c| c.re * scale));
    }

    /// Releases the working buffers; plans stay cached.
    pub fn release_buffers(&mut self) {
        self.buffer = Vec::new();
    }
}

/// Direct O(n^2) autocorrelation, the reference for [`Autocorrelator`].
pub fn direct_autocorrelation(signal: &[f32]) -> Vec<f64> {
    let n = signal.len();
    (0..n)
        .map(|lag| {
            signal[..n - lag]
                .iter()
                .zip(&signal[lag..])
                .map(|(&a, &b)| a as f64 * b as f64)
                .sum()
        })
        .collect()
}

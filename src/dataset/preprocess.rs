//! Preprocessing applied to recordings as they are read
//!
//! All filters are linear-phase windowed-sinc FIR kernels applied centered on
//! each sample, so they introduce no delay.

use super::reader::Recording;
use crate::error::{DecoderError, Result};
use ndarray::{s, Array1, Array3, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, warn};

/// Mains frequency removed when the pass band spans it.
pub const LINE_FREQ: f64 = 50.0;
const NOTCH_HALF_WIDTH: f64 = 2.5;

/// Baseline window in seconds, open ends default to the epoch edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

/// Reference applied before filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    /// Common average reference
    Average,
    /// Subtract one named channel from every channel
    Channel(String),
}

impl Reference {
    /// `"average"` or a channel name
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("average") {
            Reference::Average
        } else {
            Reference::Channel(value.to_string())
        }
    }
}

/// Keep the epochs whose event code is in `codes`.
pub fn select_events(rec: &mut Recording, codes: &[i64]) {
    let keep: Vec<usize> = (0..rec.events.len())
        .filter(|&i| codes.contains(&rec.events[i]))
        .collect();
    rec.data = rec.data.select(Axis(0), &keep);
    rec.events = keep.iter().map(|&i| rec.events[i]).collect();
}

/// Keep `picks` (when given), then drop `bads`. Channel order is preserved.
pub fn pick_channels(rec: &mut Recording, picks: Option<&[String]>, bads: &[String]) -> Result<()> {
    if let Some(picks) = picks {
        if let Some(missing) = picks.iter().find(|p| !rec.channel_names.contains(*p)) {
            return Err(DecoderError::AssemblyError(format!(
                "picked channel {} is not in the recording",
                missing
            )));
        }
    }
    for bad in bads {
        if !rec.channel_names.contains(bad) {
            warn!(channel = %bad, "Bad channel not present in recording");
        }
    }

    let keep: Vec<usize> = rec
        .channel_names
        .iter()
        .enumerate()
        .filter(|(_, name)| picks.map_or(true, |p| p.contains(*name)) && !bads.contains(*name))
        .map(|(i, _)| i)
        .collect();
    if keep.is_empty() {
        return Err(DecoderError::AssemblyError(
            "no channels left after picks and bads".to_string(),
        ));
    }

    rec.data = rec.data.select(Axis(1), &keep);
    rec.channel_names = keep.iter().map(|&i| rec.channel_names[i].clone()).collect();
    Ok(())
}

/// Re-reference every epoch.
pub fn rereference(rec: &mut Recording, reference: &Reference) -> Result<()> {
    let ref_signal = match reference {
        Reference::Average => rec
            .data
            .mean_axis(Axis(1))
            .ok_or_else(|| DecoderError::AssemblyError("recording has no channels".to_string()))?,
        Reference::Channel(name) => {
            let idx = rec
                .channel_names
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| {
                    DecoderError::AssemblyError(format!("reference channel {} not found", name))
                })?;
            rec.data.index_axis(Axis(1), idx).to_owned()
        }
    };
    for mut channel in rec.data.axis_iter_mut(Axis(1)) {
        channel -= &ref_signal;
    }
    Ok(())
}

/// Windowed-sinc low-pass kernel with unit DC gain.
fn lowpass_kernel(cutoff: f64, sfreq: f64, taps: usize) -> Array1<f64> {
    let fc = cutoff / sfreq;
    let m = (taps - 1) as f64;
    let mut kernel = Array1::from_shape_fn(taps, |i| {
        let x = i as f64 - m / 2.0;
        let sinc = if x == 0.0 { 2.0 * fc } else { (2.0 * PI * fc * x).sin() / (PI * x) };
        let hamming = if taps > 1 { 0.54 - 0.46 * (2.0 * PI * i as f64 / m).cos() } else { 1.0 };
        sinc * hamming
    });
    let sum = kernel.sum();
    if sum.abs() > f64::EPSILON {
        kernel /= sum;
    }
    kernel
}

fn delta(taps: usize) -> Array1<f64> {
    let mut d = Array1::zeros(taps);
    d[taps / 2] = 1.0;
    d
}

/// Odd kernel length for a given transition bandwidth, capped by the epoch length.
fn kernel_length(transition: f64, sfreq: f64, n_times: usize) -> usize {
    let wanted = (3.3 * sfreq / transition.max(1e-3)).ceil() as usize;
    let cap = if n_times % 2 == 0 { n_times.saturating_sub(1) } else { n_times };
    let taps = wanted.min(cap).max(1);
    if taps % 2 == 0 {
        taps - 1
    } else {
        taps
    }
}

/// Convolve with a centered kernel, reflecting the signal at both edges.
fn apply_kernel(signal: &ArrayView1<f64>, kernel: &Array1<f64>) -> Array1<f64> {
    let n = signal.len() as isize;
    let half = (kernel.len() / 2) as isize;
    let reflect = |i: isize| -> usize {
        let mut i = i;
        if n == 1 {
            return 0;
        }
        while i < 0 || i >= n {
            i = if i < 0 { -i } else { 2 * (n - 1) - i };
        }
        i as usize
    };
    Array1::from_shape_fn(signal.len(), |t| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, &w)| w * signal[reflect(t as isize + half - k as isize)])
            .sum()
    })
}

fn apply_to_all(data: &mut Array3<f64>, kernel: &Array1<f64>) {
    for mut epoch in data.outer_iter_mut() {
        for mut channel in epoch.outer_iter_mut() {
            let filtered = apply_kernel(&channel.view(), kernel);
            channel.assign(&filtered);
        }
    }
}

/// Band-pass filter. A missing edge falls back to the recording's own pass
/// band; edges at 0 Hz or at Nyquist are not filtered. When the resulting
/// band spans the mains frequency a narrow band-stop is applied as well.
pub fn bandpass(rec: &mut Recording, l_freq: Option<f64>, h_freq: Option<f64>) -> Result<()> {
    let nyquist = rec.sfreq / 2.0;
    let low = l_freq.or(rec.highpass).filter(|&f| f > 0.0);
    let high = h_freq.or(rec.lowpass).filter(|&f| f < nyquist);

    if let (Some(l), Some(h)) = (low, high) {
        if l >= h {
            return Err(DecoderError::InvalidParameter {
                name: "filter_band".to_string(),
                value: format!("({}, {})", l, h),
                reason: "low edge must be below high edge".to_string(),
            });
        }
    }

    let n_times = rec.n_times();
    if n_times < 3 {
        return Ok(());
    }

    let l_trans = low.map(|l| (0.25 * l).max(2.0).min(l));
    let h_trans = high.map(|h| (0.25 * h).max(2.0).min(nyquist - h));
    let transition = match (l_trans, h_trans) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return Ok(()),
    };
    let taps = kernel_length(transition, rec.sfreq, n_times);

    let kernel = match (low, high) {
        (Some(l), Some(h)) => lowpass_kernel(h, rec.sfreq, taps) - lowpass_kernel(l, rec.sfreq, taps),
        (Some(l), None) => delta(taps) - lowpass_kernel(l, rec.sfreq, taps),
        (None, Some(h)) => lowpass_kernel(h, rec.sfreq, taps),
        (None, None) => return Ok(()),
    };
    debug!(low = ?low, high = ?high, taps, "Band-pass filtering");
    apply_to_all(&mut rec.data, &kernel);
    rec.highpass = low.or(rec.highpass);
    rec.lowpass = high.or(rec.lowpass);

    let spans_line = low.map_or(true, |l| l < LINE_FREQ) && high.map_or(false, |h| h > LINE_FREQ);
    if spans_line && LINE_FREQ + NOTCH_HALF_WIDTH < nyquist {
        let notch_taps = kernel_length(NOTCH_HALF_WIDTH, rec.sfreq, n_times);
        let stop = delta(notch_taps)
            - (lowpass_kernel(LINE_FREQ + NOTCH_HALF_WIDTH, rec.sfreq, notch_taps)
                - lowpass_kernel(LINE_FREQ - NOTCH_HALF_WIDTH, rec.sfreq, notch_taps));
        debug!(taps = notch_taps, "Notch filtering mains frequency");
        apply_to_all(&mut rec.data, &stop);
    }
    Ok(())
}

/// Sample times of the recording in seconds.
pub fn times(rec: &Recording) -> Vec<f64> {
    (0..rec.n_times()).map(|i| rec.tmin + i as f64 / rec.sfreq).collect()
}

/// Keep samples with `tmin <= t <= tmax`.
pub fn crop(rec: &mut Recording, tmin: Option<f64>, tmax: Option<f64>) -> Result<()> {
    let eps = 0.5 / rec.sfreq;
    let t = times(rec);
    let lo = tmin.unwrap_or(f64::NEG_INFINITY) - eps;
    let hi = tmax.unwrap_or(f64::INFINITY) + eps;
    let first = t.iter().position(|&x| x >= lo);
    let last = t.iter().rposition(|&x| x <= hi);
    match (first, last) {
        (Some(a), Some(b)) if a <= b => {
            rec.data = rec.data.slice(s![.., .., a..=b]).to_owned();
            rec.tmin = t[a];
            Ok(())
        }
        _ => Err(DecoderError::AssemblyError(format!(
            "crop window [{:?}, {:?}] is outside the epoch",
            tmin, tmax
        ))),
    }
}

/// Down-sample by an integer factor after an anti-aliasing low-pass.
pub fn resample(rec: &mut Recording, target_sfreq: f64) -> Result<()> {
    let ratio = rec.sfreq / target_sfreq;
    let factor = ratio.round();
    if target_sfreq <= 0.0 || factor < 1.0 || (ratio - factor).abs() > 1e-6 {
        return Err(DecoderError::InvalidParameter {
            name: "resample".to_string(),
            value: target_sfreq.to_string(),
            reason: format!("{} Hz is not an integer division of {} Hz", target_sfreq, rec.sfreq),
        });
    }
    let factor = factor as usize;
    if factor == 1 {
        return Ok(());
    }

    let cutoff = target_sfreq / 2.0;
    let taps = kernel_length((0.25 * cutoff).max(1.0), rec.sfreq, rec.n_times());
    apply_to_all(&mut rec.data, &lowpass_kernel(cutoff, rec.sfreq, taps));
    rec.data = rec.data.slice(s![.., .., ..;factor]).to_owned();
    rec.sfreq = target_sfreq;
    rec.lowpass = Some(rec.lowpass.map_or(cutoff, |l| l.min(cutoff)));
    Ok(())
}

/// Subtract the mean of the baseline window, per epoch and channel.
pub fn apply_baseline(rec: &mut Recording, baseline: Baseline) -> Result<()> {
    let t = times(rec);
    let eps = 0.5 / rec.sfreq;
    let start = baseline.start.unwrap_or(f64::NEG_INFINITY) - eps;
    let end = baseline.end.unwrap_or(f64::INFINITY) + eps;
    let window: Vec<usize> = (0..t.len()).filter(|&i| t[i] >= start && t[i] <= end).collect();
    if window.is_empty() {
        return Err(DecoderError::AssemblyError(format!(
            "baseline window {:?} contains no samples",
            baseline
        )));
    }
    for mut epoch in rec.data.outer_iter_mut() {
        for mut channel in epoch.outer_iter_mut() {
            let mean = window.iter().map(|&i| channel[i]).sum::<f64>() / window.len() as f64;
            channel -= mean;
        }
    }
    Ok(())
}

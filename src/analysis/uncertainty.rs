//! Uncertainty combination rules and the result fold.
//!
//! Given a central result and the ordered variation members of one
//! declared variation, `fold_variation` appends one systematic
//! uncertainty entry to every bin and to the fiducial value. The
//! per-value arithmetic lives in `combine`.

use crate::error::ClientError;
use crate::models::{CombinationMethod, HistogramResult, SysError};

/// Compute the signed (pos, neg) uncertainty of one sequence of values.
///
/// `values[0]` is the central value, the rest are variation members. A
/// sequence without members yields `(0, 0)` for every method. The Hessian
/// rule requires an even member count; an odd one is an error, not a
/// silent truncation.
pub fn combine(
    values: &[f64],
    method: CombinationMethod,
    rescale_factor: f64,
) -> Result<(f64, f64), ClientError> {
    if values.len() <= 1 {
        return Ok((0.0, 0.0));
    }
    let central = values[0];
    let members = &values[1..];

    let (pos, neg) = match method {
        CombinationMethod::Envelope => {
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            (max - central, central - min)
        }
        CombinationMethod::Replicas => {
            // Sample standard deviation of the members about the central
            // value, with k - 1 in the denominator. With a single member
            // that denominator is undefined; one replica carries no
            // spread information, so the result is (0, 0), not an error.
            let k = members.len();
            if k < 2 {
                return Ok((0.0, 0.0));
            }
            let sum_sq: f64 = members.iter().map(|v| (v - central).powi(2)).sum();
            let sigma = (sum_sq / (k - 1) as f64).sqrt();
            (sigma, -sigma)
        }
        CombinationMethod::Hessian => {
            // Eigenvector pairs: maximal excursion of each pair in each
            // direction, combined in quadrature (arXiv:0901.0002, sec. 6).
            if members.len() % 2 != 0 {
                return Err(ClientError::IncompatibleData(format!(
                    "hessian combination needs an even member count, got {}",
                    members.len()
                )));
            }
            let mut sum_pos = 0.0;
            let mut sum_neg = 0.0;
            for pair in members.chunks_exact(2) {
                let diff_up = pair[0] - central;
                let diff_down = pair[1] - central;
                sum_pos += diff_up.max(diff_down).max(0.0).powi(2);
                sum_neg += (-diff_up).max(-diff_down).max(0.0).powi(2);
            }
            (sum_pos.sqrt(), -sum_neg.sqrt())
        }
        CombinationMethod::SymmHessian => {
            // Each member is its own eigenvector direction.
            let mut sum_pos = 0.0;
            let mut sum_neg = 0.0;
            for value in members {
                let diff = value - central;
                sum_pos += diff.max(0.0).powi(2);
                sum_neg += (-diff).max(0.0).powi(2);
            }
            (sum_pos.sqrt(), -sum_neg.sqrt())
        }
    };

    Ok((pos * rescale_factor, neg * rescale_factor))
}

/// Fail with [`ClientError::IncompatibleData`] unless the two results share
/// the same histogram count, bin counts and bin edges. Edge comparison is
/// exact, not approximate.
pub fn check_compatible(a: &HistogramResult, b: &HistogramResult) -> Result<(), ClientError> {
    if a.histograms.len() != b.histograms.len() {
        return Err(ClientError::IncompatibleData(format!(
            "histogram count mismatch: {} vs {}",
            a.histograms.len(),
            b.histograms.len()
        )));
    }
    for (i, (ha, hb)) in a.histograms.iter().zip(&b.histograms).enumerate() {
        if ha.binning.len() != hb.binning.len() {
            return Err(ClientError::IncompatibleData(format!(
                "bin count mismatch in histogram {}: {} vs {}",
                i,
                ha.binning.len(),
                hb.binning.len()
            )));
        }
        for (j, (ba, bb)) in ha.binning.iter().zip(&hb.binning).enumerate() {
            if ba.edges != bb.edges {
                return Err(ClientError::IncompatibleData(format!(
                    "bin edges differ in histogram {} bin {}",
                    i, j
                )));
            }
        }
    }
    Ok(())
}

/// Fold one variation into the running central result.
///
/// For every bin the values `[central mean, member means...]` (matched by
/// bin index) are combined and the outcome appended to that bin's
/// `sys_error` list; the same is done once for the fiducial mean. The
/// inputs are never mutated; a new augmented copy is returned. Appending
/// order follows the order the variations are folded, so declaration
/// order is observable in the output.
pub fn fold_variation(
    current: &HistogramResult,
    members: &[HistogramResult],
    method: CombinationMethod,
    rescale_factor: f64,
) -> Result<HistogramResult, ClientError> {
    for member in members {
        check_compatible(current, member)?;
    }

    let mut out = current.clone();
    for (i, histogram) in out.histograms.iter_mut().enumerate() {
        for (j, bin) in histogram.binning.iter_mut().enumerate() {
            let mut values = Vec::with_capacity(members.len() + 1);
            values.push(current.histograms[i].binning[j].mean);
            values.extend(members.iter().map(|m| m.histograms[i].binning[j].mean));
            let (pos, neg) = combine(&values, method, rescale_factor)?;
            bin.sys_error.push(SysError::from_signed(method, pos, neg));
        }
    }

    let mut fiducial = Vec::with_capacity(members.len() + 1);
    fiducial.push(current.fiducial_mean);
    fiducial.extend(members.iter().map(|m| m.fiducial_mean));
    let (pos, neg) = combine(&fiducial, method, rescale_factor)?;
    out.fiducial_sys_error
        .push(SysError::from_signed(method, pos, neg));

    Ok(out)
}

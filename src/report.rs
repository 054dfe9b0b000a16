//! Plain-text rendering of results and process metadata.
//!
//! Output is aligned for terminal reading; systematic uncertainties are
//! shown as signed percentages of the bin mean, one column pair per
//! declared variation.

use crate::models::{HistogramResult, ProcessMetadata, SysError};

/// Render an aggregated result as an aligned table.
///
/// One block per histogram with a row per bin, then the fiducial cross
/// section. Uncertainty columns appear in the order the variations were
/// declared.
pub fn format_result_table(result: &HistogramResult) -> String {
    let mut out = String::new();

    for histogram in &result.histograms {
        out.push_str(&format!("histogram: {}\n", histogram.name));
        out.push_str(&header_row(
            histogram
                .binning
                .first()
                .map(|b| b.sys_error.as_slice())
                .unwrap_or(&[]),
        ));
        for bin in &histogram.binning {
            let edges = bin
                .edges
                .iter()
                .map(|[lo, hi]| format!("[{:>9.3}, {:>9.3}]", lo, hi))
                .collect::<Vec<_>>()
                .join(" x ");
            out.push_str(&format!(
                "  {}  {:>13.6e}  {:>11.4e}{}\n",
                edges,
                bin.mean,
                bin.error,
                sys_columns(bin.mean, &bin.sys_error)
            ));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "fiducial xsection:  {:.6e} +/- {:.4e} fb{}\n",
        result.fiducial_mean,
        result.fiducial_error,
        sys_columns(result.fiducial_mean, &result.fiducial_sys_error)
    ));

    out
}

fn header_row(sys: &[SysError]) -> String {
    let mut header = format!(
        "  {:^24}  {:>13}  {:>11}",
        "bin edges", "sigma [fb]", "mc-err"
    );
    for entry in sys {
        header.push_str(&format!("  {:>19}", entry.method.to_string()));
    }
    header.push('\n');
    header
}

/// Signed percent columns, `+x.xx% -y.yy%` per systematic entry. Falls
/// back to absolute values when the mean is zero.
fn sys_columns(mean: f64, sys: &[SysError]) -> String {
    let mut out = String::new();
    for entry in sys {
        if mean != 0.0 {
            out.push_str(&format!(
                "  +{:.2}% -{:.2}%",
                100.0 * entry.pos / mean.abs(),
                100.0 * entry.neg / mean.abs()
            ));
        } else {
            out.push_str(&format!("  +{:.3e} -{:.3e}", entry.pos, entry.neg));
        }
    }
    out
}

/// Render the metadata of one process for terminal display.
pub fn format_process_metadata(process: &str, metadata: &ProcessMetadata) -> String {
    let mut out = String::new();
    out.push_str(&format!("process: {}\n", process));
    out.push_str(&format!("  name:        {}\n", metadata.name));
    if !metadata.scales_info.is_empty() {
        out.push_str(&format!("  scales:      {}\n", metadata.scales_info));
    }
    out.push_str(&format!(
        "  default pdf: {} (member {})\n",
        metadata.pdf_set, metadata.pdf_member
    ));

    if !metadata.contribution_groups.is_empty() {
        out.push_str("  contributions:\n");
        for (group, parts) in &metadata.contribution_groups {
            out.push_str(&format!("    {:<12} {}\n", group, parts.join(", ")));
        }
    }

    if !metadata.variables.is_empty() {
        out.push_str("  variables:\n");
        for (name, description) in &metadata.variables {
            out.push_str(&format!("    {:<12} {}\n", name, description));
        }
    }

    if !metadata.available_pdfs.is_empty() {
        out.push_str("  available pdfs:\n");
        for (name, info) in &metadata.available_pdfs {
            let reduced = info
                .reduced_set
                .as_deref()
                .map(|r| format!(", reduced: {}", r))
                .unwrap_or_default();
            out.push_str(&format!(
                "    {:<28} {} members, {} errors{}\n",
                name, info.nmembers, info.error_method, reduced
            ));
        }
    }

    out
}

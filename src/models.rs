//! Data models for the histogram computation client.
//!
//! This module contains the wire-level request/response structures and the
//! numerical result types (histograms, bins, systematic uncertainties)
//! shared by the API client and the aggregation engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ClientError;

/// Opaque server-assigned handle for a submitted computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub String);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token(s.to_string())
    }
}

/// Status of one submitted computation request.
///
/// `Submitted` is the only client-assigned value; the rest are reported by
/// the server. `Completed` and `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Submitted,
    Pending,
    Running,
    Completed,
    Errored,
}

impl RequestStatus {
    /// Returns true when no further polling can change the status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Errored)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Submitted => "submitted",
            RequestStatus::Pending => "pending",
            RequestStatus::Running => "running",
            RequestStatus::Completed => "completed",
            RequestStatus::Errored => "errored",
        };
        write!(f, "{}", s)
    }
}

/// Raw token status as returned by the server.
///
/// The `result` field is a JSON-encoded *string* that must be parsed a
/// second time to obtain the actual payload. This double encoding is part
/// of the wire contract.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenStatusResponse {
    pub status: RequestStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error_string: Option<String>,
}

/// Decoded snapshot of a token's state at one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub status: RequestStatus,
    /// Present only when `status` is `Completed`.
    pub result: Option<HistogramResult>,
    /// Present only when `status` is `Errored`.
    pub error_string: Option<String>,
}

/// Response to a histogram submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub token: Token,
}

/// Statistical combination convention for one family of variations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinationMethod {
    /// Maximum spread among the values.
    Envelope,
    /// Sample standard deviation of the members about the central value.
    Replicas,
    /// Paired eigenvector excursions combined in quadrature.
    Hessian,
    /// Unpaired eigenvector excursions combined in quadrature.
    #[serde(rename = "symmhessian")]
    SymmHessian,
}

impl FromStr for CombinationMethod {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "envelope" => Ok(CombinationMethod::Envelope),
            "replicas" => Ok(CombinationMethod::Replicas),
            "hessian" => Ok(CombinationMethod::Hessian),
            "symmhessian" | "symmetric-hessian" => Ok(CombinationMethod::SymmHessian),
            other => Err(ClientError::UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for CombinationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CombinationMethod::Envelope => "envelope",
            CombinationMethod::Replicas => "replicas",
            CombinationMethod::Hessian => "hessian",
            CombinationMethod::SymmHessian => "symmhessian",
        };
        write!(f, "{}", s)
    }
}

/// One systematic uncertainty entry attached to a bin or fiducial value.
///
/// `pos` and `neg` are stored as non-negative magnitudes of the asymmetric
/// bounds, in the order the variations were declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysError {
    pub method: CombinationMethod,
    pub pos: f64,
    pub neg: f64,
}

impl SysError {
    /// Record a signed (pos, neg) deviation pair as non-negative bounds.
    pub fn from_signed(method: CombinationMethod, pos: f64, neg: f64) -> Self {
        SysError {
            method,
            pos: pos.abs(),
            neg: neg.abs(),
        }
    }
}

/// One n-dimensional histogram bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    /// `[low, high]` edge pair per dimension.
    pub edges: Vec<[f64; 2]>,
    /// Monte Carlo mean.
    pub mean: f64,
    /// Monte Carlo statistical error.
    pub error: f64,
    /// One entry per applied variation, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sys_error: Vec<SysError>,
}

/// A single histogram: a named, ordered list of bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    #[serde(default)]
    pub name: String,
    pub binning: Vec<Bin>,
}

/// Complete result of one computation request: histograms plus the
/// fiducial (integrated) cross section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramResult {
    pub histograms: Vec<Histogram>,
    pub fiducial_mean: f64,
    pub fiducial_error: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fiducial_sys_error: Vec<SysError>,
}

/// Binning specification for one observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinningSpec {
    pub variable: String,
    /// Bin edges, strictly increasing.
    pub bins: Vec<f64>,
}

impl BinningSpec {
    /// Edges must be strictly increasing and at least two.
    pub fn is_valid(&self) -> bool {
        self.bins.len() >= 2 && self.bins.windows(2).all(|w| w[0] < w[1])
    }
}

/// Jet clustering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JetParameters {
    pub maxnjet: u32,
    pub p: f64,
    #[serde(rename = "R")]
    pub r: f64,
}

impl JetParameters {
    pub fn is_valid(&self) -> bool {
        self.maxnjet >= 1 && self.r > 0.0
    }
}

/// Wire body for one histogram computation request at a fixed
/// scale/PDF setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub contributions: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_variables: BTreeMap<String, String>,
    #[serde(rename = "muR")]
    pub mu_r: String,
    #[serde(rename = "muF")]
    pub mu_f: String,
    pub pdf: String,
    pub pdf_member: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cuts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jet_parameters: Option<JetParameters>,
    pub observables: Vec<BinningSpec>,
}

/// Error convention and member count of one available PDF set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfInfo {
    pub error_method: String,
    pub nmembers: usize,
    /// Name of a reduced (SMPDF) companion set, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduced_set: Option<String>,
}

/// Metadata describing one process available on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetadata {
    pub name: String,
    #[serde(default)]
    pub scales_info: String,
    pub pdf_set: String,
    #[serde(default)]
    pub pdf_member: u32,
    #[serde(default)]
    pub contribution_groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub available_pdfs: BTreeMap<String, PdfInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_jet_parameters: Option<JetParameters>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Errored.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Running.is_terminal());
        assert!(!RequestStatus::Submitted.is_terminal());
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!(
            "envelope".parse::<CombinationMethod>().unwrap(),
            CombinationMethod::Envelope
        );
        assert_eq!(
            "symmetric-hessian".parse::<CombinationMethod>().unwrap(),
            CombinationMethod::SymmHessian
        );
        let err = "quadrature".parse::<CombinationMethod>().unwrap_err();
        assert!(matches!(err, ClientError::UnknownMethod(ref m) if m == "quadrature"));
    }

    #[test]
    fn test_sys_error_magnitudes() {
        let e = SysError::from_signed(CombinationMethod::Replicas, 2.5, -2.5);
        assert_eq!(e.pos, 2.5);
        assert_eq!(e.neg, 2.5);
    }

    #[test]
    fn test_binning_spec_validation() {
        let good = BinningSpec {
            variable: "pt_top".to_string(),
            bins: vec![0.0, 50.0, 100.0, 200.0],
        };
        assert!(good.is_valid());

        let unordered = BinningSpec {
            variable: "pt_top".to_string(),
            bins: vec![0.0, 100.0, 50.0],
        };
        assert!(!unordered.is_valid());

        let single = BinningSpec {
            variable: "pt_top".to_string(),
            bins: vec![0.0],
        };
        assert!(!single.is_valid());
    }

    #[test]
    fn test_token_status_double_decode() {
        let raw = r#"{"status":"completed","result":"{\"histograms\":[{\"binning\":[{\"edges\":[[0.0,50.0]],\"mean\":1.5,\"error\":0.1}]}],\"fiducial_mean\":1.5,\"fiducial_error\":0.1}"}"#;
        let outer: TokenStatusResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(outer.status, RequestStatus::Completed);
        let inner: HistogramResult =
            serde_json::from_str(outer.result.as_deref().unwrap()).unwrap();
        assert_eq!(inner.histograms.len(), 1);
        assert_eq!(inner.histograms[0].binning[0].mean, 1.5);
    }

    #[test]
    fn test_histogram_request_wire_names() {
        let req = HistogramRequest {
            name: "default".to_string(),
            contributions: vec!["LO".to_string()],
            custom_variables: BTreeMap::new(),
            mu_r: "muR0".to_string(),
            mu_f: "muF0".to_string(),
            pdf: "CT18NNLO".to_string(),
            pdf_member: 0,
            cuts: vec![],
            jet_parameters: None,
            observables: vec![BinningSpec {
                variable: "pt_top".to_string(),
                bins: vec![0.0, 100.0],
            }],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("muR").is_some());
        assert!(json.get("muF").is_some());
        assert!(json.get("cuts").is_none());
    }
}

//! Job aggregate: request building, variation compilation, submission
//! driving and file-backed persistence.
//!
//! A job is built in memory while in the `Preparation` phase, persisted on
//! demand, and becomes immutable once its sub-requests have been
//! dispatched. Validation failures on mutators are reported as warnings
//! and leave prior state unchanged, so interactive workflows can continue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::analysis;
use crate::api::Api;
use crate::error::ClientError;
use crate::models::{
    BinningSpec, CombinationMethod, HistogramRequest, HistogramResult, JetParameters,
    ProcessMetadata, RequestStatus, Token,
};

/// Families of correlated requests used to estimate one systematic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariationKind {
    Scale3pt,
    Scale7pt,
    PdfStandard,
    PdfReduced,
    Custom,
}

impl FromStr for VariationKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scale-3pt" | "3-point" => Ok(VariationKind::Scale3pt),
            "scale-7pt" | "7-point" => Ok(VariationKind::Scale7pt),
            "pdf-standard" | "standard" => Ok(VariationKind::PdfStandard),
            "pdf-reduced" | "reduced" => Ok(VariationKind::PdfReduced),
            "custom" => Ok(VariationKind::Custom),
            other => Err(ClientError::InvalidSpec(format!(
                "unknown variation kind: {}",
                other
            ))),
        }
    }
}

/// One concrete scale/PDF choice for a sub-request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setup {
    #[serde(rename = "muR")]
    pub mu_r: String,
    #[serde(rename = "muF")]
    pub mu_f: String,
    pub pdf: String,
    pub pdf_member: u32,
}

/// One declared systematic variation.
///
/// `member_count` and (for PDF kinds) `method` are resolved lazily when
/// the variation is compiled against the process metadata. Once compiled,
/// `member_count == explicit_setups.len()` and the central setup is always
/// `explicit_setups[0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationSpec {
    pub kind: VariationKind,
    #[serde(default)]
    pub method: Option<CombinationMethod>,
    #[serde(default = "default_rescale")]
    pub rescale_factor: f64,
    #[serde(default)]
    pub member_count: Option<usize>,
    #[serde(default)]
    pub explicit_setups: Vec<Setup>,
}

fn default_rescale() -> f64 {
    1.0
}

impl VariationSpec {
    /// Declare a variation whose setups are resolved at compile time.
    pub fn new(kind: VariationKind) -> Self {
        VariationSpec {
            kind,
            method: None,
            rescale_factor: 1.0,
            member_count: None,
            explicit_setups: Vec::new(),
        }
    }

    /// Declare a custom variation from explicit setups. The first setup
    /// must be the central one.
    pub fn custom(setups: Vec<Setup>, method: CombinationMethod, rescale_factor: f64) -> Self {
        VariationSpec {
            kind: VariationKind::Custom,
            method: Some(method),
            rescale_factor,
            member_count: None,
            explicit_setups: setups,
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.method.is_some() && self.member_count == Some(self.explicit_setups.len())
    }
}

/// State of one dispatched sub-request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRequest {
    pub setup: Setup,
    #[serde(default)]
    pub token: Option<Token>,
    pub status: RequestStatus,
}

/// Job lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    /// Request parameters may still change.
    Preparation,
    /// All sub-requests dispatched; parameters are frozen.
    Submitted,
    /// All sub-requests terminal and aggregation has run.
    Finished,
}

/// Aggregate root for one histogram computation with variations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub process: String,
    pub contributions: Vec<String>,
    #[serde(rename = "muR")]
    pub mu_r: String,
    #[serde(rename = "muF")]
    pub mu_f: String,
    pub pdf: String,
    pub pdf_member: u32,
    #[serde(default)]
    pub cuts: Vec<String>,
    #[serde(default)]
    pub custom_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub jet_parameters: Option<JetParameters>,
    #[serde(default)]
    pub observables: Vec<BinningSpec>,
    #[serde(default)]
    pub variations: Vec<VariationSpec>,
    #[serde(default)]
    pub sub_requests: Vec<SubRequest>,
    #[serde(default)]
    pub result: Option<HistogramResult>,
    pub phase: JobPhase,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Contribution tags accepted by the process, from its metadata.
    /// Empty until metadata has been applied.
    #[serde(default)]
    pub valid_contributions: Vec<String>,
}

impl Job {
    /// Create an empty job for a named process.
    pub fn new(name: &str, process: &str) -> Self {
        Job {
            name: name.to_string(),
            process: process.to_string(),
            contributions: Vec::new(),
            mu_r: "muR0".to_string(),
            mu_f: "muF0".to_string(),
            pdf: String::new(),
            pdf_member: 0,
            cuts: Vec::new(),
            custom_variables: BTreeMap::new(),
            jet_parameters: None,
            observables: Vec::new(),
            variations: Vec::new(),
            sub_requests: Vec::new(),
            result: None,
            phase: JobPhase::Preparation,
            created_at: Utc::now(),
            submitted_at: None,
            finished_at: None,
            valid_contributions: Vec::new(),
        }
    }

    /// Adopt the process defaults (PDF, jet parameters, valid
    /// contributions) from server metadata.
    pub fn apply_metadata(&mut self, metadata: &ProcessMetadata) {
        if !self.mutable("apply_metadata") {
            return;
        }
        if self.pdf.is_empty() {
            self.pdf = metadata.pdf_set.clone();
            self.pdf_member = metadata.pdf_member;
        }
        if self.jet_parameters.is_none() {
            self.jet_parameters = metadata.default_jet_parameters.clone();
        }
        self.valid_contributions = metadata.contribution_groups.keys().cloned().collect();
    }

    /// True while mutation is permitted; warns otherwise.
    fn mutable(&self, operation: &str) -> bool {
        if self.phase == JobPhase::Preparation {
            true
        } else {
            warn!(
                "{}: job '{}' has already been submitted; nothing changed",
                operation, self.name
            );
            false
        }
    }

    /// Add one contribution tag. Unknown tags are reported and ignored.
    pub fn add_contribution(&mut self, contribution: &str) {
        if !self.mutable("add_contribution") {
            return;
        }
        if !self.valid_contributions.is_empty()
            && !self.valid_contributions.iter().any(|c| c == contribution)
        {
            warn!(
                "add_contribution: '{}' is not a contribution of process '{}'; nothing changed",
                contribution, self.process
            );
            return;
        }
        self.contributions.push(contribution.to_string());
    }

    /// Set the central renormalization and factorization scales.
    pub fn set_scales(&mut self, mu_r: &str, mu_f: &str) {
        if !self.mutable("set_scales") {
            return;
        }
        self.mu_r = mu_r.to_string();
        self.mu_f = mu_f.to_string();
    }

    /// Set the central PDF choice.
    pub fn set_pdf(&mut self, pdf: &str, member: u32) {
        if !self.mutable("set_pdf") {
            return;
        }
        self.pdf = pdf.to_string();
        self.pdf_member = member;
    }

    /// Append one phase space cut. Empty expressions are reported and
    /// ignored.
    pub fn add_cut(&mut self, cut: &str) {
        if !self.mutable("add_cut") {
            return;
        }
        if cut.trim().is_empty() {
            warn!("add_cut: empty cut expression; nothing changed");
            return;
        }
        self.cuts.push(cut.to_string());
    }

    /// Define a custom variable usable in cuts and observables.
    pub fn define_variable(&mut self, name: &str, definition: &str) {
        if !self.mutable("define_variable") {
            return;
        }
        self.custom_variables
            .insert(name.to_string(), definition.to_string());
    }

    /// Append one observable binning. Badly ordered edges are reported and
    /// ignored.
    pub fn add_binning(&mut self, spec: BinningSpec) {
        if !self.mutable("add_binning") {
            return;
        }
        if !spec.is_valid() {
            warn!(
                "add_binning: edges for '{}' are not strictly increasing; nothing changed",
                spec.variable
            );
            return;
        }
        self.observables.push(spec);
    }

    /// Replace the full observable list. Rejected as a whole when any
    /// entry is invalid.
    pub fn set_binning(&mut self, specs: Vec<BinningSpec>) {
        if !self.mutable("set_binning") {
            return;
        }
        if let Some(bad) = specs.iter().find(|s| !s.is_valid()) {
            warn!(
                "set_binning: edges for '{}' are not strictly increasing; nothing changed",
                bad.variable
            );
            return;
        }
        self.observables = specs;
    }

    /// Set jet clustering parameters. Invalid values are reported and
    /// ignored.
    pub fn set_jet_parameters(&mut self, params: JetParameters) {
        if !self.mutable("set_jet_parameters") {
            return;
        }
        if !params.is_valid() {
            warn!("set_jet_parameters: invalid jet parameters; nothing changed");
            return;
        }
        self.jet_parameters = Some(params);
    }

    /// Declare a variation. Declaration order is preserved all the way to
    /// the output `sys_error` ordering.
    pub fn add_variation(&mut self, spec: VariationSpec) {
        if !self.mutable("add_variation") {
            return;
        }
        self.variations.push(spec);
    }

    /// The central setup every variation shares.
    pub fn central_setup(&self) -> Setup {
        Setup {
            mu_r: self.mu_r.clone(),
            mu_f: self.mu_f.clone(),
            pdf: self.pdf.clone(),
            pdf_member: self.pdf_member,
        }
    }

    /// The wire request for one setup.
    fn request_for(&self, setup: &Setup) -> HistogramRequest {
        HistogramRequest {
            name: self.name.clone(),
            contributions: self.contributions.clone(),
            custom_variables: self.custom_variables.clone(),
            mu_r: setup.mu_r.clone(),
            mu_f: setup.mu_f.clone(),
            pdf: setup.pdf.clone(),
            pdf_member: setup.pdf_member,
            cuts: self.cuts.clone(),
            jet_parameters: self.jet_parameters.clone(),
            observables: self.observables.clone(),
        }
    }

    /// Resolve every declared variation into explicit setups.
    ///
    /// Scale variations expand around the central scales; PDF variations
    /// resolve their member count (and combination method) from the
    /// process metadata. A reduced PDF variation falls back to the
    /// standard member set when the metadata offers no reduced companion.
    pub fn compile_variations(&mut self, metadata: &ProcessMetadata) -> Result<(), ClientError> {
        let central = self.central_setup();
        for spec in &mut self.variations {
            match spec.kind {
                VariationKind::Scale3pt => {
                    spec.explicit_setups = scale_setups(&central, THREE_POINT_FACTORS);
                    if spec.method.is_none() {
                        spec.method = Some(CombinationMethod::Envelope);
                    }
                }
                VariationKind::Scale7pt => {
                    spec.explicit_setups = scale_setups(&central, SEVEN_POINT_FACTORS);
                    if spec.method.is_none() {
                        spec.method = Some(CombinationMethod::Envelope);
                    }
                }
                VariationKind::PdfStandard => {
                    let info = pdf_info(metadata, &central.pdf)?;
                    spec.explicit_setups = pdf_setups(&central, &central.pdf, info.nmembers);
                    if spec.method.is_none() {
                        spec.method = Some(info.error_method.parse()?);
                    }
                }
                VariationKind::PdfReduced => {
                    let info = pdf_info(metadata, &central.pdf)?;
                    match info.reduced_set.clone() {
                        Some(reduced) => {
                            let reduced_info = pdf_info(metadata, &reduced)?;
                            spec.explicit_setups =
                                pdf_setups(&central, &reduced, reduced_info.nmembers);
                            if spec.method.is_none() {
                                spec.method = Some(reduced_info.error_method.parse()?);
                            }
                        }
                        None => {
                            warn!(
                                "no reduced set for PDF '{}'; falling back to the standard members",
                                central.pdf
                            );
                            spec.explicit_setups =
                                pdf_setups(&central, &central.pdf, info.nmembers);
                            if spec.method.is_none() {
                                spec.method = Some(info.error_method.parse()?);
                            }
                        }
                    }
                }
                VariationKind::Custom => {
                    if spec.explicit_setups.is_empty() {
                        return Err(ClientError::InvalidSpec(
                            "custom variation declared without setups".to_string(),
                        ));
                    }
                    if spec.method.is_none() {
                        return Err(ClientError::InvalidSpec(
                            "custom variation declared without a combination method".to_string(),
                        ));
                    }
                }
            }
            spec.member_count = Some(spec.explicit_setups.len());
            debug!(
                "compiled {:?} variation: {} members, method {}",
                spec.kind,
                spec.explicit_setups.len(),
                spec.method.expect("method resolved above")
            );
        }
        Ok(())
    }

    /// Compile the variations and dispatch every sub-request.
    ///
    /// The flat sub-request list starts with the single shared central
    /// setup; each variation then contributes its non-central members in
    /// declaration order. Tokens are recorded as they are assigned, so
    /// even a partially submitted job keeps them in its persisted state.
    pub async fn submit(&mut self, api: &Api) -> Result<(), ClientError> {
        if self.phase != JobPhase::Preparation {
            return Err(ClientError::InvalidSpec(format!(
                "job '{}' has already been submitted",
                self.name
            )));
        }
        if self.observables.is_empty() {
            return Err(ClientError::InvalidSpec(
                "job has no observables".to_string(),
            ));
        }

        let metadata = api.process_metadata(&self.process).await?;
        self.apply_metadata(&metadata);
        self.compile_variations(&metadata)?;
        debug_assert!(self.variations.iter().all(VariationSpec::is_compiled));

        let mut setups = vec![self.central_setup()];
        for spec in &self.variations {
            setups.extend(spec.explicit_setups.iter().skip(1).cloned());
        }

        info!(
            "submitting job '{}': {} sub-requests",
            self.name,
            setups.len()
        );
        self.sub_requests.clear();
        for setup in setups {
            let request = self.request_for(&setup);
            let token = api.submit_histogram(&self.process, &request).await?;
            self.sub_requests.push(SubRequest {
                setup,
                token: Some(token),
                status: RequestStatus::Submitted,
            });
        }
        self.phase = JobPhase::Submitted;
        self.submitted_at = Some(Utc::now());
        Ok(())
    }

    /// Wait for every dispatched token, then fold each variation into the
    /// central result in declaration order.
    ///
    /// Results are consumed by original request index, never by
    /// completion time, so the `sys_error` ordering always matches the
    /// declaration order.
    pub async fn collect(&mut self, api: &Api) -> Result<(), ClientError> {
        if self.phase != JobPhase::Submitted {
            return Err(ClientError::InvalidSpec(format!(
                "job '{}' has no outstanding sub-requests",
                self.name
            )));
        }
        self.check_resumable()?;

        let mut results = Vec::with_capacity(self.sub_requests.len());
        for (index, sub) in self.sub_requests.iter_mut().enumerate() {
            let token = sub.token.as_ref().expect("token assigned on submission");
            debug!("waiting for sub-request {} (token {})", index, token);
            match api.wait_for(token).await {
                Ok(result) => {
                    sub.status = RequestStatus::Completed;
                    results.push(result);
                }
                Err(e) => {
                    if matches!(e, ClientError::JobErrored(_)) {
                        sub.status = RequestStatus::Errored;
                    }
                    return Err(e);
                }
            }
        }

        let mut current = results[0].clone();
        let mut offset = 1;
        for spec in &self.variations {
            let members = spec.member_count.expect("compiled before submission") - 1;
            let method = spec.method.expect("compiled before submission");
            current = analysis::fold_variation(
                &current,
                &results[offset..offset + members],
                method,
                spec.rescale_factor,
            )?;
            offset += members;
        }

        self.result = Some(current);
        self.phase = JobPhase::Finished;
        self.finished_at = Some(Utc::now());
        info!("job '{}' finished", self.name);
        Ok(())
    }

    /// Verify that a submitted job actually carries what collection
    /// needs. Every field checked here is optional in the persisted
    /// document, so a hand-edited or truncated job file deserializes
    /// cleanly; it must be rejected here instead of trusted.
    fn check_resumable(&self) -> Result<(), ClientError> {
        if let Some(spec) = self.variations.iter().find(|s| !s.is_compiled()) {
            return Err(ClientError::InvalidSpec(format!(
                "job '{}' carries an uncompiled {:?} variation; the job file is incomplete",
                self.name, spec.kind
            )));
        }
        let expected = 1 + self
            .variations
            .iter()
            .map(|s| s.member_count.unwrap_or(1).saturating_sub(1))
            .sum::<usize>();
        if self.sub_requests.len() != expected {
            return Err(ClientError::InvalidSpec(format!(
                "job '{}' records {} sub-requests where its variations need {}",
                self.name,
                self.sub_requests.len(),
                expected
            )));
        }
        if self.sub_requests.iter().any(|s| s.token.is_none()) {
            return Err(ClientError::InvalidSpec(format!(
                "job '{}' has a sub-request without an assigned token",
                self.name
            )));
        }
        Ok(())
    }

    /// Persist the job to a JSON file. The document mirrors every
    /// declared field and round-trips through [`Job::load`].
    pub fn store(&self, path: &Path) -> Result<(), ClientError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a previously stored job.
    pub fn load(path: &Path) -> Result<Job, ClientError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Scale factor pairs (muR, muF) for the 3-point variation, central
/// excluded.
const THREE_POINT_FACTORS: &[(&str, &str)] = &[("*2", "*2"), ("/2", "/2")];

/// Scale factor pairs for the 7-point variation, central excluded.
const SEVEN_POINT_FACTORS: &[(&str, &str)] = &[
    ("*2", "*2"),
    ("/2", "/2"),
    ("", "*2"),
    ("", "/2"),
    ("*2", ""),
    ("/2", ""),
];

fn scale_setups(central: &Setup, factors: &[(&str, &str)]) -> Vec<Setup> {
    let mut setups = vec![central.clone()];
    for (fr, ff) in factors {
        setups.push(Setup {
            mu_r: format!("{}{}", central.mu_r, fr),
            mu_f: format!("{}{}", central.mu_f, ff),
            pdf: central.pdf.clone(),
            pdf_member: central.pdf_member,
        });
    }
    setups
}

fn pdf_setups(central: &Setup, pdf: &str, nmembers: usize) -> Vec<Setup> {
    let mut setups = vec![central.clone()];
    for member in 1..nmembers {
        setups.push(Setup {
            mu_r: central.mu_r.clone(),
            mu_f: central.mu_f.clone(),
            pdf: pdf.to_string(),
            pdf_member: member as u32,
        });
    }
    setups
}

fn pdf_info<'a>(
    metadata: &'a ProcessMetadata,
    pdf: &str,
) -> Result<&'a crate::models::PdfInfo, ClientError> {
    metadata.available_pdfs.get(pdf).ok_or_else(|| {
        ClientError::InvalidSpec(format!("PDF set '{}' is not available for this process", pdf))
    })
}

/// Job description as read from a CLI input file.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub contributions: Vec<String>,
    #[serde(default)]
    pub custom_variables: BTreeMap<String, String>,
    #[serde(default, rename = "muR")]
    pub mu_r: Option<String>,
    #[serde(default, rename = "muF")]
    pub mu_f: Option<String>,
    #[serde(default)]
    pub pdf: Option<String>,
    #[serde(default)]
    pub pdf_member: Option<u32>,
    #[serde(default)]
    pub cuts: Vec<String>,
    #[serde(default)]
    pub jet_parameters: Option<JetParameters>,
    pub observables: Vec<BinningSpec>,
    #[serde(default)]
    pub variations: Vec<VariationRequest>,
}

/// One variation declaration in a CLI input file.
#[derive(Debug, Clone, Deserialize)]
pub struct VariationRequest {
    pub kind: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub rescale_factor: Option<f64>,
    /// Explicit setups for `custom` variations; the first one is the
    /// central setup.
    #[serde(default)]
    pub setups: Vec<Setup>,
}

impl Job {
    /// Build a job from a parsed input file and the process metadata.
    pub fn from_spec(
        process: &str,
        spec: &JobSpec,
        metadata: &ProcessMetadata,
    ) -> Result<Job, ClientError> {
        let name = spec.name.as_deref().unwrap_or("default");
        let mut job = Job::new(name, process);
        job.apply_metadata(metadata);

        if let (Some(mu_r), Some(mu_f)) = (&spec.mu_r, &spec.mu_f) {
            job.set_scales(mu_r, mu_f);
        }
        if let Some(ref pdf) = spec.pdf {
            job.set_pdf(pdf, spec.pdf_member.unwrap_or(0));
        }
        for contribution in &spec.contributions {
            job.add_contribution(contribution);
        }
        for cut in &spec.cuts {
            job.add_cut(cut);
        }
        for (name, definition) in &spec.custom_variables {
            job.define_variable(name, definition);
        }
        if let Some(ref params) = spec.jet_parameters {
            job.set_jet_parameters(params.clone());
        }
        job.set_binning(spec.observables.clone());
        if job.observables.is_empty() {
            return Err(ClientError::InvalidSpec(
                "input file declares no valid observables".to_string(),
            ));
        }

        for request in &spec.variations {
            let kind: VariationKind = request.kind.parse()?;
            let variation = if kind == VariationKind::Custom {
                let method = request
                    .method
                    .as_deref()
                    .ok_or_else(|| {
                        ClientError::InvalidSpec(
                            "custom variation declared without a combination method".to_string(),
                        )
                    })?
                    .parse()?;
                VariationSpec::custom(
                    request.setups.clone(),
                    method,
                    request.rescale_factor.unwrap_or(1.0),
                )
            } else {
                let mut variation = VariationSpec::new(kind);
                if let Some(ref method) = request.method {
                    variation.method = Some(method.parse()?);
                }
                if let Some(rescale) = request.rescale_factor {
                    variation.rescale_factor = rescale;
                }
                variation
            };
            job.add_variation(variation);
        }

        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PdfInfo;

    fn make_metadata() -> ProcessMetadata {
        let mut contribution_groups = BTreeMap::new();
        contribution_groups.insert("LO".to_string(), vec!["born".to_string()]);
        contribution_groups.insert("NLO".to_string(), vec!["virt".to_string()]);

        let mut available_pdfs = BTreeMap::new();
        available_pdfs.insert(
            "CT18NNLO".to_string(),
            PdfInfo {
                error_method: "hessian".to_string(),
                nmembers: 59,
                reduced_set: Some("CT18NNLO_smpdf".to_string()),
            },
        );
        available_pdfs.insert(
            "CT18NNLO_smpdf".to_string(),
            PdfInfo {
                error_method: "symmhessian".to_string(),
                nmembers: 13,
                reduced_set: None,
            },
        );
        available_pdfs.insert(
            "NNPDF40".to_string(),
            PdfInfo {
                error_method: "replicas".to_string(),
                nmembers: 101,
                reduced_set: None,
            },
        );

        ProcessMetadata {
            name: "pp -> tt~".to_string(),
            scales_info: "muR0 = muF0 = HT/4".to_string(),
            pdf_set: "CT18NNLO".to_string(),
            pdf_member: 0,
            contribution_groups,
            variables: BTreeMap::new(),
            available_pdfs,
            default_jet_parameters: None,
        }
    }

    fn make_prepared_job() -> Job {
        let mut job = Job::new("test", "tt");
        job.apply_metadata(&make_metadata());
        job.add_contribution("LO");
        job.add_binning(BinningSpec {
            variable: "pt_top".to_string(),
            bins: vec![0.0, 100.0, 200.0],
        });
        job
    }

    #[test]
    fn test_invalid_mutations_are_noops() {
        let mut job = make_prepared_job();

        job.add_contribution("NNLO++");
        assert_eq!(job.contributions, vec!["LO".to_string()]);

        job.add_binning(BinningSpec {
            variable: "y_top".to_string(),
            bins: vec![2.0, 1.0],
        });
        assert_eq!(job.observables.len(), 1);

        job.add_cut("  ");
        assert!(job.cuts.is_empty());

        job.set_jet_parameters(JetParameters {
            maxnjet: 0,
            p: -1.0,
            r: 0.4,
        });
        assert!(job.jet_parameters.is_none());
    }

    #[test]
    fn test_mutation_refused_after_submission() {
        let mut job = make_prepared_job();
        job.phase = JobPhase::Submitted;

        job.set_scales("muR0*4", "muF0*4");
        job.add_cut("pt_top > 50");
        job.add_variation(VariationSpec::new(VariationKind::Scale3pt));

        assert_eq!(job.mu_r, "muR0");
        assert!(job.cuts.is_empty());
        assert!(job.variations.is_empty());
    }

    #[test]
    fn test_compile_scale_3pt() {
        let mut job = make_prepared_job();
        job.add_variation(VariationSpec::new(VariationKind::Scale3pt));
        job.compile_variations(&make_metadata()).unwrap();

        let spec = &job.variations[0];
        assert!(spec.is_compiled());
        assert_eq!(spec.member_count, Some(3));
        assert_eq!(spec.method, Some(CombinationMethod::Envelope));
        assert_eq!(spec.explicit_setups[0], job.central_setup());
        assert_eq!(spec.explicit_setups[1].mu_r, "muR0*2");
        assert_eq!(spec.explicit_setups[1].mu_f, "muF0*2");
        assert_eq!(spec.explicit_setups[2].mu_r, "muR0/2");
        assert_eq!(spec.explicit_setups[2].mu_f, "muF0/2");
    }

    #[test]
    fn test_compile_scale_7pt() {
        let mut job = make_prepared_job();
        job.add_variation(VariationSpec::new(VariationKind::Scale7pt));
        job.compile_variations(&make_metadata()).unwrap();

        let spec = &job.variations[0];
        assert_eq!(spec.member_count, Some(7));
        let pairs: Vec<(String, String)> = spec.explicit_setups[1..]
            .iter()
            .map(|s| (s.mu_r.clone(), s.mu_f.clone()))
            .collect();
        assert!(pairs.contains(&("muR0".to_string(), "muF0*2".to_string())));
        assert!(pairs.contains(&("muR0*2".to_string(), "muF0".to_string())));
        assert!(pairs.contains(&("muR0/2".to_string(), "muF0/2".to_string())));
    }

    #[test]
    fn test_compile_pdf_standard_resolves_from_metadata() {
        let mut job = make_prepared_job();
        job.add_variation(VariationSpec::new(VariationKind::PdfStandard));
        job.compile_variations(&make_metadata()).unwrap();

        let spec = &job.variations[0];
        assert_eq!(spec.member_count, Some(59));
        assert_eq!(spec.method, Some(CombinationMethod::Hessian));
        assert_eq!(spec.explicit_setups[1].pdf, "CT18NNLO");
        assert_eq!(spec.explicit_setups[1].pdf_member, 1);
        assert_eq!(spec.explicit_setups[58].pdf_member, 58);
    }

    #[test]
    fn test_compile_pdf_reduced_uses_companion_set() {
        let mut job = make_prepared_job();
        job.add_variation(VariationSpec::new(VariationKind::PdfReduced));
        job.compile_variations(&make_metadata()).unwrap();

        let spec = &job.variations[0];
        assert_eq!(spec.member_count, Some(13));
        assert_eq!(spec.method, Some(CombinationMethod::SymmHessian));
        // Central stays on the full set; members switch to the reduced one.
        assert_eq!(spec.explicit_setups[0].pdf, "CT18NNLO");
        assert_eq!(spec.explicit_setups[1].pdf, "CT18NNLO_smpdf");
    }

    #[test]
    fn test_compile_pdf_reduced_falls_back_to_standard() {
        let mut job = make_prepared_job();
        job.set_pdf("NNPDF40", 0);
        job.add_variation(VariationSpec::new(VariationKind::PdfReduced));
        job.compile_variations(&make_metadata()).unwrap();

        let spec = &job.variations[0];
        assert_eq!(spec.member_count, Some(101));
        assert_eq!(spec.method, Some(CombinationMethod::Replicas));
        assert_eq!(spec.explicit_setups[1].pdf, "NNPDF40");
    }

    #[test]
    fn test_compile_unknown_pdf_rejected() {
        let mut job = make_prepared_job();
        job.set_pdf("NOSUCHPDF", 0);
        job.add_variation(VariationSpec::new(VariationKind::PdfStandard));
        let err = job.compile_variations(&make_metadata()).unwrap_err();
        assert!(matches!(err, ClientError::InvalidSpec(_)));
    }

    #[test]
    fn test_store_load_round_trip_all_phases() {
        let dir = tempfile::tempdir().unwrap();

        let mut job = make_prepared_job();
        job.add_variation(VariationSpec::new(VariationKind::Scale3pt));

        for phase in [JobPhase::Preparation, JobPhase::Submitted, JobPhase::Finished] {
            job.phase = phase;
            if phase != JobPhase::Preparation {
                job.sub_requests = vec![SubRequest {
                    setup: job.central_setup(),
                    token: Some(Token::from("abc123")),
                    status: RequestStatus::Completed,
                }];
            }
            let path = dir.path().join(format!("job-{:?}.json", phase));
            job.store(&path).unwrap();
            let loaded = Job::load(&path).unwrap();
            assert_eq!(loaded, job);
        }
    }

    #[test]
    fn test_load_missing_file_is_store_error() {
        let err = Job::load(Path::new("/no/such/job.json")).unwrap_err();
        assert!(matches!(err, ClientError::Store(_)));
    }

    fn offline_api() -> Api {
        Api::new(&crate::config::ApiConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_collect_rejects_job_file_without_sub_requests() {
        // All collection-critical fields are optional in the persisted
        // document, so this deserializes without complaint.
        let json = r#"{
            "name": "resumed",
            "process": "tt",
            "contributions": ["LO"],
            "muR": "muR0",
            "muF": "muF0",
            "pdf": "CT18NNLO",
            "pdf_member": 0,
            "observables": [{"variable": "pt_top", "bins": [0.0, 100.0]}],
            "phase": "submitted",
            "created_at": "2026-08-24T12:00:00Z"
        }"#;
        let mut job: Job = serde_json::from_str(json).unwrap();

        let err = job.collect(&offline_api()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn test_collect_rejects_sub_request_without_token() {
        let mut job = make_prepared_job();
        job.phase = JobPhase::Submitted;
        job.sub_requests = vec![SubRequest {
            setup: job.central_setup(),
            token: None,
            status: RequestStatus::Submitted,
        }];

        let err = job.collect(&offline_api()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn test_collect_rejects_uncompiled_variation() {
        let mut job = make_prepared_job();
        job.add_variation(VariationSpec::new(VariationKind::Scale3pt));
        job.phase = JobPhase::Submitted;
        job.sub_requests = vec![SubRequest {
            setup: job.central_setup(),
            token: Some(Token::from("abc123")),
            status: RequestStatus::Submitted,
        }];

        let err = job.collect(&offline_api()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidSpec(_)));
    }

    #[test]
    fn test_variation_kind_from_str() {
        assert_eq!(
            "scale-3pt".parse::<VariationKind>().unwrap(),
            VariationKind::Scale3pt
        );
        assert_eq!(
            "7-point".parse::<VariationKind>().unwrap(),
            VariationKind::Scale7pt
        );
        assert_eq!(
            "pdf-reduced".parse::<VariationKind>().unwrap(),
            VariationKind::PdfReduced
        );
        assert!("octo-point".parse::<VariationKind>().is_err());
    }

    #[test]
    fn test_from_spec_builds_job() {
        let spec: JobSpec = serde_json::from_str(
            r#"{
                "name": "ttbar-pt",
                "contributions": ["LO", "NLO"],
                "muR": "HT/4",
                "muF": "HT/4",
                "cuts": ["pt_top > 30"],
                "observables": [{"variable": "pt_top", "bins": [0, 50, 100, 200]}],
                "variations": [
                    {"kind": "scale-3pt"},
                    {"kind": "pdf-standard", "rescale_factor": 1.645}
                ]
            }"#,
        )
        .unwrap();

        let job = Job::from_spec("tt", &spec, &make_metadata()).unwrap();
        assert_eq!(job.name, "ttbar-pt");
        assert_eq!(job.contributions, vec!["LO", "NLO"]);
        assert_eq!(job.mu_r, "HT/4");
        assert_eq!(job.pdf, "CT18NNLO");
        assert_eq!(job.variations.len(), 2);
        assert_eq!(job.variations[0].kind, VariationKind::Scale3pt);
        assert_eq!(job.variations[1].rescale_factor, 1.645);
    }
}

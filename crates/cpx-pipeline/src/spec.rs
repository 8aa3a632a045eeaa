// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::analyzer::AnalyzerConfig;
use cpx_bayes::SamplerConfig;
use cpx_core::{Constraints, CpxError, DetectionMethod, fnv1a};
use cpx_costs::CostKind;
use cpx_events::{CorrelatorConfig, ImpactConfig};
use cpx_offline::{BinSegConfig, CusumConfig, PeltConfig, SlidingWindowConfig};
use cpx_preprocess::SignalKind;
use serde::{Deserialize, Serialize};

/// Detection strategy and its parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorConfig {
    Cusum(CusumConfig),
    Window(SlidingWindowConfig),
    Pelt {
        #[serde(default)]
        cost: CostKind,
        #[serde(default)]
        config: PeltConfig,
    },
    #[serde(rename = "binseg")]
    BinSeg {
        #[serde(default)]
        cost: CostKind,
        #[serde(default)]
        config: BinSegConfig,
    },
    Bayesian(SamplerConfig),
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::Pelt {
            cost: CostKind::L2,
            config: PeltConfig::default(),
        }
    }
}

impl DetectorConfig {
    pub fn method(&self) -> DetectionMethod {
        match self {
            Self::Cusum(_) => DetectionMethod::Cusum,
            Self::Window(_) => DetectionMethod::Window,
            Self::Pelt { .. } => DetectionMethod::Pelt,
            Self::BinSeg { .. } => DetectionMethod::BinSeg,
            Self::Bayesian(_) => DetectionMethod::Bayesian,
        }
    }
}

/// A complete analysis run: detection, result analysis, event correlation
/// and impact ranking.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSpec {
    pub detector: DetectorConfig,
    /// Representation the deterministic strategies segment. The sampler
    /// always runs on log-returns.
    pub signal: SignalKind,
    pub constraints: Constraints,
    pub analyzer: AnalyzerConfig,
    pub correlation: CorrelatorConfig,
    pub impact: ImpactConfig,
    /// Raise `NoChangePointsFound` instead of returning empty lists.
    pub fail_on_empty: bool,
}

/// The part of a [`PipelineSpec`] that determines detected change points.
#[derive(Serialize)]
struct DetectionKey<'a> {
    detector: &'a DetectorConfig,
    signal: SignalKind,
    constraints: &'a Constraints,
    analyzer: &'a AnalyzerConfig,
}

impl PipelineSpec {
    pub fn from_json(raw: &str) -> Result<Self, CpxError> {
        serde_json::from_str(raw)
            .map_err(|err| CpxError::invalid_input(format!("invalid pipeline JSON: {err}")))
    }

    pub fn to_json(&self) -> Result<String, CpxError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| CpxError::invalid_input(format!("pipeline spec not encodable: {err}")))
    }

    /// FNV-1a hash of the detection-relevant JSON. Correlation, impact and
    /// empty-result settings are excluded, so changing them reuses cached
    /// change points.
    pub fn detection_key(&self) -> Result<u64, CpxError> {
        let key = DetectionKey {
            detector: &self.detector,
            signal: self.signal,
            constraints: &self.constraints,
            analyzer: &self.analyzer,
        };
        let bytes = serde_json::to_vec(&key)
            .map_err(|err| CpxError::invalid_input(format!("pipeline spec not encodable: {err}")))?;
        Ok(fnv1a(&bytes))
    }
}

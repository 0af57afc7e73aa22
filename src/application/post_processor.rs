//! Post-processor: DP correction of decrypted aggregates.
//!
//! A result that declares the `dp-statistics` routine arrives as a single row
//! of noised aggregates. The engine corrects it into per-variable estimates,
//! which are then mapped back onto the statistics the computation asked for.
//! Skipping a declared routine is never an option: an unknown name is an error.

use crate::domain::{
    ComputationDefinition, ConfidenceInterval, DecryptedArtifact, JobHandle, NoiseMetadata,
    Quantity, ResultReference, StatisticRecord, StatisticsSummary,
};
use crate::ports::{CryptoEngine, CryptoEngineHandle};
use crate::{CipherflowError, Result};

/// Post-processing routines a result may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcessing {
    DpStatistics,
}

impl PostProcessing {
    pub const DP_STATISTICS: &'static str = "dp-statistics";

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            Self::DP_STATISTICS => Some(Self::DpStatistics),
            _ => None,
        }
    }
}

fn failure(
    job: &JobHandle,
    result: &ResultReference,
    message: impl Into<String>,
) -> CipherflowError {
    CipherflowError::PostProcessing {
        job: job.id.clone(),
        result: result.to_string(),
        message: message.into(),
    }
}

pub struct PostProcessor<E: CryptoEngine + ?Sized> {
    engine: CryptoEngineHandle<E>,
}

impl<E: CryptoEngine + ?Sized> PostProcessor<E> {
    pub fn new(engine: CryptoEngineHandle<E>) -> Self {
        Self { engine }
    }

    /// Apply the post-processing `required` names, if any.
    ///
    /// With no routine required the artifact is returned untouched.
    ///
    /// # Errors
    /// Returns `PostProcessing` if the routine is unknown, the artifact is not
    /// a single-row numeric matrix, or the engine correction fails or does not
    /// match the requested statistics.
    pub fn post_process(
        &self,
        job: &JobHandle,
        result: &ResultReference,
        definition: &ComputationDefinition,
        artifact: DecryptedArtifact,
        required: Option<&str>,
    ) -> Result<DecryptedArtifact> {
        let Some(name) = required else {
            return Ok(artifact);
        };
        let routine = PostProcessing::from_name(name)
            .ok_or_else(|| failure(job, result, format!("unrecognized post-processing '{name}'")))?;

        match routine {
            PostProcessing::DpStatistics => self.correct_dp_statistics(job, result, definition, artifact),
        }
    }

    fn correct_dp_statistics(
        &self,
        job: &JobHandle,
        result: &ResultReference,
        definition: &ComputationDefinition,
        artifact: DecryptedArtifact,
    ) -> Result<DecryptedArtifact> {
        let DecryptedArtifact::NumericMatrix(table) = artifact else {
            return Err(failure(
                job,
                result,
                format!("DP statistics require a numeric matrix, got {}", artifact.kind()),
            ));
        };
        let [raw_row] = table.rows.as_slice() else {
            return Err(failure(
                job,
                result,
                format!("expected one aggregated row, got {}", table.rows.len()),
            ));
        };

        let corrected = self
            .engine
            .correct_statistics(raw_row)
            .map_err(|e| failure(job, result, e.to_string()))?;
        if corrected.len() != definition.statistics.len() {
            return Err(failure(
                job,
                result,
                format!(
                    "engine corrected {} variables but {} statistics were requested",
                    corrected.len(),
                    definition.statistics.len()
                ),
            ));
        }

        let records = definition
            .statistics
            .iter()
            .zip(&corrected)
            .map(|(stat, c)| {
                let variance = stat.requests(Quantity::Variance).then_some(c.variance);
                StatisticRecord {
                    name: stat.name.clone(),
                    variable: stat.variable.clone(),
                    mean: stat.requests(Quantity::Mean).then_some(c.mean),
                    variance,
                    std_dev: variance.map(|v| v.max(0.0).sqrt()),
                    ..StatisticRecord::default()
                }
            })
            .collect();

        tracing::info!(
            "Applied DP correction to result {} ({} statistics)",
            result,
            definition.statistics.len()
        );

        Ok(DecryptedArtifact::Statistics(StatisticsSummary {
            records,
            raw_values: Some(raw_row.clone()),
            metadata: table.metadata,
        }))
    }

    /// Confidence bounds for every requested quantity of every statistic.
    ///
    /// Read-only: point estimates are not touched.
    ///
    /// # Errors
    /// Returns `PostProcessing` if `noise` is missing or empty, or the engine
    /// fails or answers for a different number of variables.
    pub fn confidence_intervals(
        &self,
        job: &JobHandle,
        result: &ResultReference,
        definition: &ComputationDefinition,
        raw_row: &[f64],
        noise: Option<&[NoiseMetadata]>,
    ) -> Result<Vec<ConfidenceInterval>> {
        let noise = noise
            .filter(|n| !n.is_empty())
            .ok_or_else(|| failure(job, result, "noise metadata is required for confidence intervals"))?;

        let bounds = self
            .engine
            .confidence_interval(raw_row, noise)
            .map_err(|e| failure(job, result, e.to_string()))?;
        if bounds.len() != definition.statistics.len() {
            return Err(failure(
                job,
                result,
                format!(
                    "engine bounded {} variables but {} statistics were requested",
                    bounds.len(),
                    definition.statistics.len()
                ),
            ));
        }

        let mut intervals = Vec::new();
        for (stat, b) in definition.statistics.iter().zip(&bounds) {
            for quantity in [Quantity::Mean, Quantity::Variance] {
                if !stat.requests(quantity) {
                    continue;
                }
                let (min, max) = match quantity {
                    Quantity::Mean => b.mean,
                    Quantity::Variance => b.variance,
                };
                intervals.push(ConfidenceInterval {
                    name: stat.name.clone(),
                    variable: stat.variable.clone(),
                    quantity,
                    min,
                    max,
                });
            }
        }
        Ok(intervals)
    }

    /// Confidence bounds for a summary produced by DP correction, using the
    /// raw row and noise metadata it carries.
    ///
    /// # Errors
    /// See [`confidence_intervals`](Self::confidence_intervals); also fails if
    /// the summary has no raw values.
    pub fn summary_confidence_intervals(
        &self,
        job: &JobHandle,
        result: &ResultReference,
        definition: &ComputationDefinition,
        summary: &StatisticsSummary,
    ) -> Result<Vec<ConfidenceInterval>> {
        let raw = summary
            .raw_values
            .as_deref()
            .ok_or_else(|| failure(job, result, "summary carries no raw DP aggregates"))?;
        self.confidence_intervals(job, result, definition, raw, summary.metadata.noise.as_deref())
    }
}

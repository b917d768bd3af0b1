//! Segment selection over timepoint-bounded stop runs

use super::segment::SegmentPredictor;
use crate::models::{Model, StopTimeInstance};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Trust thresholds for models
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Required RMSE improvement of the ML model over the historical average
    pub min_rmse_improvement: f64,
    /// Observations required before historical statistics are used
    pub min_observed_stop_count: u32,
    /// Global switch for ML inference
    pub enable_inference: bool,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            min_rmse_improvement: 0.0,
            min_observed_stop_count: 10,
            enable_inference: true,
        }
    }
}

/// Builds segment predictors for runs of stops
#[derive(Debug, Clone, Default)]
pub struct SegmentPredictorFactory {
    config: FactoryConfig,
}

impl SegmentPredictorFactory {
    pub fn new(config: FactoryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Whether the model's ML predictions beat its historical average by enough
    pub fn is_ml_trusted(&self, model: &Model) -> bool {
        model.trained && model.avg_rmse - model.ml_rmse >= self.config.min_rmse_improvement
    }

    pub fn are_statistics_trusted(&self, model: &Model) -> bool {
        model.observed_stop_count >= self.config.min_observed_stop_count && model.average_time > 0.0
    }

    /// Segment predictors for one run, in stop order
    ///
    /// A trusted model spanning the whole run wins; otherwise the run is split
    /// into stop pairs, each with whatever model covers it.
    pub fn build_for_run(
        &self,
        run: &[StopTimeInstance],
        first_index: usize,
        models: &HashMap<String, Model>,
    ) -> Vec<SegmentPredictor> {
        if run.len() < 2 {
            return Vec::new();
        }

        if run.len() > 2 {
            let name = Model::name_for(run.iter().map(|s| s.stop_id.as_str()));
            if let Some(model) = models.get(&name).filter(|m| self.is_ml_trusted(m)) {
                debug!(model = %name, model_id = model.id, "Using multi-stop model");
                return self
                    .segment(Some(model), run.to_vec(), first_index)
                    .into_iter()
                    .collect();
            }
        }

        run.windows(2)
            .enumerate()
            .filter_map(|(i, pair)| {
                let name = Model::name_for(pair.iter().map(|s| s.stop_id.as_str()));
                self.segment(models.get(&name), pair.to_vec(), first_index + i)
            })
            .collect()
    }

    fn segment(
        &self,
        model: Option<&Model>,
        stops: Vec<StopTimeInstance>,
        first_index: usize,
    ) -> Option<SegmentPredictor> {
        let use_inference = self.config.enable_inference && model.is_some_and(|m| self.is_ml_trusted(m));
        let use_statistics = model.is_some_and(|m| self.are_statistics_trusted(m));
        SegmentPredictor::new(
            model.cloned().map(Arc::new),
            stops,
            first_index,
            use_inference,
            use_statistics,
        )
    }
}

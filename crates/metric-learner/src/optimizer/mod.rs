pub mod bootstrap;

pub use bootstrap::*;

use anyhow::Result;
use tracing::info;

use crate::evaluate::{Metric, MseMetric};
use crate::{Example, LanguageModel, MetricModule, Module, Optimizable};

#[allow(async_fn_in_trait)]
pub trait Optimizer {
    type Report;

    async fn compile<M, MT>(
        &self,
        module: &mut M,
        trainset: Vec<Example>,
        metric: &MT,
    ) -> Result<Self::Report>
    where
        M: Module + Optimizable,
        MT: Metric;
}

/// Tunes a metric module's demonstrations on human-labeled examples with
/// [`BootstrapFewShot`] and [`MseMetric`].
///
/// With an empty dataset nothing runs and `None` is returned.
pub async fn optimize_metric_module<L: LanguageModel>(
    module: &mut MetricModule<L>,
    dataset: Vec<Example>,
) -> Result<Option<BootstrapReport>> {
    optimize_metric_module_with(module, dataset, &BootstrapFewShot::default(), &MseMetric).await
}

/// [`optimize_metric_module`] with an explicit optimizer and metric.
pub async fn optimize_metric_module_with<L, O, MT>(
    module: &mut MetricModule<L>,
    dataset: Vec<Example>,
    optimizer: &O,
    metric: &MT,
) -> Result<Option<O::Report>>
where
    L: LanguageModel,
    O: Optimizer,
    MT: Metric,
{
    if dataset.is_empty() {
        info!("no labeled data available for optimization");
        return Ok(None);
    }

    info!(examples = dataset.len(), "optimizing metric module");
    let report = optimizer.compile(module, dataset, metric).await?;
    info!(demos = module.demonstrations.len(), "optimization complete");
    Ok(Some(report))
}

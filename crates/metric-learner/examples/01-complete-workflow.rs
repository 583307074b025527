/*
Record, label, optimize and evaluate a metric against a real model.

Run with:
```
OPENAI_API_KEY=... cargo run --example 01-complete-workflow
```
Set `METRIC_LEARNER_MODEL` to use another `provider:model`.
*/

use anyhow::Result;
use metric_learner::{
    InstanceStore, LM, MetricEvaluator, MetricModule, init_tracing, label_instances,
    optimize_metric_module,
};
use std::io;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let model = std::env::var("METRIC_LEARNER_MODEL").unwrap_or("openai:gpt-4o-mini".to_string());
    let mut metric = MetricModule::new(LM::from_model_string(&model, None)?);
    let store = InstanceStore::new("qa_quality")?;

    let triples = [
        ("What is the capital of France?", "Paris", "Paris"),
        ("What is 2+2?", "5", "4"),
        ("Who wrote Hamlet?", "Charles Dickens", "William Shakespeare"),
        ("What is the boiling point of water at sea level?", "100 degrees Celsius", "100°C"),
    ];

    for (input, prediction, gold) in triples {
        let score = metric.score_or_default(input, prediction, Some(gold)).await;
        store.save_instance(input, prediction, Some(gold), Some(score))?;
        println!("{input} -> {prediction}: {score:.2}");
    }

    println!("\nCorrect the scores (or type 'exit' to stop):");
    let stdin = io::stdin();
    label_instances(&store, stdin.lock(), io::stdout())?;

    let dataset = store.labeled_dataset()?;
    if let Some(report) = optimize_metric_module(&mut metric, dataset).await? {
        println!("\n{report:?}");
    }
    println!("\n{}", metric.learned_metric_fn());

    if let Some(report) = MetricEvaluator::new(&metric, &store).evaluate().await? {
        println!("{report}");
    }
    Ok(())
}

/*
Optimize a question-answering program with a learned metric, offline.

Both the program and the metric run on `DummyLM`, so no key is needed:
```
cargo run --example 02-learner-with-dummy-lm
```
*/

use anyhow::Result;
use metric_learner::{
    DummyLM, MetricLearner, MetricModule, Optimizable, Predict, Signature, example, init_tracing,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let program = Predict::new(
        DummyLM::with_reply("[[ ## answer ## ]]\nParis\n\n[[ ## completed ## ]]"),
        "question -> answer"
            .parse::<Signature>()?
            .with_instruction("Answer the geography question in one word."),
    );

    let mut judge = MetricModule::new(DummyLM::with_responder(|prompt| {
        if prompt.contains("the answer 'Paris'") && prompt.contains("correct answer is 'Paris'") {
            "0.95".to_string()
        } else {
            "0.1".to_string()
        }
    }));
    judge.add_demonstration("Capital of Italy?", "Rome", Some("Rome"), 1.0)?;
    judge.add_demonstration("Capital of Spain?", "Lisbon", Some("Madrid"), 0.0)?;

    let trainset = vec![
        example! { "question": "input" => "Capital of France?", "answer": "output" => "Paris" },
        example! { "question": "input" => "Where is the Louvre?", "answer": "output" => "Paris" },
        example! { "question": "input" => "Capital of Germany?", "answer": "output" => "Berlin" },
    ];

    let mut learner = MetricLearner::builder()
        .program(program)
        .metric_module(judge)
        .num_iterations(2)
        .verbose(true)
        .build();

    let report = learner.optimize(trainset).await?;
    println!("{report:?}");

    let program = learner.into_program();
    for (idx, demo) in program.demos().iter().enumerate() {
        println!(
            "{}. {} -> {}",
            idx + 1,
            demo.get_str("question").unwrap_or_default(),
            demo.get_str("answer").unwrap_or_default()
        );
    }
    Ok(())
}

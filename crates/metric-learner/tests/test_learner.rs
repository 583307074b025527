use metric_learner::{
    BootstrapFewShot, DummyLM, Example, Metric, MetricLearner, MetricModule, Optimizable, Predict,
    Signature, example, prediction,
};

const ANSWER_PARIS: &str = "[[ ## answer ## ]]\nParis\n\n[[ ## completed ## ]]";

/// Full marks only when the answer under review matches the gold answer.
fn strict_judge() -> DummyLM {
    DummyLM::with_responder(|prompt| {
        let answer = prompt
            .rsplit_once("the answer '")
            .and_then(|(_, rest)| rest.split_once('\''))
            .map(|(answer, _)| answer.to_string());
        let gold = prompt
            .rsplit_once("The correct answer is '")
            .and_then(|(_, rest)| rest.split_once('\''))
            .map(|(gold, _)| gold.to_string());
        if answer.is_some() && answer == gold {
            "1.0".to_string()
        } else {
            "0.0".to_string()
        }
    })
}

fn qa(question: &str, answer: &str) -> Example {
    example! {
        "question": "input" => question,
        "answer": "output" => answer,
    }
}

fn program() -> Predict<DummyLM> {
    Predict::new(
        DummyLM::with_reply(ANSWER_PARIS),
        "question -> answer".parse::<Signature>().unwrap(),
    )
}

#[tokio::test]
async fn learned_metric_rates_the_program_answer_against_gold() {
    let learner = MetricLearner::builder()
        .program(program())
        .metric_module(MetricModule::new(strict_judge()))
        .build();
    let metric = learner.metric();

    let right = metric
        .evaluate(&qa("Capital of France?", "Paris"), &prediction! { "answer" => "Paris" })
        .await
        .unwrap();
    let wrong = metric
        .evaluate(&qa("Capital of Germany?", "Berlin"), &prediction! { "answer" => "Paris" })
        .await
        .unwrap();

    assert_eq!(right, 1.0);
    assert_eq!(wrong, 0.0);
}

#[tokio::test]
async fn unscoreable_answers_get_the_default_score() {
    let learner = MetricLearner::builder()
        .program(program())
        .metric_module(MetricModule::new(DummyLM::with_reply("no opinion")))
        .build();

    let score = learner
        .metric()
        .evaluate(&qa("q", "a"), &prediction! { "answer" => "b" })
        .await
        .unwrap();
    assert_eq!(score, 0.5);
}

#[tokio::test]
async fn optimize_keeps_answers_the_metric_approves() {
    let trainset = vec![
        qa("Capital of France?", "Paris"),
        qa("Which city hosts the Louvre?", "Paris"),
        qa("Capital of Germany?", "Berlin"),
        qa("City of the Eiffel Tower?", "Paris"),
    ];

    let mut learner = MetricLearner::builder()
        .program(program())
        .metric_module(MetricModule::new(strict_judge()))
        .num_iterations(2)
        .optimizer(BootstrapFewShot::builder().metric_threshold(0.5).seed(5).build())
        .verbose(true)
        .build();

    let report = learner.optimize(trainset).await.unwrap();

    assert_eq!(report.bootstrapped, 2);
    assert_eq!(report.labeled, 2);
    assert!(report.rejected <= 1);

    let program = learner.into_program();
    let demos = program.demos();
    assert_eq!(demos.len(), 4);
    // Bootstrapped demos come first and hold the program's answer.
    for demo in &demos[..2] {
        assert_eq!(demo.get_str("answer").as_deref(), Some("Paris"));
        assert_ne!(demo.get_str("question").as_deref(), Some("Capital of Germany?"));
    }
}

#[tokio::test]
async fn num_iterations_overrides_the_optimizer_budget() {
    let learner = MetricLearner::builder()
        .program(program())
        .metric_module(MetricModule::new(strict_judge()))
        .num_iterations(7)
        .optimizer(BootstrapFewShot::builder().max_bootstrapped_demos(1).build())
        .build();

    assert_eq!(learner.optimizer().max_bootstrapped_demos, 7);
}

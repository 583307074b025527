use metric_learner::{
    Demonstration, DummyLM, Example, MetricModule, MetricState, Module, Optimizable, ScoreError,
};
use rstest::rstest;
use serde_json::Value;
use std::collections::HashMap;
use tempfile::TempDir;

#[tokio::test]
async fn score_reads_the_first_number_of_the_reply() {
    let lm = DummyLM::with_reply("I'd say 0.8 overall.");
    let metric = MetricModule::new(lm.clone());

    let score = metric.score("What is 2+2?", "4", Some("4")).await.unwrap();

    assert_eq!(score, 0.8);
    let prompt = lm.last_prompt().unwrap();
    assert!(prompt.contains("Rate the quality of the answer '4' for the question 'What is 2+2?'"));
    assert!(prompt.contains(" The correct answer is '4'."));
}

#[tokio::test]
async fn unparseable_reply_is_an_error_but_defaults_to_half() {
    let lm = DummyLM::with_reply("excellent answer");
    let metric = MetricModule::new(lm);

    let err = metric.score("q", "a", None).await.unwrap_err();
    assert!(matches!(err, ScoreError::Parse { .. }));

    assert_eq!(metric.score_or_default("q", "a", None).await, 0.5);
}

#[tokio::test]
async fn lm_failure_falls_back_to_default_score() {
    let lm = DummyLM::new();
    lm.push_failure("provider down");
    let metric = MetricModule::builder().lm(lm).default_score(0.25).build();

    assert_eq!(metric.score_or_default("q", "a", None).await, 0.25);
}

#[rstest]
fn demonstrations_are_rendered_before_the_triple() {
    let mut metric = MetricModule::new(DummyLM::new());
    metric.add_demonstration("Capital of France?", "Paris", Some("Paris"), 1.0).unwrap();
    metric.add_demonstration("2+2?", "5", None, 0.0).unwrap();

    let prompt = metric.build_prompt("Capital of Spain?", "Madrid", None);

    let expected_prefix = "Here are some examples of how to rate answers:\n\n\
Question: Capital of France?\nAnswer: Paris\nCorrect answer: Paris\nRating: 1.0\n\n\
Question: 2+2?\nAnswer: 5\nRating: 0.0\n\n\
Now, rate the following answer:\n\n";
    assert!(prompt.starts_with(expected_prefix), "{prompt}");
    assert!(prompt.ends_with("\n\nProvide only a number between 0 and 1 as your response."));
}

#[rstest]
fn demonstration_scores_must_be_in_range() {
    let mut metric = MetricModule::new(DummyLM::new());
    assert!(metric.add_demonstration("q", "a", None, 1.2).is_err());
    assert!(metric.demonstrations.is_empty());

    metric.add_demonstration("q", "a", None, 0.4).unwrap();
    metric.clear_demonstrations();
    assert!(metric.demonstrations.is_empty());
}

#[rstest]
fn custom_template_with_gold_slot() {
    let metric = MetricModule::with_template(
        DummyLM::new(),
        "Q: {input}\nA: {prediction}\nReference: {gold}",
    )
    .unwrap();

    let prompt = metric.build_prompt("q", "a", Some("g"));
    assert!(prompt.starts_with("Q: q\nA: a\nReference: g The correct answer is 'g'."));
}

#[rstest]
fn unknown_placeholders_are_rejected() {
    assert!(MetricModule::with_template(DummyLM::new(), "Rate {answer}").is_err());
}

#[tokio::test]
async fn forward_predicts_a_score_field() {
    let metric = MetricModule::new(DummyLM::with_reply("0.6"));
    let inputs = Example::new(
        HashMap::from([
            ("input".to_string(), Value::from("q")),
            ("prediction".to_string(), Value::from("a")),
        ]),
        vec!["input".to_string(), "prediction".to_string()],
        vec![],
    );

    let prediction = metric.forward(inputs).await.unwrap();
    assert_eq!(prediction.get_f32("score"), Some(0.6));
}

#[tokio::test]
async fn forward_requires_input_and_prediction() {
    let metric = MetricModule::new(DummyLM::with_reply("0.6"));
    assert!(metric.forward(Example::default()).await.is_err());
}

#[rstest]
fn demos_round_trip_through_examples() {
    let mut metric = MetricModule::new(DummyLM::new());
    metric.add_demonstration("q", "a", Some("g"), 0.3).unwrap();

    let demos = metric.demos();
    assert_eq!(demos.len(), 1);
    assert_eq!(demos[0].get_f32("user_score"), Some(0.3));

    let mut other = MetricModule::new(DummyLM::new());
    other.set_demos(demos);
    assert_eq!(
        other.demonstrations,
        vec![Demonstration::new("q", "a", Some("g".to_string()), 0.3)]
    );
}

#[rstest]
fn state_survives_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("qa.state.json");

    let mut metric = MetricModule::with_template(DummyLM::new(), "Judge {prediction} for {input}").unwrap();
    metric.add_demonstration("q", "a", None, 0.9).unwrap();
    metric.save(&path).unwrap();

    let loaded = MetricModule::load(DummyLM::new(), &path).unwrap();
    assert_eq!(loaded.state(), metric.state());
    assert_eq!(loaded.template.as_str(), "Judge {prediction} for {input}");
}

#[rstest]
fn learned_metric_fn_lists_template_and_demos() {
    let mut metric = MetricModule::new(DummyLM::new());
    let empty = metric.learned_metric_fn();
    assert!(empty.starts_with("Prompt Template:\nRate the quality"));
    assert!(empty.contains("(none)"));

    metric.add_demonstration("2+2?", "4", Some("4"), 1.0).unwrap();
    let text = metric.learned_metric_fn();
    assert!(text.contains("1. Question: 2+2?"));
    assert!(text.contains("Answer: 4"));
    assert!(text.contains("Correct answer: 4"));
    assert!(text.contains("Rating: 1.0"));
}

#[rstest]
fn saved_state_is_described_without_a_model() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("qa.state.json");

    let mut metric = MetricModule::new(DummyLM::new());
    metric.add_demonstration("2+2?", "4", None, 1.0).unwrap();
    metric.save(&path).unwrap();

    let text = MetricState::load(&path).unwrap().describe();
    assert_eq!(text, metric.learned_metric_fn());
    assert!(text.contains("1. Question: 2+2?"));
    assert!(text.contains("Rating: 1.0"));

    assert!(MetricState::load(dir.path().join("missing.json")).is_err());
    assert!(MetricState::default().describe().contains("(none)"));
}

#[rstest]
fn crate_root_module_paths_resolve() {
    let metric: metric_learner::scorer::MetricModule<DummyLM> = MetricModule::new(DummyLM::new());
    fn takes_module<M: metric_learner::module::Module>(_: &M) {}
    takes_module(&metric);
}

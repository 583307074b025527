use metric_learner::{InstanceStore, LabelingSummary, label_instances};
use std::io::Cursor;
use tempfile::TempDir;

fn store_with(dir: &TempDir, count: usize) -> InstanceStore {
    let store = InstanceStore::with_base_dir("labels", dir.path()).unwrap();
    for idx in 0..count {
        let gold = (idx == 0).then_some("gold answer");
        store
            .save_instance(&format!("question {idx}"), &format!("answer {idx}"), gold, Some(0.5))
            .unwrap();
    }
    store
}

fn run(store: &InstanceStore, input: &str) -> (LabelingSummary, String) {
    let mut output = Vec::new();
    let summary = label_instances(store, Cursor::new(input), &mut output).unwrap();
    (summary, String::from_utf8(output).unwrap())
}

#[test]
fn empty_store_has_nothing_to_label() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, 0);

    let (summary, output) = run(&store, "");

    assert!(output.contains("No unlabeled instances found."));
    assert_eq!(summary, LabelingSummary::default());
}

#[test]
fn session_handles_every_command() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, 3);

    let (summary, output) = run(&store, "great\n1.5\n0.8\nskip\nhelp\nexit\n");

    assert!(output.contains("Found 3 unlabeled instances for metric 'labels'."));
    assert!(output.contains("--- Instance 1/3 ---"));
    assert!(output.contains("Input: question 0"));
    assert!(output.contains("Prediction: answer 0"));
    assert!(output.contains("Gold: gold answer"));
    assert!(output.contains("Model score: 0.5"));
    assert!(output.contains(
        "Invalid input. Please enter a number between 0 and 1, or 'skip', 'exit', or 'help'."
    ));
    assert!(output.contains("Score must be between 0 and 1. Please try again."));
    assert!(output.contains("Score 0.8 saved."));
    assert!(output.contains("Skipping to next instance."));
    assert!(output.contains("  skip: Skip this instance"));
    assert!(output.contains("Exiting labeling session."));
    assert!(output.contains("Labeling session complete."));
    assert!(output.contains("You have labeled 1/3 instances for metric 'labels'."));

    assert_eq!(
        summary,
        LabelingSummary {
            labeled_now: 1,
            skipped: 1,
            labeled_total: 1,
            total: 3,
            exited_early: false,
        }
    );

    let labeled = store.labeled_instances().unwrap();
    assert_eq!(labeled.len(), 1);
    assert_eq!(labeled[0].input, "question 0");
    assert_eq!(labeled[0].user_score, Some(0.8));
}

#[test]
fn gold_is_only_shown_when_present() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, 2);

    let (_, output) = run(&store, "skip\nskip\n");

    assert_eq!(output.matches("Gold:").count(), 1);
}

#[test]
fn end_of_input_ends_the_session() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, 2);

    let (summary, output) = run(&store, "0.3\n");

    assert!(summary.exited_early);
    assert_eq!(summary.labeled_now, 1);
    assert!(output.contains("You have labeled 1/2 instances for metric 'labels'."));
    assert_eq!(store.unlabeled_instances().unwrap().len(), 1);
}

#[test]
fn commands_are_case_insensitive() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, 3);

    let (summary, _) = run(&store, "SKIP\n  Exit  \n");

    assert_eq!(summary.skipped, 1);
    assert!(summary.exited_early);
    assert_eq!(summary.labeled_total, 0);
}

#[test]
fn labeled_instances_are_not_offered_again() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, 2);
    let (_, first) = run(&store, "1\n0\n");
    assert!(first.contains("Score 1.0 saved."));
    assert!(first.contains("Score 0.0 saved."));

    let (summary, output) = run(&store, "");

    assert!(output.contains("No unlabeled instances found."));
    assert_eq!(summary.labeled_total, 2);
}

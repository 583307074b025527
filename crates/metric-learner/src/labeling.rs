//! Interactive labeling of recorded instances.

use anyhow::Result;
use std::io::{BufRead, Write};
use tracing::warn;

use crate::{InstanceStore, format_score};

const HELP: &str = "Enter a score between 0 and 1, or one of the following commands:\n  \
skip: Skip this instance\n  \
exit: Exit the labeling session\n  \
help: Show this help message";

const PROMPT: &str = "\nYour score (0-1, skip, exit, help): ";

/// Outcome of one labeling session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelingSummary {
    /// Scores saved during this session.
    pub labeled_now: usize,
    pub skipped: usize,
    /// Labeled instances in the store after the session.
    pub labeled_total: usize,
    pub total: usize,
    /// The user left with `exit` (or end of input) before the last instance.
    pub exited_early: bool,
}

enum Command {
    Skip,
    Exit,
    Help,
    Score(f32),
    OutOfRange,
    Invalid,
}

fn parse_command(line: &str) -> Command {
    match line.trim().to_lowercase().as_str() {
        "skip" => Command::Skip,
        "exit" => Command::Exit,
        "help" => Command::Help,
        other => match other.parse::<f32>() {
            Ok(score) if (0.0..=1.0).contains(&score) => Command::Score(score),
            Ok(_) => Command::OutOfRange,
            Err(_) => Command::Invalid,
        },
    }
}

/// Walks the unlabeled instances of `store`, reading scores from `input`
/// and writing the dialogue to `output`.
///
/// End of input behaves like `exit`.
pub fn label_instances<R: BufRead, W: Write>(
    store: &InstanceStore,
    mut input: R,
    mut output: W,
) -> Result<LabelingSummary> {
    let unlabeled = store.unlabeled_instances()?;
    let mut summary = LabelingSummary::default();

    if unlabeled.is_empty() {
        writeln!(output, "No unlabeled instances found.")?;
        let stats = store.stats()?;
        summary.labeled_total = stats.labeled;
        summary.total = stats.total;
        return Ok(summary);
    }

    writeln!(
        output,
        "Found {} unlabeled instances for metric '{}'.",
        unlabeled.len(),
        store.metric_name()
    )?;
    writeln!(output, "{HELP}\n")?;

    let mut line = String::new();
    'instances: for (idx, instance) in unlabeled.iter().enumerate() {
        writeln!(output, "\n--- Instance {}/{} ---", idx + 1, unlabeled.len())?;
        writeln!(output, "Input: {}", instance.input)?;
        writeln!(output, "Prediction: {}", instance.prediction)?;
        if let Some(gold) = instance.gold.as_deref().filter(|g| !g.is_empty()) {
            writeln!(output, "Gold: {gold}")?;
        }
        if let Some(score) = instance.score {
            writeln!(output, "Model score: {}", format_score(score))?;
        }

        loop {
            write!(output, "{PROMPT}")?;
            output.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                writeln!(output)?;
                summary.exited_early = true;
                break 'instances;
            }

            match parse_command(&line) {
                Command::Skip => {
                    writeln!(output, "Skipping to next instance.")?;
                    summary.skipped += 1;
                    break;
                }
                Command::Exit => {
                    writeln!(output, "Exiting labeling session.")?;
                    summary.exited_early = idx + 1 < unlabeled.len();
                    break 'instances;
                }
                Command::Help => writeln!(output, "{HELP}")?,
                Command::Score(score) => {
                    match store.update_user_score(&instance.datetime, score) {
                        Ok(true) => {
                            writeln!(output, "Score {} saved.", format_score(score))?;
                            summary.labeled_now += 1;
                            break;
                        }
                        Ok(false) => writeln!(output, "Failed to save score. Please try again.")?,
                        Err(err) => {
                            warn!(error = %err, datetime = %instance.datetime, "failed to save score");
                            writeln!(output, "Failed to save score. Please try again.")?;
                        }
                    }
                }
                Command::OutOfRange => {
                    writeln!(output, "Score must be between 0 and 1. Please try again.")?
                }
                Command::Invalid => writeln!(
                    output,
                    "Invalid input. Please enter a number between 0 and 1, or 'skip', 'exit', or 'help'."
                )?,
            }
        }
    }

    let stats = store.stats()?;
    summary.labeled_total = stats.labeled;
    summary.total = stats.total;

    writeln!(output, "\nLabeling session complete.")?;
    writeln!(
        output,
        "You have labeled {}/{} instances for metric '{}'.",
        stats.labeled,
        stats.total,
        store.metric_name()
    )?;
    Ok(summary)
}

use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// How a single task invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Refused,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub task: String,
    pub start: Instant,
    pub duration: Duration,
    pub outcome: Outcome,
}

/// Execution record of one top-level run, in completion order.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub executions: Vec<TaskExecution>,
}

impl Diagnostics {
    /// Names of the tasks whose action was invoked, in completion order.
    pub fn invoked(&self) -> Vec<&str> {
        self.executions.iter().map(|e| e.task.as_str()).collect()
    }

    pub fn refused(&self) -> Vec<&str> {
        self.executions
            .iter()
            .filter(|e| e.outcome == Outcome::Refused)
            .map(|e| e.task.as_str())
            .collect()
    }

    pub fn total(&self) -> Duration {
        self.executions.iter().map(|e| e.duration).sum()
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let width = self
            .executions
            .iter()
            .map(|e| e.task.len())
            .max()
            .unwrap_or(0);

        for exec in &self.executions {
            let outcome = match exec.outcome {
                Outcome::Done => "done",
                Outcome::Refused => "refused",
                Outcome::Failed => "failed",
            };
            let duration = format!("{:.2?}", exec.duration);
            writeln!(f, "{:<width$}  {duration:>10}  {outcome}", exec.task)?;
        }

        write!(f, "{} task(s) in {:.2?}", self.executions.len(), self.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(task: &str, ms: u64, outcome: Outcome) -> TaskExecution {
        TaskExecution {
            task: task.into(),
            start: Instant::now(),
            duration: Duration::from_millis(ms),
            outcome,
        }
    }

    #[test]
    fn summary_lists_every_task() {
        let diagnostics = Diagnostics {
            executions: vec![
                exec("clean", 5, Outcome::Done),
                exec("upload", 1, Outcome::Refused),
            ],
        };

        let text = diagnostics.to_string();
        assert!(text.contains("clean"));
        assert!(text.contains("refused"));
        assert!(text.ends_with(&format!("2 task(s) in {:.2?}", Duration::from_millis(6))));
        assert_eq!(diagnostics.refused(), ["upload"]);
        assert_eq!(diagnostics.invoked(), ["clean", "upload"]);
    }
}

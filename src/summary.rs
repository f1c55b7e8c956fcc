use serde::Serialize;

use crate::sources::{Source, Task};

const CLOSED_STATE: &str = "Closed";

/// Headline counts shown above the task list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardSummary {
    /// Backlog items not yet closed.
    pub open_issues: usize,
    /// Everything that came from an analytics feed.
    pub alerts: usize,
}

impl DashboardSummary {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        tasks.iter().fold(Self::default(), |mut summary, task| {
            match task.source {
                Source::Ado if task.state != CLOSED_STATE => summary.open_issues += 1,
                Source::Ado => {}
                Source::IcM | Source::S360 => summary.alerts += 1,
            }
            summary
        })
    }
}

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::sources::ado::WorkItemService;
use crate::sources::kusto::{AnalyticsQueryService, AnalyticsRow};
use crate::sources::{FeedFailure, FeedResult, Source, Task};
use crate::template;

pub const SYNTHETIC_TASK_COUNT: usize = 5;
const SYNTHETIC_STATES: [&str; 3] = ["New", "Active", "Resolved"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    /// Local development without credentials; never calls upstream.
    Offline,
}

/// Per-feed query inputs. Empty strings switch the feed off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedQueries {
    pub backlog_query_id: String,
    pub icm_query: String,
    pub s360_query: String,
}

pub struct TaskAggregator {
    work_items: Option<WorkItemService>,
    analytics: Option<AnalyticsQueryService>,
    queries: FeedQueries,
    mode: Mode,
}

impl TaskAggregator {
    pub fn new(
        work_items: Option<WorkItemService>,
        analytics: Option<AnalyticsQueryService>,
        queries: FeedQueries,
        mode: Mode,
    ) -> Self {
        Self {
            work_items,
            analytics,
            queries,
            mode,
        }
    }

    /// Wire the REST clients and credentials described by `config`.
    pub fn from_config(config: &Config) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build();

        let work_items = config
            .ado
            .as_ref()
            .map(|ado| WorkItemService::new(ado, agent.clone()));
        let analytics = config
            .kusto
            .as_ref()
            .map(|kusto| AnalyticsQueryService::new(kusto, agent.clone()));

        let queries = FeedQueries {
            backlog_query_id: config
                .ado
                .as_ref()
                .and_then(|ado| ado.backlog_query_id.clone())
                .unwrap_or_default(),
            icm_query: config
                .kusto
                .as_ref()
                .map(|k| k.icm_query.clone())
                .unwrap_or_default(),
            s360_query: config
                .kusto
                .as_ref()
                .map(|k| k.s360_query.clone())
                .unwrap_or_default(),
        };

        let mode = if config.offline {
            Mode::Offline
        } else {
            Mode::Live
        };

        Self::new(work_items, analytics, queries, mode)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// All tasks for `service_tree`: backlog first, then IcM, then S360.
    ///
    /// Never fails. A feed that is unconfigured, cannot authenticate or
    /// exhausts its retries simply contributes nothing.
    pub fn fetch_all(&self, service_tree: &str) -> Vec<Task> {
        if self.mode == Mode::Offline {
            warn!("offline mode: returning synthetic tasks, no upstream was queried");
            return synthetic_tasks(&mut rand::thread_rng());
        }

        let backlog = collapse(Source::Ado, self.backlog_feed());
        let icm = collapse(
            Source::IcM,
            self.analytics_feed(&self.queries.icm_query, service_tree, Source::IcM),
        );
        let s360 = collapse(
            Source::S360,
            self.analytics_feed(&self.queries.s360_query, service_tree, Source::S360),
        );

        info!(
            service_tree,
            ado = backlog.len(),
            icm = icm.len(),
            s360 = s360.len(),
            "aggregated tasks"
        );

        let mut tasks = Vec::with_capacity(backlog.len() + icm.len() + s360.len());
        tasks.extend(backlog);
        tasks.extend(icm);
        tasks.extend(s360);
        tasks
    }

    fn backlog_feed(&self) -> FeedResult<Task> {
        let service = self.work_items.as_ref().ok_or(FeedFailure::Unconfigured)?;
        let items = service.fetch_backlog_items(&self.queries.backlog_query_id)?;

        Ok(items
            .into_iter()
            .map(|item| Task {
                id: item.id.to_string(),
                title: item.title().to_string(),
                state: item.state().to_string(),
                source: Source::Ado,
            })
            .collect())
    }

    fn analytics_feed(&self, query: &str, service_tree: &str, source: Source) -> FeedResult<Task> {
        if query.trim().is_empty() {
            return Err(FeedFailure::Unconfigured);
        }
        let service = self.analytics.as_ref().ok_or(FeedFailure::Unconfigured)?;

        let rendered = template::render_query(query, service_tree).map_err(|e| {
            warn!(feed = %source, error = %e, "invalid query template");
            FeedFailure::InvalidQuery
        })?;

        let rows = service.try_query(&rendered)?;

        // The feed tag wins over any Source column so tasks stay partitionable by feed.
        Ok(rows
            .iter()
            .map(AnalyticsRow::from_row)
            .map(|row| {
                if let Some(ref column) = row.source
                    && column != source.as_str()
                {
                    debug!(feed = %source, id = %row.id, %column, "row source column ignored");
                }
                Task {
                    id: row.id,
                    title: row.title,
                    state: row.state,
                    source,
                }
            })
            .collect())
    }
}

fn collapse(source: Source, result: FeedResult<Task>) -> Vec<Task> {
    match result {
        Ok(tasks) => tasks,
        Err(reason) => {
            debug!(feed = %source, %reason, "feed contributed no tasks");
            Vec::new()
        }
    }
}

/// Fixed-size list of made-up tasks for offline mode.
pub fn synthetic_tasks<R: Rng>(rng: &mut R) -> Vec<Task> {
    (1..=SYNTHETIC_TASK_COUNT)
        .map(|n| Task {
            id: format!("DEV-{n}"),
            title: format!("Sample task {n}"),
            state: SYNTHETIC_STATES[rng.gen_range(0..SYNTHETIC_STATES.len())].to_string(),
            source: Source::ALL[rng.gen_range(0..Source::ALL.len())],
        })
        .collect()
}

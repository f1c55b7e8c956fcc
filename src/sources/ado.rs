use serde::Deserialize;
use tracing::debug;

use crate::config::AdoConfig;
use crate::error::{Error, Result, remote};
use crate::identity::{
    AccessToken, CredentialSource, EnvTokenCredential, ManagedIdentityCredential, SystemClock,
    TokenProvider,
};
use crate::retry::RetryPolicy;

use super::{FeedFailure, FeedResult};

/// Well-known Azure DevOps resource.
const ADO_SCOPE: &str = "499b84ac-1321-427f-aa17-267ca6975798/.default";
const API_VERSION: &str = "7.0";

pub const AUTH_FAILURE_EVENT: &str = "ado_auth_failure";
pub const RETRY_EVENT: &str = "ado_request_retry";

const TITLE_FIELD: &str = "System.Title";
const STATE_FIELD: &str = "System.State";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WorkItemRef {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkItem {
    pub id: u64,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl WorkItem {
    fn text_field(&self, name: &str) -> &str {
        self.fields
            .get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }

    pub fn title(&self) -> &str {
        self.text_field(TITLE_FIELD)
    }

    pub fn state(&self) -> &str {
        self.text_field(STATE_FIELD)
    }
}

// ---------------------------------------------------------------------------
// Client abstraction (for testability)
// ---------------------------------------------------------------------------

pub trait WorkItemClient {
    /// Run a saved query and return the references it matched.
    fn query_by_id(
        &self,
        query_id: &str,
        project: &str,
        token: &AccessToken,
    ) -> Result<Vec<WorkItemRef>>;

    fn get_work_item(&self, id: u64, token: &AccessToken) -> Result<WorkItem>;
}

/// Azure DevOps work item tracking REST API.
pub struct RestWorkItemClient {
    agent: ureq::Agent,
    organization: String,
}

impl RestWorkItemClient {
    pub fn new(agent: ureq::Agent, organization: &str) -> Self {
        Self {
            agent,
            organization: organization.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResult {
    // tree and one-hop queries return workItemRelations instead
    #[serde(default)]
    work_items: Vec<WorkItemRef>,
}

impl WorkItemClient for RestWorkItemClient {
    fn query_by_id(
        &self,
        query_id: &str,
        project: &str,
        token: &AccessToken,
    ) -> Result<Vec<WorkItemRef>> {
        let url = format!("{}/{project}/_apis/wit/wiql/{query_id}", self.organization);
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &token.authorization_header())
            .query("api-version", API_VERSION)
            .call()
            .map_err(|e| remote("saved query request failed", e))?;

        let result: WiqlResult = response
            .into_json()
            .map_err(|e| Error::Decode(format!("failed to parse saved query result: {e}")))?;
        Ok(result.work_items)
    }

    fn get_work_item(&self, id: u64, token: &AccessToken) -> Result<WorkItem> {
        let url = format!("{}/_apis/wit/workitems/{id}", self.organization);
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &token.authorization_header())
            .query("api-version", API_VERSION)
            .call()
            .map_err(|e| remote("work item request failed", e))?;

        response
            .into_json()
            .map_err(|e| Error::Decode(format!("failed to parse work item {id}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// WorkItemService
// ---------------------------------------------------------------------------

pub struct WorkItemService {
    organization: String,
    project: String,
    tokens: TokenProvider,
    client: Box<dyn WorkItemClient>,
    retry: RetryPolicy,
}

impl WorkItemService {
    pub fn new(config: &AdoConfig, agent: ureq::Agent) -> Self {
        // A configured PAT takes precedence over managed identity.
        let credential: Box<dyn CredentialSource> = match config.token_env {
            Some(ref var) => Box::new(EnvTokenCredential::new(var.as_str())),
            None => Box::new(ManagedIdentityCredential::new(
                agent.clone(),
                config.client_id.clone(),
            )),
        };
        let tokens = TokenProvider::new(
            ADO_SCOPE,
            config.organization.as_str(),
            AUTH_FAILURE_EVENT,
            credential,
            Box::new(SystemClock),
        );

        Self::with_client(
            &config.organization,
            &config.project,
            tokens,
            Box::new(RestWorkItemClient::new(agent, &config.organization)),
            RetryPolicy::default(),
        )
    }

    pub fn with_client(
        organization: &str,
        project: &str,
        tokens: TokenProvider,
        client: Box<dyn WorkItemClient>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            organization: organization.to_string(),
            project: project.to_string(),
            tokens,
            client,
            retry,
        }
    }

    /// Resolve a saved query into hydrated work items, in query order.
    ///
    /// Items whose hydration fails after retries are skipped; only a failed
    /// query or a missing credential fails the whole feed.
    pub fn fetch_backlog_items(&self, query_id: &str) -> FeedResult<WorkItem> {
        if query_id.trim().is_empty() {
            return Err(FeedFailure::Unconfigured);
        }

        let token = self.tokens.get_token().ok_or(FeedFailure::Unauthenticated)?;

        let refs = self
            .retry
            .run(RETRY_EVENT, &self.organization, || {
                self.client.query_by_id(query_id, &self.project, &token)
            })
            .ok_or(FeedFailure::RetriesExhausted)?;

        let mut items = Vec::with_capacity(refs.len());
        for item_ref in &refs {
            match self.retry.run(RETRY_EVENT, &self.organization, || {
                self.client.get_work_item(item_ref.id, &token)
            }) {
                Some(item) => items.push(item),
                None => debug!(id = item_ref.id, "skipping work item that could not be fetched"),
            }
        }

        debug!(
            query_id,
            matched = refs.len(),
            fetched = items.len(),
            "fetched backlog items"
        );
        Ok(items)
    }

    pub fn get_backlog_items(&self, query_id: &str) -> Vec<WorkItem> {
        self.fetch_backlog_items(query_id).unwrap_or_default()
    }
}

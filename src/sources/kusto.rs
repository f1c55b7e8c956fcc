use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::KustoConfig;
use crate::error::{Error, Result, remote};
use crate::identity::{
    AccessToken, ClientSecretCredential, CredentialSource, ManagedIdentityCredential, SystemClock,
    TokenProvider,
};
use crate::retry::RetryPolicy;

use super::{FeedFailure, FeedResult};

pub const AUTH_FAILURE_EVENT: &str = "kusto_auth_failure";
pub const RETRY_EVENT: &str = "kusto_query_retry";

/// One result row keyed by column name.
pub type Row = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// v1 REST response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KustoResponse {
    #[serde(default)]
    pub tables: Vec<ResultTable>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultTable {
    #[serde(default)]
    pub table_name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Column {
    pub column_name: String,
    #[serde(default)]
    pub data_type: Option<String>,
}

impl ResultTable {
    pub fn into_rows(self) -> Vec<Row> {
        let names: Vec<String> = self.columns.into_iter().map(|c| c.column_name).collect();
        self.rows
            .into_iter()
            .map(|values| names.iter().cloned().zip(values).collect())
            .collect()
    }
}

impl KustoResponse {
    /// Rows of the primary (first) result table.
    pub fn primary_rows(self) -> Vec<Row> {
        self.tables
            .into_iter()
            .next()
            .map(ResultTable::into_rows)
            .unwrap_or_default()
    }
}

/// Typed view over a result row; missing columns fall back to empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsRow {
    pub id: String,
    pub title: String,
    pub state: String,
    pub source: Option<String>,
}

fn cell_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl AnalyticsRow {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: cell_text(row.get("Id")).unwrap_or_default(),
            title: cell_text(row.get("Title")).unwrap_or_default(),
            state: cell_text(row.get("State")).unwrap_or_default(),
            source: cell_text(row.get("Source")),
        }
    }
}

// ---------------------------------------------------------------------------
// Client abstraction (for testability)
// ---------------------------------------------------------------------------

pub trait KustoClient {
    fn execute(&self, database: &str, query: &str, token: &AccessToken) -> Result<KustoResponse>;
}

pub struct RestKustoClient {
    agent: ureq::Agent,
    cluster: String,
}

impl RestKustoClient {
    pub fn new(agent: ureq::Agent, cluster: &str) -> Self {
        Self {
            agent,
            cluster: cluster.trim_end_matches('/').to_string(),
        }
    }
}

impl KustoClient for RestKustoClient {
    fn execute(&self, database: &str, query: &str, token: &AccessToken) -> Result<KustoResponse> {
        let url = format!("{}/v1/rest/query", self.cluster);
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &token.authorization_header())
            .set("Accept", "application/json")
            .send_json(serde_json::json!({ "db": database, "csl": query }))
            .map_err(|e| remote("analytics query failed", e))?;

        response
            .into_json()
            .map_err(|e| Error::Decode(format!("failed to parse analytics response: {e}")))
    }
}

// ---------------------------------------------------------------------------
// AnalyticsQueryService
// ---------------------------------------------------------------------------

struct Endpoint {
    cluster: String,
    database: String,
    tokens: TokenProvider,
}

pub struct AnalyticsQueryService {
    endpoint: Option<Endpoint>,
    client: Box<dyn KustoClient>,
    retry: RetryPolicy,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Application key auth when its variables are configured, managed identity otherwise.
fn credential(config: &KustoConfig, agent: &ureq::Agent) -> Box<dyn CredentialSource> {
    match config.application_key() {
        Some(vars) => Box::new(ClientSecretCredential::new(
            agent.clone(),
            vars.client_id,
            vars.client_secret,
            vars.tenant_id,
        )),
        None => Box::new(ManagedIdentityCredential::new(
            agent.clone(),
            config.client_id.clone(),
        )),
    }
}

impl AnalyticsQueryService {
    pub fn new(config: &KustoConfig, agent: ureq::Agent) -> Self {
        let cluster = non_empty(config.cluster.as_deref())
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();
        let tokens = TokenProvider::new(
            format!("{cluster}/.default"),
            cluster.as_str(),
            AUTH_FAILURE_EVENT,
            credential(config, &agent),
            Box::new(SystemClock),
        );

        Self::with_client(
            config.cluster.as_deref(),
            config.database.as_deref(),
            tokens,
            Box::new(RestKustoClient::new(agent, &cluster)),
            RetryPolicy::default(),
        )
    }

    /// Without both a cluster and a database the service stays unconfigured
    /// and never touches `tokens` or `client`.
    pub fn with_client(
        cluster: Option<&str>,
        database: Option<&str>,
        tokens: TokenProvider,
        client: Box<dyn KustoClient>,
        retry: RetryPolicy,
    ) -> Self {
        let endpoint = match (non_empty(cluster), non_empty(database)) {
            (Some(cluster), Some(database)) => Some(Endpoint {
                cluster: cluster.to_string(),
                database: database.to_string(),
                tokens,
            }),
            _ => None,
        };
        Self {
            endpoint,
            client,
            retry,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Run `query` and return the primary table's rows in backend order.
    pub fn try_query(&self, query: &str) -> FeedResult<Row> {
        let endpoint = self.endpoint.as_ref().ok_or(FeedFailure::Unconfigured)?;
        let token = endpoint
            .tokens
            .get_token()
            .ok_or(FeedFailure::Unauthenticated)?;

        let response = self
            .retry
            .run(RETRY_EVENT, &endpoint.cluster, || {
                self.client.execute(&endpoint.database, query, &token)
            })
            .ok_or(FeedFailure::RetriesExhausted)?;

        let rows = response.primary_rows();
        debug!(
            database = %endpoint.database,
            rows = rows.len(),
            "analytics query returned"
        );
        Ok(rows)
    }

    pub fn query(&self, query: &str) -> Vec<Row> {
        self.try_query(query).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{instant_retry, token_provider};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct MockKustoClient {
        responses: RefCell<Vec<Result<KustoResponse>>>,
        calls: Rc<RefCell<Vec<(String, String)>>>,
    }

    impl MockKustoClient {
        fn new(responses: Vec<Result<KustoResponse>>) -> Self {
            Self {
                responses: RefCell::new(responses),
                calls: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    impl KustoClient for MockKustoClient {
        fn execute(
            &self,
            database: &str,
            query: &str,
            _token: &AccessToken,
        ) -> Result<KustoResponse> {
            self.calls
                .borrow_mut()
                .push((database.to_string(), query.to_string()));
            let mut responses = self.responses.borrow_mut();
            if responses.is_empty() {
                Err(Error::Remote("no more mock responses".to_string()))
            } else {
                responses.remove(0)
            }
        }
    }

    fn response(body: serde_json::Value) -> KustoResponse {
        serde_json::from_value(body).unwrap()
    }

    fn incidents() -> KustoResponse {
        response(serde_json::json!({
            "Tables": [
                {
                    "TableName": "Table_0",
                    "Columns": [
                        { "ColumnName": "Id", "DataType": "Int64", "ColumnType": "long" },
                        { "ColumnName": "Title", "DataType": "String", "ColumnType": "string" },
                        { "ColumnName": "State", "DataType": "String", "ColumnType": "string" }
                    ],
                    "Rows": [
                        [101, "Disk full", "Active"],
                        [102, "Cert expiring", "Mitigated"]
                    ]
                },
                {
                    "TableName": "Table_1",
                    "Columns": [{ "ColumnName": "Value", "DataType": "String" }],
                    "Rows": [["query stats"]]
                }
            ]
        }))
    }

    fn service(
        cluster: Option<&str>,
        database: Option<&str>,
        client: MockKustoClient,
        token_available: bool,
    ) -> (
        AnalyticsQueryService,
        Rc<RefCell<Vec<(String, String)>>>,
        Rc<std::cell::Cell<u32>>,
    ) {
        let calls = client.calls.clone();
        let (tokens, token_calls) = token_provider(token_available);
        let service = AnalyticsQueryService::with_client(
            cluster,
            database,
            tokens,
            Box::new(client),
            instant_retry(),
        );
        (service, calls, token_calls)
    }

    const CLUSTER: Option<&str> = Some("https://contoso.kusto.windows.net");
    const DATABASE: Option<&str> = Some("Ops");

    #[test]
    fn test_returns_primary_table_rows_in_order() {
        let client = MockKustoClient::new(vec![Ok(incidents())]);
        let (service, calls, _) = service(CLUSTER, DATABASE, client, true);
        let rows = service.query("Incidents | take 2");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Id"], serde_json::json!(101));
        assert_eq!(rows[1]["Title"], serde_json::json!("Cert expiring"));
        assert_eq!(
            *calls.borrow(),
            vec![("Ops".to_string(), "Incidents | take 2".to_string())]
        );
    }

    #[test]
    fn test_retries_then_succeeds() {
        let client = MockKustoClient::new(vec![
            Err(Error::Remote("HTTP 429".to_string())),
            Err(Error::Remote("HTTP 503".to_string())),
            Ok(incidents()),
        ]);
        let (service, calls, _) = service(CLUSTER, DATABASE, client, true);
        assert_eq!(service.query("q").len(), 2);
        assert_eq!(calls.borrow().len(), 3);
    }

    #[test]
    fn test_retries_exhausted() {
        let client = MockKustoClient::new(vec![]);
        let (service, calls, _) = service(CLUSTER, DATABASE, client, true);
        assert_eq!(service.try_query("q"), Err(FeedFailure::RetriesExhausted));
        assert_eq!(calls.borrow().len(), 3);
    }

    #[test]
    fn test_unconfigured_makes_no_calls() {
        for (cluster, database) in [(None, DATABASE), (CLUSTER, None), (Some(" "), DATABASE)] {
            let client = MockKustoClient::new(vec![Ok(incidents())]);
            let (service, calls, token_calls) = service(cluster, database, client, true);
            assert!(!service.is_configured());
            assert_eq!(service.try_query("q"), Err(FeedFailure::Unconfigured));
            assert!(calls.borrow().is_empty());
            assert_eq!(token_calls.get(), 0);
        }
    }

    #[test]
    fn test_auth_failure_is_not_retried() {
        let client = MockKustoClient::new(vec![Ok(incidents())]);
        let (service, calls, token_calls) = service(CLUSTER, DATABASE, client, false);
        assert_eq!(service.try_query("q"), Err(FeedFailure::Unauthenticated));
        assert!(calls.borrow().is_empty());
        assert_eq!(token_calls.get(), 1);
    }

    #[test]
    fn test_no_tables_yields_no_rows() {
        let client = MockKustoClient::new(vec![Ok(KustoResponse::default())]);
        let (service, _, _) = service(CLUSTER, DATABASE, client, true);
        assert_eq!(service.try_query("q"), Ok(vec![]));
    }

    #[test]
    fn test_analytics_row_defaults() {
        let rows = incidents().primary_rows();
        let row = AnalyticsRow::from_row(&rows[0]);
        assert_eq!(
            row,
            AnalyticsRow {
                id: "101".to_string(),
                title: "Disk full".to_string(),
                state: "Active".to_string(),
                source: None,
            }
        );

        let sparse: Row = serde_json::from_value(serde_json::json!({
            "Id": "INC-9",
            "Title": null,
            "Source": "S360"
        }))
        .unwrap();
        let row = AnalyticsRow::from_row(&sparse);
        assert_eq!(row.id, "INC-9");
        assert_eq!(row.title, "");
        assert_eq!(row.state, "");
        assert_eq!(row.source.as_deref(), Some("S360"));
    }

    #[test]
    fn test_short_row_drops_missing_cells() {
        let table = ResultTable {
            table_name: "Table_0".to_string(),
            columns: vec![
                Column {
                    column_name: "Id".to_string(),
                    data_type: None,
                },
                Column {
                    column_name: "Title".to_string(),
                    data_type: None,
                },
            ],
            rows: vec![vec![serde_json::json!(1)]],
        };
        let rows = table.into_rows();
        assert_eq!(rows[0].len(), 1);
        assert_eq!(AnalyticsRow::from_row(&rows[0]).title, "");
    }

    #[test]
    fn test_application_key_without_env_is_unauthenticated() {
        let config = KustoConfig {
            cluster: Some("https://contoso.kusto.windows.net".to_string()),
            database: Some("Ops".to_string()),
            client_id_env: Some("DEVDASH_UNSET_KUSTO_CLIENT_ID".to_string()),
            client_secret_env: Some("DEVDASH_UNSET_KUSTO_CLIENT_SECRET".to_string()),
            tenant_id_env: Some("DEVDASH_UNSET_KUSTO_TENANT_ID".to_string()),
            ..KustoConfig::default()
        };
        let service = AnalyticsQueryService::new(&config, ureq::Agent::new());

        assert!(service.is_configured());
        assert_eq!(
            service.try_query("Incidents | take 1"),
            Err(FeedFailure::Unauthenticated)
        );
    }
}

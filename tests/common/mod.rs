#![allow(dead_code)]

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use devdash::error::{Error, Result};
use devdash::identity::AccessToken;
use devdash::sources::ado::{WorkItem, WorkItemClient, WorkItemRef};
use devdash::sources::kusto::{KustoClient, KustoResponse};

pub type CallLog = Rc<RefCell<Vec<String>>>;

/// Write `content` as a config file in a fresh temp dir.
pub fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("devdash.toml");
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

/// Backlog fake: every reference hydrates unless listed in `broken`.
pub struct FakeBacklog {
    pub ids: Vec<u64>,
    pub broken: Vec<u64>,
    pub log: CallLog,
}

impl WorkItemClient for FakeBacklog {
    fn query_by_id(
        &self,
        query_id: &str,
        _project: &str,
        _token: &AccessToken,
    ) -> Result<Vec<WorkItemRef>> {
        self.log.borrow_mut().push(format!("query:{query_id}"));
        Ok(self.ids.iter().map(|&id| WorkItemRef { id }).collect())
    }

    fn get_work_item(&self, id: u64, _token: &AccessToken) -> Result<WorkItem> {
        self.log.borrow_mut().push(format!("item:{id}"));
        if self.broken.contains(&id) {
            return Err(Error::Remote(format!("HTTP 500 for work item {id}")));
        }
        Ok(serde_json::from_value(serde_json::json!({
            "id": id,
            "fields": {
                "System.Title": format!("Work item {id}"),
                "System.State": if id % 2 == 0 { "Closed" } else { "Active" }
            }
        }))
        .unwrap())
    }
}

/// Analytics fake: returns `rows` rows for any query containing `needle`.
pub struct FakeAnalytics {
    pub answers: Vec<(&'static str, usize)>,
    pub log: CallLog,
}

impl KustoClient for FakeAnalytics {
    fn execute(&self, _database: &str, query: &str, _token: &AccessToken) -> Result<KustoResponse> {
        self.log.borrow_mut().push(format!("execute:{query}"));
        let rows = self
            .answers
            .iter()
            .find(|(needle, _)| query.contains(needle))
            .map(|(_, rows)| *rows)
            .ok_or_else(|| Error::Remote("HTTP 400 bad query".to_string()))?;

        let rows: Vec<serde_json::Value> = (0..rows)
            .map(|n| serde_json::json!([n, format!("Alert {n}"), "Active"]))
            .collect();
        Ok(serde_json::from_value(serde_json::json!({
            "Tables": [{
                "TableName": "Table_0",
                "Columns": [
                    { "ColumnName": "Id", "DataType": "Int64" },
                    { "ColumnName": "Title", "DataType": "String" },
                    { "ColumnName": "State", "DataType": "String" }
                ],
                "Rows": rows
            }]
        }))
        .unwrap())
    }
}

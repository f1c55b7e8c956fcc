use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use crate::error::{Error, Result};
use crate::identity::{AccessToken, CredentialSource, SystemClock, TokenProvider};
use crate::retry::{MAX_ATTEMPTS, RetryPolicy};
use crate::sources::{Source, Task};

/// Credential that either always succeeds with a one-hour token or always fails.
pub struct StaticCredential {
    available: bool,
    calls: Rc<Cell<u32>>,
}

impl CredentialSource for StaticCredential {
    fn get_token(&self, scope: &str) -> Result<AccessToken> {
        self.calls.set(self.calls.get() + 1);
        if self.available {
            Ok(AccessToken::bearer(
                format!("token-for-{scope}"),
                SystemTime::now() + Duration::from_secs(3600),
            ))
        } else {
            Err(Error::Auth("no managed identity available".to_string()))
        }
    }
}

/// A provider backed by `StaticCredential`, plus its call counter.
pub fn token_provider(available: bool) -> (TokenProvider, Rc<Cell<u32>>) {
    let calls = Rc::new(Cell::new(0));
    let provider = TokenProvider::new(
        "https://test.example/.default",
        "https://test.example",
        "test_auth_failure",
        Box::new(StaticCredential {
            available,
            calls: calls.clone(),
        }),
        Box::new(SystemClock),
    );
    (provider, calls)
}

/// Default attempt count without the sleeps.
pub fn instant_retry() -> RetryPolicy {
    RetryPolicy::new(MAX_ATTEMPTS, Duration::ZERO)
}

pub fn make_task(id: &str, source: Source, state: &str) -> Task {
    Task {
        id: id.to_string(),
        title: format!("{id} title"),
        state: state.to_string(),
        source,
    }
}

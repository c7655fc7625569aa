//! The request client interface the scrape engine sees (spec.md §6): a
//! three-method abstraction over whatever session/signing scheme a concrete
//! upstream needs. Grounded on the teacher crate's `ScrapeClient`-shaped
//! trait usage in `handlers/` (a thin `async_trait` boundary around
//! `reqwest`), generalized here to the login/logout/do_request shape
//! spec.md names. Concrete signed-request and cookie-jar session
//! implementations are out of scope for this crate (SPEC_FULL.md §11); only
//! the trait and a single illustrative test fixture are implemented.

use async_trait::async_trait;

use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[async_trait]
pub trait ScrapeClient: Send + Sync {
    async fn login(&self) -> EngineResult<()>;
    async fn logout(&self) -> EngineResult<()>;
    async fn do_request(&self, method: HttpMethod, url: &str, body: Option<&str>) -> EngineResult<String>;
}

/// A fixed request/response table, used by integration tests to drive the
/// scrape engine against canned fabric-controller-shaped JSON without a
/// network dependency.
pub struct StaticSessionClient {
    responses: std::collections::HashMap<String, String>,
}

impl StaticSessionClient {
    pub fn new(responses: std::collections::HashMap<String, String>) -> Self {
        StaticSessionClient { responses }
    }
}

#[async_trait]
impl ScrapeClient for StaticSessionClient {
    async fn login(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn logout(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn do_request(&self, _method: HttpMethod, url: &str, _body: Option<&str>) -> EngineResult<String> {
        self.responses.get(url).cloned().ok_or_else(|| crate::error::EngineError::ResponseMalformed {
            url: url.to_string(),
            detail: "no canned response configured for this URL".to_string(),
        })
    }
}

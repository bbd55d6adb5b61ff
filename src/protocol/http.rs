//! reqwest-backed OAI-PMH client

use super::{ListRequest, OaiClient, Page, Record, RecordHeader, xml};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// OAI-PMH client speaking HTTP GET to one endpoint
#[derive(Clone, Debug)]
pub struct HttpOaiClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpOaiClient {
    /// Create a client for `endpoint`, applying `timeout` to every request
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("oaipmh-dl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, endpoint })
    }

    /// Endpoint this client talks to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Build the request URL for a listing verb
    pub fn listing_url(&self, verb: &str, request: &ListRequest) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("verb", verb);
            match request {
                ListRequest::Initial {
                    metadata_prefix,
                    set,
                    from,
                } => {
                    if let Some(prefix) = metadata_prefix {
                        query.append_pair("metadataPrefix", prefix);
                    }
                    if let Some(from) = from.as_deref().filter(|f| !f.is_empty()) {
                        query.append_pair("from", from);
                    }
                    if let Some(set) = set {
                        query.append_pair("set", set);
                    }
                }
                ListRequest::Resume { token } => {
                    query.append_pair("resumptionToken", token);
                }
            }
        }
        url
    }

    async fn fetch(&self, url: Url) -> Result<String> {
        tracing::debug!(url = %url, "OAI-PMH request");
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = status.as_u16(), "OAI-PMH request failed");
            return Err(Error::Server {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl OaiClient for HttpOaiClient {
    async fn list_sets(&self, request: ListRequest) -> Result<Page<String>> {
        let body = self.fetch(self.listing_url("ListSets", &request)).await?;
        xml::parse_list_sets(&body)
    }

    async fn list_records(&self, request: ListRequest) -> Result<Page<Record>> {
        let body = self.fetch(self.listing_url("ListRecords", &request)).await?;
        xml::parse_list_records(&body)
    }

    async fn list_identifiers(&self, request: ListRequest) -> Result<Page<RecordHeader>> {
        let body = self
            .fetch(self.listing_url("ListIdentifiers", &request))
            .await?;
        xml::parse_list_identifiers(&body)
    }

    async fn get_record(&self, identifier: &str, metadata_prefix: &str) -> Result<Record> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("verb", "GetRecord")
            .append_pair("identifier", identifier)
            .append_pair("metadataPrefix", metadata_prefix);
        let body = self.fetch(url).await?;
        xml::parse_get_record(&body)
    }
}

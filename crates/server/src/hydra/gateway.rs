//! Typed wrapper over Hydra's consent-request API.

use crate::error::{ConsentError, UpstreamOperation};
use crate::hydra::token::TokenSupplier;
use crate::hydra::types::{AcceptConsentRequest, ConsentRequest, RejectConsentRequest};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use url::Url;

/// Maps a response status onto the accepted `[200, 400)` range.
fn check_status(status: StatusCode) -> Result<(), String> {
    if (200..400).contains(&status.as_u16()) {
        Ok(())
    } else {
        Err(format!(
            "Consent endpoint gave status code {}, but status code 200 was expected.",
            status.as_u16()
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ConsentGateway {
    http: reqwest::Client,
    base_url: Url,
    tokens: TokenSupplier,
}

impl ConsentGateway {
    pub fn new(
        http: reqwest::Client,
        hydra_url: &str,
        tokens: TokenSupplier,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            http,
            base_url: super::base_url(hydra_url)?,
            tokens,
        })
    }

    fn consent_url(&self, id: &str, action: Option<&str>) -> Result<Url, ConsentError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ConsentError::validation(Some(id), "hydra url cannot be used as a base")
            })?;
            segments
                .pop_if_empty()
                .extend(["oauth2", "consent", "requests", id]);
            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    /// Attach the service token, send, and validate the status. Every
    /// consent API call goes through here.
    async fn send(
        &self,
        id: &str,
        operation: UpstreamOperation,
        request: RequestBuilder,
    ) -> Result<Response, ConsentError> {
        let token = self
            .tokens
            .acquire()
            .await
            .map_err(|e| ConsentError::from_token_error(Some(id), &e))?;

        let response = request
            .bearer_auth(token.value())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(consent = %id, %operation, error = %e, "hydra request failed");
                ConsentError::upstream(Some(id), operation, e.without_url().to_string())
            })?;

        check_status(response.status()).map_err(|message| {
            tracing::error!(consent = %id, %operation, status = response.status().as_u16(), "hydra returned an error status");
            ConsentError::upstream(Some(id), operation, message)
        })?;
        Ok(response)
    }

    async fn patch<B: Serialize>(
        &self,
        id: &str,
        operation: UpstreamOperation,
        action: &str,
        body: &B,
    ) -> Result<(), ConsentError> {
        let url = self.consent_url(id, Some(action))?;
        self.send(id, operation, self.http.request(Method::PATCH, url).json(body))
            .await?;
        Ok(())
    }

    #[tracing::instrument(name = "hydra_fetch_consent", skip(self), fields(consent = %id))]
    pub async fn fetch(&self, id: &str) -> Result<ConsentRequest, ConsentError> {
        let url = self.consent_url(id, None)?;
        let response = self
            .send(id, UpstreamOperation::Fetch, self.http.get(url))
            .await?;
        let request: ConsentRequest = response.json().await.map_err(|e| {
            ConsentError::upstream(
                Some(id),
                UpstreamOperation::Fetch,
                format!("malformed consent request: {}", e.without_url()),
            )
        })?;
        tracing::debug!(
            client_id = %request.client_id,
            requested_scopes = ?request.requested_scopes,
            "fetched consent request"
        );
        Ok(request)
    }

    #[tracing::instrument(
        name = "hydra_accept_consent",
        skip(self, body),
        fields(consent = %id, subject = %body.subject, grant_scopes = ?body.grant_scopes)
    )]
    pub async fn accept(&self, id: &str, body: &AcceptConsentRequest) -> Result<(), ConsentError> {
        self.patch(id, UpstreamOperation::Accept, "accept", body)
            .await?;
        tracing::debug!("consent request accepted");
        Ok(())
    }

    #[tracing::instrument(name = "hydra_reject_consent", skip(self), fields(consent = %id))]
    pub async fn reject(&self, id: &str, reason: &str) -> Result<(), ConsentError> {
        let body = RejectConsentRequest {
            reason: reason.to_string(),
        };
        self.patch(id, UpstreamOperation::Reject, "reject", &body)
            .await?;
        tracing::debug!("consent request rejected");
        Ok(())
    }
}

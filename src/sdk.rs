//! # SDK client
//!
//! A thin async client over the control plane's HTTP surface (§4.16,
//! SPEC_FULL), grounded in
//! `original_source/sdk/include/praas/sdk/praas.hpp`'s `PraaSContext`/
//! `Process` facade: one call per REST endpoint in spec.md §6, nothing
//! more. Not a general-purpose SDK crate (that's out of scope, see
//! DESIGN.md) — it exists so integration tests and the demo flows can
//! drive the control plane without hand-rolling HTTP calls.

use serde::{Deserialize, Serialize};

use crate::control_plane::resources::Resources;
use crate::error::PraasError;

/// A handle to one control plane's HTTP endpoint, e.g. `http://127.0.0.1:8080`.
pub struct PraasClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct CreateAppBody<'a> {
    cloud_resource_name: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    reason: String,
}

#[derive(Deserialize)]
pub struct CreateProcessResponse {
    pub ip: String,
    pub port: u16,
}

#[derive(Deserialize)]
pub struct SwapProcessResponse {
    pub swap_size: i32,
    pub swap_time_ms: f64,
}

#[derive(Deserialize)]
pub struct ListProcessesResponse {
    pub active: Vec<String>,
    pub swapped: Vec<String>,
}

#[derive(Deserialize)]
pub struct InvocationResponse {
    pub function: String,
    pub return_code: i32,
    pub result: Vec<u8>,
}

impl PraasClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        PraasClient {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Turns a non-2xx response into a [`PraasError`], reading the
    /// standard `{reason}` envelope (§4.15) when present.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, PraasError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let reason = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.reason)
            .unwrap_or_else(|_| status.to_string());
        Err(match status.as_u16() {
            404 => PraasError::ObjectDoesNotExist(reason),
            409 => PraasError::ObjectExists(reason),
            400 => PraasError::InvalidArgument(reason),
            _ => PraasError::FailedAllocation(reason),
        })
    }

    pub async fn create_application(&self, name: &str, cloud_resource_name: &str) -> Result<(), PraasError> {
        let response = self
            .http
            .post(format!("{}/create_app", self.base_url))
            .query(&[("name", name)])
            .json(&CreateAppBody { cloud_resource_name })
            .send()
            .await
            .map_err(|e| PraasError::FailedAllocation(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    pub async fn delete_application(&self, name: &str) -> Result<(), PraasError> {
        let response = self
            .http
            .post(format!("{}/delete_app", self.base_url))
            .query(&[("name", name)])
            .send()
            .await
            .map_err(|e| PraasError::FailedAllocation(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    pub async fn create_process(
        &self,
        app: &str,
        name: &str,
        resources: Resources,
    ) -> Result<CreateProcessResponse, PraasError> {
        let response = self
            .http
            .post(format!("{}/create_process", self.base_url))
            .query(&[("app", app), ("name", name)])
            .json(&resources)
            .send()
            .await
            .map_err(|e| PraasError::FailedAllocation(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| PraasError::InvalidMessage(e.to_string()))
    }

    pub async fn stop_process(&self, app: &str, name: &str) -> Result<(), PraasError> {
        let response = self
            .http
            .post(format!("{}/stop_process", self.base_url))
            .query(&[("app", app), ("name", name)])
            .send()
            .await
            .map_err(|e| PraasError::FailedAllocation(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    pub async fn swap_process(&self, app: &str, name: &str) -> Result<SwapProcessResponse, PraasError> {
        let response = self
            .http
            .post(format!("{}/swap_process", self.base_url))
            .query(&[("app", app), ("name", name)])
            .send()
            .await
            .map_err(|e| PraasError::FailedAllocation(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| PraasError::InvalidMessage(e.to_string()))
    }

    pub async fn delete_process(&self, app: &str, name: &str) -> Result<(), PraasError> {
        let response = self
            .http
            .post(format!("{}/delete_process", self.base_url))
            .query(&[("app", app), ("name", name)])
            .send()
            .await
            .map_err(|e| PraasError::FailedAllocation(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    pub async fn list_processes(&self, app: &str) -> Result<ListProcessesResponse, PraasError> {
        let response = self
            .http
            .post(format!("{}/list_processes", self.base_url))
            .query(&[("app", app)])
            .send()
            .await
            .map_err(|e| PraasError::FailedAllocation(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| PraasError::InvalidMessage(e.to_string()))
    }

    pub async fn invoke(&self, app: &str, function_name: &str, payload: Vec<u8>) -> Result<InvocationResponse, PraasError> {
        let response = self
            .http
            .post(format!("{}/invoke/{}/{}", self.base_url, app, function_name))
            .body(payload)
            .send()
            .await
            .map_err(|e| PraasError::FailedAllocation(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| PraasError::InvalidMessage(e.to_string()))
    }
}

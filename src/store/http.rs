use crate::store::{StoreError, TerritoryStore};
use crate::territory::{NewTerritory, Team, Territory, TerritoryId, TerritoryPatch};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

/// REST client for `/territories` and `/teams`
pub struct HttpStore {
    client: Client,
    base_url: String,
}

impl HttpStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .user_agent(concat!("turf-map/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn territory_url(&self, id: &TerritoryId) -> String {
        self.url(&format!("/territories/{id}"))
    }
}

/// Map non-success statuses to errors; 404 becomes `NotFound` when an id is known
fn check(response: Response, id: Option<&TerritoryId>) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if let (StatusCode::NOT_FOUND, Some(id)) = (status, id) {
        return Err(StoreError::NotFound(id.clone()));
    }
    let body = response.text().unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}

/// Decode a JSON body with simd-json; list bodies can be large
fn decode_body<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    let mut bytes = response.bytes()?.to_vec();
    simd_json::serde::from_slice(&mut bytes).map_err(|e| StoreError::Decode(e.to_string()))
}

impl TerritoryStore for HttpStore {
    fn list(&self) -> Result<Vec<Territory>, StoreError> {
        let response = self.client.get(self.url("/territories")).send()?;
        let territories: Vec<Territory> = decode_body(check(response, None)?)?;
        debug!(count = territories.len(), "listed territories");
        Ok(territories)
    }

    fn create(&self, body: &NewTerritory) -> Result<Territory, StoreError> {
        let response = self.client.post(self.url("/territories")).json(body).send()?;
        decode_body(check(response, None)?)
    }

    fn update(&self, id: &TerritoryId, patch: &TerritoryPatch) -> Result<Territory, StoreError> {
        let response = self.client.put(self.territory_url(id)).json(patch).send()?;
        decode_body(check(response, Some(id))?)
    }

    fn delete(&self, id: &TerritoryId) -> Result<(), StoreError> {
        let response = self.client.delete(self.territory_url(id)).send()?;
        check(response, Some(id))?;
        Ok(())
    }

    fn teams(&self) -> Result<Vec<Team>, StoreError> {
        let response = self.client.get(self.url("/teams")).send()?;
        decode_body(check(response, None)?)
    }
}

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, header};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    dao::remote_store::{RemoteStore, StoreError, StoreResult},
    dto::board::{BoardStateEnvelope, PersistBoardRequest, PersistCombatRequest, PersistResponse},
    state::{SceneId, board::BoardSnapshot, combat::CombatState, identity::SnapshotMetadata},
};

const BOARD_PATH: &str = "board-state";
const COMBAT_PATH: &str = "combat-state";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`RemoteStore`] speaking the relay's JSON protocol over HTTP.
#[derive(Clone)]
pub struct HttpBoardStore {
    client: Client,
    base_url: Arc<str>,
}

impl HttpBoardStore {
    /// Build a client for the relay rooted at `endpoint`.
    pub fn new(endpoint: &str) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| StoreError::RequestSend {
                path: endpoint.to_string(),
                source: Box::new(source),
            })?;

        Ok(Self {
            client,
            base_url: Arc::from(endpoint.trim_end_matches('/')),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        self.client.request(method, url)
    }

    async fn get_json<T>(&self, path: &str) -> StoreResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, path)
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|source| StoreError::RequestSend {
                path: path.to_string(),
                source: Box::new(source),
            })?;

        if !response.status().is_success() {
            return Err(StoreError::RequestStatus {
                path: path.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| StoreError::DecodeResponse {
                path: path.to_string(),
                source: Box::new(source),
            })
    }

    async fn post_json<B>(&self, path: &str, body: &B) -> StoreResult<()>
    where
        B: ?Sized + Serialize,
    {
        let response = self
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(|source| StoreError::RequestSend {
                path: path.to_string(),
                source: Box::new(source),
            })?;

        if !response.status().is_success() {
            return Err(StoreError::RequestStatus {
                path: path.to_string(),
                status: response.status().as_u16(),
            });
        }

        let ack = response
            .json::<PersistResponse>()
            .await
            .map_err(|source| StoreError::DecodeResponse {
                path: path.to_string(),
                source: Box::new(source),
            })?;
        if ack.success {
            Ok(())
        } else {
            Err(StoreError::Rejected {
                message: ack.error.unwrap_or_else(|| "unknown error".into()),
            })
        }
    }
}

impl RemoteStore for HttpBoardStore {
    fn fetch(&self) -> BoxFuture<'static, StoreResult<Option<BoardSnapshot>>> {
        let store = self.clone();
        Box::pin(async move {
            let envelope = store.get_json::<BoardStateEnvelope>(BOARD_PATH).await?;
            Ok(envelope.data.board_state)
        })
    }

    fn persist(
        &self,
        board: BoardSnapshot,
        metadata: SnapshotMetadata,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let body = PersistBoardRequest {
                board_state: board,
                metadata,
            };
            store.post_json(BOARD_PATH, &body).await
        })
    }

    fn persist_combat(
        &self,
        scene_id: SceneId,
        combat: CombatState,
        metadata: SnapshotMetadata,
    ) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let body = PersistCombatRequest {
                scene_id,
                combat,
                metadata,
            };
            store.post_json(COMBAT_PATH, &body).await
        })
    }
}

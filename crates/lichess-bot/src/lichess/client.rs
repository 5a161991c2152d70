use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, Response};
use shakmaty::uci::UciMove;

use super::events::{GameStreamEvent, IncomingEvent};
use super::ndjson::decode_ndjson;
use super::{EventStream, GameService};
use crate::error::TransportError;
use crate::game::MoveSink;

/// Bearer トークン付きの HTTP クライアント。clone は内部の接続プールを共有する。
#[derive(Clone)]
pub struct LichessClient {
    http: Client,
    base_url: String,
    token: String,
}

impl LichessClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent(concat!("lichess-bot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_stream(&self, path: &str) -> Result<Response, TransportError> {
        debug!("GET {path}");
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        check_status(path, response).await
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<(), TransportError> {
        debug!("POST {path}");
        let mut request = self.http.post(self.url(path)).bearer_auth(&self.token);
        if !form.is_empty() {
            request = request.form(form);
        }
        let response = request.send().await?;
        check_status(path, response).await.map(drop)
    }
}

async fn check_status(endpoint: &str, response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl GameService for LichessClient {
    async fn incoming_events(&self) -> Result<EventStream<IncomingEvent>, TransportError> {
        let response = self.get_stream("/api/stream/event").await?;
        Ok(decode_ndjson(response.bytes_stream(), "event stream"))
    }

    async fn game_events(
        &self,
        game_id: &str,
    ) -> Result<EventStream<GameStreamEvent>, TransportError> {
        let response = self
            .get_stream(&format!("/api/bot/game/stream/{game_id}"))
            .await?;
        Ok(decode_ndjson(response.bytes_stream(), format!("game {game_id}")))
    }

    async fn make_move(&self, game_id: &str, mv: &UciMove) -> Result<(), TransportError> {
        self.post(&format!("/api/bot/game/{game_id}/move/{mv}"), &[])
            .await
    }

    async fn accept_challenge(&self, challenge_id: &str) -> Result<(), TransportError> {
        self.post(&format!("/api/challenge/{challenge_id}/accept"), &[])
            .await
    }

    async fn decline_challenge(
        &self,
        challenge_id: &str,
        reason: &str,
    ) -> Result<(), TransportError> {
        self.post(
            &format!("/api/challenge/{challenge_id}/decline"),
            &[("reason", reason)],
        )
        .await
    }

    async fn upgrade_to_bot(&self) -> Result<(), TransportError> {
        self.post("/api/bot/account/upgrade", &[]).await
    }
}

impl MoveSink for LichessClient {
    fn submit(&self, game_id: &str, mv: &UciMove) {
        let client = self.clone();
        let game_id = game_id.to_string();
        let mv = mv.clone();
        tokio::spawn(async move {
            if let Err(e) = client.make_move(&game_id, &mv).await {
                warn!("game {game_id}: move {mv} was not accepted: {e}");
            }
        });
    }
}

use async_trait::async_trait;

use tutor_shared::clients::backend::BackendClient;
use tutor_shared::types::IceServer;
use tutor_shared::AppError;

/// The slice of the backend the call needs: room lifecycle and ICE servers.
#[async_trait]
pub trait RoomsApi: Send + Sync {
    /// Create a room for the pair and return its id.
    async fn create_room(&self, user_id: &str, companion_id: &str) -> Result<String, AppError>;

    async fn delete_room(&self, room_id: &str) -> Result<(), AppError>;

    /// Never fails; falls back to a public STUN server.
    async fn ice_servers(&self) -> Vec<IceServer>;
}

#[async_trait]
impl RoomsApi for BackendClient {
    async fn create_room(&self, user_id: &str, companion_id: &str) -> Result<String, AppError> {
        let created = BackendClient::create_room(self, user_id, companion_id).await?;
        if created.turn_config.is_some() {
            tracing::debug!(room_id = %created.room_id, "room response carried a TURN config");
        }
        Ok(created.room_id)
    }

    async fn delete_room(&self, room_id: &str) -> Result<(), AppError> {
        BackendClient::delete_room(self, room_id).await
    }

    async fn ice_servers(&self) -> Vec<IceServer> {
        BackendClient::ice_servers(self).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::routing::{delete, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;

    async fn spawn_backend() -> String {
        let app = Router::new()
            .route(
                "/api/video/rooms",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({"room_id": format!("room-{}", body["companion_id"].as_str().unwrap_or("")), "turn_config": null}))
                }),
            )
            .route("/api/video/rooms/:id", delete(|| async { Json(json!({"message": "Room deleted"})) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn backend_client_implements_rooms_api() {
        let base = spawn_backend().await;
        let client = BackendClient::new(&base, Duration::from_secs(5)).unwrap();
        let rooms: &dyn RoomsApi = &client;

        let room_id = rooms.create_room("u1", "tutor-7").await.unwrap();
        assert_eq!(room_id, "room-tutor-7");
        rooms.delete_room(&room_id).await.unwrap();
    }
}

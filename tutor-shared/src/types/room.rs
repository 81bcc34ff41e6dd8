use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub user_id: String,
    pub companion_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub room_id: String,
    /// ICE configuration piggy-backed on room creation.
    #[serde(default)]
    pub turn_config: Option<super::WebRtcConfig>,
}

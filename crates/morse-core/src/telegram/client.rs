use std::time::Duration;

use async_trait::async_trait;

use crate::peer::PeerId;
use crate::Result;

use super::types::*;

/// The wrapped Telegram client library.
///
/// Requests are fire-and-forget: results come back later as
/// [`TelegramEvent`]s on the channel the adapter was built with. The
/// synchronous getters read the library's local cache.
#[async_trait]
pub trait TelegramClient: Send + Sync {
    fn connection_state(&self) -> ClientState;
    fn self_id(&self) -> u32;
    fn set_keepalive_interval(&self, interval: Duration);

    async fn init_connection(&self, dc: &DcOption) -> Result<()>;
    async fn restore_connection(&self, session: &SessionBlobs) -> Result<()>;
    async fn close_connection(&self) -> Result<()>;
    fn export_session(&self) -> SessionBlobs;

    async fn request_phone_code(&self, phone: &str) -> Result<()>;
    async fn sign_in(&self, phone: &str, code: &str) -> Result<()>;
    async fn request_password_info(&self) -> Result<()>;
    async fn try_password(&self, password: &[u8]) -> Result<()>;

    async fn set_online_status(&self, online: bool) -> Result<()>;

    fn contact_list(&self) -> Vec<u32>;
    fn chat_list(&self) -> Vec<PeerId>;
    fn user_info(&self, user_id: u32) -> Option<UserInfo>;
    fn chat_info(&self, peer: PeerId) -> Option<ChatInfo>;
    fn chat_participants(&self, peer: PeerId) -> Vec<u32>;
    async fn add_contacts(&self, peers: &[PeerId]) -> Result<()>;
    async fn delete_contacts(&self, user_ids: &[u32]) -> Result<()>;

    /// Send a text message; returns the client-side random id.
    async fn send_message(&self, peer: PeerId, text: &str) -> Result<u64>;
    async fn set_typing(&self, peer: PeerId, typing: bool) -> Result<()>;
    async fn read_history(&self, peer: PeerId, up_to: u32) -> Result<()>;

    fn avatar_token(&self, user_id: u32) -> String;
    async fn request_avatar(&self, user_id: u32) -> Result<()>;

    async fn search_contacts(&self, query: &str, limit: u32) -> Result<()>;
    async fn download_file(&self, file_id: &str) -> Result<()>;
}

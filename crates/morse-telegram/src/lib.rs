//! Telegram adapter (teloxide).
//!
//! Implements the `morse-core` [`TelegramClient`] port over the Bot API.
//! The Bot API authenticates with a bot token instead of a phone login, so
//! the token plays the part of the login code: when none is configured or
//! saved, the connection asks for one through its auth-code challenge.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use teloxide::{dispatching::ShutdownToken, net::Download, prelude::*};
use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, info, warn};

pub mod cache;
pub mod mapping;
pub mod router;

use cache::Cache;
use morse_core::{
    errors::Error,
    peer::PeerId,
    telegram::{
        client::TelegramClient,
        types::{
            AuthSignError, ChatInfo, ClientState, DcOption, SessionBlobs, TelegramEvent,
            UnauthorizedError, UserInfo,
        },
    },
    Result,
};

pub type EventSender = mpsc::UnboundedSender<TelegramEvent>;

/// Largest avatar edge we ask for.
const AVATAR_MAX_EDGE: u32 = 160;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Inner {
    events: EventSender,
    configured_token: Option<String>,
    token: Mutex<Option<String>>,
    bot: Mutex<Option<Bot>>,
    state: Mutex<ClientState>,
    self_id: Mutex<u32>,
    pub(crate) cache: Mutex<Cache>,
    shutdown: Mutex<Option<ShutdownToken>>,
    poll_timeout: Mutex<Duration>,
    next_random_id: AtomicU64,
}

impl Inner {
    pub(crate) fn emit(&self, event: TelegramEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver gone");
        }
    }

    pub(crate) fn set_state(&self, state: ClientState) {
        let changed = {
            let mut current = lock(&self.state);
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            self.emit(TelegramEvent::ConnectionStateChanged(state));
        }
    }

    pub(crate) fn self_id(&self) -> u32 {
        *lock(&self.self_id)
    }
}

#[derive(Clone)]
pub struct BotClient {
    inner: Arc<Inner>,
}

impl BotClient {
    /// `token` is the bot token from configuration, if any.
    pub fn new(token: Option<String>, events: EventSender) -> Self {
        let seed = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(1);
        Self {
            inner: Arc::new(Inner {
                events,
                configured_token: token.filter(|t| !t.trim().is_empty()),
                token: Mutex::new(None),
                bot: Mutex::new(None),
                state: Mutex::new(ClientState::Disconnected),
                self_id: Mutex::new(0),
                cache: Mutex::new(Cache::default()),
                shutdown: Mutex::new(None),
                poll_timeout: Mutex::new(Duration::from_secs(15)),
                next_random_id: AtomicU64::new(seed),
            }),
        }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }

    fn bot(&self) -> Result<Bot> {
        lock(&self.inner.bot)
            .clone()
            .ok_or_else(|| Error::Disconnected("bot is not signed in".to_string()))
    }

    fn chat_id(peer: PeerId) -> Result<teloxide::types::ChatId> {
        mapping::chat_id(peer)
            .ok_or_else(|| Error::InvalidArgument(format!("'{peer}' has no Bot API chat id")))
    }

    /// Check `token` against the server. On success the bot is signed in
    /// and polling starts. `interactive` picks how a refusal is reported.
    async fn authenticate(&self, token: String, interactive: bool) {
        let bot = Bot::new(token.clone());
        let me = match Self::with_retry(|| bot.get_me()).await {
            Ok(me) => me,
            Err(e) => {
                warn!(error = %e, "bot token refused");
                let message = e.message();
                if interactive {
                    self.inner.emit(TelegramEvent::AuthSignError {
                        kind: AuthSignError::PhoneCodeInvalid,
                        message,
                    });
                } else {
                    self.inner.emit(TelegramEvent::AuthorizationError {
                        kind: UnauthorizedError::Other,
                        message,
                    });
                }
                return;
            }
        };

        let Ok(self_id) = u32::try_from(me.user.id.0) else {
            warn!(id = me.user.id.0, "bot id outside the 32-bit peer space");
            self.inner.emit(TelegramEvent::AuthorizationError {
                kind: UnauthorizedError::Other,
                message: "unsupported bot id".to_string(),
            });
            return;
        };

        info!(id = self_id, username = ?me.user.username, "bot signed in");
        *lock(&self.inner.token) = Some(token);
        *lock(&self.inner.bot) = Some(bot.clone());
        *lock(&self.inner.self_id) = self_id;
        if let Some(user) = mapping::user_info(&me.user) {
            lock(&self.inner.cache).users.insert(self_id, user);
        }

        self.inner.set_state(ClientState::Authenticated);
        self.inner.emit(TelegramEvent::SelfUserAvailable(self_id));

        let timeout = *lock(&self.inner.poll_timeout);
        let shutdown = router::spawn_polling(bot, self.inner.clone(), timeout);
        *lock(&self.inner.shutdown) = Some(shutdown);
        self.inner.set_state(ClientState::Ready);
    }

    fn spawn_avatar_fetch(&self, bot: Bot, user_id: u32) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            match fetch_avatar(&bot, user_id).await {
                Ok(Some((token, data))) => {
                    lock(&inner.cache).avatar_tokens.insert(user_id, token.clone());
                    inner.emit(TelegramEvent::AvatarReceived {
                        user_id,
                        data,
                        mime_type: "image/jpeg".to_string(),
                        token,
                    });
                }
                Ok(None) => debug!(user_id, "user has no avatar"),
                Err(e) => warn!(user_id, error = %e, "avatar download failed"),
            }
        });
    }
}

async fn download(bot: &Bot, file_id: &str) -> Result<Vec<u8>> {
    let file = BotClient::with_retry(|| bot.get_file(file_id.to_string())).await?;
    let mut data = Vec::new();
    bot.download_file(&file.path, &mut data)
        .await
        .map_err(|e| Error::External(format!("download error: {e}")))?;
    Ok(data)
}

/// Smallest-but-adequate size of the current profile photo, with its
/// unique id as the avatar token.
async fn fetch_avatar(bot: &Bot, user_id: u32) -> Result<Option<(String, Vec<u8>)>> {
    let photos = BotClient::with_retry(|| {
        bot.get_user_profile_photos(UserId(u64::from(user_id)))
            .limit(1)
    })
    .await?;
    let Some(sizes) = photos.photos.first() else {
        return Ok(None);
    };
    let Some(best) = sizes
        .iter()
        .filter(|s| s.width <= AVATAR_MAX_EDGE && s.height <= AVATAR_MAX_EDGE)
        .last()
        .or_else(|| sizes.first())
    else {
        return Ok(None);
    };
    let data = download(bot, &best.file.id).await?;
    Ok(Some((best.file.unique_id.clone(), data)))
}

#[async_trait]
impl TelegramClient for BotClient {
    fn connection_state(&self) -> ClientState {
        *lock(&self.inner.state)
    }

    fn self_id(&self) -> u32 {
        self.inner.self_id()
    }

    fn set_keepalive_interval(&self, interval: Duration) {
        *lock(&self.inner.poll_timeout) = interval;
    }

    async fn init_connection(&self, dc: &DcOption) -> Result<()> {
        debug!(address = %dc.address, port = dc.port, "bot api ignores the dc option");
        self.inner.set_state(ClientState::Connecting);
        match self.inner.configured_token.clone() {
            Some(token) => self.authenticate(token, false).await,
            None => self.inner.set_state(ClientState::AuthRequired),
        }
        Ok(())
    }

    async fn restore_connection(&self, session: &SessionBlobs) -> Result<()> {
        let token = String::from_utf8(session.account.clone())
            .map_err(|_| Error::InvalidArgument("saved token is not UTF-8".to_string()))?;
        match Cache::from_blob(&session.state) {
            Ok(cache) => *lock(&self.inner.cache) = cache,
            Err(e) => warn!(error = %e, "saved state unreadable; starting empty"),
        }
        self.inner.set_state(ClientState::Connecting);
        self.authenticate(token, false).await;
        Ok(())
    }

    async fn close_connection(&self) -> Result<()> {
        let shutdown = lock(&self.inner.shutdown).take();
        if let Some(token) = shutdown {
            match token.shutdown() {
                Ok(done) => done.await,
                Err(e) => debug!(error = %e, "polling was idle"),
            }
        }
        *lock(&self.inner.bot) = None;
        self.inner.set_state(ClientState::Disconnected);
        Ok(())
    }

    fn export_session(&self) -> SessionBlobs {
        let Some(token) = lock(&self.inner.token).clone() else {
            return SessionBlobs::default();
        };
        SessionBlobs {
            account: token.into_bytes(),
            state: lock(&self.inner.cache).to_blob(),
        }
    }

    async fn request_phone_code(&self, _phone: &str) -> Result<()> {
        // The "code" is a bot token issued by @BotFather.
        self.inner.emit(TelegramEvent::PhoneCodeRequired);
        Ok(())
    }

    async fn sign_in(&self, _phone: &str, code: &str) -> Result<()> {
        self.authenticate(code.trim().to_string(), true).await;
        Ok(())
    }

    async fn request_password_info(&self) -> Result<()> {
        Err(Error::NotImplemented("bots have no cloud password".to_string()))
    }

    async fn try_password(&self, _password: &[u8]) -> Result<()> {
        Err(Error::NotImplemented("bots have no cloud password".to_string()))
    }

    async fn set_online_status(&self, online: bool) -> Result<()> {
        debug!(online, "bot api has no presence");
        Ok(())
    }

    fn contact_list(&self) -> Vec<u32> {
        lock(&self.inner.cache).contacts.iter().copied().collect()
    }

    fn chat_list(&self) -> Vec<PeerId> {
        lock(&self.inner.cache).chats.keys().copied().collect()
    }

    fn user_info(&self, user_id: u32) -> Option<UserInfo> {
        lock(&self.inner.cache).users.get(&user_id).cloned()
    }

    fn chat_info(&self, peer: PeerId) -> Option<ChatInfo> {
        lock(&self.inner.cache).chats.get(&peer).cloned()
    }

    fn chat_participants(&self, peer: PeerId) -> Vec<u32> {
        lock(&self.inner.cache)
            .participants
            .get(&peer)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default()
    }

    async fn add_contacts(&self, peers: &[PeerId]) -> Result<()> {
        let ids: Vec<u32> = peers.iter().filter_map(PeerId::user_id).collect();
        if lock(&self.inner.cache).add_contacts(ids) {
            self.inner.emit(TelegramEvent::ContactListChanged);
        }
        Ok(())
    }

    async fn delete_contacts(&self, user_ids: &[u32]) -> Result<()> {
        if lock(&self.inner.cache).delete_contacts(user_ids) {
            self.inner.emit(TelegramEvent::ContactListChanged);
        }
        Ok(())
    }

    async fn send_message(&self, peer: PeerId, text: &str) -> Result<u64> {
        let bot = self.bot()?;
        let chat = Self::chat_id(peer)?;
        let random_id = self.inner.next_random_id.fetch_add(1, Ordering::Relaxed);

        let inner = self.inner.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            match Self::with_retry(|| bot.send_message(chat, text.clone())).await {
                Ok(sent) => match u32::try_from(sent.id.0) {
                    Ok(message_id) => inner.emit(TelegramEvent::SentMessageResolved {
                        random_id,
                        message_id,
                    }),
                    Err(_) => warn!(id = sent.id.0, "sent message id out of range"),
                },
                Err(e) => {
                    warn!(%peer, error = %e, "send failed");
                    inner.emit(TelegramEvent::SentMessageFailed { random_id });
                }
            }
        });
        Ok(random_id)
    }

    async fn set_typing(&self, peer: PeerId, typing: bool) -> Result<()> {
        if !typing {
            // Chat actions expire on their own.
            return Ok(());
        }
        let bot = self.bot()?;
        let chat = Self::chat_id(peer)?;
        Self::with_retry(|| bot.send_chat_action(chat, teloxide::types::ChatAction::Typing)).await?;
        Ok(())
    }

    async fn read_history(&self, peer: PeerId, up_to: u32) -> Result<()> {
        debug!(%peer, up_to, "bot api has no read receipts");
        Ok(())
    }

    fn avatar_token(&self, user_id: u32) -> String {
        lock(&self.inner.cache)
            .avatar_tokens
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn request_avatar(&self, user_id: u32) -> Result<()> {
        let bot = self.bot()?;
        self.spawn_avatar_fetch(bot, user_id);
        Ok(())
    }

    async fn search_contacts(&self, query: &str, limit: u32) -> Result<()> {
        let peers = lock(&self.inner.cache).search(query, limit);
        self.inner.emit(TelegramEvent::SearchComplete {
            query: query.to_string(),
            peers,
        });
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<()> {
        let bot = self.bot()?;
        let inner = self.inner.clone();
        let file_id = file_id.to_string();
        tokio::spawn(async move {
            let result = download(&bot, &file_id).await.map_err(|e| e.message());
            inner.emit(TelegramEvent::FileDownloadFinished { file_id, result });
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (BotClient, mpsc::UnboundedReceiver<TelegramEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BotClient::new(None, tx), rx)
    }

    #[tokio::test]
    async fn without_token_the_code_is_requested() {
        let (client, mut rx) = client();
        client.init_connection(&DcOption::default()).await.unwrap();
        assert_eq!(client.connection_state(), ClientState::AuthRequired);
        assert_eq!(
            rx.recv().await,
            Some(TelegramEvent::ConnectionStateChanged(ClientState::Connecting))
        );
        assert_eq!(
            rx.recv().await,
            Some(TelegramEvent::ConnectionStateChanged(ClientState::AuthRequired))
        );

        client.request_phone_code("+7999").await.unwrap();
        assert_eq!(rx.recv().await, Some(TelegramEvent::PhoneCodeRequired));
    }

    #[tokio::test]
    async fn nothing_to_export_before_sign_in() {
        let (client, _rx) = client();
        assert!(client.export_session().is_empty());
        assert!(matches!(
            client.send_message(PeerId::user(1), "hi").await,
            Err(Error::Disconnected(_))
        ));
        assert!(matches!(
            client.try_password(b"x").await,
            Err(Error::NotImplemented(_))
        ));
    }

    #[tokio::test]
    async fn local_contact_edits_are_announced() {
        let (client, mut rx) = client();
        client
            .add_contacts(&[PeerId::user(7), PeerId::chat(3)])
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(TelegramEvent::ContactListChanged));
        assert_eq!(client.contact_list(), vec![7]);

        client.delete_contacts(&[7]).await.unwrap();
        assert_eq!(rx.recv().await, Some(TelegramEvent::ContactListChanged));
        assert!(client.contact_list().is_empty());

        client.search_contacts("nobody", 5).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(TelegramEvent::SearchComplete {
                query: "nobody".to_string(),
                peers: vec![]
            })
        );
    }
}

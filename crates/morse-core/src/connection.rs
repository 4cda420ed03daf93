//! One middleware connection: the login state machine driven by library
//! events, and the middleware's inbound calls.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    channel::{
        auth::{AuthChallenge, ChallengeKind, SaslStatus, ERROR_AUTHENTICATION_FAILED},
        file_transfer::FileTransferState,
        room_list::RoomInfo,
        search::SearchState,
        text::{ChatState, TextChannel},
        ChannelDetails, ChannelKey, ChannelKind, ChannelRequest, MessagePart,
    },
    config::ConnectionParams,
    contact_info::{self, ContactInfoField},
    dispatcher::{Dispatcher, TextTarget},
    errors::Error,
    handles::{Handle, HandleRegistry, HandleType, SELF_HANDLE},
    logging::mask_phone,
    peer::{PeerId, PeerKind},
    ports::{ConnectionStatus, MiddlewarePort, StatusReason, VariantMap},
    presence::{self, PresenceBook, SimplePresence, STATUS_AVAILABLE},
    protocol::connection_object_path,
    roster::{ContactListState, Roster, SubscriptionState},
    storage::SessionStore,
    telegram::{
        client::TelegramClient,
        types::{AuthSignError, ClientState, TelegramEvent, UnauthorizedError},
    },
    Result,
};

pub const IFACE_CONNECTION: &str = "org.freedesktop.Telepathy.Connection";
pub const IFACE_CONTACT_LIST: &str = "org.freedesktop.Telepathy.Connection.Interface.ContactList";
pub const IFACE_SIMPLE_PRESENCE: &str =
    "org.freedesktop.Telepathy.Connection.Interface.SimplePresence";
pub const IFACE_ALIASING: &str = "org.freedesktop.Telepathy.Connection.Interface.Aliasing";
pub const IFACE_AVATARS: &str = "org.freedesktop.Telepathy.Connection.Interface.Avatars";
pub const IFACE_CONTACT_INFO: &str = "org.freedesktop.Telepathy.Connection.Interface.ContactInfo";

/// Re-attempts without cached session after an authorization error.
const AUTH_RECONNECT_LIMIT: u32 = 1;

pub struct Connection {
    params: ConnectionParams,
    client: Arc<dyn TelegramClient>,
    bus: Arc<dyn MiddlewarePort>,
    store: SessionStore,
    path: String,

    handles: HandleRegistry,
    presences: PresenceBook,
    roster: Roster,
    dispatcher: Dispatcher,

    status: ConnectionStatus,
    reason: StatusReason,
    ended: bool,
    wanted_presence: String,
    contact_list_state: ContactListState,
    auth_reconnects: u32,
    code_challenge: Option<AuthChallenge>,
    password_challenge: Option<AuthChallenge>,
}

impl Connection {
    pub fn new(
        params: ConnectionParams,
        client: Arc<dyn TelegramClient>,
        bus: Arc<dyn MiddlewarePort>,
        store: SessionStore,
    ) -> Self {
        let path = connection_object_path(&params.account);
        Self {
            handles: HandleRegistry::with_reserved_self(params.classifier()),
            presences: PresenceBook::default(),
            roster: Roster::default(),
            dispatcher: Dispatcher::new(&path),
            params,
            client,
            bus,
            store,
            path,
            status: ConnectionStatus::Disconnected,
            reason: StatusReason::NoneSpecified,
            ended: false,
            wanted_presence: STATUS_AVAILABLE.to_string(),
            contact_list_state: ContactListState::None,
            auth_reconnects: 0,
            code_challenge: None,
            password_challenge: None,
        }
    }

    pub fn object_path(&self) -> &str {
        &self.path
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn self_handle(&self) -> Handle {
        SELF_HANDLE
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    /// A connection that went back to Disconnected after connecting is done.
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    // ---- state machine -------------------------------------------------

    fn set_status(&mut self, status: ConnectionStatus, reason: StatusReason) {
        if self.status == status && self.reason == reason {
            return;
        }
        info!(?status, ?reason, "connection status");
        self.status = status;
        self.reason = reason;
        if status == ConnectionStatus::Disconnected {
            self.ended = true;
        }
        self.bus.status_changed(status, reason);
    }

    fn is_authenticated(&self) -> bool {
        self.client.connection_state().is_authenticated()
    }

    fn is_ready(&self) -> bool {
        self.client.connection_state() == ClientState::Ready
    }

    fn require_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::Disconnected("Disconnected".to_string()))
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        if self.status != ConnectionStatus::Disconnected {
            return Ok(());
        }
        self.auth_reconnects = 0;
        self.ended = false;
        self.client.set_keepalive_interval(self.params.keepalive_interval);
        self.set_status(ConnectionStatus::Connecting, StatusReason::NoneSpecified);

        let session = self.store.load_session();
        let result = if session.is_empty() {
            info!(account = %mask_phone(&self.params.account), "init connection");
            self.client.init_connection(&self.params.dc_option()).await
        } else {
            info!(account = %mask_phone(&self.params.account), "restore connection");
            self.client.restore_connection(&session).await
        };

        if let Err(e) = result {
            warn!(error = %e, "unable to start the connection");
            self.set_status(ConnectionStatus::Disconnected, StatusReason::NetworkError);
            return Err(e);
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        if self.status == ConnectionStatus::Disconnected {
            return Ok(());
        }
        if self.is_authenticated() {
            if let Err(e) = self.client.set_online_status(false).await {
                warn!(error = %e, "unable to go offline");
            }
        }
        self.save_session();
        if let Err(e) = self.client.close_connection().await {
            warn!(error = %e, "close connection failed");
        }
        self.teardown();
        self.set_status(ConnectionStatus::Disconnected, StatusReason::Requested);
        Ok(())
    }

    fn teardown(&mut self) {
        self.dispatcher.close_all(self.bus.as_ref());
        for challenge in [self.code_challenge.take(), self.password_challenge.take()]
            .into_iter()
            .flatten()
        {
            self.bus.channel_closed(challenge.path());
        }
        self.publish_self_presence(false);
    }

    fn save_session(&self) {
        let session = self.client.export_session();
        if session.is_empty() {
            debug!("no session to save");
            return;
        }
        self.store.save_session(&session);
    }

    /// Feed one library event through the state machine.
    pub async fn handle_event(&mut self, event: TelegramEvent) {
        match event {
            TelegramEvent::ConnectionStateChanged(state) => self.on_client_state(state).await,
            TelegramEvent::SelfUserAvailable(id) => self.on_self_user(id),
            TelegramEvent::PhoneCodeRequired => {
                self.announce_challenge(ChallengeKind::AuthCode, None)
            }
            TelegramEvent::AuthorizationError { kind, message } => {
                self.on_authorization_error(kind, &message).await
            }
            TelegramEvent::PasswordInfoReceived { hint } => {
                self.announce_challenge(ChallengeKind::Password, Some(&hint))
            }
            TelegramEvent::AuthSignError { kind, message } => self.on_sign_error(kind, &message),
            TelegramEvent::ContactListChanged => self.sync_contact_list(),
            TelegramEvent::MessageReceived(message) => {
                self.dispatcher
                    .deliver(&mut self.handles, SELF_HANDLE, self.bus.as_ref(), &message);
            }
            TelegramEvent::ChatChanged(peer) => self.refresh_members(peer),
            TelegramEvent::ContactStatusChanged { user_id, status } => {
                let handle = self.handles.ensure_contact(PeerId::user(user_id));
                if handle != SELF_HANDLE {
                    let mut batch = BTreeMap::new();
                    batch.insert(handle, presence::project(status));
                    self.publish_presences(batch);
                }
            }
            TelegramEvent::TypingStatusChanged {
                peer,
                user_id,
                typing,
            } => self
                .dispatcher
                .typing(&mut self.handles, self.bus.as_ref(), peer, user_id, typing),
            TelegramEvent::MessageRead {
                peer,
                message_id,
                outbox,
            } => self
                .dispatcher
                .message_read(&self.handles, self.bus.as_ref(), peer, message_id, outbox),
            TelegramEvent::SentMessageResolved {
                random_id,
                message_id,
            } => self
                .dispatcher
                .sent_resolved(self.bus.as_ref(), random_id, message_id),
            TelegramEvent::SentMessageFailed { random_id } => {
                self.dispatcher.sent_failed(self.bus.as_ref(), random_id)
            }
            TelegramEvent::AvatarReceived {
                user_id,
                data,
                mime_type,
                token,
            } => {
                let handle = self.handles.ensure_contact(PeerId::user(user_id));
                self.bus.avatar_retrieved(handle, &token, &data, &mime_type);
            }
            TelegramEvent::SearchComplete { query, peers } => self.on_search_complete(&query, &peers),
            TelegramEvent::FileDownloadFinished { file_id, result } => {
                let bus = self.bus.clone();
                for (path, transfer) in self.dispatcher.transfers_for(&file_id) {
                    match &result {
                        Ok(data) => {
                            transfer.set_state(FileTransferState::Completed);
                            bus.file_transfer_state_changed(
                                path,
                                FileTransferState::Completed,
                                Some(data.as_slice()),
                            );
                        }
                        Err(e) => {
                            warn!(file_id = %file_id, error = %e, "download failed");
                            transfer.set_state(FileTransferState::Cancelled);
                            bus.file_transfer_state_changed(path, FileTransferState::Cancelled, None);
                        }
                    }
                }
            }
        }
    }

    async fn on_client_state(&mut self, state: ClientState) {
        debug!(?state, "client state");
        match state {
            ClientState::AuthRequired => {
                if let Err(e) = self.client.request_phone_code(&self.params.account).await {
                    warn!(error = %e, "phone code request failed");
                }
            }
            ClientState::Authenticated => self.on_authenticated(),
            ClientState::Ready => self.on_ready().await,
            ClientState::Disconnected => {
                if self.status == ConnectionStatus::Connected {
                    self.save_session();
                    self.teardown();
                    self.set_status(ConnectionStatus::Disconnected, StatusReason::NetworkError);
                }
            }
            ClientState::Connecting | ClientState::Connected => {}
        }
    }

    fn on_authenticated(&mut self) {
        for slot in [&mut self.code_challenge, &mut self.password_challenge] {
            set_challenge_status(
                self.bus.as_ref(),
                slot,
                SaslStatus::Succeeded,
                "Succeeded",
                &VariantMap::new(),
            );
        }
        self.check_connected();
        self.set_contact_list_state(ContactListState::Waiting);
    }

    fn on_self_user(&mut self, user_id: u32) {
        let peer = PeerId::user(user_id);
        self.handles.bind_self(peer);
        self.bus.self_contact_changed(SELF_HANDLE, &peer.to_string());
        self.publish_self_presence(true);
        self.check_connected();
    }

    async fn on_ready(&mut self) {
        self.save_session();
        let online = self.wanted_presence == STATUS_AVAILABLE;
        if let Err(e) = self.client.set_online_status(online).await {
            warn!(error = %e, "unable to push online status");
        }
        self.sync_contact_list();
        self.publish_self_presence(true);
        self.check_connected();
    }

    fn check_connected(&mut self) {
        if self.is_authenticated() && self.handles.self_peer().is_some() {
            self.set_status(ConnectionStatus::Connected, StatusReason::Requested);
        }
    }

    async fn on_authorization_error(&mut self, kind: UnauthorizedError, message: &str) {
        debug!(?kind, message, "authorization error");

        if kind == UnauthorizedError::SessionPasswordNeeded {
            set_challenge_status(
                self.bus.as_ref(),
                &mut self.code_challenge,
                SaslStatus::Succeeded,
                "Succeeded",
                &VariantMap::new(),
            );
            if let Err(e) = self.client.request_password_info().await {
                warn!(error = %e, "password info request failed");
            }
            return;
        }

        if self.auth_reconnects < AUTH_RECONNECT_LIMIT {
            self.auth_reconnects += 1;
            info!(
                attempt = self.auth_reconnects,
                "auth error; re-init connection without session data"
            );
            self.set_status(ConnectionStatus::Connecting, StatusReason::AuthenticationFailed);
            if let Err(e) = self.client.close_connection().await {
                warn!(error = %e, "close connection failed");
            }
            if let Err(e) = self.client.init_connection(&self.params.dc_option()).await {
                warn!(error = %e, "re-init failed");
                self.set_status(ConnectionStatus::Disconnected, StatusReason::NetworkError);
            }
        } else {
            warn!(attempts = self.auth_reconnects, "auth error; giving up");
            self.set_status(ConnectionStatus::Disconnected, StatusReason::AuthenticationFailed);
        }
    }

    fn on_sign_error(&mut self, kind: AuthSignError, message: &str) {
        let mut details = VariantMap::new();
        details.insert("server-message".into(), json!(message));

        let slot = match kind {
            AuthSignError::PhoneCodeExpired | AuthSignError::PhoneCodeInvalid => &mut self.code_challenge,
            AuthSignError::PasswordHashInvalid => &mut self.password_challenge,
            AuthSignError::Other => {
                warn!(message, "unhandled sign-in error");
                return;
            }
        };
        set_challenge_status(
            self.bus.as_ref(),
            slot,
            SaslStatus::ServerFailed,
            ERROR_AUTHENTICATION_FAILED,
            &details,
        );
    }

    fn announce_challenge(&mut self, kind: ChallengeKind, hint: Option<&str>) {
        let path = self.dispatcher.allocate_path(ChannelKind::ServerAuthentication);
        let challenge = AuthChallenge::new(path, kind, &self.params.account, hint);
        if let Err(e) = self.bus.new_channel(challenge.details()) {
            warn!(?kind, error = %e, "auth channel refused");
            return;
        }
        let slot = match kind {
            ChallengeKind::AuthCode => &mut self.code_challenge,
            ChallengeKind::Password => &mut self.password_challenge,
        };
        if let Some(old) = slot.replace(challenge) {
            self.bus.channel_closed(old.path());
        }
    }

    // ---- contacts and presence ----------------------------------------

    fn set_contact_list_state(&mut self, state: ContactListState) {
        if self.contact_list_state != state {
            self.contact_list_state = state;
            self.bus.contact_list_state_changed(state);
        }
    }

    fn sync_contact_list(&mut self) {
        let ids = self.client.contact_list();
        debug!(count = ids.len(), "contact list changed");

        let members: Vec<(Handle, PeerId)> = ids
            .iter()
            .map(|id| {
                let peer = PeerId::user(*id);
                (self.handles.ensure_contact(peer), peer)
            })
            .filter(|(h, _)| *h != SELF_HANDLE)
            .collect();

        let delta = self.roster.sync(members.iter().copied());
        if !delta.is_empty() {
            self.bus.contacts_changed(&delta);
        }

        let batch = members
            .iter()
            .map(|(handle, peer)| {
                let status = peer
                    .user_id()
                    .and_then(|id| self.client.user_info(id))
                    .map(|info| info.status)
                    .unwrap_or_default();
                (*handle, presence::project(status))
            })
            .collect();
        self.publish_presences(batch);

        self.set_contact_list_state(ContactListState::Success);
    }

    fn publish_presences(&mut self, batch: BTreeMap<Handle, SimplePresence>) {
        let mut accepted = BTreeMap::new();
        for (handle, presence) in batch {
            if !self.handles.contains(handle, HandleType::Contact) {
                warn!(handle, "presence for unknown handle dropped");
                continue;
            }
            accepted.insert(handle, presence);
        }
        let changed = self.presences.apply(accepted);
        if !changed.is_empty() {
            self.bus.presences_changed(&changed);
        }
    }

    fn publish_self_presence(&mut self, connected: bool) {
        if self.handles.self_peer().is_none() {
            return;
        }
        let presence = if connected {
            presence::for_status(&self.wanted_presence).unwrap_or_else(SimplePresence::offline)
        } else {
            SimplePresence::offline()
        };
        let mut batch = BTreeMap::new();
        batch.insert(SELF_HANDLE, presence);
        self.publish_presences(batch);
    }

    fn refresh_members(&mut self, peer: PeerId) {
        if self.handles.classifier().handle_type(&peer) != HandleType::Room {
            return;
        }
        let Some(handle) = self.handles.reverse_lookup(&peer, HandleType::Room) else {
            return;
        };
        let participants = self.client.chat_participants(peer);
        if participants.is_empty() {
            return;
        }
        let members = participants
            .into_iter()
            .map(|id| self.handles.ensure_contact(PeerId::user(id)))
            .collect();
        let key = ChannelKey {
            handle_type: HandleType::Room,
            handle,
        };
        self.dispatcher.update_members(self.bus.as_ref(), &key, members);
    }

    fn on_search_complete(&mut self, query: &str, peers: &[PeerId]) {
        let mut result = BTreeMap::new();
        for peer in peers {
            let Some(user_id) = peer.user_id() else {
                continue;
            };
            let fields = self
                .client
                .user_info(user_id)
                .map(|info| contact_info::contact_info(&info))
                .unwrap_or_default();
            result.insert(peer.to_string(), fields);
        }

        let bus = self.bus.clone();
        for (path, search) in self.dispatcher.searches_mut() {
            if !search.matches(query) {
                continue;
            }
            bus.search_result_received(path, &result);
            search.complete();
            bus.search_state_changed(path, SearchState::Completed, "");
        }
    }

    // ---- inbound: handles ---------------------------------------------

    fn targeted_type(handle_type: u32) -> Result<HandleType> {
        match HandleType::from_u32(handle_type) {
            Some(t @ (HandleType::Contact | HandleType::Room)) => Ok(t),
            _ => Err(Error::InvalidArgument("Unsupported handle type".to_string())),
        }
    }

    fn contact_peer(&self, handle: Handle) -> Result<PeerId> {
        self.handles
            .lookup(handle, HandleType::Contact)
            .ok_or_else(|| Error::InvalidHandle(format!("Unknown handle {handle}")))
    }

    pub fn inspect_handles(&self, handle_type: u32, handles: &[Handle]) -> Result<Vec<String>> {
        let ty = Self::targeted_type(handle_type)?;
        handles
            .iter()
            .map(|h| {
                self.handles
                    .lookup(*h, ty)
                    .map(|p| p.to_string())
                    .ok_or_else(|| Error::InvalidHandle(format!("Unknown handle {h}")))
            })
            .collect()
    }

    pub fn request_handles(&mut self, handle_type: u32, identifiers: &[String]) -> Result<Vec<Handle>> {
        let ty = Self::targeted_type(handle_type)?;
        let peers = identifiers
            .iter()
            .map(|id| {
                let peer = PeerId::parse(id.trim());
                if !peer.is_valid() {
                    return Err(Error::InvalidHandle(format!("'{id}' is not a valid identifier")));
                }
                if self.handles.classifier().handle_type(&peer) != ty {
                    return Err(Error::InvalidHandle(format!("'{id}' is not a {ty:?} identifier")));
                }
                Ok(peer)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(peers
            .into_iter()
            .map(|peer| match ty {
                HandleType::Room => self.handles.ensure_chat(peer),
                _ => self.handles.ensure_contact(peer),
            })
            .collect())
    }

    // ---- inbound: channels --------------------------------------------

    /// `CreateChannel`/`EnsureChannel`. Returns the channel and whether it
    /// was newly created by this request ("yours").
    pub fn create_channel(&mut self, request: &VariantMap) -> Result<(ChannelDetails, bool)> {
        let request = ChannelRequest::from_map(request)?;
        debug!(channel_type = %request.channel_type, "create channel");
        match request.kind() {
            Some(ChannelKind::Text) => self.create_text_channel(&request),
            Some(ChannelKind::RoomList) => Ok((self.dispatcher.create_room_list(self.bus.as_ref())?, true)),
            Some(ChannelKind::ContactSearch) => {
                Ok((self.dispatcher.create_search(self.bus.as_ref(), &request)?, true))
            }
            Some(ChannelKind::FileTransfer) => {
                Ok((self.dispatcher.create_transfer(self.bus.as_ref(), &request)?, true))
            }
            Some(ChannelKind::ServerAuthentication) | None => Err(Error::NotImplemented(format!(
                "channel type {} is not supported",
                request.channel_type
            ))),
        }
    }

    fn create_text_channel(&mut self, request: &ChannelRequest) -> Result<(ChannelDetails, bool)> {
        let ty = match request.target_handle_type.and_then(HandleType::from_u32) {
            Some(t @ (HandleType::Contact | HandleType::Room)) => t,
            _ => {
                return Err(Error::InvalidArgument(
                    "Unknown target handle type".to_string(),
                ))
            }
        };

        let (handle, peer) = if let Some(handle) = request.target_handle {
            let peer = self
                .handles
                .lookup(handle, ty)
                .ok_or_else(|| Error::InvalidHandle("Target handle is unknown.".to_string()))?;
            (handle, peer)
        } else if let Some(id) = &request.target_id {
            let peer = PeerId::parse(id.trim());
            if !peer.is_valid() {
                return Err(Error::InvalidArgument(format!("'{id}' is not a valid target")));
            }
            if self.handles.classifier().handle_type(&peer) != ty {
                return Err(Error::InvalidArgument(format!("'{id}' is not a {ty:?} target")));
            }
            let handle = match ty {
                HandleType::Room => self.handles.ensure_chat(peer),
                _ => self.handles.ensure_contact(peer),
            };
            (handle, peer)
        } else {
            return Err(Error::InvalidHandle("Target handle is unknown.".to_string()));
        };

        let key = ChannelKey {
            handle_type: ty,
            handle,
        };
        let target = TextTarget {
            key,
            peer,
            initiator: SELF_HANDLE,
            initiator_id: self.handles.self_peer().unwrap_or_default().to_string(),
            requested: request.requested,
        };
        let (_, created) = self
            .dispatcher
            .ensure_text(target, SELF_HANDLE, self.bus.as_ref())?;
        if created && ty == HandleType::Room {
            self.refresh_members(peer);
        }

        let details = self
            .dispatcher
            .text_channel(&key)
            .map(|c| c.details().clone())
            .ok_or_else(|| Error::InvalidArgument("channel vanished".to_string()))?;
        Ok((details, created))
    }

    pub fn close_channel(&mut self, path: &str) -> Result<()> {
        for slot in [&mut self.code_challenge, &mut self.password_challenge] {
            if matches!(slot, Some(c) if c.path() == path) {
                *slot = None;
                self.bus.channel_closed(path);
                return Ok(());
            }
        }
        self.dispatcher.close(self.bus.as_ref(), path)
    }

    // ---- inbound: contacts --------------------------------------------

    pub fn get_contact_attributes(
        &self,
        handles: &[Handle],
        interfaces: &[String],
    ) -> BTreeMap<Handle, VariantMap> {
        let wants = |iface: &str| interfaces.iter().any(|i| i == iface);
        let mut out = BTreeMap::new();

        for handle in handles {
            let Some(peer) = self.handles.lookup(*handle, HandleType::Contact) else {
                continue;
            };
            if !peer.is_valid() {
                warn!(handle, "handle is mapped to an invalid identifier");
                continue;
            }

            let mut attrs = VariantMap::new();
            attrs.insert(format!("{IFACE_CONNECTION}/contact-id"), json!(peer.to_string()));

            if wants(IFACE_CONTACT_LIST) {
                let publish = if self.roster.contains(*handle) {
                    SubscriptionState::Yes
                } else {
                    SubscriptionState::Unknown
                };
                attrs.insert(
                    format!("{IFACE_CONTACT_LIST}/subscribe"),
                    json!(self.roster.subscription(*handle) as u32),
                );
                attrs.insert(format!("{IFACE_CONTACT_LIST}/publish"), json!(publish as u32));
            }
            if wants(IFACE_SIMPLE_PRESENCE) {
                attrs.insert(
                    format!("{IFACE_SIMPLE_PRESENCE}/presence"),
                    self.presences.get(*handle).to_value(),
                );
            }
            if wants(IFACE_ALIASING) {
                attrs.insert(format!("{IFACE_ALIASING}/alias"), json!(self.alias(peer)));
            }
            if wants(IFACE_AVATARS) {
                attrs.insert(format!("{IFACE_AVATARS}/token"), json!(self.avatar_token(peer)));
            }
            if wants(IFACE_CONTACT_INFO) {
                let info: Vec<_> = self.info_fields(peer).iter().map(ContactInfoField::to_value).collect();
                attrs.insert(format!("{IFACE_CONTACT_INFO}/info"), json!(info));
            }
            out.insert(*handle, attrs);
        }
        out
    }

    /// Attributes of every contact on the roster.
    pub fn get_contact_list_attributes(&self, interfaces: &[String]) -> BTreeMap<Handle, VariantMap> {
        let handles: Vec<Handle> = self.roster.handles().collect();
        self.get_contact_attributes(&handles, interfaces)
    }

    pub async fn request_subscription(&mut self, handles: &[Handle], _message: &str) -> Result<()> {
        if handles.is_empty() {
            return Err(Error::InvalidHandle("Invalid handle(s)".to_string()));
        }
        let requested = handles
            .iter()
            .map(|h| self.contact_peer(*h).map(|p| (*h, p)))
            .collect::<Result<Vec<_>>>()?;
        self.require_ready()?;

        let peers: Vec<PeerId> = requested.iter().map(|(_, p)| *p).collect();
        self.client.add_contacts(&peers).await?;

        let delta = self.roster.mark_requested(&requested);
        if !delta.is_empty() {
            self.bus.contacts_changed(&delta);
        }
        Ok(())
    }

    pub async fn remove_contacts(&mut self, handles: &[Handle]) -> Result<()> {
        if handles.is_empty() {
            return Err(Error::InvalidHandle(
                "Invalid argument (no handles provided)".to_string(),
            ));
        }
        self.require_ready()?;

        let ids = handles
            .iter()
            .map(|h| {
                self.contact_peer(*h)?
                    .user_id()
                    .ok_or_else(|| Error::InvalidHandle(format!("handle {h} is not a user")))
            })
            .collect::<Result<Vec<u32>>>()?;
        self.client.delete_contacts(&ids).await
    }

    fn alias(&self, peer: PeerId) -> String {
        match peer.kind() {
            Some(PeerKind::User) => {
                let info = self.client.user_info(peer.id());
                contact_info::alias(info.as_ref())
            }
            _ => self
                .client
                .chat_info(peer)
                .map(|c| c.title)
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| contact_info::UNKNOWN_NAME.to_string()),
        }
    }

    fn avatar_token(&self, peer: PeerId) -> String {
        peer.user_id()
            .map(|id| self.client.avatar_token(id))
            .unwrap_or_default()
    }

    fn info_fields(&self, peer: PeerId) -> Vec<ContactInfoField> {
        peer.user_id()
            .and_then(|id| self.client.user_info(id))
            .map(|info| contact_info::contact_info(&info))
            .unwrap_or_default()
    }

    pub fn get_aliases(&self, handles: &[Handle]) -> Result<BTreeMap<Handle, String>> {
        handles
            .iter()
            .map(|h| Ok((*h, self.alias(self.contact_peer(*h)?))))
            .collect()
    }

    pub fn set_aliases(&mut self, _aliases: &BTreeMap<Handle, String>) -> Result<()> {
        Err(Error::NotImplemented("Not implemented".to_string()))
    }

    pub fn get_presences(&self, handles: &[Handle]) -> Result<BTreeMap<Handle, SimplePresence>> {
        handles
            .iter()
            .map(|h| {
                self.contact_peer(*h)?;
                Ok((*h, self.presences.get(*h)))
            })
            .collect()
    }

    pub async fn set_presence(&mut self, status: &str, _message: &str) -> Result<()> {
        let spec = presence::status_spec(status)
            .filter(|s| s.may_set_on_self)
            .ok_or_else(|| Error::InvalidArgument(format!("status '{status}' cannot be set")))?;
        self.wanted_presence = spec.name.to_string();

        if self.is_authenticated() {
            self.client
                .set_online_status(spec.name == STATUS_AVAILABLE)
                .await?;
        }
        if self.status == ConnectionStatus::Connected {
            self.publish_self_presence(true);
        }
        Ok(())
    }

    fn avatar_handles(&self, handles: &[Handle]) -> Result<Vec<PeerId>> {
        if handles.is_empty() {
            return Err(Error::InvalidArgument("No handles provided".to_string()));
        }
        self.require_ready()?;
        handles.iter().map(|h| self.contact_peer(*h)).collect()
    }

    pub fn get_known_avatar_tokens(&self, handles: &[Handle]) -> Result<BTreeMap<Handle, String>> {
        let peers = self.avatar_handles(handles)?;
        Ok(handles
            .iter()
            .zip(peers)
            .map(|(h, p)| (*h, self.avatar_token(p)))
            .collect())
    }

    pub async fn request_avatars(&self, handles: &[Handle]) -> Result<()> {
        let peers = self.avatar_handles(handles)?;
        let ids: BTreeSet<u32> = peers.iter().filter_map(PeerId::user_id).collect();
        for id in ids {
            self.client.request_avatar(id).await?;
        }
        Ok(())
    }

    pub fn get_contact_info(&self, handles: &[Handle]) -> Result<BTreeMap<Handle, Vec<ContactInfoField>>> {
        handles
            .iter()
            .map(|h| Ok((*h, self.info_fields(self.contact_peer(*h)?))))
            .collect()
    }

    // ---- inbound: room list and search --------------------------------

    pub fn list_rooms(&mut self, path: &str) -> Result<()> {
        let bus = self.bus.clone();
        if self.dispatcher.room_list_mut(path)?.set_listing(true) {
            bus.listing_rooms(path, true);
        }

        let classifier = self.handles.classifier();
        let rooms: Vec<RoomInfo> = self
            .client
            .chat_list()
            .into_iter()
            .filter(|peer| classifier.handle_type(peer) == HandleType::Room)
            .map(|peer| {
                let handle = self.handles.ensure_chat(peer);
                let info = self.client.chat_info(peer);
                RoomInfo::new(
                    handle,
                    &peer.to_string(),
                    info.as_ref().map(|c| c.title.as_str()),
                    info.as_ref().map(|c| c.participants_count),
                )
            })
            .collect();
        bus.rooms_received(path, &rooms);

        if self.dispatcher.room_list_mut(path)?.set_listing(false) {
            bus.listing_rooms(path, false);
        }
        Ok(())
    }

    pub fn stop_listing(&mut self, path: &str) -> Result<()> {
        if self.dispatcher.room_list_mut(path)?.set_listing(false) {
            self.bus.listing_rooms(path, false);
        }
        Ok(())
    }

    pub async fn search(&mut self, path: &str, terms: &BTreeMap<String, String>) -> Result<()> {
        self.require_ready()?;
        let channel = self.dispatcher.search_mut(path)?;
        let query = channel.start(terms)?;
        let limit = channel.limit();
        self.bus.search_state_changed(path, SearchState::InProgress, "");

        if let Err(e) = self.client.search_contacts(&query, limit).await {
            self.dispatcher.search_mut(path)?.complete();
            self.bus.search_state_changed(path, SearchState::Failed, &e.message());
            return Err(e);
        }
        Ok(())
    }

    /// `AcceptFile`: start downloading the transfer's file.
    pub async fn accept_file(&mut self, path: &str) -> Result<()> {
        let authenticated = self.is_authenticated();
        let transfer = self.dispatcher.transfer_mut(path)?;
        if transfer.state() != FileTransferState::Pending {
            return Err(Error::InvalidArgument(
                "The file transfer is not pending".to_string(),
            ));
        }
        if !authenticated {
            return Err(Error::Disconnected("Disconnected".to_string()));
        }
        let file_id = transfer.file_id().to_string();
        transfer.set_state(FileTransferState::Accepted);
        self.bus
            .file_transfer_state_changed(path, FileTransferState::Accepted, None);

        if let Err(e) = self.client.download_file(&file_id).await {
            self.dispatcher
                .transfer_mut(path)?
                .set_state(FileTransferState::Cancelled);
            self.bus
                .file_transfer_state_changed(path, FileTransferState::Cancelled, None);
            return Err(e);
        }
        Ok(())
    }

    // ---- inbound: text channels ---------------------------------------

    pub async fn send_message(&mut self, path: &str, parts: &[MessagePart], _flags: u32) -> Result<String> {
        let text = TextChannel::outgoing_text(parts)?;
        let peer = self.dispatcher.text_by_path_mut(path)?.target();
        if !self.is_authenticated() {
            return Err(Error::Disconnected("Disconnected".to_string()));
        }
        let random_id = self.client.send_message(peer, &text).await?;
        Ok(self.dispatcher.text_by_path_mut(path)?.track_sent(random_id))
    }

    pub async fn set_chat_state(&mut self, path: &str, state: u32) -> Result<()> {
        let state = ChatState::from_u32(state)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown chat state {state}")))?;
        let peer = self.dispatcher.text_by_path_mut(path)?.target();
        if !self.is_authenticated() {
            return Err(Error::Disconnected("Disconnected".to_string()));
        }
        self.client
            .set_typing(peer, state == ChatState::Composing)
            .await
    }

    pub async fn acknowledge_messages(&mut self, path: &str, ids: &[u32]) -> Result<()> {
        let channel = self.dispatcher.text_by_path_mut(path)?;
        let newest = channel.acknowledge(ids)?;
        let peer = channel.target();
        self.bus.pending_messages_removed(path, ids);

        if let Some(message_id) = newest.filter(|_| self.is_authenticated()) {
            if let Err(e) = self.client.read_history(peer, message_id).await {
                warn!(error = %e, "unable to mark history as read");
            }
        }
        Ok(())
    }

    // ---- inbound: SASL -------------------------------------------------

    pub async fn start_mechanism(&mut self, path: &str, mechanism: &str, data: &[u8]) -> Result<()> {
        let challenge = [self.code_challenge.as_mut(), self.password_challenge.as_mut()]
            .into_iter()
            .flatten()
            .find(|c| c.path() == path)
            .ok_or_else(|| Error::InvalidArgument(format!("no auth channel at {path}")))?;

        challenge.start(mechanism)?;
        let kind = challenge.kind();
        self.bus
            .sasl_status_changed(path, SaslStatus::InProgress, "InProgress", &VariantMap::new());

        match kind {
            ChallengeKind::AuthCode => {
                let code = String::from_utf8_lossy(data);
                self.client.sign_in(&self.params.account, code.trim()).await
            }
            ChallengeKind::Password => self.client.try_password(data).await,
        }
    }
}

fn set_challenge_status(
    bus: &dyn MiddlewarePort,
    slot: &mut Option<AuthChallenge>,
    status: SaslStatus,
    reason: &str,
    details: &VariantMap,
) {
    let Some(challenge) = slot else {
        return;
    };
    if challenge.set_status(status) || status == SaslStatus::ServerFailed {
        bus.sasl_status_changed(challenge.path(), status, reason, details);
    }
}

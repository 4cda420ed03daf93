//! Inbound middleware calls: JSON-RPC method name → `Connection` operation.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use morse_core::{
    channel::MessagePart,
    connection::Connection,
    errors::Error,
    handles::Handle,
    ports::VariantMap,
    protocol, Result,
};

use crate::rpc::{respond_err, respond_error, respond_ok, RpcRequest, RpcResponse, METHOD_NOT_FOUND};

#[derive(Debug, Deserialize)]
struct Handles {
    handles: Vec<Handle>,
}

#[derive(Debug, Deserialize)]
struct TypedHandles {
    handle_type: u32,
    handles: Vec<Handle>,
}

#[derive(Debug, Deserialize)]
struct Identifiers {
    handle_type: u32,
    identifiers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Attributes {
    #[serde(default)]
    handles: Vec<Handle>,
    #[serde(default)]
    interfaces: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Subscription {
    handles: Vec<Handle>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Aliases {
    aliases: BTreeMap<Handle, String>,
}

#[derive(Debug, Deserialize)]
struct Presence {
    status: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ChannelRequestParams {
    request: VariantMap,
}

#[derive(Debug, Deserialize)]
struct OnChannel {
    channel: String,
}

#[derive(Debug, Deserialize)]
struct Search {
    channel: String,
    terms: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SendMessage {
    channel: String,
    message: Vec<MessagePart>,
    #[serde(default)]
    flags: u32,
}

#[derive(Debug, Deserialize)]
struct ChatState {
    channel: String,
    state: u32,
}

#[derive(Debug, Deserialize)]
struct Acknowledge {
    channel: String,
    ids: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct StartMechanism {
    channel: String,
    mechanism: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct AccountParameters {
    parameters: VariantMap,
}

#[derive(Debug, Deserialize)]
struct ContactId {
    contact_id: String,
}

fn params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|e| Error::InvalidArgument(format!("bad parameters: {e}")))
}

fn to_json(value: impl serde::Serialize) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Calls that need no connection: the protocol's static description.
fn call_protocol(method: &str, p: Option<Value>) -> Option<Result<Value>> {
    let result = match method {
        "Protocol.Describe" => Ok(protocol::describe()),
        "Protocol.IdentifyAccount" => {
            params::<AccountParameters>(p).and_then(|a| protocol::identify_account(&a.parameters).map(Value::from))
        }
        "Protocol.NormalizeContact" => {
            params::<ContactId>(p).and_then(|c| protocol::normalize_contact(&c.contact_id).map(Value::from))
        }
        _ => return None,
    };
    Some(result)
}

async fn call_connection(conn: &mut Connection, method: &str, p: Option<Value>) -> Option<Result<Value>> {
    let result = match method {
        "Connection.Connect" => conn.connect().await.map(|()| Value::Null),
        "Connection.Disconnect" => conn.disconnect().await.map(|()| Value::Null),
        "Connection.GetStatus" => Ok(json!({
            "status": conn.status() as u32,
            "object-path": conn.object_path(),
            "self-handle": conn.self_handle(),
        })),
        "Connection.InspectHandles" => async {
            let p: TypedHandles = params(p)?;
            to_json(conn.inspect_handles(p.handle_type, &p.handles)?)
        }
        .await,
        "Connection.RequestHandles" => async {
            let p: Identifiers = params(p)?;
            to_json(conn.request_handles(p.handle_type, &p.identifiers)?)
        }
        .await,

        "Requests.CreateChannel" | "Requests.EnsureChannel" => async {
            let p: ChannelRequestParams = params(p)?;
            let (details, yours) = conn.create_channel(&p.request)?;
            let mut reply = json!({ "channel": details.path, "properties": details.properties() });
            if method == "Requests.EnsureChannel" {
                reply["yours"] = json!(yours);
            }
            Ok::<_, Error>(reply)
        }
        .await,
        "Channel.Close" => async {
            let p: OnChannel = params(p)?;
            conn.close_channel(&p.channel).map(|()| Value::Null)
        }
        .await,

        "Contacts.GetContactAttributes" => async {
            let p: Attributes = params(p)?;
            to_json(conn.get_contact_attributes(&p.handles, &p.interfaces))
        }
        .await,
        "ContactList.GetContactListAttributes" => async {
            let p: Attributes = params(p)?;
            to_json(conn.get_contact_list_attributes(&p.interfaces))
        }
        .await,
        "ContactList.RequestSubscription" => async {
            let p: Subscription = params(p)?;
            conn.request_subscription(&p.handles, &p.message)
                .await
                .map(|()| Value::Null)
        }
        .await,
        "ContactList.RemoveContacts" => async {
            let p: Handles = params(p)?;
            conn.remove_contacts(&p.handles).await.map(|()| Value::Null)
        }
        .await,

        "Aliasing.GetAliases" => async {
            let p: Handles = params(p)?;
            to_json(conn.get_aliases(&p.handles)?)
        }
        .await,
        "Aliasing.SetAliases" => async {
            let p: Aliases = params(p)?;
            conn.set_aliases(&p.aliases).map(|()| Value::Null)
        }
        .await,

        "SimplePresence.GetPresences" => async {
            let p: Handles = params(p)?;
            let presences: BTreeMap<Handle, Value> = conn
                .get_presences(&p.handles)?
                .into_iter()
                .map(|(h, presence)| (h, presence.to_value()))
                .collect();
            to_json(presences)
        }
        .await,
        "SimplePresence.SetPresence" => async {
            let p: Presence = params(p)?;
            conn.set_presence(&p.status, &p.message)
                .await
                .map(|()| Value::Null)
        }
        .await,

        "Avatars.GetKnownAvatarTokens" => async {
            let p: Handles = params(p)?;
            to_json(conn.get_known_avatar_tokens(&p.handles)?)
        }
        .await,
        "Avatars.RequestAvatars" => async {
            let p: Handles = params(p)?;
            conn.request_avatars(&p.handles).await.map(|()| Value::Null)
        }
        .await,
        "ContactInfo.GetContactInfo" => async {
            let p: Handles = params(p)?;
            let info: BTreeMap<Handle, Vec<Value>> = conn
                .get_contact_info(&p.handles)?
                .into_iter()
                .map(|(h, fields)| (h, fields.iter().map(|f| f.to_value()).collect()))
                .collect();
            to_json(info)
        }
        .await,

        "RoomList.ListRooms" => async {
            let p: OnChannel = params(p)?;
            conn.list_rooms(&p.channel).map(|()| Value::Null)
        }
        .await,
        "RoomList.StopListing" => async {
            let p: OnChannel = params(p)?;
            conn.stop_listing(&p.channel).map(|()| Value::Null)
        }
        .await,
        "ContactSearch.Search" => async {
            let p: Search = params(p)?;
            conn.search(&p.channel, &p.terms).await.map(|()| Value::Null)
        }
        .await,

        "Messages.SendMessage" => async {
            let p: SendMessage = params(p)?;
            conn.send_message(&p.channel, &p.message, p.flags)
                .await
                .map(Value::from)
        }
        .await,
        "ChatState.SetChatState" => async {
            let p: ChatState = params(p)?;
            conn.set_chat_state(&p.channel, p.state)
                .await
                .map(|()| Value::Null)
        }
        .await,
        "Text.AcknowledgePendingMessages" => async {
            let p: Acknowledge = params(p)?;
            conn.acknowledge_messages(&p.channel, &p.ids)
                .await
                .map(|()| Value::Null)
        }
        .await,

        "FileTransfer.AcceptFile" => async {
            let p: OnChannel = params(p)?;
            conn.accept_file(&p.channel).await.map(|()| Value::Null)
        }
        .await,

        "SASLAuthentication.StartMechanismWithData" => async {
            let p: StartMechanism = params(p)?;
            conn.start_mechanism(&p.channel, &p.mechanism, p.data.as_bytes())
                .await
                .map(|()| Value::Null)
        }
        .await,

        _ => return None,
    };
    Some(result)
}

/// Handle one request. Notifications (no id) get no response.
pub async fn handle_request(conn: &mut Connection, req: RpcRequest) -> Option<RpcResponse> {
    let id = req.id?;
    debug!(method = %req.method, "request");

    let result = match call_protocol(&req.method, req.params.clone()) {
        Some(result) => result,
        None => match call_connection(conn, &req.method, req.params).await {
            Some(result) => result,
            None => return Some(respond_err(id, METHOD_NOT_FOUND, "Method not found")),
        },
    };

    Some(match result {
        Ok(value) => respond_ok(id, value),
        Err(e) => {
            warn!(method = %req.method, error = %e, "request failed");
            respond_error(id, &e)
        }
    })
}

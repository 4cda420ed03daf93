use std::{sync::Arc, time::Duration};

use teloxide::{
    dispatching::{Dispatcher, ShutdownToken},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    update_listeners::Polling,
};
use tracing::debug;

use morse_core::telegram::types::TelegramEvent;

use crate::{lock, mapping, Inner};

/// Start long polling for `bot`; updates become [`TelegramEvent`]s.
/// `timeout` is the long-poll timeout, i.e. how often the server is hit
/// while idle.
pub(crate) fn spawn_polling(bot: Bot, inner: Arc<Inner>, timeout: Duration) -> ShutdownToken {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_channel_post().endpoint(handle_message));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![inner])
        .default_handler(|_update| async {
            debug!("update ignored");
        })
        .build();
    let shutdown = dispatcher.shutdown_token();

    tokio::spawn(async move {
        let listener = Polling::builder(bot).timeout(timeout).build();
        dispatcher
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("telegram polling error"),
            )
            .await;
        debug!("polling stopped");
    });
    shutdown
}

async fn handle_message(msg: Message, inner: Arc<Inner>) -> ResponseResult<()> {
    route_message(&inner, &msg);
    Ok(())
}

/// Update the cache from `msg` and emit the resulting events.
pub(crate) fn route_message(inner: &Inner, msg: &Message) {
    let Some(chat) = mapping::chat_info(msg) else {
        debug!(chat = msg.chat.id.0, "chat id outside the peer space");
        return;
    };
    let peer = chat.peer;
    let sender = msg.from().and_then(mapping::user_info);
    let observed = lock(&inner.cache).observe(sender, chat);

    match mapping::incoming(msg, inner.self_id()) {
        Some(message) => inner.emit(TelegramEvent::MessageReceived(message)),
        None => debug!(message = msg.id.0, "message ids outside the peer space"),
    }
    if observed.new_contact {
        inner.emit(TelegramEvent::ContactListChanged);
    }
    if observed.members_changed {
        inner.emit(TelegramEvent::ChatChanged(peer));
    }
}

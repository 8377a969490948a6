use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use actix_toolbox::ws;
use actix_toolbox::ws::Message;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task;
use uuid::Uuid;

use crate::cache::entries::{AccountEntry, GroupEntry};
use crate::cache::{keys, RelationshipCache};
use crate::service::{MessageDispatcher, PendingMessage, PresenceRegistry};

pub(crate) async fn start_ws_sender(tx: ws::Sender, mut rx: mpsc::Receiver<WsMessage>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            WsMessage::ServerQuitSocket => {
                if let Err(err) = tx.close().await {
                    error!("Error while closing ws sender: {err}");
                }
                break;
            }
            _ => {
                let txt = match serde_json::to_string(&msg) {
                    Ok(v) => v,
                    Err(err) => {
                        error!("Error serializing WsMessage: {err}");
                        continue;
                    }
                };

                if let Err(err) = tx.send(Message::Text(txt.into())).await {
                    error!("Error sending to client: {err}, closing socket");
                    if let Err(err) = tx.close().await {
                        error!("Error closing socket: {err}");
                    }
                }
            }
        }
    }
}

/// Message that is sent via websocket
///
/// The messages will get serialized and deserialized using JSON
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(tag = "type", content = "content", rename_all = "camelCase")]
pub enum WsMessage {
    /// This variant is only used internally to signal a socket handler that it should
    /// shutdown
    #[serde(skip)]
    ServerQuitSocket,
    /// Response to the client if an invalid message was received.
    ///
    /// This can occur, if the server can not deserialize the message, the message has a wrong
    /// type or a message, that should only be sent from the server, is received
    InvalidMessage,
    /// A new friend request was aimed at the receiving account
    IncomingFriendRequest {
        /// Identifier of the request
        request_uuid: Uuid,
        /// The requesting user
        from: AccountEntry,
        /// Message the requester attached
        message: String,
    },
    /// A friend request of the receiving account was answered
    FriendRequestAnswered {
        /// Identifier of the request
        request_uuid: Uuid,
        /// The user that answered
        by: Uuid,
        /// Whether the request was accepted
        accepted: bool,
    },
    /// A new join request was created for a group the receiving account
    /// manages
    IncomingGroupJoinRequest {
        /// Identifier of the request
        request_uuid: Uuid,
        /// The group the applicant wants to join
        group: Uuid,
        /// The applying user
        applicant: AccountEntry,
        /// Message the applicant attached
        message: String,
    },
    /// A join request of the receiving account was answered
    GroupJoinAnswered {
        /// Identifier of the request
        request_uuid: Uuid,
        /// The group the request was aimed at
        group: Uuid,
        /// Whether the request was accepted
        accepted: bool,
    },
    /// The receiving account was added to a group on creation
    AddedToGroup {
        /// The group the account is now a member of
        group: GroupEntry,
    },
}

/// This type is a sender to the websocket manager
pub type WsManagerChan = Sender<WsManagerMessage>;

/// Messages to control the websocket manager
pub enum WsManagerMessage {
    /// Close the socket from the server side
    CloseSocket(Uuid),
    /// Client with given uuid initialized a websocket
    OpenedSocket(Uuid, ws::Sender),
    /// Send a message to given uuid
    SendMessage(Uuid, WsMessage),
    /// Retrieve the current websocket count by sending this
    /// message to the ws manager.
    ///
    /// It will respond through the provided channel
    RetrieveWsCount(oneshot::Sender<u64>),
}

/// Start the websocket manager
///
/// Next to the socket registry it owns the presence side effects: a first
/// open socket marks the account online (routed to this node) and triggers a
/// drain of queued messages, the last closed socket marks it offline.
///
/// It will return a channel to this manager
pub async fn start_ws_manager(
    presence: PresenceRegistry,
    dispatcher: MessageDispatcher,
    node_address: String,
) -> Result<WsManagerChan, String> {
    let mut lookup: HashMap<Uuid, Vec<Sender<WsMessage>>> = HashMap::new();

    let (tx, mut rx) = mpsc::channel(16);

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                WsManagerMessage::CloseSocket(uuid) => {
                    // Trigger close for all websockets associated with uuid
                    if let Some(sockets) = lookup.get(&uuid) {
                        for s in sockets {
                            if !s.is_closed() {
                                if let Err(err) = s.send(WsMessage::ServerQuitSocket).await {
                                    error!("Couldn't send close to ws sender: {err}");
                                }
                            }
                        }
                    }

                    lookup.remove(&uuid);

                    if let Err(err) = presence.set_offline(uuid).await {
                        warn!("Could not mark {uuid} offline: {err}");
                    }
                }
                WsManagerMessage::OpenedSocket(uuid, ws_tx) => {
                    let (tx, rx) = mpsc::channel(16);
                    task::spawn(start_ws_sender(ws_tx, rx));

                    // Add new client connection to state
                    if let Some(sockets) = lookup.get_mut(&uuid) {
                        sockets.push(tx);
                    }
                    // Insert new client connection
                    else {
                        lookup.insert(uuid, vec![tx]);
                    }

                    if let Err(err) = presence.set_online(uuid, &node_address).await {
                        warn!("Could not mark {uuid} online: {err}");
                    }

                    // The account is reachable now, queued messages can flow
                    dispatcher.spawn_drain(uuid);
                }
                WsManagerMessage::SendMessage(uuid, msg) => {
                    if let Some(sender) = lookup.get(&uuid) {
                        for tx in sender {
                            if let Err(err) = tx.send(msg.clone()).await {
                                error!("Could not send to ws sender: {err}");
                            }
                        }
                    }
                }
                WsManagerMessage::RetrieveWsCount(tx) => {
                    let sum = lookup.values().map(|s| s.len() as u64).sum();
                    if tx.send(sum).is_err() {
                        error!("Could not send through callback channel");
                    }
                }
            }
        }
    });

    Ok(tx)
}

const RELAY_POLL_INTERVAL: Duration = Duration::from_millis(200);
const RELAY_BATCH_SIZE: usize = 64;
const SEEN_CAPACITY: usize = 1024;

/// Remembers the ids of recently relayed messages.
///
/// Forwarding is at-most-once per attempt but a partially failed forward can
/// leave duplicates in the routing queue, so the consumer drops every id it
/// has already seen. Bounded, oldest ids are forgotten first.
pub(crate) struct SeenIds {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl SeenIds {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false if the id was seen before
    pub(crate) fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

/// Start the relay loop of this node.
///
/// Consumes the node's routing queue and forwards each message to the local
/// sockets of its recipient. Messages for accounts without a local socket
/// are dropped here; delivery is best-effort by design and the dispatcher
/// only routes to this queue while the presence record points at this node.
pub fn start_relay_loop(
    cache: RelationshipCache,
    node_address: String,
    ws_manager_chan: WsManagerChan,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let queue_key = keys::message_queue(&node_address);
        let mut seen = SeenIds::new(SEEN_CAPACITY);

        loop {
            match cache.queue_pop_many(&queue_key, RELAY_BATCH_SIZE).await {
                Ok(payloads) => {
                    for payload in payloads {
                        let pending: PendingMessage = match serde_json::from_str(&payload) {
                            Ok(v) => v,
                            Err(err) => {
                                warn!("Dropping undecodable relay message: {err}");
                                continue;
                            }
                        };

                        if !seen.insert(pending.id) {
                            debug!("Dropping duplicate relay message {}", pending.id);
                            continue;
                        }

                        if let Err(err) = ws_manager_chan
                            .send(WsManagerMessage::SendMessage(
                                pending.recipient,
                                pending.message,
                            ))
                            .await
                        {
                            error!("Could not send to ws manager chan: {err}");
                        }
                    }
                }
                Err(err) => {
                    warn!("Relay poll on {queue_key} failed: {err}");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RELAY_POLL_INTERVAL) => {}
                _ = shutdown.changed() => {
                    debug!("Stopping relay loop");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{SeenIds, WsMessage};

    #[test]
    fn duplicate_ids_are_dropped() {
        let mut seen = SeenIds::new(8);
        let id = Uuid::new_v4();
        assert!(seen.insert(id));
        assert!(!seen.insert(id));
    }

    #[test]
    fn capacity_is_bounded() {
        let mut seen = SeenIds::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert!(seen.insert(a));
        assert!(seen.insert(b));
        assert!(seen.insert(c));
        // `a` was forgotten to make room
        assert!(seen.insert(a));
        assert!(!seen.insert(c));
    }

    #[test]
    fn ws_messages_use_tagged_json() {
        let serialized = serde_json::to_string(&WsMessage::FriendRequestAnswered {
            request_uuid: Uuid::nil(),
            by: Uuid::nil(),
            accepted: true,
        })
        .unwrap();

        assert!(serialized.contains(r#""type":"friendRequestAnswered""#));
        assert!(serialized.contains(r#""content""#));

        let deserialized: WsMessage = serde_json::from_str(&serialized).unwrap();
        assert!(matches!(
            deserialized,
            WsMessage::FriendRequestAnswered { accepted: true, .. }
        ));
    }
}

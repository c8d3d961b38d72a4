//! Room actor: an isolated Tokio task that owns one room's membership.
//!
//! Every mutation of a room (join, leave, broadcast, close) is a command
//! on the actor's channel, so membership changes and fan-outs for one room
//! are serialized without a lock. Rooms never touch each other.
//!
//! Fan-out never waits on a member. Frames are offered to each member's
//! bounded outbound queue with `try_send`; a member whose queue is full (or
//! whose session is already closed) is evicted on the spot, its session is
//! closed, and the remaining members see `member_left`.
//!
//! The room has at most one owner. When the owner leaves, the longest
//! standing member takes over and everyone is sent `owner_changed`.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use gameroom_protocol::{PlayerId, RoomId, ServerFrame};
use gameroom_session::{ConnectionSession, Player, SessionId};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::registry::Registration;
use crate::{RoomConfig, RoomError, RoomState};

/// Commands sent to a room actor through its channel.
pub(crate) enum RoomCommand {
    Join {
        session: ConnectionSession,
        player: Player,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    Leave {
        session_id: SessionId,
        reply: oneshot::Sender<bool>,
    },

    /// Fire-and-forget: nothing is reported back to the sender.
    Broadcast { sender: SessionId, data: Value },

    GetInfo { reply: oneshot::Sender<RoomInfo> },

    /// Tell every member the room is gone, close their sessions, and stop.
    ///
    /// With `requested_by` set, only the owner's session may do this.
    Close {
        requested_by: Option<SessionId>,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
}

/// A snapshot of room metadata.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    /// The room's code.
    pub room_id: RoomId,
    /// The player in charge of the room. `None` once every member has
    /// left; the next player to join takes over.
    pub owner: Option<PlayerId>,
    /// Current lifecycle state.
    pub state: RoomState,
    /// Players currently in the room, in no particular order.
    pub members: Vec<PlayerId>,
}

/// Handle to a running room actor.
///
/// Cheap to clone. The registry holds one per live room and the dispatch
/// loop of every member holds another.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Returns the room's code.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Returns `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Adds `session` to the room as `player`.
    ///
    /// On success the room has already queued `joined` to the new member and
    /// `member_joined` to everyone else, so nothing the room sends later
    /// can overtake the confirmation.
    ///
    /// # Errors
    /// - `AlreadyMember` if the session is in this or any other room.
    /// - `RoomFull` if the room holds `max_members` players.
    /// - `RoomClosed` if the room has begun teardown.
    pub async fn join(&self, session: ConnectionSession, player: Player) -> Result<(), RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Join {
                session,
                player,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RoomError::RoomClosed(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RoomError::RoomClosed(self.room_id.clone()))?
    }

    /// Removes a session from the room. Returns `false` if it was not a
    /// member (or the room is already gone).
    pub async fn leave(&self, session_id: SessionId) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .sender
            .send(RoomCommand::Leave {
                session_id,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Relays `data` from `sender` to every other member.
    ///
    /// Waits only for room on the actor's command queue, never for
    /// delivery. Broadcasts from a session that is not a member are
    /// dropped by the actor.
    pub async fn broadcast(&self, sender: SessionId, data: Value) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Broadcast { sender, data })
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))
    }

    /// Requests a snapshot of the room's metadata.
    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::GetInfo { reply: reply_tx })
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))
    }

    /// Tears the room down on behalf of the member on `session_id`.
    ///
    /// Every member, the requester included, is sent `room_closed` and
    /// disconnected.
    ///
    /// # Errors
    /// - `NotOwner` if that session is not the owner's.
    /// - `Unavailable` if the room is already gone.
    pub async fn destroy(&self, session_id: SessionId) -> Result<(), RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Close {
                requested_by: Some(session_id),
                reply: reply_tx,
            })
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))?
    }

    /// Closes the room and waits until every member has been sent
    /// `room_closed`. A no-op if the room is already gone.
    pub async fn close(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .sender
            .send(RoomCommand::Close {
                requested_by: None,
                reply: reply_tx,
            })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

impl fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomHandle")
            .field("room_id", &self.room_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Member {
    session: ConnectionSession,
    player: Player,
    /// Join order; the lowest remaining inherits ownership.
    seq: u64,
}

/// What woke the actor loop.
enum Wake {
    Command(Option<RoomCommand>),
    Deadline,
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor {
    room_id: RoomId,
    owner: Option<PlayerId>,
    state: RoomState,
    config: RoomConfig,
    members: HashMap<SessionId, Member>,
    next_seq: u64,
    /// When an unclaimed or emptied room gets torn down.
    deadline: Option<Instant>,
    receiver: mpsc::Receiver<RoomCommand>,
    registration: Registration,
}

impl RoomActor {
    async fn run(mut self) {
        tracing::info!(room_id = %self.room_id, owner = ?self.owner, "room actor started");

        while self.state != RoomState::Closed {
            let wake = match self.deadline {
                Some(deadline) => tokio::select! {
                    cmd = self.receiver.recv() => Wake::Command(cmd),
                    () = tokio::time::sleep_until(deadline) => Wake::Deadline,
                },
                None => Wake::Command(self.receiver.recv().await),
            };

            match wake {
                Wake::Command(Some(cmd)) => self.handle(cmd),
                Wake::Command(None) => self.teardown("all handles dropped"),
                Wake::Deadline => {
                    let reason = match self.state {
                        RoomState::Unclaimed => "never joined",
                        _ => "empty",
                    };
                    self.teardown(reason);
                }
            }
        }

        tracing::info!(room_id = %self.room_id, "room actor stopped");
    }

    fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                session,
                player,
                reply,
            } => {
                let result = self.handle_join(session, player);
                self.settle();
                let _ = reply.send(result);
            }
            RoomCommand::Leave { session_id, reply } => {
                let left = self.handle_leave(session_id);
                self.settle();
                let _ = reply.send(left);
            }
            RoomCommand::Broadcast { sender, data } => {
                self.handle_broadcast(sender, data);
                self.settle();
            }
            RoomCommand::GetInfo { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::Close {
                requested_by: None,
                reply,
            } => {
                self.teardown("closed");
                let _ = reply.send(Ok(()));
            }
            RoomCommand::Close {
                requested_by: Some(session_id),
                reply,
            } => {
                let result = self.check_owner(session_id);
                if result.is_ok() {
                    self.teardown("destroyed by owner");
                }
                let _ = reply.send(result);
            }
        }
    }

    fn handle_join(&mut self, session: ConnectionSession, player: Player) -> Result<(), RoomError> {
        if !self.state.is_joinable() {
            return Err(RoomError::RoomClosed(self.room_id.clone()));
        }
        if self.members.contains_key(&session.id()) {
            return Err(RoomError::AlreadyMember(session.id(), self.room_id.clone()));
        }
        if let Some(current) = session.room() {
            return Err(RoomError::AlreadyMember(session.id(), current));
        }
        if self.members.len() >= self.config.max_members {
            tracing::debug!(room_id = %self.room_id, max = self.config.max_members, "room full");
            return Err(RoomError::RoomFull(self.room_id.clone()));
        }

        let confirmed = session.send(ServerFrame::Joined {
            room_id: self.room_id.clone(),
            player_id: player.id.clone(),
        });
        if !confirmed {
            tracing::warn!(
                room_id = %self.room_id,
                session_id = %session.id(),
                "joining session cannot take frames, disconnecting"
            );
            session.close();
            return Err(RoomError::Unavailable(self.room_id.clone()));
        }

        let session_id = session.id();
        let mut notices = VecDeque::from([(
            ServerFrame::MemberJoined {
                player_id: player.id.clone(),
                player_name: player.name.clone(),
            },
            Some(session_id),
        )]);
        if self.owner.is_none() {
            self.owner = Some(player.id.clone());
            notices.push_back((
                ServerFrame::OwnerChanged {
                    player_id: player.id.clone(),
                },
                None,
            ));
        }

        session.set_room(Some(self.room_id.clone()));
        tracing::info!(
            room_id = %self.room_id,
            %session_id,
            player_id = %player.id,
            name = player.display_name(),
            members = self.members.len() + 1,
            "player joined"
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        let previous = self
            .members
            .insert(session_id, Member { session, player, seq });
        debug_assert!(previous.is_none(), "membership checked above");
        self.transition(RoomState::Active);
        self.deadline = None;

        self.deliver(notices);
        Ok(())
    }

    fn handle_leave(&mut self, session_id: SessionId) -> bool {
        let Some(member) = self.members.remove(&session_id) else {
            return false;
        };
        member.session.set_room(None);
        tracing::info!(
            room_id = %self.room_id,
            %session_id,
            player_id = %member.player.id,
            members = self.members.len(),
            "player left"
        );
        let notices = self.departure_notices(member.player.id);
        self.deliver(notices);
        true
    }

    fn handle_broadcast(&mut self, sender: SessionId, data: Value) {
        let Some(member) = self.members.get(&sender) else {
            tracing::debug!(room_id = %self.room_id, %sender, "broadcast from non-member, ignoring");
            return;
        };
        let frame = ServerFrame::Message {
            sender_id: member.player.id.clone(),
            data,
        };
        self.deliver(VecDeque::from([(frame, Some(sender))]));
    }

    fn check_owner(&self, session_id: SessionId) -> Result<(), RoomError> {
        let is_owner = self
            .members
            .get(&session_id)
            .is_some_and(|member| self.owner.as_ref() == Some(&member.player.id));
        if is_owner {
            Ok(())
        } else {
            tracing::debug!(room_id = %self.room_id, %session_id, "destroy refused, not the owner");
            Err(RoomError::NotOwner(self.room_id.clone()))
        }
    }

    /// Frames announcing that `player_id` is gone, handing ownership to the
    /// longest standing member if they held it.
    fn departure_notices(&mut self, player_id: PlayerId) -> VecDeque<(ServerFrame, Option<SessionId>)> {
        let was_owner = self.owner.as_ref() == Some(&player_id);
        let mut notices = VecDeque::from([(ServerFrame::MemberLeft { player_id }, None)]);
        if !was_owner {
            return notices;
        }

        self.owner = self
            .members
            .values()
            .min_by_key(|member| member.seq)
            .map(|member| member.player.id.clone());
        if let Some(next) = &self.owner {
            tracing::info!(room_id = %self.room_id, owner = %next, "ownership handed over");
            notices.push_back((ServerFrame::OwnerChanged { player_id: next.clone() }, None));
        }
        notices
    }

    /// Offers each queued frame to every member except its `except`.
    ///
    /// Members that cannot take a frame are evicted, which queues their
    /// departure notices behind it. Those go through the same path, so an
    /// eviction storm drains iteratively.
    fn deliver(&mut self, mut pending: VecDeque<(ServerFrame, Option<SessionId>)>) {
        while let Some((frame, except)) = pending.pop_front() {
            let stalled: Vec<SessionId> = self
                .members
                .iter()
                .filter(|(id, _)| Some(**id) != except)
                .filter(|(_, member)| !member.session.send(frame.clone()))
                .map(|(id, _)| *id)
                .collect();

            for session_id in stalled {
                if let Some(member) = self.evict(session_id) {
                    pending.extend(self.departure_notices(member.player.id));
                }
            }
        }
    }

    fn evict(&mut self, session_id: SessionId) -> Option<Member> {
        let member = self.members.remove(&session_id)?;
        member.session.set_room(None);
        member.session.close();
        tracing::warn!(
            room_id = %self.room_id,
            %session_id,
            player_id = %member.player.id,
            "member not keeping up, disconnected"
        );
        Some(member)
    }

    fn transition(&mut self, next: RoomState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "room {} cannot go from {} to {}",
            self.room_id,
            self.state,
            next
        );
        self.state = next;
    }

    /// Reacts to the membership count after a command.
    fn settle(&mut self) {
        if self.state != RoomState::Active || !self.members.is_empty() {
            return;
        }
        if self.config.empty_grace.is_zero() {
            self.teardown("empty");
        } else {
            self.transition(RoomState::Empty);
            self.deadline = Some(Instant::now() + self.config.empty_grace);
            tracing::debug!(
                room_id = %self.room_id,
                grace = ?self.config.empty_grace,
                "room empty, waiting for grace period"
            );
        }
    }

    /// Moves to `Closed`, unregisters, and sends any remaining members
    /// `room_closed` before closing their sessions. Idempotent.
    fn teardown(&mut self, reason: &str) {
        if self.state == RoomState::Closed {
            return;
        }
        self.transition(RoomState::Closed);
        self.deadline = None;
        self.registration.unregister(&self.room_id);

        for (_, member) in self.members.drain() {
            member.session.send(ServerFrame::RoomClosed);
            member.session.set_room(None);
            member.session.close();
        }

        tracing::info!(room_id = %self.room_id, reason, "room closed");
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id.clone(),
            owner: self.owner.clone(),
            state: self.state,
            members: self.members.values().map(|m| m.player.id.clone()).collect(),
        }
    }
}

/// Spawns a room actor task and returns a handle to it.
///
/// The room starts `Unclaimed` and tears itself down if nobody joins within
/// `config.unclaimed_timeout`.
pub(crate) fn spawn_room(
    room_id: RoomId,
    owner: PlayerId,
    config: RoomConfig,
    registration: Registration,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.command_capacity.max(1));

    let actor = RoomActor {
        room_id: room_id.clone(),
        owner: Some(owner),
        state: RoomState::Unclaimed,
        deadline: Some(Instant::now() + config.unclaimed_timeout),
        config,
        members: HashMap::new(),
        next_seq: 0,
        receiver: rx,
        registration,
    };

    tokio::spawn(actor.run());

    RoomHandle { room_id, sender: tx }
}

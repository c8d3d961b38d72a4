//! Room registry: allocates room codes and maps them to live rooms.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use gameroom_protocol::{PlayerId, RoomId};

use crate::id::generate_room_id;
use crate::room::spawn_room;
use crate::{RoomConfig, RoomError, RoomHandle};

/// State shared between the registry handles and the room actors.
///
/// The lock guards plain map operations and is never held across an
/// `.await`, so a room actor can unregister itself synchronously.
struct RegistryShared {
    rooms: Mutex<Rooms>,
    config: RoomConfig,
}

struct Rooms {
    by_id: HashMap<RoomId, Entry>,
    next_generation: u64,
    shutting_down: bool,
}

/// A registered room. The generation tells a reissued code's new room
/// apart from an older room that once held the same code.
struct Entry {
    generation: u64,
    handle: RoomHandle,
}

impl RegistryShared {
    fn lock(&self) -> MutexGuard<'_, Rooms> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, room_id: &RoomId) -> bool {
        let removed = self.lock().by_id.remove(room_id).is_some();
        if removed {
            tracing::debug!(%room_id, "room unregistered");
        }
        removed
    }

    /// Removes `room_id` only if it still maps to the room of `generation`.
    fn unregister(&self, room_id: &RoomId, generation: u64) -> bool {
        let mut rooms = self.lock();
        match rooms.by_id.get(room_id) {
            Some(entry) if entry.generation == generation => {
                rooms.by_id.remove(room_id);
                tracing::debug!(%room_id, generation, "room unregistered");
                true
            }
            Some(_) => {
                tracing::debug!(%room_id, generation, "code reissued, leaving newer room registered");
                false
            }
            None => false,
        }
    }
}

/// A room actor's link back to the registry that created it.
pub(crate) struct Registration {
    shared: Weak<RegistryShared>,
    generation: u64,
}

impl Registration {
    /// A registration for a room no registry knows about.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            shared: Weak::new(),
            generation: 0,
        }
    }

    /// Drops the room's registry entry, unless the registry is gone or
    /// its code now belongs to a newer room.
    pub(crate) fn unregister(&self, room_id: &RoomId) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.unregister(room_id, self.generation))
    }
}

/// The set of live rooms, keyed by code.
///
/// Cheap to clone; clones share the same rooms. Every connection task gets
/// one.
///
/// Codes are unique among live rooms: creation checks for collisions and
/// inserts under the same lock. A code may be reused once its room is
/// gone.
#[derive(Clone)]
pub struct RoomRegistry {
    shared: Arc<RegistryShared>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    pub fn new(config: RoomConfig) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                rooms: Mutex::new(Rooms {
                    by_id: HashMap::new(),
                    next_generation: 0,
                    shutting_down: false,
                }),
                config,
            }),
        }
    }

    /// The configuration every room is created with.
    pub fn config(&self) -> &RoomConfig {
        &self.shared.config
    }

    /// Creates a room owned by `owner` under a fresh code and starts its
    /// actor. The owner is recorded but not joined.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `CapacityExhausted` if every attempted code was taken.
    /// - `ShuttingDown` once [`shutdown`](Self::shutdown) has started.
    pub fn create_room(&self, owner: PlayerId) -> Result<RoomId, RoomError> {
        self.create_room_with(owner, generate_room_id)
    }

    pub(crate) fn create_room_with(
        &self,
        owner: PlayerId,
        mut next_id: impl FnMut() -> RoomId,
    ) -> Result<RoomId, RoomError> {
        let max_attempts = self.shared.config.max_id_attempts;
        let mut rooms = self.shared.lock();
        if rooms.shutting_down {
            return Err(RoomError::ShuttingDown);
        }

        for attempt in 1..=max_attempts {
            let room_id = next_id();
            if rooms.by_id.contains_key(&room_id) {
                tracing::debug!(%room_id, attempt, "room code collision, retrying");
                continue;
            }

            rooms.next_generation += 1;
            let generation = rooms.next_generation;
            let handle = spawn_room(
                room_id.clone(),
                owner.clone(),
                self.shared.config.clone(),
                Registration {
                    shared: Arc::downgrade(&self.shared),
                    generation,
                },
            );
            rooms.by_id.insert(room_id.clone(), Entry { generation, handle });
            tracing::info!(%room_id, %owner, rooms = rooms.by_id.len(), "room created");
            return Ok(room_id);
        }

        tracing::warn!(attempts = max_attempts, "no free room code");
        Err(RoomError::CapacityExhausted(max_attempts))
    }

    /// Looks up a live room.
    pub fn get_room(&self, room_id: &RoomId) -> Option<RoomHandle> {
        self.shared
            .lock()
            .by_id
            .get(room_id)
            .map(|entry| entry.handle.clone())
    }

    /// Unregisters a room. Idempotent; returns `true` if it was present.
    ///
    /// Removing a room that still has members only makes it unreachable
    /// by code; it keeps serving the members that hold its handle, and its
    /// eventual teardown leaves any newer room under the same code alone.
    pub fn remove_room(&self, room_id: &RoomId) -> bool {
        self.shared.remove(room_id)
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.shared.lock().by_id.len()
    }

    /// Returns `true` if no rooms are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Codes of all live rooms, in no particular order.
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.shared.lock().by_id.keys().cloned().collect()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.lock().shutting_down
    }

    /// Closes every room and refuses new ones.
    ///
    /// Returns after every room has queued `room_closed` to its members
    /// and closed their sessions. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let handles: Vec<RoomHandle> = {
            let mut rooms = self.shared.lock();
            rooms.shutting_down = true;
            rooms.by_id.drain().map(|(_, entry)| entry.handle).collect()
        };

        tracing::info!(rooms = handles.len(), "closing all rooms");
        for handle in handles {
            handle.close().await;
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}

impl fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rooms = self.shared.lock();
        f.debug_struct("RoomRegistry")
            .field("rooms", &rooms.by_id.len())
            .field("shutting_down", &rooms.shutting_down)
            .finish()
    }
}

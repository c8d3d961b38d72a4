//! Room code generation.
//!
//! Codes are short and easy to read aloud or type on a phone. They are not
//! secrets: the registry enforces uniqueness by retrying on collision and
//! nothing grants access based on knowing a code being hard to guess.

use gameroom_protocol::RoomId;
use rand::Rng;

/// Number of characters in a room code.
pub const ROOM_ID_LEN: usize = 6;

/// Symbols a room code is drawn from (36 symbols, 36^6 ≈ 2.2 billion codes).
pub const ROOM_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates a random room code, uniformly over [`ROOM_ID_ALPHABET`].
///
/// Never fails. Uniqueness is the registry's job.
pub fn generate_room_id() -> RoomId {
    let mut rng = rand::rng();
    let code: String = (0..ROOM_ID_LEN)
        .map(|_| char::from(ROOM_ID_ALPHABET[rng.random_range(0..ROOM_ID_ALPHABET.len())]))
        .collect();
    RoomId::new(code)
}

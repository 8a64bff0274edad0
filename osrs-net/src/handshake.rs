//! Connection validation: the server sends a random 64-bit challenge, the client answers
//! with `scramble(challenge)`.
//!
//! The transform is fixed and public. It only shows that both ends speak the same protocol;
//! it is not authentication and provides no confidentiality.

use rand::Rng;

/// Bytes exchanged in each direction during the handshake.
pub const HANDSHAKE_SIZE: usize = 8;

const SCRAMBLE_IN: u64 = 0xDEAD_BEEF_C0DE_CAFE;
const SCRAMBLE_OUT: u64 = 0xC0DE_FACE_1234_5678;

// The masks cover the low seven bytes only; the top byte of the swapped value is always zero.
const HIGH_NIBBLES: u64 = 0x00F0_F0F0_F0F0_F0F0;
const LOW_NIBBLES: u64 = 0x000F_0F0F_0F0F_0F0F;

/// Wire-compatible handshake transform.
pub fn scramble(input: u64) -> u64 {
    let out = input ^ SCRAMBLE_IN;
    let out = (out & HIGH_NIBBLES) >> 4 | (out & LOW_NIBBLES) << 4;
    out ^ SCRAMBLE_OUT
}

/// Fresh challenge for one server-side connection.
pub fn challenge() -> u64 {
    rand::thread_rng().gen()
}

pub fn encode(value: u64) -> [u8; HANDSHAKE_SIZE] {
    value.to_ne_bytes()
}

pub fn decode(bytes: [u8; HANDSHAKE_SIZE]) -> u64 {
    u64::from_ne_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(scramble(0), 0xC004_1130_1ED9_FA97);
        assert_eq!(scramble(0x0123_4567_89AB_CDEF), 0xC036_4546_8663_2669);
        assert_eq!(scramble(u64::MAX), 0xC0FB_EECF_E126_0568);
    }

    #[test]
    fn top_byte_is_constant() {
        for _ in 0..64 {
            let x = challenge();
            assert_eq!(scramble(x) >> 56, SCRAMBLE_OUT >> 56);
        }
    }

    #[test]
    fn not_an_involution() {
        let x = 0x0123_4567_89AB_CDEF;
        assert_ne!(scramble(scramble(x)), x);
    }

    #[test]
    fn both_sides_agree() {
        let challenge = challenge();
        let expected = scramble(challenge);
        let on_wire = encode(challenge);
        let response = encode(scramble(decode(on_wire)));
        assert_eq!(decode(response), expected);
    }
}

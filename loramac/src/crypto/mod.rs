//! LoRaWAN cryptographic operations
//!
//! This module provides cryptographic functions for LoRaWAN security:
//! - Message Integrity Code (MIC) computation
//! - Payload encryption/decryption
//! - Join accept decryption
//! - Session key derivation
//! - Class B ping slot randomization
//!
//! Every function builds its own cipher context and scratch blocks on the
//! stack, so calls never share state.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};

use crate::config::device::{AESKey, DevAddr};

/// MIC size in bytes
pub const MIC_SIZE: usize = 4;

/// Block size for AES-128
const BLOCK_SIZE: usize = 16;

/// Direction identifiers for cryptographic operations
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Uplink (device to network)
    Up = 0,
    /// Downlink (network to device)
    Down = 1,
}

/// Crypto engine failure
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// The cipher or CMAC context could not be set up
    CipherSetup,
    /// Output buffer is smaller than the input
    BufferTooSmall,
}

fn new_cipher(key: &AESKey) -> Result<Aes128, CryptoError> {
    Aes128::new_from_slice(key).map_err(|_| CryptoError::CipherSetup)
}

fn new_cmac(key: &AESKey) -> Result<Cmac<Aes128>, CryptoError> {
    <Cmac<Aes128> as Mac>::new_from_slice(key).map_err(|_| CryptoError::CipherSetup)
}

/// Low 32 bits of a CMAC tag, first byte least significant
fn truncate_tag(tag: &[u8]) -> u32 {
    u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]])
}

/// Compute the Message Integrity Code (MIC) of a data frame
///
/// # Arguments
/// * `buffer` - MHDR | FHDR | FPort | FRMPayload
/// * `key` - Network session key
/// * `address` - Device or multicast address
/// * `dir` - Frame direction
/// * `seq_counter` - Full 32-bit frame counter
pub fn compute_mic(
    buffer: &[u8],
    key: &AESKey,
    address: DevAddr,
    dir: Direction,
    seq_counter: u32,
) -> Result<u32, CryptoError> {
    let mut b0 = [0u8; BLOCK_SIZE];
    b0[0] = 0x49;
    b0[5] = dir as u8;
    b0[6..10].copy_from_slice(&address.to_le_bytes());
    b0[10..14].copy_from_slice(&seq_counter.to_le_bytes());
    b0[15] = buffer.len() as u8;

    let mut mac = new_cmac(key)?;
    mac.update(&b0);
    mac.update(buffer);
    let tag = mac.finalize().into_bytes();

    Ok(truncate_tag(&tag))
}

/// Encrypt a frame payload using AES-128 in CTR mode
///
/// `output` must be at least as long as `buffer`; exactly `buffer.len()`
/// bytes are written.
pub fn encrypt_payload(
    buffer: &[u8],
    key: &AESKey,
    address: DevAddr,
    dir: Direction,
    seq_counter: u32,
    output: &mut [u8],
) -> Result<(), CryptoError> {
    if output.len() < buffer.len() {
        return Err(CryptoError::BufferTooSmall);
    }
    let cipher = new_cipher(key)?;

    let mut a_block = [0u8; BLOCK_SIZE];
    a_block[0] = 0x01;
    a_block[5] = dir as u8;
    a_block[6..10].copy_from_slice(&address.to_le_bytes());
    a_block[10..14].copy_from_slice(&seq_counter.to_le_bytes());

    for (i, (chunk, out)) in buffer
        .chunks(BLOCK_SIZE)
        .zip(output.chunks_mut(BLOCK_SIZE))
        .enumerate()
    {
        a_block[15] = (i + 1) as u8;
        let mut s_block = a_block;
        cipher.encrypt_block((&mut s_block).into());
        for (j, byte) in chunk.iter().enumerate() {
            out[j] = byte ^ s_block[j];
        }
    }

    Ok(())
}

/// Decrypt a frame payload
///
/// CTR mode is its own inverse; this is [`encrypt_payload`] under another name.
pub fn decrypt_payload(
    buffer: &[u8],
    key: &AESKey,
    address: DevAddr,
    dir: Direction,
    seq_counter: u32,
    output: &mut [u8],
) -> Result<(), CryptoError> {
    encrypt_payload(buffer, key, address, dir, seq_counter, output)
}

/// Compute the MIC of a join request or a decrypted join accept
pub fn compute_join_frame_mic(buffer: &[u8], key: &AESKey) -> Result<u32, CryptoError> {
    let mut mac = new_cmac(key)?;
    mac.update(buffer);
    let tag = mac.finalize().into_bytes();
    Ok(truncate_tag(&tag))
}

/// Decrypt a join accept payload (everything after the MHDR)
///
/// The network encrypts join accepts with AES decrypt, so the device
/// decrypts with AES encrypt. The second block is only present when the
/// frame carries a CFList.
pub fn decrypt_join_frame(
    buffer: &[u8],
    key: &AESKey,
    output: &mut [u8],
) -> Result<(), CryptoError> {
    if buffer.len() < BLOCK_SIZE || output.len() < buffer.len() {
        return Err(CryptoError::BufferTooSmall);
    }
    let cipher = new_cipher(key)?;

    let mut block = [0u8; BLOCK_SIZE];
    block.copy_from_slice(&buffer[..BLOCK_SIZE]);
    cipher.encrypt_block((&mut block).into());
    output[..BLOCK_SIZE].copy_from_slice(&block);

    if buffer.len() >= 2 * BLOCK_SIZE {
        block.copy_from_slice(&buffer[BLOCK_SIZE..2 * BLOCK_SIZE]);
        cipher.encrypt_block((&mut block).into());
        output[BLOCK_SIZE..2 * BLOCK_SIZE].copy_from_slice(&block);
    }

    Ok(())
}

/// Derive network and application session keys from a join accept
///
/// # Arguments
/// * `key` - Application root key
/// * `app_nonce` - AppNonce (3 bytes) followed by NetID (3 bytes) as received
/// * `dev_nonce` - DevNonce sent in the join request
pub fn compute_skeys_for_join_frame(
    key: &AESKey,
    app_nonce: &[u8; 6],
    dev_nonce: u16,
) -> Result<(AESKey, AESKey), CryptoError> {
    let cipher = new_cipher(key)?;

    let mut nonce = [0u8; BLOCK_SIZE];
    nonce[1..7].copy_from_slice(app_nonce);
    nonce[7..9].copy_from_slice(&dev_nonce.to_le_bytes());

    let mut nwk_skey = nonce;
    nwk_skey[0] = 0x01;
    cipher.encrypt_block((&mut nwk_skey).into());

    let mut app_skey = nonce;
    app_skey[0] = 0x02;
    cipher.encrypt_block((&mut app_skey).into());

    Ok((nwk_skey, app_skey))
}

/// Pseudo-random block used to derive a Class B ping slot offset
///
/// AES-128 with an all-zero key over `beacon_time | address`, both
/// little-endian, zero padded.
pub fn compute_ping_rand(beacon_time: u32, address: DevAddr) -> Result<[u8; 16], CryptoError> {
    let cipher = new_cipher(&[0u8; 16])?;
    let mut block = [0u8; BLOCK_SIZE];
    block[0..4].copy_from_slice(&beacon_time.to_le_bytes());
    block[4..8].copy_from_slice(&address.to_le_bytes());
    cipher.encrypt_block((&mut block).into());
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: AESKey = [
        0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F,
        0x3C,
    ];

    #[test]
    fn mic_is_deterministic_and_input_sensitive() {
        let frame = [0x40, 0x04, 0x03, 0x02, 0x01, 0x00, 0x01, 0x00, 0x01, 0xAA, 0xBB];
        let mic = compute_mic(&frame, &KEY, 0x0102_0304, Direction::Up, 1).unwrap();
        assert_eq!(mic, compute_mic(&frame, &KEY, 0x0102_0304, Direction::Up, 1).unwrap());

        for i in 0..frame.len() {
            let mut altered = frame;
            altered[i] ^= 0x01;
            let other = compute_mic(&altered, &KEY, 0x0102_0304, Direction::Up, 1).unwrap();
            assert_ne!(mic, other, "flipping byte {} left the MIC unchanged", i);
        }
        assert_ne!(mic, compute_mic(&frame, &KEY, 0x0102_0304, Direction::Down, 1).unwrap());
        assert_ne!(mic, compute_mic(&frame, &KEY, 0x0102_0305, Direction::Up, 1).unwrap());
        assert_ne!(mic, compute_mic(&frame, &KEY, 0x0102_0304, Direction::Up, 2).unwrap());
    }

    #[test]
    fn payload_encryption_is_an_involution() {
        let payload = b"twenty-one byte frame";
        let mut encrypted = [0u8; 21];
        let mut decrypted = [0u8; 21];
        encrypt_payload(payload, &KEY, 0x2601_1BDA, Direction::Up, 7, &mut encrypted).unwrap();
        assert_ne!(&encrypted[..], &payload[..]);
        decrypt_payload(&encrypted, &KEY, 0x2601_1BDA, Direction::Up, 7, &mut decrypted).unwrap();
        assert_eq!(&decrypted[..], &payload[..]);
    }

    #[test]
    fn keystream_depends_on_block_index() {
        let zeros = [0u8; 32];
        let mut stream = [0u8; 32];
        encrypt_payload(&zeros, &KEY, 1, Direction::Down, 0, &mut stream).unwrap();
        assert_ne!(stream[..16], stream[16..]);
    }

    #[test]
    fn encryption_rejects_short_output() {
        let mut out = [0u8; 3];
        assert_eq!(
            encrypt_payload(&[0u8; 4], &KEY, 1, Direction::Up, 0, &mut out),
            Err(CryptoError::BufferTooSmall)
        );
    }

    #[test]
    fn join_frame_decryption_inverts_network_side_encryption() {
        use aes::cipher::BlockDecrypt;

        // The network side produces the ciphertext with AES decrypt
        let plain = [0x11u8; 16];
        let cipher = Aes128::new_from_slice(&KEY).unwrap();
        let mut block = plain;
        cipher.decrypt_block((&mut block).into());

        let mut out = [0u8; 16];
        decrypt_join_frame(&block, &KEY, &mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn join_frame_second_block_only_with_cf_list() {
        let input = [0x5Au8; 32];
        let mut out = [0u8; 32];
        decrypt_join_frame(&input[..16], &KEY, &mut out).unwrap();
        assert_eq!(out[16..], [0u8; 16]);
        decrypt_join_frame(&input, &KEY, &mut out).unwrap();
        assert_eq!(out[..16], out[16..]);
    }

    #[test]
    fn session_keys_differ_by_type_byte() {
        let (nwk, app) = compute_skeys_for_join_frame(&KEY, &[1, 2, 3, 4, 5, 6], 0x0708).unwrap();
        assert_ne!(nwk, app);
        let (nwk2, _) = compute_skeys_for_join_frame(&KEY, &[1, 2, 3, 4, 5, 6], 0x0709).unwrap();
        assert_ne!(nwk, nwk2);
    }

    #[test]
    fn ping_rand_changes_with_beacon_time() {
        let a = compute_ping_rand(1_000, 0x2601_1BDA).unwrap();
        let b = compute_ping_rand(1_128, 0x2601_1BDA).unwrap();
        assert_ne!(a, b);
    }
}

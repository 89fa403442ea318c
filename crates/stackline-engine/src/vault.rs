//! Ansible-vault (1.1, AES256) compatible secret codec.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::VaultError;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub const VAULT_HEADER: &str = "$ANSIBLE_VAULT;1.1;AES256";

const CIPHER_KEY_LENGTH: usize = 32;
const HMAC_KEY_LENGTH: usize = 32;
const IV_LENGTH: usize = 16;
const SALT_LENGTH: usize = 32;
const BLOCK_SIZE: usize = 16;
const ITERATIONS: u32 = 10_000;
const LINE_WIDTH: usize = 80;

struct DerivedKey {
    cipher: [u8; CIPHER_KEY_LENGTH],
    hmac: [u8; HMAC_KEY_LENGTH],
    iv: [u8; IV_LENGTH],
}

fn derive_key(password: &str, salt: &[u8]) -> DerivedKey {
    let mut material = [0_u8; CIPHER_KEY_LENGTH + HMAC_KEY_LENGTH + IV_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, ITERATIONS, &mut material);

    let mut key = DerivedKey {
        cipher: [0; CIPHER_KEY_LENGTH],
        hmac: [0; HMAC_KEY_LENGTH],
        iv: [0; IV_LENGTH],
    };
    key.cipher.copy_from_slice(&material[..CIPHER_KEY_LENGTH]);
    key.hmac
        .copy_from_slice(&material[CIPHER_KEY_LENGTH..CIPHER_KEY_LENGTH + HMAC_KEY_LENGTH]);
    key.iv
        .copy_from_slice(&material[CIPHER_KEY_LENGTH + HMAC_KEY_LENGTH..]);
    key
}

fn apply_keystream(key: &DerivedKey, data: &mut [u8]) -> Result<(), VaultError> {
    let mut cipher = Aes256Ctr::new_from_slices(&key.cipher, &key.iv)
        .map_err(|_| VaultError::InvalidKeyLength)?;
    cipher.apply_keystream(data);
    Ok(())
}

fn checksum(key: &DerivedKey, ciphertext: &[u8]) -> Result<HmacSha256, VaultError> {
    let mut mac =
        HmacSha256::new_from_slice(&key.hmac).map_err(|_| VaultError::InvalidKeyLength)?;
    mac.update(ciphertext);
    Ok(mac)
}

/// Whether `data` starts with the vault header line.
#[must_use]
pub fn has_header(data: &[u8]) -> bool {
    let first_line = data.split(|byte| *byte == b'\n').next().unwrap_or_default();
    String::from_utf8_lossy(first_line).trim() == VAULT_HEADER
}

/// Encrypt `plaintext` with `password`.
///
/// # Errors
///
/// Returns an error for an empty password or input that already carries the
/// vault header.
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<Vec<u8>, VaultError> {
    if password.is_empty() {
        return Err(VaultError::EmptyPassword);
    }
    if has_header(plaintext) {
        return Err(VaultError::AlreadyEncrypted);
    }

    let mut salt = [0_u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    let key = derive_key(password, &salt);

    let mut ciphertext = pad(plaintext);
    apply_keystream(&key, &mut ciphertext)?;
    let digest = checksum(&key, &ciphertext)?.finalize().into_bytes();

    let body = [
        hex::encode(salt),
        hex::encode(digest),
        hex::encode(&ciphertext),
    ]
    .join("\n");

    let mut encoded = String::from(VAULT_HEADER);
    encoded.push('\n');
    encoded.push_str(&wrap(&hex::encode(body), LINE_WIDTH));
    encoded.push('\n');
    Ok(encoded.into_bytes())
}

/// Decrypt vault-encoded `data` with `password`.
///
/// # Errors
///
/// Returns an error when the payload is malformed, the password is empty or
/// wrong (checksum mismatch), or the decrypted padding is invalid.
pub fn decrypt(password: &str, data: &[u8]) -> Result<Vec<u8>, VaultError> {
    if password.is_empty() {
        return Err(VaultError::EmptyPassword);
    }

    let text = String::from_utf8_lossy(data);
    let Some((header, body)) = text.split_once('\n') else {
        return Err(VaultError::InvalidHeader);
    };
    if header.trim() != VAULT_HEADER {
        return Err(VaultError::InvalidHeader);
    }

    let joined: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = hex::decode(joined).map_err(|source| VaultError::HexDecode { source })?;
    let decoded = String::from_utf8(decoded).map_err(|_| VaultError::MalformedBody)?;

    let parts: Vec<&str> = decoded.split('\n').collect();
    let [salt, digest, ciphertext] = parts.as_slice() else {
        return Err(VaultError::MalformedBody);
    };
    let salt = hex::decode(salt).map_err(|source| VaultError::HexDecode { source })?;
    let digest = hex::decode(digest).map_err(|source| VaultError::HexDecode { source })?;
    let mut ciphertext =
        hex::decode(ciphertext).map_err(|source| VaultError::HexDecode { source })?;

    let key = derive_key(password, &salt);
    checksum(&key, &ciphertext)?
        .verify_slice(&digest)
        .map_err(|_| VaultError::ChecksumMismatch)?;

    apply_keystream(&key, &mut ciphertext)?;
    unpad(ciphertext)
}

fn pad(data: &[u8]) -> Vec<u8> {
    let pad_length = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + pad_length);
    padded.extend_from_slice(data);
    // pad_length is in 1..=16
    padded.resize(data.len() + pad_length, u8::try_from(pad_length).unwrap_or(0));
    padded
}

fn unpad(mut data: Vec<u8>) -> Result<Vec<u8>, VaultError> {
    let Some(&last) = data.last() else {
        return Err(VaultError::InvalidPadding);
    };
    let pad_length = usize::from(last);
    if pad_length == 0 || pad_length > data.len() {
        return Err(VaultError::InvalidPadding);
    }
    data.truncate(data.len() - pad_length);
    Ok(data)
}

fn wrap(text: &str, width: usize) -> String {
    let mut wrapped = String::with_capacity(text.len() + text.len() / width);
    for (index, character) in text.chars().enumerate() {
        if index > 0 && index % width == 0 {
            wrapped.push('\n');
        }
        wrapped.push(character);
    }
    wrapped
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::{VAULT_HEADER, decrypt, encrypt, has_header};
    use crate::error::VaultError;

    #[test]
    fn encrypted_payload_decrypts_with_same_password() {
        let plaintext = b"db_password: hunter2\n";
        let encrypted = encrypt(plaintext, "right").expect("encrypt");

        assert!(has_header(&encrypted));
        let body = String::from_utf8(encrypted.clone()).expect("utf8");
        assert!(body.lines().skip(1).all(|line| line.len() <= 80));

        let decrypted = decrypt("right", &encrypted).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_password_fails_checksum() {
        let encrypted = encrypt(b"key: value\n", "right").expect("encrypt");
        let error = decrypt("wrong", &encrypted).expect_err("must fail");
        assert!(matches!(error, VaultError::ChecksumMismatch));
    }

    #[test]
    fn refuses_to_encrypt_twice() {
        let encrypted = encrypt(b"key: value\n", "pw").expect("encrypt");
        let error = encrypt(&encrypted, "pw").expect_err("must fail");
        assert!(matches!(error, VaultError::AlreadyEncrypted));
    }

    #[test]
    fn rejects_empty_password() {
        assert!(matches!(
            encrypt(b"x", "").expect_err("must fail"),
            VaultError::EmptyPassword
        ));
        assert!(matches!(
            decrypt("", VAULT_HEADER.as_bytes()).expect_err("must fail"),
            VaultError::EmptyPassword
        ));
    }

    #[test]
    fn plain_yaml_has_no_header() {
        assert!(!has_header(b"key: value\n"));
        assert!(has_header(format!("{VAULT_HEADER}\r\n6162").as_bytes()));
    }

    #[test]
    fn block_aligned_input_round_trips() {
        let plaintext = [b'a'; 32];
        let encrypted = encrypt(&plaintext, "pw").expect("encrypt");
        assert_eq!(decrypt("pw", &encrypted).expect("decrypt"), plaintext);
    }
}

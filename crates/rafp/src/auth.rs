//! Authentication: UAM selection and the FPLogin / FPLoginCont flow.
//!
//! The server's advertised UAM list is intersected with ours; the strongest
//! mutual method wins. Guest, cleartext, Randnum exchange, and DHX2 logins
//! are carried out here; DHCAST128 and Kerberos are recognized during
//! negotiation but reported as unsupported rather than silently downgraded.
//!
//! Multi-stage UAMs ride on kFPAuthContinue: each reply carries a
//! continuation id that the next FPLoginCont echoes back, until the server
//! settles on a final result code.

use {
    crate::{
        error::{AuthError, Error},
        ops,
        proto::{AfpVersion, UamMask, K_FP_AUTH_CONTINUE, K_FP_NO_ERR, UAM_PREFERENCE},
        res,
        session::{DsiSession, Reply},
        utils::Result,
        wire::{Reader, Writer},
    },
    cast5::Cast5,
    cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit},
    des::{
        cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit},
        Des,
    },
    log::{debug, info},
    md5::{Digest, Md5},
    num_bigint::BigUint,
    rand::RngCore,
};

/// Length of the DES challenge and response in "Randnum exchange".
const RANDNUM_CHALLENGE_LEN: usize = 8;

/// DHX2 nonces are 16 byte big-endian counters.
const DHX2_NONCE_LEN: usize = 16;

/// The DHX2 password block is fixed-size, zero filled past the password.
const DHX2_PASSWORD_LEN: usize = 256;

/// CAST-128 CBC initialization vectors, one per direction. Fixed by the
/// protocol; every message restarts the cipher from its IV.
const CAST_IV_C2S: &[u8; 8] = b"LWallace";
const CAST_IV_S2C: &[u8; 8] = b"CJalbert";

type Cast5CbcEnc = cbc::Encryptor<Cast5>;
type Cast5CbcDec = cbc::Decryptor<Cast5>;

/// Credentials offered for a session. An empty username with the guest mask
/// allowed yields a "No User Authent" login.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn is_guest(&self) -> bool {
        self.username.is_empty()
    }
}

/// Pick the strongest UAM both sides speak, constrained to what the caller
/// allows. Guest is only eligible for guest credentials, and never chosen
/// over a real method when a username was given.
pub fn select_uam(
    server: UamMask,
    allowed: UamMask,
    credentials: &Credentials,
) -> ::std::result::Result<UamMask, AuthError> {
    // Empty credentials are an explicit request for guest access; the
    // allowed mask only constrains the authenticating methods.
    let mutual = if credentials.is_guest() {
        server & UamMask::NO_AUTH
    } else {
        server & allowed & !UamMask::NO_AUTH
    };

    for &uam in UAM_PREFERENCE.iter() {
        if mutual.contains(uam) {
            return Ok(uam);
        }
    }
    Err(AuthError::NoCommonUam)
}

/// Run the selected UAM's login conversation over an open session.
pub async fn login(
    session: &DsiSession,
    version: AfpVersion,
    uam: UamMask,
    credentials: &Credentials,
) -> Result<()> {
    if uam == UamMask::NO_AUTH {
        login_guest(session, version).await
    } else if uam == UamMask::CLEARTEXT {
        login_cleartext(session, version, credentials).await
    } else if uam == UamMask::RANDNUM {
        login_randnum(session, version, credentials).await
    } else if uam == UamMask::DHX2 {
        login_dhx2(session, version, credentials).await
    } else {
        let name = uam.wire_name().unwrap_or("unknown");
        res!(AuthError::UnsupportedUam(name))
    }
}

async fn login_guest(session: &DsiSession, version: AfpVersion) -> Result<()> {
    let name = UamMask::NO_AUTH
        .wire_name()
        .ok_or(Error::Auth(AuthError::NoCommonUam))?;
    let payload = ops::build_login(version, name, &[])?;
    finish_login(session.command(&payload).await?.result())?;
    info!("logged in as guest ({})", version.wire_name());
    Ok(())
}

/// "Cleartxt Passwrd": username as a pascal string padded to an even
/// boundary of the request, then the password in a fixed 8 byte block,
/// truncated or zero-filled.
async fn login_cleartext(
    session: &DsiSession,
    version: AfpVersion,
    credentials: &Credentials,
) -> Result<()> {
    let name = UamMask::CLEARTEXT
        .wire_name()
        .ok_or(Error::Auth(AuthError::NoCommonUam))?;

    let payload = ops::build_login_cleartext(
        version,
        name,
        &credentials.username,
        &credentials.password,
    )?;
    finish_login(session.command(&payload).await?.result())?;
    info!(
        "logged in as {} ({})",
        credentials.username,
        version.wire_name()
    );
    Ok(())
}

/// "Randnum exchange": FPLogin names the user, the server answers with an
/// 8 byte challenge, and FPLoginCont returns it DES-encrypted under the
/// password.
async fn login_randnum(
    session: &DsiSession,
    version: AfpVersion,
    credentials: &Credentials,
) -> Result<()> {
    let name = UamMask::RANDNUM
        .wire_name()
        .ok_or(Error::Auth(AuthError::NoCommonUam))?;

    let mut tail = Writer::new();
    tail.pascal(&credentials.username)?;
    let payload = ops::build_login(version, name, &tail.into_vec())?;
    let reply = session.command(&payload).await?;
    let body = expect_continue(&reply)?;

    let (id, challenge) = ops::parse_auth_continue(body, RANDNUM_CHALLENGE_LEN)?;
    if challenge.len() != RANDNUM_CHALLENGE_LEN {
        return Err(Error::Encoding(format!(
            "randnum challenge of {} bytes",
            challenge.len()
        )));
    }
    debug!("randnum continuation id {}", id);

    let mut block = [0u8; RANDNUM_CHALLENGE_LEN];
    block.copy_from_slice(&challenge);
    let response = des_response(&credentials.password, &block);

    let cont = ops::build_login_cont(id, &response)?;
    finish_login(session.command(&cont).await?.result())?;
    info!(
        "logged in as {} (randnum, {})",
        credentials.username,
        version.wire_name()
    );
    Ok(())
}

/// "DHX2": Diffie-Hellman key agreement over server-chosen parameters, an
/// MD5 of the shared secret keying CAST-128, and a nonce round trip proving
/// both sides hold the key before the password block is sent.
async fn login_dhx2(
    session: &DsiSession,
    version: AfpVersion,
    credentials: &Credentials,
) -> Result<()> {
    let name = UamMask::DHX2
        .wire_name()
        .ok_or(Error::Auth(AuthError::NoCommonUam))?;

    let mut tail = Writer::new();
    tail.pascal(&credentials.username)?;
    let payload = ops::build_login(version, name, &tail.into_vec())?;
    let reply = session.command(&payload).await?;
    let body = expect_continue(&reply)?;

    // g, the modulus length, p, and the server's public value Mb.
    let mut r = Reader::new(body);
    let id = r.u16()?;
    let g = BigUint::from(r.u32()?);
    let len = r.u16()? as usize;
    let p = BigUint::from_bytes_be(r.bytes(len)?);
    let mb = BigUint::from_bytes_be(r.bytes(len)?);
    if p.bits() < 2 || g.bits() < 2 {
        return Err(Error::Encoding("degenerate Diffie-Hellman parameters".into()));
    }
    debug!("dhx2 continuation id {}, {} bit modulus", id, p.bits());

    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    let ra = BigUint::from_bytes_be(&secret);
    let ma = g.modpow(&ra, &p);
    let k = mb.modpow(&ra, &p);
    // The key is the MD5 of K's minimal big-endian form, no leading zeros.
    let key: [u8; 16] = Md5::digest(k.to_bytes_be()).into();

    let mut client_nonce = [0u8; DHX2_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut client_nonce);

    // Stage one: our public value, padded to the modulus length, plus the
    // encrypted client nonce.
    let mut tail = Writer::with_capacity(len + DHX2_NONCE_LEN);
    tail.bytes(&pad_be(&ma, len));
    let mut sealed = client_nonce;
    cast5_cbc_encrypt(&key, CAST_IV_C2S, &mut sealed);
    tail.bytes(&sealed);
    let cont = ops::build_login_cont(id, &tail.into_vec())?;
    let reply = session.command(&cont).await?;
    let body = expect_continue(&reply)?;

    // The server proves the key by sending back our nonce plus one, and
    // supplies its own nonce in the same block.
    let mut r = Reader::new(body);
    let id = r.u16()?;
    let mut round = [0u8; 2 * DHX2_NONCE_LEN];
    round.copy_from_slice(r.bytes(2 * DHX2_NONCE_LEN)?);
    cast5_cbc_decrypt(&key, CAST_IV_S2C, &mut round);

    nonce_add_one(&mut client_nonce);
    if round[..DHX2_NONCE_LEN] != client_nonce {
        return res!(AuthError::ServerProofFailed);
    }
    let mut server_nonce = [0u8; DHX2_NONCE_LEN];
    server_nonce.copy_from_slice(&round[DHX2_NONCE_LEN..]);
    nonce_add_one(&mut server_nonce);

    // Stage two: the server's nonce plus one, then the password in its
    // fixed block, all under the client-to-server IV again.
    let mut plain = vec![0u8; DHX2_NONCE_LEN + DHX2_PASSWORD_LEN];
    plain[..DHX2_NONCE_LEN].copy_from_slice(&server_nonce);
    let bytes = credentials.password.as_bytes();
    let n = bytes.len().min(DHX2_PASSWORD_LEN);
    plain[DHX2_NONCE_LEN..DHX2_NONCE_LEN + n].copy_from_slice(&bytes[..n]);
    cast5_cbc_encrypt(&key, CAST_IV_C2S, &mut plain);

    let cont = ops::build_login_cont(id, &plain)?;
    finish_login(session.command(&cont).await?.result())?;
    info!(
        "logged in as {} (dhx2, {})",
        credentials.username,
        version.wire_name()
    );
    Ok(())
}

/// Unwrap a mid-conversation reply: only kFPAuthContinue keeps the
/// exchange going. An early success is as out of step as an early refusal
/// is a rejection.
fn expect_continue(reply: &Reply) -> Result<&[u8]> {
    match reply.result() {
        K_FP_AUTH_CONTINUE => Ok(&reply.body),
        K_FP_NO_ERR => res!(AuthError::OutOfStep),
        code => res!(AuthError::Rejected(code)),
    }
}

/// Map the final reply of a login conversation. No stage remains, so a
/// kFPAuthContinue here means the two sides disagree about the UAM.
fn finish_login(code: i32) -> Result<()> {
    match code {
        K_FP_NO_ERR => Ok(()),
        K_FP_AUTH_CONTINUE => {
            debug!("server wants another login stage past the last one");
            res!(AuthError::OutOfStep)
        }
        code => res!(AuthError::Rejected(code)),
    }
}

/// FPLogout; the session stays open for a later login.
pub async fn logout(session: &DsiSession) -> Result<()> {
    session.command(&ops::build_logout()).await?.check()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Cipher plumbing shared by the UAM conversations
// ---------------------------------------------------------------------------

/// The Randnum DES key is the password zero-padded or truncated to 8 bytes.
fn des_key(password: &str) -> [u8; 8] {
    let mut key = [0u8; 8];
    let bytes = password.as_bytes();
    let n = bytes.len().min(key.len());
    key[..n].copy_from_slice(&bytes[..n]);
    key
}

/// DES-ECB encrypt one challenge block under the password key.
fn des_response(
    password: &str,
    challenge: &[u8; RANDNUM_CHALLENGE_LEN],
) -> [u8; RANDNUM_CHALLENGE_LEN] {
    let cipher = Des::new(&des_key(password).into());
    let mut block = GenericArray::clone_from_slice(challenge);
    cipher.encrypt_block(&mut block);
    block.into()
}

/// Encrypt in place with CAST-128 CBC from a fixed IV. Callers only pass
/// whole blocks.
fn cast5_cbc_encrypt(key: &[u8; 16], iv: &[u8; 8], data: &mut [u8]) {
    let mut enc = Cast5CbcEnc::new(key.into(), iv.into());
    for block in data.chunks_exact_mut(8) {
        enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn cast5_cbc_decrypt(key: &[u8; 16], iv: &[u8; 8], data: &mut [u8]) {
    let mut dec = Cast5CbcDec::new(key.into(), iv.into());
    for block in data.chunks_exact_mut(8) {
        dec.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

/// Left-pad a big-endian value to the modulus length.
fn pad_be(n: &BigUint, len: usize) -> Vec<u8> {
    let bytes = n.to_bytes_be();
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes);
    out
}

/// Increment a nonce as a big-endian counter, wrapping at 2^128.
fn nonce_add_one(nonce: &mut [u8; DHX2_NONCE_LEN]) {
    for b in nonce.iter_mut().rev() {
        let (v, carry) = b.overflowing_add(1);
        *b = v;
        if !carry {
            break;
        }
    }
}

//! Stateless anti-forgery tokens.
//!
//! A token is `<issue time in ms, hex>:<base64url HMAC-SHA1>`, the MAC
//! covering `"<issue time in ms, decimal>:<client identity>"`. Nothing is
//! stored server side: a token is checked by recomputing it from its own
//! time field and the identity of the peer presenting it.

use std::net::SocketAddr;

use {
    axum_extra::extract::cookie::Cookie,
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    hmac::{Hmac, Mac, digest::KeyInit},
    rand::RngCore,
    secrecy::{ExposeSecret, Secret},
    sha1::Sha1,
    subtle::ConstantTimeEq,
    time::{Duration, OffsetDateTime},
};

type HmacSha1 = Hmac<Sha1>;

/// SHA-1 input block size; HMAC zero-pads shorter keys to it.
const MAC_BLOCK_LEN: usize = 64;

/// Length of the per-instance HMAC key.
pub const KEY_LEN: usize = 8;

/// Name of the cookie carrying the token.
pub const XSRF_COOKIE: &str = "XSRF-TOKEN";

/// Tokens older than this are refused.
pub const TOKEN_LIFETIME: Duration = Duration::hours(24);

/// How far in the future an issue time may lie.
pub const CLOCK_SKEW: Duration = Duration::minutes(1);

/// Cookie lifetime; shorter than [`TOKEN_LIFETIME`] so the browser drops the
/// cookie before the server starts refusing it.
pub const COOKIE_MAX_AGE: Duration = Duration::hours(23);

/// Issues and checks tokens with a key generated once per server.
#[derive(Debug)]
pub struct XsrfAuthority {
    key: Secret<[u8; KEY_LEN]>,
}

impl Default for XsrfAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl XsrfAuthority {
    /// Create an authority with a fresh random key.
    pub fn new() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        Self::with_key(key)
    }

    pub fn with_key(key: [u8; KEY_LEN]) -> Self {
        Self {
            key: Secret::new(key),
        }
    }

    /// Token for `client` issued at `now`.
    pub fn issue(&self, client: &str, now: OffsetDateTime) -> String {
        self.token_at(client, unix_millis_ceil(now))
    }

    /// Check `token` for `client` against the current clock.
    pub fn validate(&self, token: &str, client: &str) -> bool {
        self.validate_at(token, client, OffsetDateTime::now_utc())
    }

    /// Check `token` for `client` as of `now`.
    pub fn validate_at(&self, token: &str, client: &str, now: OffsetDateTime) -> bool {
        let Some((millis_hex, _)) = token.split_once(':') else {
            return false;
        };
        let Ok(millis) = i64::from_str_radix(millis_hex, 16) else {
            return false;
        };
        let Ok(issued) =
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        else {
            return false;
        };
        if now - issued >= TOKEN_LIFETIME || issued > now + CLOCK_SKEW {
            return false;
        }
        let expected = self.token_at(client, millis);
        expected.as_bytes().ct_eq(token.as_bytes()).into()
    }

    /// Fresh `XSRF-TOKEN` cookie for the peer at `peer`, plus its value.
    ///
    /// Write it with `Cookie`'s `Display`, which keeps the value verbatim;
    /// the token alphabet needs no escaping.
    pub fn cookie_for(&self, peer: &SocketAddr) -> (Cookie<'static>, String) {
        let token = self.issue(&client_identity(peer), OffsetDateTime::now_utc());
        let cookie = Cookie::build((XSRF_COOKIE, token.clone()))
            .max_age(COOKIE_MAX_AGE)
            .build();
        (cookie, token)
    }

    fn token_at(&self, client: &str, millis: i64) -> String {
        let mut block = [0u8; MAC_BLOCK_LEN];
        block[..KEY_LEN].copy_from_slice(self.key.expose_secret());
        let mut mac = <HmacSha1 as KeyInit>::new(&block.into());
        mac.update(format!("{millis}:{client}").as_bytes());
        let digest = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{millis:x}:{digest}")
    }
}

/// Identity a token is bound to: the peer's IP without the port.
pub fn client_identity(peer: &SocketAddr) -> String {
    peer.ip().to_canonical().to_string()
}

/// Unix time in milliseconds, rounded up.
fn unix_millis_ceil(now: OffsetDateTime) -> i64 {
    let millis = (now.unix_timestamp_nanos() + 999_999).div_euclid(1_000_000);
    i64::try_from(millis).unwrap_or(i64::MAX)
}

//! Identity tags embedded in relayed text.
//!
//! A forwarded message carries a tag naming the originating user, e.g.
//! `[👤 USER:42:0123456789abcdef](tg://user?id=42)`. When the administrator
//! replies, the tag is parsed back out of the replied-to text and its
//! signature re-checked, so a reply can be routed without any session state.
//!
//! Formats are tried in a fixed priority order ([`TagFormat::PRIORITY`]); the
//! first format that matches anywhere in the text decides the outcome, even
//! if that outcome is "unresolvable". Older unsigned formats are only reached
//! when no newer marker is present.

use std::sync::OnceLock;

use hmac::{Hmac, Mac};
use regex::Regex;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::constants::SIGNATURE_HEX_LEN;
use crate::error::TagError;
use crate::types::validate_user_id;

type HmacSha256 = Hmac<Sha256>;

/// How signatures are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningMode {
    /// HMAC-SHA256 keyed with the configured secret.
    Keyed,
    /// Plain SHA-256 with no secret. Anyone can forge tags in this mode.
    Degraded,
}

/// Historical and current tag renderings, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagFormat {
    /// `[@name (id:sig)](https://t.me/name)`
    MentionSigned,
    /// `[@name](https://t.me/name)`
    MentionLegacy,
    /// `[👤 USER:id:sig](tg://user?id=id)`
    DeepLinkSigned,
    /// `[👤 USER:id](tg://user?id=id)`
    DeepLinkLegacy,
    /// `[USER:id:sig]`
    BracketSigned,
    /// `[USER:id]`
    BracketLegacy,
}

impl TagFormat {
    pub const PRIORITY: [TagFormat; 6] = [
        TagFormat::MentionSigned,
        TagFormat::MentionLegacy,
        TagFormat::DeepLinkSigned,
        TagFormat::DeepLinkLegacy,
        TagFormat::BracketSigned,
        TagFormat::BracketLegacy,
    ];

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            TagFormat::MentionSigned | TagFormat::DeepLinkSigned | TagFormat::BracketSigned
        )
    }

    fn pattern(self) -> &'static Regex {
        static PATTERNS: OnceLock<[Regex; 6]> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(|| {
            [
                r"\[@[A-Za-z0-9_]+ \((\d+):([a-f0-9]{16})\)\]\(https://t\.me/[A-Za-z0-9_]+\)",
                r"\[@([A-Za-z0-9_]+)\]\(https://t\.me/[A-Za-z0-9_]+\)",
                r"\[👤 USER:(\d+):([a-f0-9]{16})\]\(tg://user\?id=\d+\)",
                r"\[👤 USER:(\d+)\]\(tg://user\?id=\d+\)",
                r"\[USER:(\d+):([a-f0-9]{16})\]",
                // `[USER:1]` must not be the prefix of `[USER:1]:...` or `[USER:1]x`
                r"\[USER:(\d+)\](?:[^:A-Za-z0-9_]|$)",
            ]
            .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid tag pattern {p}: {e}")))
        });
        &patterns[self as usize]
    }
}

/// A tag found in text, before verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTag {
    pub user_id: i64,
    pub signature: String,
    pub format: TagFormat,
}

/// What the highest-priority matching format says about the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagResolution {
    /// Signed tag whose signature checked out.
    Verified(i64),
    /// Unsigned legacy tag; the id is trusted as-is.
    LegacyTrusted(i64),
    /// Legacy mention: a username alone cannot be mapped back to an id.
    Unrecoverable,
    /// Signed tag with a bad signature.
    Mismatch(SignedTag),
    /// The marker matched but the id is not a usable integer.
    Invalid,
}

impl TagResolution {
    pub fn user_id(&self) -> Option<i64> {
        match self {
            TagResolution::Verified(id) | TagResolution::LegacyTrusted(id) => Some(*id),
            _ => None,
        }
    }
}

/// Compute the 16-hex-char signature for `user_id`.
pub fn sign(user_id: i64, secret: Option<&str>) -> Result<String, TagError> {
    validate_user_id(user_id)?;

    let digest = match secret.filter(|s| !s.is_empty()) {
        Some(secret) => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|_| TagError::InvalidKey)?;
            mac.update(format!("user:{user_id}").as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
        None => Sha256::digest(format!("user:{user_id}:fallback").as_bytes()).to_vec(),
    };

    let mut encoded = hex::encode(digest);
    encoded.truncate(SIGNATURE_HEX_LEN);
    Ok(encoded)
}

/// Stateless signer/parser bound to one secret.
#[derive(Clone)]
pub struct TagCodec {
    secret: Option<String>,
}

impl std::fmt::Debug for TagCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagCodec")
            .field("mode", &self.mode())
            .finish()
    }
}

impl TagCodec {
    /// An empty secret counts as no secret.
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn mode(&self) -> SigningMode {
        if self.secret.is_some() {
            SigningMode::Keyed
        } else {
            SigningMode::Degraded
        }
    }

    pub fn sign(&self, user_id: i64) -> Result<String, TagError> {
        sign(user_id, self.secret.as_deref())
    }

    pub fn verify(&self, user_id: i64, signature: &str) -> bool {
        match self.sign(user_id) {
            Ok(expected) => {
                expected.len() == signature.len()
                    && bool::from(expected.as_bytes().ct_eq(signature.as_bytes()))
            }
            Err(_) => false,
        }
    }

    /// Render a clickable identity marker. If signing fails the unsigned
    /// legacy rendering is returned instead.
    pub fn build_tag(&self, user_id: i64, username: Option<&str>) -> String {
        let username = username.filter(|u| !u.is_empty());
        match (self.sign(user_id), username) {
            (Ok(sig), Some(name)) => format!("[@{name} ({user_id}:{sig})](https://t.me/{name})"),
            (Ok(sig), None) => format!("[👤 USER:{user_id}:{sig}](tg://user?id={user_id})"),
            (Err(e), name) => {
                warn!(user_id, error = %e, "Signing failed, emitting unverifiable tag");
                match name {
                    Some(name) => format!("[@{name}](https://t.me/{name})"),
                    None => format!("[👤 USER:{user_id}](tg://user?id={user_id})"),
                }
            }
        }
    }

    /// Locate the highest-priority tag in `text` and judge it.
    pub fn resolve(&self, text: &str) -> Option<(TagFormat, TagResolution)> {
        TagFormat::PRIORITY.iter().find_map(|&format| {
            let caps = format.pattern().captures(text)?;
            let resolution = match format {
                TagFormat::MentionLegacy => {
                    info!(
                        username = caps.get(1).map(|m| m.as_str()),
                        "Legacy mention tag, user id unrecoverable"
                    );
                    TagResolution::Unrecoverable
                }
                TagFormat::DeepLinkLegacy | TagFormat::BracketLegacy => {
                    match caps[1].parse::<i64>() {
                        Ok(id) => {
                            info!(user_id = id, ?format, "Accepting unsigned legacy tag");
                            TagResolution::LegacyTrusted(id)
                        }
                        Err(_) => TagResolution::Invalid,
                    }
                }
                _ => match caps[1].parse::<i64>() {
                    Ok(id) => self.check(SignedTag {
                        user_id: id,
                        signature: caps[2].to_string(),
                        format,
                    }),
                    Err(_) => TagResolution::Invalid,
                },
            };
            Some((format, resolution))
        })
    }

    /// Recover the user id carried by `text`, if any.
    pub fn extract_user_id(&self, text: &str) -> Option<i64> {
        self.resolve(text).and_then(|(_, r)| r.user_id())
    }

    fn check(&self, tag: SignedTag) -> TagResolution {
        if self.verify(tag.user_id, &tag.signature) {
            TagResolution::Verified(tag.user_id)
        } else {
            let err = TagError::SignatureMismatch {
                user_id: tag.user_id,
            };
            warn!(
                user_id = tag.user_id,
                signature = %tag.signature,
                format = ?tag.format,
                error = %err,
                "Identity tag failed verification (tampering or secret rotation)"
            );
            TagResolution::Mismatch(tag)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> TagCodec {
        TagCodec::new(Some("s3cr3t".to_string()))
    }

    #[test]
    fn test_sign_deterministic() {
        let a = sign(42, Some("s3cr3t")).unwrap();
        let b = sign(42, Some("s3cr3t")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_sign_depends_on_secret() {
        let a = sign(42, Some("s3cr3t")).unwrap();
        let b = sign(42, Some("other")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_sign_no_collisions() {
        let mut seen = std::collections::HashSet::new();
        for id in 1..=5000 {
            assert!(seen.insert(sign(id, Some("s3cr3t")).unwrap()));
        }
    }

    #[test]
    fn test_degraded_mode_is_distinct() {
        let degraded = TagCodec::new(None);
        assert_eq!(degraded.mode(), SigningMode::Degraded);
        assert_eq!(TagCodec::new(Some(String::new())).mode(), SigningMode::Degraded);
        assert_eq!(keyed().mode(), SigningMode::Keyed);

        let unkeyed = degraded.sign(42).unwrap();
        assert_ne!(unkeyed, keyed().sign(42).unwrap());

        // Degraded signatures are a plain SHA-256 prefix.
        let expected = hex::encode(Sha256::digest(b"user:42:fallback"));
        assert_eq!(unkeyed, expected[..16]);
    }

    #[test]
    fn test_sign_rejects_non_positive_ids() {
        assert!(sign(0, Some("k")).is_err());
        assert!(sign(-5, Some("k")).is_err());
    }

    #[test]
    fn test_round_trip_both_renderings() {
        let codec = keyed();
        for id in [1_i64, 42, 123_456_789, 7_000_000_000] {
            let plain = codec.build_tag(id, None);
            assert_eq!(codec.extract_user_id(&plain), Some(id), "{plain}");

            let mention = codec.build_tag(id, Some("some_user"));
            assert_eq!(codec.extract_user_id(&mention), Some(id), "{mention}");
        }
    }

    #[test]
    fn test_round_trip_inside_surrounding_text() {
        let codec = keyed();
        let text = format!("📝 New message:\nhello\n\n📍 From: {}", codec.build_tag(99, None));
        assert_eq!(codec.extract_user_id(&text), Some(99));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let codec = keyed();
        let tag = codec.build_tag(42, None);
        let sig = codec.sign(42).unwrap();
        let first = sig.chars().next().unwrap();
        let flipped = if first == '0' { '1' } else { '0' };
        let tampered_sig = format!("{flipped}{}", &sig[1..]);
        let tampered = tag.replace(&sig, &tampered_sig);

        let (format, resolution) = codec.resolve(&tampered).unwrap();
        assert_eq!(format, TagFormat::DeepLinkSigned);
        assert!(matches!(resolution, TagResolution::Mismatch(_)));
        assert_eq!(codec.extract_user_id(&tampered), None);
    }

    #[test]
    fn test_tag_from_other_secret_rejected() {
        let tag = TagCodec::new(Some("old".into())).build_tag(42, Some("bob"));
        assert_eq!(keyed().extract_user_id(&tag), None);
    }

    #[test]
    fn test_legacy_formats_trusted() {
        let codec = keyed();
        assert_eq!(
            codec.extract_user_id("[👤 USER:77](tg://user?id=77)"),
            Some(77)
        );
        assert_eq!(codec.extract_user_id("from [USER:88] today"), Some(88));
        assert_eq!(codec.extract_user_id("[USER:88]"), Some(88));
    }

    #[test]
    fn test_bracket_legacy_requires_boundary() {
        let codec = keyed();
        assert_eq!(codec.extract_user_id("[USER:88]:x"), None);
        assert_eq!(codec.extract_user_id("[USER:88]abc"), None);
    }

    #[test]
    fn test_legacy_mention_unrecoverable() {
        let codec = keyed();
        let text = "[@alice](https://t.me/alice) and [USER:5]";
        let (format, resolution) = codec.resolve(text).unwrap();
        assert_eq!(format, TagFormat::MentionLegacy);
        assert_eq!(resolution, TagResolution::Unrecoverable);
        assert_eq!(codec.extract_user_id(text), None);
    }

    #[test]
    fn test_signed_marker_beats_legacy() {
        let codec = keyed();
        let text = format!("[USER:5] spoof {}", codec.build_tag(42, None));
        assert_eq!(codec.extract_user_id(&text), Some(42));

        let text = format!("[👤 USER:5](tg://user?id=5) {}", codec.build_tag(43, Some("eve")));
        assert_eq!(codec.extract_user_id(&text), Some(43));
    }

    #[test]
    fn test_bad_signed_marker_not_rescued_by_legacy() {
        let codec = keyed();
        let text = "[USER:5:0000000000000000] [USER:6]";
        assert_eq!(codec.extract_user_id(text), None);
    }

    #[test]
    fn test_bracket_signed() {
        let codec = keyed();
        let text = format!("[USER:42:{}]", codec.sign(42).unwrap());
        assert_eq!(
            codec.resolve(&text),
            Some((TagFormat::BracketSigned, TagResolution::Verified(42)))
        );
    }

    #[test]
    fn test_no_tag() {
        assert_eq!(keyed().resolve("just text"), None);
        assert_eq!(keyed().extract_user_id(""), None);
    }

    #[test]
    fn test_overflowing_id_is_invalid() {
        let codec = keyed();
        let text = "[USER:99999999999999999999999]";
        assert_eq!(
            codec.resolve(text),
            Some((TagFormat::BracketLegacy, TagResolution::Invalid))
        );
    }

    #[test]
    fn test_build_tag_falls_back_when_unsignable() {
        let codec = keyed();
        assert_eq!(codec.build_tag(-10, None), "[👤 USER:-10](tg://user?id=-10)");
        assert_eq!(codec.build_tag(-10, Some("bob")), "[@bob](https://t.me/bob)");
    }
}

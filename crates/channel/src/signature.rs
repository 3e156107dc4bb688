use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::ChannelError;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Checks an `X-Hub-Signature-256` header against the raw request body.
pub fn verify_signature(
    app_secret: &[u8],
    body: &[u8],
    header: Option<&str>,
) -> Result<(), ChannelError> {
    let header = header
        .ok_or_else(|| ChannelError::Signature("missing X-Hub-Signature-256 header".to_string()))?;
    let hex = header
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| ChannelError::Signature("signature must start with `sha256=`".to_string()))?;
    let expected = decode_hex(hex)
        .ok_or_else(|| ChannelError::Signature("signature is not valid hex".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(app_secret)
        .map_err(|error| ChannelError::Signature(format!("unusable app secret: {error}")))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| ChannelError::Signature("signature does not match payload".to_string()))
}

pub fn sign(app_secret: &[u8], body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(app_secret).ok()?;
    mac.update(body);
    Some(format!("{SIGNATURE_PREFIX}{}", encode_hex(mac.finalize().into_bytes().as_slice())))
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 || !raw.is_ascii() {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&raw[index..index + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{sign, verify_signature};
    use crate::ChannelError;

    const SECRET: &[u8] = b"app-secret";
    const BODY: &[u8] = br#"{"entry":[]}"#;

    #[test]
    fn accepts_matching_signature() {
        let header = sign(SECRET, BODY).expect("sign");
        assert!(header.starts_with("sha256="));
        assert_eq!(verify_signature(SECRET, BODY, Some(&header)), Ok(()));
    }

    #[test]
    fn rejects_tampered_body_and_malformed_headers() {
        let header = sign(SECRET, BODY).expect("sign");
        assert!(matches!(
            verify_signature(SECRET, br#"{"entry":[1]}"#, Some(&header)),
            Err(ChannelError::Signature(_))
        ));
        assert!(verify_signature(SECRET, BODY, None).is_err());
        assert!(verify_signature(SECRET, BODY, Some("md5=abcd")).is_err());
        assert!(verify_signature(SECRET, BODY, Some("sha256=zz")).is_err());
    }
}

//! Client certificate metadata extraction
//!
//! The proxy forwards the validated client certificate chain as a
//! URL-escaped concatenation of PEM blocks. Malformed metadata degrades to
//! "no certificate"; it never fails a check.

use pem::{EncodeConfig, LineEnding, Pem};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::http::query_unescape;

/// Filter-metadata namespace the proxy uses for client certificate info
pub const CLIENT_CERTIFICATE_METADATA_NAMESPACE: &str = "com.sentinel.client-certificate-info";

const PEM_BEGIN: &str = "-----BEGIN ";
const PEM_END: &str = "-----END ";

/// Client certificate presented on the downstream connection.
///
/// The default value means no usable certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCertificateInfo {
    /// Whether the client presented a certificate at all
    pub presented: bool,

    /// Leaf certificate (PEM)
    pub leaf: String,

    /// Remaining chain (zero or more PEM blocks), verbatim
    pub intermediates: String,
}

/// Translate proxy certificate metadata into [`ClientCertificateInfo`]
pub fn client_certificate_info(
    metadata: Option<&serde_json::Map<String, serde_json::Value>>,
) -> ClientCertificateInfo {
    let mut info = ClientCertificateInfo::default();
    let Some(metadata) = metadata else {
        return info;
    };

    info.presented = metadata
        .get("presented")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let escaped_chain = metadata.get("chain").and_then(|v| v.as_str()).unwrap_or("");
    if escaped_chain.is_empty() {
        // no validated client certificate
        return info;
    }

    let Some(chain) = query_unescape(escaped_chain) else {
        error!(chain = escaped_chain, "received unexpected client certificate \"chain\" value");
        return info;
    };

    let Some((leaf, rest)) = split_first_pem_block(&chain) else {
        error!(
            chain = escaped_chain,
            "received unexpected client certificate \"chain\" value (no PEM block found)"
        );
        return info;
    };

    info.leaf = pem::encode_config(&leaf, EncodeConfig::new().set_line_ending(LineEnding::LF));
    info.intermediates = rest.to_string();
    info
}

/// Decode the first well-formed PEM block, returning it with everything
/// after its END line. A BEGIN line only counts at the start of a line; text
/// before the block is skipped, as are blocks that fail to decode.
fn split_first_pem_block(data: &str) -> Option<(Pem, &str)> {
    let mut from = 0;

    loop {
        let begin = from + data[from..].find(PEM_BEGIN)?;
        from = begin + PEM_BEGIN.len();
        if begin > 0 && !data[..begin].ends_with('\n') {
            continue;
        }
        let block = &data[begin..];

        let end_marker = block.find(PEM_END)?;
        let after_end = &block[end_marker + PEM_END.len()..];
        let close = after_end.find("-----")? + "-----".len();
        let end_line = end_marker + PEM_END.len() + close;
        let block_end = match block[end_line..].find('\n') {
            Some(newline) => end_line + newline + 1,
            None => block.len(),
        };

        if let Ok(parsed) = pem::parse(&block[..block_end]) {
            return Some((parsed, &block[block_end..]));
        }
    }
}

//! Extension identity and activation.
//!
//! The payment protocol rides on the generic task substrate as a declared
//! extension: agents advertise it in their capability card and clients
//! activate it per request through the extensions header.

use serde::{Deserialize, Serialize};

use crate::proto::X402_VERSION;

/// Canonical identifier of the payment extension.
pub const X402_EXTENSION_URI: &str =
    "https://google-a2a.github.io/A2A/extensions/payments/x402/v0.1";

/// HTTP header through which clients activate extensions.
pub const EXTENSIONS_HEADER: &str = "X-A2A-Extensions";

/// Extension entry for an agent capability card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDeclaration {
    /// Extension identifier.
    pub uri: String,
    /// Human-readable summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the agent refuses requests that do not activate it.
    #[serde(default)]
    pub required: bool,
}

/// Configuration for declaring the payment extension.
#[derive(Debug, Clone)]
pub struct ExtensionConfig {
    /// Extension identifier.
    pub uri: String,
    /// Extension revision advertised in the declaration.
    pub version: String,
    /// x402 protocol version spoken.
    pub x402_version: u32,
    /// Whether activation is mandatory for this agent.
    pub required: bool,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            uri: X402_EXTENSION_URI.to_owned(),
            version: "0.1".to_owned(),
            x402_version: X402_VERSION,
            required: true,
        }
    }
}

impl ExtensionConfig {
    /// Returns `true` if a request carrying the given extensions header
    /// may proceed.
    ///
    /// When the extension is required, a request that does not activate
    /// this configuration's URI must be rejected before any payment
    /// logic runs. Optional configurations admit every request.
    #[must_use]
    pub fn permits(&self, header_value: Option<&str>) -> bool {
        if !self.required {
            return true;
        }
        header_value.is_some_and(|value| value.split(',').any(|entry| entry.trim() == self.uri))
    }

    /// Builds the capability-card declaration for this configuration.
    #[must_use]
    pub fn declaration(&self) -> ExtensionDeclaration {
        ExtensionDeclaration {
            uri: self.uri.clone(),
            description: Some(format!(
                "Supports x402 payments (v{}, extension {})",
                self.x402_version, self.version
            )),
            required: self.required,
        }
    }
}

/// Value a client sends under [`EXTENSIONS_HEADER`] to activate payments.
#[must_use]
pub const fn activation_header() -> &'static str {
    X402_EXTENSION_URI
}

/// Returns `true` if an extensions header value activates the payment
/// extension.
///
/// The header carries a comma-separated list of URIs; matching is exact
/// per entry after trimming whitespace.
#[must_use]
pub fn header_activates(header_value: &str) -> bool {
    header_value
        .split(',')
        .any(|entry| entry.trim() == X402_EXTENSION_URI)
}

//! Registry of well-known networks and their default settlement assets.

/// Default payment asset (USDC contract) for well-known networks.
///
/// Used by the requirement builder when the merchant does not name an
/// asset explicitly. Unknown networks have no default and require an
/// explicit asset.
#[must_use]
pub fn default_asset(network: &str) -> Option<&'static str> {
    match network {
        "base" => Some("0x833589fCD6eDb6E08f4c7C32D4f71b54bda02913"),
        "base-sepolia" => Some("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
        "avalanche" => Some("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
        "avalanche-fuji" => Some("0x5425890298aed601595a70AB815c96711a31Bc65"),
        _ => None,
    }
}

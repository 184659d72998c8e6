use crate::config::FingerprintConfig;
use crate::error::{FingerprintError, Result};
use crate::normalize::{normalize, tokenize};
use crate::types::{Fingerprint, Fingerprinted};
use crate::winnow::{chunk_hashes, winnow};

/// Main fingerprinter interface
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    config: FingerprintConfig,
}

impl Fingerprinter {
    /// Create a new fingerprinter. The configuration is validated on every
    /// call to [`Fingerprinter::fingerprint`].
    #[must_use]
    pub const fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// Normalize and fingerprint raw source text.
    pub fn fingerprint(&self, raw_text: &str) -> Result<Fingerprinted> {
        fingerprint(raw_text, &self.config)
    }

    /// Like [`Fingerprinter::fingerprint`], but never fails: unusable input
    /// is logged and yields a degenerate fingerprint.
    #[must_use]
    pub fn fingerprint_or_degenerate(&self, raw_text: &str) -> Fingerprinted {
        match self.fingerprint(raw_text) {
            Ok(result) => result,
            Err(err) => {
                log::warn!("Fingerprinting degraded to singleton signature: {err}");
                Fingerprinted::degenerate(normalize(raw_text, self.config.strip_comments))
            }
        }
    }
}

/// Normalize and fingerprint raw source text with an explicit configuration.
pub fn fingerprint(raw_text: &str, config: &FingerprintConfig) -> Result<Fingerprinted> {
    config.validate().map_err(FingerprintError::invalid_config)?;

    if raw_text.trim().is_empty() {
        return Err(FingerprintError::invalid_input(
            "source text is empty or whitespace-only",
        ));
    }

    let normalized_text = normalize(raw_text, config.strip_comments);
    let tokens = tokenize(&normalized_text);
    if tokens.is_empty() {
        return Err(FingerprintError::invalid_input(
            "source text contains no tokens after normalization",
        ));
    }

    let chunks = chunk_hashes(&tokens, config.chunk_size);
    let selected = winnow(&chunks, config.window_size);
    if selected.is_empty() {
        return Err(FingerprintError::failure(format!(
            "winnowing selected no hashes from {} chunks",
            chunks.len()
        )));
    }

    Ok(Fingerprinted {
        normalized_text,
        fingerprint: Fingerprint::from_hashes(selected, chunks.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::similarity;

    const TOKEN: &str = r"
// SPDX-License-Identifier: MIT
pragma solidity ^0.8.0;

contract Token {
    mapping(address => uint256) private balances;
    address private owner;

    constructor() { owner = msg.sender; }

    function transfer(address to, uint256 amount) public returns (bool) {
        require(balances[msg.sender] >= amount, 'insufficient');
        balances[msg.sender] -= amount;
        balances[to] += amount;
        return true;
    }
}
";

    #[test]
    fn test_fingerprint_empty_content() {
        let fingerprinter = Fingerprinter::default();
        assert!(matches!(
            fingerprinter.fingerprint(""),
            Err(FingerprintError::InvalidInput(_))
        ));
        assert!(matches!(
            fingerprinter.fingerprint(" \n\t "),
            Err(FingerprintError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_comment_only_content_is_invalid() {
        let fingerprinter = Fingerprinter::default();
        assert!(matches!(
            fingerprinter.fingerprint("// nothing here\n/* at all */"),
            Err(FingerprintError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_invalid_config_reported() {
        let fingerprinter = Fingerprinter::new(FingerprintConfig {
            chunk_size: 0,
            ..Default::default()
        });
        assert!(matches!(
            fingerprinter.fingerprint("contract A {}"),
            Err(FingerprintError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_degenerate_fallback() {
        let fingerprinter = Fingerprinter::default();
        let result = fingerprinter.fingerprint_or_degenerate("   ");
        assert!(result.fingerprint.is_degenerate());
        assert_eq!(result.normalized_text, "");
    }

    #[test]
    fn test_tiny_contract_fingerprints() {
        let fingerprinter = Fingerprinter::default();
        let result = fingerprinter.fingerprint("contract A{}").unwrap();
        assert_eq!(result.normalized_text, "contract A{}");
        assert_eq!(result.fingerprint.chunk_count, 1);
        assert_eq!(result.fingerprint.len(), 1);
    }

    #[test]
    fn test_identical_text_scores_max() {
        let fingerprinter = Fingerprinter::default();
        let a = fingerprinter.fingerprint(TOKEN).unwrap();
        let b = fingerprinter.fingerprint(TOKEN).unwrap();
        assert_eq!(a, b);
        assert_eq!(similarity(&a.fingerprint, &b.fingerprint), 100.0);
    }

    #[test]
    fn test_comment_and_layout_changes_are_invisible() {
        let fingerprinter = Fingerprinter::default();
        let reformatted = TOKEN
            .replace("// SPDX-License-Identifier: MIT", "/* vanity banner */")
            .replace("    ", "\t");
        let a = fingerprinter.fingerprint(TOKEN).unwrap();
        let b = fingerprinter.fingerprint(&reformatted).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_appended_code_keeps_containment() {
        let fingerprinter = Fingerprinter::new(FingerprintConfig::fine_grained());
        let extended = format!("{TOKEN}\ncontract Extra {{ function ping() public {{}} }}\n");
        let a = fingerprinter.fingerprint(TOKEN).unwrap();
        let b = fingerprinter.fingerprint(&extended).unwrap();
        assert!(b.fingerprint.len() >= a.fingerprint.len());
        assert!(similarity(&a.fingerprint, &b.fingerprint) >= 90.0);
    }

    #[test]
    fn test_different_contracts_score_low() {
        let fingerprinter = Fingerprinter::new(FingerprintConfig::fine_grained());
        let other = r"
contract Vault {
    uint256 public total;
    event Deposited(address indexed who, uint256 value);
    function deposit() external payable { total += msg.value; emit Deposited(msg.sender, msg.value); }
    function sweep(address payable dst) external { dst.transfer(address(this).balance); }
}
";
        let a = fingerprinter.fingerprint(TOKEN).unwrap();
        let b = fingerprinter.fingerprint(other).unwrap();
        assert!(similarity(&a.fingerprint, &b.fingerprint) < 50.0);
    }
}

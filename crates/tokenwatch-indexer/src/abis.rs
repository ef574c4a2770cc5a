//! The fixed map from token kind to contract ABI. The JSON files live under
//! `abi/` in this crate and are parsed once per fetcher or caller.

use alloy::json_abi::JsonAbi;
use tokenwatch_common::{TokenKind, TokenwatchError};

const ERC20_ABI: &str = include_str!("../abi/ERC20.json");
const ERC721_ABI: &str = include_str!("../abi/ERC721.json");
const ERC721_ENUMERABLE_ABI: &str = include_str!("../abi/ERC721Enumerable.json");
const ERC1155_ABI: &str = include_str!("../abi/ERC1155.json");

/// ABI used when decoding transfer events of a token. ERC-721 and
/// ERC-721-Enumerable share the same `Transfer` signature, and ERC-777
/// contracts emit the ERC-20 `Transfer` for compatibility.
pub fn transfer_abi(kind: TokenKind) -> Result<JsonAbi, TokenwatchError> {
    let raw = match kind {
        TokenKind::Erc20 | TokenKind::Erc777 => ERC20_ABI,
        TokenKind::Erc721 | TokenKind::Erc721Enumerable => ERC721_ABI,
        TokenKind::Erc1155 => ERC1155_ABI,
        TokenKind::Native => {
            return Err(TokenwatchError::Config(
                "native currency has no transfer events, use the receipt fetcher".to_string(),
            ))
        }
    };
    parse(raw, kind)
}

/// ABI used when polling balances of a token. Enumerable collections need the
/// enumeration surface, so they get their own file here.
pub fn balance_abi(kind: TokenKind) -> Result<JsonAbi, TokenwatchError> {
    let raw = match kind {
        TokenKind::Erc20 => ERC20_ABI,
        TokenKind::Erc721 => ERC721_ABI,
        TokenKind::Erc721Enumerable => ERC721_ENUMERABLE_ABI,
        TokenKind::Erc1155 | TokenKind::Erc777 => {
            return Err(TokenwatchError::Config(format!(
                "balance tracking for {kind} tokens is not implemented"
            )))
        }
        TokenKind::Native => {
            return Err(TokenwatchError::Config(
                "native currency balances need no contract ABI".to_string(),
            ))
        }
    };
    parse(raw, kind)
}

/// Fail construction when an ABI is missing a function a caller depends on.
pub fn require_functions(
    abi: &JsonAbi,
    kind: TokenKind,
    names: &[&str],
) -> Result<(), TokenwatchError> {
    for name in names {
        if !abi.functions.contains_key(*name) {
            return Err(TokenwatchError::Config(format!(
                "ABI for {kind} has no {name} function"
            )));
        }
    }
    Ok(())
}

fn parse(raw: &str, kind: TokenKind) -> Result<JsonAbi, TokenwatchError> {
    serde_json::from_str(raw)
        .map_err(|e| TokenwatchError::Config(format!("malformed ABI for {kind}: {e}")))
}

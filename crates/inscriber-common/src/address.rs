//! Address codec and funding key helpers

use crate::{InscriberError, Result};
use bitcoin::key::PrivateKey;
use bitcoin::secp256k1::{Secp256k1, SecretKey, Signing, Verification};
use bitcoin::{Address, Network, Script, ScriptBuf};
use core::str::FromStr;

/// Decode `address` into its locking script, rejecting addresses of another network.
pub fn decode_address(address: &str, network: Network) -> Result<ScriptBuf> {
    let unchecked = Address::from_str(address.trim())?;
    let checked = unchecked.require_network(network)?;
    Ok(checked.script_pubkey())
}

/// Encode a locking script as an address string for `network`.
pub fn encode_address(script: &Script, network: Network) -> Result<String> {
    Ok(Address::from_script(script, network)?.to_string())
}

/// Key-path-only P2TR address controlled by `key`.
pub fn funding_address_for_key<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    key: &PrivateKey,
    network: Network,
) -> Address {
    let (internal_key, _parity) = key.inner.x_only_public_key(secp);
    Address::p2tr(secp, internal_key, None, network)
}

/// Parse a funding private key given either as 64 hex characters or as WIF.
pub fn parse_private_key(input: &str, network: Network) -> Result<PrivateKey> {
    let input = input.trim();
    if input.len() == 64 && input.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes = hex::decode(input)?;
        let secret_key = SecretKey::from_slice(&bytes)?;
        return Ok(PrivateKey::new(secret_key, network));
    }
    let key = PrivateKey::from_wif(input)?;
    if !key.compressed {
        return Err(InscriberError::InvalidParameters(
            "uncompressed private keys cannot fund taproot commitments".to_string(),
        ));
    }
    Ok(key)
}

const DESCRIPTOR_INPUT_CHARSET: &str = concat!(
    "0123456789()[],'/*abcdefgh@:$%{}",
    "IJKLMNOPQRSTUVWXYZ&+-.;<=>?!^_|~",
    "ijklmnopqrstuvwxyzABCDEFGH`#\"\\ ",
);
const DESCRIPTOR_CHECKSUM_CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

fn descriptor_polymod(c: u64, value: u64) -> u64 {
    const GENERATORS: [u64; 5] = [
        0xf5dee51989,
        0xa9fdca3312,
        0x1bab10e32d,
        0x3706b1677a,
        0x644d626ffd,
    ];
    let top = c >> 35;
    let mut c = ((c & 0x7ffffffff) << 5) ^ value;
    for (i, generator) in GENERATORS.iter().enumerate() {
        if (top >> i) & 1 == 1 {
            c ^= generator;
        }
    }
    c
}

/// Eight-character output descriptor checksum, as `getdescriptorinfo` reports it.
pub fn descriptor_checksum(descriptor: &str) -> Result<String> {
    let mut c = 1u64;
    let mut class = 0u64;
    let mut class_count = 0;
    for ch in descriptor.chars() {
        let position = DESCRIPTOR_INPUT_CHARSET.find(ch).ok_or_else(|| {
            InscriberError::InvalidParameters(format!("invalid descriptor character {ch:?}"))
        })? as u64;
        c = descriptor_polymod(c, position & 31);
        class = class * 3 + (position >> 5);
        class_count += 1;
        if class_count == 3 {
            c = descriptor_polymod(c, class);
            class = 0;
            class_count = 0;
        }
    }
    if class_count > 0 {
        c = descriptor_polymod(c, class);
    }
    for _ in 0..8 {
        c = descriptor_polymod(c, 0);
    }
    c ^= 1;
    Ok((0..8)
        .map(|j| DESCRIPTOR_CHECKSUM_CHARSET[((c >> (5 * (7 - j))) & 31) as usize] as char)
        .collect())
}

/// `rawtr(<wif>)#checksum` descriptor importable into a descriptor wallet
pub fn rawtr_descriptor(key: &PrivateKey) -> Result<String> {
    let descriptor = format!("rawtr({})", key.to_wif());
    let checksum = descriptor_checksum(&descriptor)?;
    Ok(format!("{descriptor}#{checksum}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TESTNET_P2WPKH: &str = "tb1qg9hl3ulg20hel6aen5dtmhzhprjee039heu5hj";

    #[test]
    fn test_descriptor_checksum_known_vector() {
        assert_eq!(descriptor_checksum("raw(deadbeef)").unwrap(), "89f8spxm");
        assert!(descriptor_checksum("raw(\u{e9})").is_err());
    }

    #[test]
    fn test_rawtr_descriptor_shape() {
        let key = parse_private_key(
            "a868774f27a34e28aef14a95e2ddfa9baf2bc9a83b632b111e8e9d1eb5fbb6e9",
            Network::Testnet,
        )
        .unwrap();
        let descriptor = rawtr_descriptor(&key).unwrap();
        let (body, checksum) = descriptor.split_once('#').unwrap();
        assert_eq!(body, format!("rawtr({})", key.to_wif()));
        assert_eq!(checksum, descriptor_checksum(body).unwrap());
        assert_eq!(checksum.len(), 8);
    }

    #[test]
    fn test_decode_encode_address() {
        let script = decode_address(TESTNET_P2WPKH, Network::Testnet).unwrap();
        assert!(script.is_p2wpkh());
        assert_eq!(encode_address(&script, Network::Testnet).unwrap(), TESTNET_P2WPKH);
    }

    #[test]
    fn test_decode_rejects_wrong_network() {
        let err = decode_address(TESTNET_P2WPKH, Network::Bitcoin).unwrap_err();
        assert!(matches!(err, InscriberError::AddressResolution(_)));
    }

    #[test]
    fn test_parse_private_key_hex_and_wif() {
        let hex_key = "a868774f27a34e28aef14a95e2ddfa9baf2bc9a83b632b111e8e9d1eb5fbb6e9";
        let key = parse_private_key(hex_key, Network::Testnet).unwrap();
        let from_wif = parse_private_key(&key.to_wif(), Network::Testnet).unwrap();
        assert_eq!(key.inner, from_wif.inner);
    }

    #[test]
    fn test_funding_address_is_p2tr() {
        let secp = Secp256k1::new();
        let key = parse_private_key(
            "a868774f27a34e28aef14a95e2ddfa9baf2bc9a83b632b111e8e9d1eb5fbb6e9",
            Network::Testnet,
        )
        .unwrap();
        let address = funding_address_for_key(&secp, &key, Network::Testnet);
        assert!(address.script_pubkey().is_p2tr());
        assert!(address.to_string().starts_with("tb1p"));
    }
}

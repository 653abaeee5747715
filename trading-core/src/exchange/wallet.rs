// ====
// Hyperliquid Wallet - Custom Implementation
// ====
// EIP-712 Signing für Hyperliquid API
// Keine externen Wallet-Libraries
// ====

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::SecretKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha3::{Digest, Keccak256};

use super::errors::SigningError;

/// Signature triple as transmitted to the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// 0x-prefixed, 32 bytes
    pub r: String,
    /// 0x-prefixed, 32 bytes
    pub s: String,
    /// 27 + recovery id
    pub v: u8,
}

/// Hyperliquid Wallet
///
/// - secp256k1 key held in memory
/// - deterministic (RFC 6979) recoverable signatures
/// - address derivation without external wallet libraries
pub struct HyperliquidWallet {
    /// Private key
    private_key: SigningKey,
    /// Public address (0x..., lower case)
    pub address: String,
}

impl HyperliquidWallet {
    /// Create wallet from private key hex string (with or without `0x`)
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, SigningError> {
        let key_hex = private_key_hex.trim().trim_start_matches("0x");

        let key_bytes = hex::decode(key_hex)
            .map_err(|e| SigningError::InvalidKey(format!("not hex: {}", e)))?;

        let secret_key = SecretKey::from_slice(&key_bytes)
            .map_err(|_| SigningError::InvalidKey("not a valid secp256k1 scalar".to_string()))?;

        let signing_key = SigningKey::from(secret_key);
        let address = address_of(signing_key.verifying_key());

        Ok(Self {
            private_key: signing_key,
            address,
        })
    }

    /// Signs a 32-byte prehash, returning `(r, s, v)`
    pub fn sign_hash(&self, hash: &[u8; 32]) -> Result<Signature, SigningError> {
        let (signature, recovery_id) = self
            .private_key
            .sign_prehash_recoverable(hash)
            .map_err(|e| SigningError::Signature(e.to_string()))?;

        let sig_bytes = signature.to_bytes();
        Ok(Signature {
            r: format!("0x{}", hex::encode(&sig_bytes[..32])),
            s: format!("0x{}", hex::encode(&sig_bytes[32..64])),
            v: 27 + recovery_id.to_byte(),
        })
    }

    /// Sign EIP-712 typed data
    pub fn sign_typed_data(&self, typed_data: &TypedData) -> Result<Signature, SigningError> {
        let hash = typed_data.signing_hash()?;
        self.sign_hash(&hash)
    }
}

impl std::fmt::Debug for HyperliquidWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the key
        f.debug_struct("HyperliquidWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Derive Ethereum address from a public key: last 20 bytes of
/// keccak256(uncompressed point without the 0x04 prefix)
fn address_of(verifying_key: &VerifyingKey) -> String {
    let point = verifying_key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Recovers the signer address of `hash`, used to check signatures locally
pub fn recover_address(hash: &[u8; 32], signature: &Signature) -> Result<String, SigningError> {
    let r = decode_fixed::<32>(&signature.r)?;
    let s = decode_fixed::<32>(&signature.s)?;
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&r);
    bytes[32..].copy_from_slice(&s);

    let sig = EcdsaSignature::from_slice(&bytes)
        .map_err(|e| SigningError::Signature(e.to_string()))?;
    let recovery_id = signature
        .v
        .checked_sub(27)
        .and_then(RecoveryId::from_byte)
        .ok_or_else(|| SigningError::Signature(format!("invalid v {}", signature.v)))?;

    let key = VerifyingKey::recover_from_prehash(hash, &sig, recovery_id)
        .map_err(|e| SigningError::Signature(e.to_string()))?;
    Ok(address_of(&key))
}

/// EIP-712 Domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EIP712Domain {
    pub name: String,
    pub version: String,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    #[serde(rename = "verifyingContract")]
    pub verifying_contract: String,
}

/// EIP-712 Typed Data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedData {
    pub domain: EIP712Domain,
    #[serde(rename = "primaryType")]
    pub primary_type: String,
    pub types: Value,
    pub message: Value,
}

impl TypedData {
    /// keccak256("\x19\x01" ‖ domainSeparator ‖ hashStruct(message))
    pub fn signing_hash(&self) -> Result<[u8; 32], SigningError> {
        let domain_separator = self.hash_domain()?;
        let message_hash = self.hash_struct(&self.primary_type, &self.message)?;

        let mut encoded = Vec::with_capacity(66);
        encoded.push(0x19);
        encoded.push(0x01);
        encoded.extend_from_slice(&domain_separator);
        encoded.extend_from_slice(&message_hash);

        Ok(keccak256(&encoded))
    }

    /// Hash domain separator
    fn hash_domain(&self) -> Result<[u8; 32], SigningError> {
        let type_hash = keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );

        let name_hash = keccak256(self.domain.name.as_bytes());
        let version_hash = keccak256(self.domain.version.as_bytes());
        let contract = decode_fixed::<20>(&self.domain.verifying_contract)?;

        // typeHash ‖ nameHash ‖ versionHash ‖ chainId ‖ verifyingContract
        let mut encoded = Vec::with_capacity(32 * 5);
        encoded.extend_from_slice(&type_hash);
        encoded.extend_from_slice(&name_hash);
        encoded.extend_from_slice(&version_hash);
        encoded.extend_from_slice(&left_pad(&self.domain.chain_id.to_be_bytes()));
        encoded.extend_from_slice(&left_pad(&contract));

        Ok(keccak256(&encoded))
    }

    fn hash_struct(&self, struct_type: &str, data: &Value) -> Result<[u8; 32], SigningError> {
        let type_def = self
            .types
            .get(struct_type)
            .ok_or_else(|| SigningError::TypedData(format!("type {} not found", struct_type)))?;

        let type_string = encode_type(struct_type, type_def)?;
        let mut encoded = Vec::new();
        encoded.extend_from_slice(&keccak256(type_string.as_bytes()));

        for (field_name, field_type) in fields_of(type_def)? {
            let field_value = data.get(field_name).ok_or_else(|| {
                SigningError::TypedData(format!("field {} missing from message", field_name))
            })?;
            encoded.extend_from_slice(&encode_field(field_type, field_value)?);
        }

        Ok(keccak256(&encoded))
    }
}

fn fields_of(type_def: &Value) -> Result<Vec<(&str, &str)>, SigningError> {
    let fields = type_def
        .as_array()
        .ok_or_else(|| SigningError::TypedData("type definition is not an array".to_string()))?;

    fields
        .iter()
        .map(|field| {
            let name = field["name"]
                .as_str()
                .ok_or_else(|| SigningError::TypedData("field name missing".to_string()))?;
            let ty = field["type"]
                .as_str()
                .ok_or_else(|| SigningError::TypedData("field type missing".to_string()))?;
            Ok((name, ty))
        })
        .collect()
}

/// `Name(type1 name1,type2 name2)`
fn encode_type(struct_type: &str, type_def: &Value) -> Result<String, SigningError> {
    let fields: Vec<String> = fields_of(type_def)?
        .into_iter()
        .map(|(name, ty)| format!("{} {}", ty, name))
        .collect();
    Ok(format!("{}({})", struct_type, fields.join(",")))
}

fn encode_field(field_type: &str, value: &Value) -> Result<[u8; 32], SigningError> {
    let expected = |what: &str| SigningError::TypedData(format!("expected {} for {}", what, field_type));

    match field_type {
        "string" => {
            let s = value.as_str().ok_or_else(|| expected("string"))?;
            Ok(keccak256(s.as_bytes()))
        }
        "uint256" | "uint64" | "uint32" | "uint8" => {
            let n = value.as_u64().ok_or_else(|| expected("unsigned integer"))?;
            Ok(left_pad(&n.to_be_bytes()))
        }
        "address" => {
            let addr = value.as_str().ok_or_else(|| expected("address"))?;
            Ok(left_pad(&decode_fixed::<20>(addr)?))
        }
        "bytes32" => {
            let raw = value.as_str().ok_or_else(|| expected("hex string"))?;
            decode_fixed::<32>(raw)
        }
        "bool" => {
            let b = value.as_bool().ok_or_else(|| expected("bool"))?;
            let mut bytes = [0u8; 32];
            bytes[31] = u8::from(b);
            Ok(bytes)
        }
        _ => Err(SigningError::TypedData(format!(
            "unsupported field type: {}",
            field_type
        ))),
    }
}

/// Decodes 0x-hex into exactly N bytes
pub(crate) fn decode_fixed<const N: usize>(raw: &str) -> Result<[u8; N], SigningError> {
    let bytes = hex::decode(raw.trim_start_matches("0x"))
        .map_err(|_| SigningError::InvalidAddress(raw.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| SigningError::InvalidAddress(raw.to_string()))
}

fn left_pad(bytes: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(bytes);
    padded
}

/// Helper: Keccak256 hash
pub(crate) fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

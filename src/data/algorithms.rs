//! JOSE algorithm registries (RFC 7518) and the algorithms an OP must
//! implement.

/// Registered JWS `alg` values.
pub const REGISTERED_JWS_ALGORITHMS: &[&str] = &[
    "HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "ES256", "ES384", "ES512", "PS256",
    "PS384", "PS512", "EdDSA", "none",
];

/// Registered JWE `alg` values.
pub const REGISTERED_JWE_ALG_ALGORITHMS: &[&str] = &[
    "RSA1_5",
    "RSA-OAEP",
    "RSA-OAEP-256",
    "A128KW",
    "A192KW",
    "A256KW",
    "dir",
    "ECDH-ES",
    "ECDH-ES+A128KW",
    "ECDH-ES+A192KW",
    "ECDH-ES+A256KW",
    "A128GCMKW",
    "A192GCMKW",
    "A256GCMKW",
    "PBES2-HS256+A128KW",
    "PBES2-HS384+A192KW",
    "PBES2-HS512+A256KW",
];

/// Registered JWE `enc` values.
pub const REGISTERED_JWE_ENC_ALGORITHMS: &[&str] = &[
    "A128CBC-HS256",
    "A192CBC-HS384",
    "A256CBC-HS512",
    "A128GCM",
    "A192GCM",
    "A256GCM",
];

/// Mandatory-to-implement algorithms, by the provider metadata that lists them.
pub const MTI: &[(&str, &[&str])] = &[("id_token_signing_alg_values_supported", &["RS256"])];

pub fn is_registered_jws(alg: &str) -> bool {
    REGISTERED_JWS_ALGORITHMS.contains(&alg)
}

pub fn is_registered_jwe_alg(alg: &str) -> bool {
    REGISTERED_JWE_ALG_ALGORITHMS.contains(&alg)
}

pub fn is_registered_jwe_enc(enc: &str) -> bool {
    REGISTERED_JWE_ENC_ALGORITHMS.contains(&enc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries() {
        assert!(is_registered_jws("RS256"));
        assert!(is_registered_jws("none"));
        assert!(!is_registered_jws("RS1024"));
        assert!(is_registered_jwe_alg("RSA-OAEP"));
        assert!(!is_registered_jwe_alg("A128GCM"));
        assert!(is_registered_jwe_enc("A128GCM"));
    }
}

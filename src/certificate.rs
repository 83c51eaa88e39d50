use std::time::{Duration, SystemTime};

use dtls::crypto::{CryptoPrivateKey, CryptoPrivateKeyKind};
use rcgen::{CertificateParams, KeyPair, RcgenError};
use ring::signature::{EcdsaKeyPair, Ed25519KeyPair, RsaKeyPair};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::transport::dtls::DtlsFingerprint;

/// Certificate is the x509 certificate and private key that authenticate
/// this endpoint's DTLS handshakes.
pub struct Certificate {
    pub(crate) dtls_certificate: dtls::crypto::Certificate,
    pub(crate) expires: SystemTime,
}

/// Two certificates are the same when their DTLS halves are.
impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.dtls_certificate == other.dtls_certificate
    }
}

impl Certificate {
    /// from_params generates a certificate from explicit x509 parameters,
    /// for callers that need control over subject names or lifetimes.
    pub fn from_params(mut params: CertificateParams) -> Result<Self> {
        let key_pair = if let Some(key_pair) = params.key_pair.take() {
            if !key_pair.is_compatible(params.alg) {
                return Err(RcgenError::CertificateKeyPairMismatch.into());
            }
            key_pair
        } else {
            KeyPair::generate(params.alg)?
        };

        let serialized_der = key_pair.serialize_der();
        let private_key = if key_pair.is_compatible(&rcgen::PKCS_ED25519) {
            CryptoPrivateKey {
                kind: CryptoPrivateKeyKind::Ed25519(
                    Ed25519KeyPair::from_pkcs8(&serialized_der)
                        .map_err(|e| Error::Certificate(e.to_string()))?,
                ),
                serialized_der,
            }
        } else if key_pair.is_compatible(&rcgen::PKCS_ECDSA_P256_SHA256) {
            CryptoPrivateKey {
                kind: CryptoPrivateKeyKind::Ecdsa256(
                    EcdsaKeyPair::from_pkcs8(
                        &ring::signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                        &serialized_der,
                    )
                    .map_err(|e| Error::Certificate(e.to_string()))?,
                ),
                serialized_der,
            }
        } else if key_pair.is_compatible(&rcgen::PKCS_RSA_SHA256) {
            CryptoPrivateKey {
                kind: CryptoPrivateKeyKind::Rsa256(
                    RsaKeyPair::from_pkcs8(&serialized_der)
                        .map_err(|e| Error::Certificate(e.to_string()))?,
                ),
                serialized_der,
            }
        } else {
            return Err(Error::Certificate("unsupported key pair".to_owned()));
        };
        params.key_pair = Some(key_pair);

        let expires = if cfg!(target_arch = "arm") {
            // Keeps Instant arithmetic from overflowing on armv7.
            SystemTime::now() + Duration::from_secs(172800)
        } else {
            params.not_after.into()
        };
        let x509_cert = rcgen::Certificate::from_params(params)?;
        let certificate = x509_cert.serialize_der()?;

        Ok(Certificate {
            dtls_certificate: dtls::crypto::Certificate {
                certificate: vec![rustls::Certificate(certificate)],
                private_key,
            },
            expires,
        })
    }

    /// from_key_pair wraps a key pair in a minimal self-signed
    /// certificate, the common path for generated identities.
    pub fn from_key_pair(key_pair: KeyPair) -> Result<Self> {
        let mut params = CertificateParams::new(vec![crate::rand_alpha(16)]);

        if key_pair.is_compatible(&rcgen::PKCS_ED25519) {
            params.alg = &rcgen::PKCS_ED25519;
        } else if key_pair.is_compatible(&rcgen::PKCS_ECDSA_P256_SHA256) {
            params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
        } else if key_pair.is_compatible(&rcgen::PKCS_RSA_SHA256) {
            params.alg = &rcgen::PKCS_RSA_SHA256;
        } else {
            return Err(Error::Certificate("unsupported key pair".to_owned()));
        };
        params.key_pair = Some(key_pair);

        Certificate::from_params(params)
    }

    /// from_pem rebuilds a certificate from PEM blocks, e.g. to share one
    /// identity across connections.
    pub fn from_pem(pem_str: &str, key_pair: KeyPair) -> Result<Self> {
        let params = CertificateParams::from_ca_cert_pem(pem_str, key_pair)
            .map_err(|_| Error::ErrCertificatePemFormat)?;
        Certificate::from_params(params)
    }

    /// expires is the instant this certificate stops being valid.
    pub fn expires(&self) -> SystemTime {
        self.expires
    }

    /// get_fingerprints digests the certificate chain the way SDP carries
    /// it.
    pub fn get_fingerprints(&self) -> Result<Vec<DtlsFingerprint>> {
        let mut fingerprints = vec![];

        for certificate in &self.dtls_certificate.certificate {
            let mut h = Sha256::new();
            h.update(&certificate.0);
            let hashed = h.finalize();

            let values: Vec<String> = hashed.iter().map(|x| format!("{x:02x}")).collect();

            fingerprints.push(DtlsFingerprint {
                algorithm: "sha-256".to_owned(),
                value: values.join(":"),
            });
        }

        Ok(fingerprints)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_generated_certificate_is_not_expired() -> Result<()> {
        let kp = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        let cert = Certificate::from_key_pair(kp)?;

        assert!(cert.expires().duration_since(SystemTime::now()).is_ok());

        Ok(())
    }

    #[test]
    fn test_fingerprint_shape() -> Result<()> {
        let kp = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        let cert = Certificate::from_key_pair(kp)?;

        let fingerprints = cert.get_fingerprints()?;
        assert_eq!(fingerprints.len(), 1);
        assert_eq!(fingerprints[0].algorithm, "sha-256");
        // 32 bytes -> 32 hex pairs joined by colons
        assert_eq!(fingerprints[0].value.len(), 32 * 2 + 31);
        assert!(fingerprints[0]
            .value
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == ':'));

        Ok(())
    }

    #[test]
    fn test_equality_follows_dtls_certificate() -> Result<()> {
        let kp1 = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        let cert1 = Certificate::from_key_pair(kp1)?;
        let kp2 = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        let cert2 = Certificate::from_key_pair(kp2)?;

        assert!(cert1 == cert1);
        assert!(cert1 != cert2);

        Ok(())
    }
}

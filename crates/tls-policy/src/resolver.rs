use std::sync::Arc;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::crypto::ring::{self, cipher_suite};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    SupportedCipherSuite, SupportedProtocolVersion,
};
use thiserror::Error;
use tracing::warn;

use crate::{CipherProfile, ClientTlsConfig};

#[derive(Debug, Error)]
pub enum TlsPolicyError {
    #[error("failed to build TLS client config for profile '{profile}': {source}")]
    Build {
        profile: CipherProfile,
        source: rustls::Error,
    },
}

/// Maps `(verify, cipher profile)` pairs to shared [`rustls::ClientConfig`]s.
///
/// Construction loads the system root store once and eagerly builds every
/// combination, so [`TlsPolicyResolver::resolve`] is an infallible table
/// lookup on the per-request path.
pub struct TlsPolicyResolver {
    // Indexed by [verify as usize][CipherProfile::index()].
    configs: [[ClientTlsConfig; 4]; 2],
}

impl std::fmt::Debug for TlsPolicyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsPolicyResolver").finish_non_exhaustive()
    }
}

impl TlsPolicyResolver {
    /// Build the resolver, loading trust roots from the platform store.
    ///
    /// Certificates the platform store hands back that fail to parse are
    /// skipped with a warning rather than failing startup.
    pub fn new() -> Result<Self, TlsPolicyError> {
        let result = rustls_native_certs::load_native_certs();
        for err in &result.errors {
            warn!(%err, "error loading a native root certificate");
        }

        let mut roots = RootCertStore::empty();
        let (added, skipped) = roots.add_parsable_certificates(result.certs);
        if skipped > 0 {
            warn!(added, skipped, "some native root certificates were unparsable");
        }
        let roots = Arc::new(roots);

        let build = |verify: bool, profile: CipherProfile| {
            build_config(verify, profile, Arc::clone(&roots))
        };

        let configs = [
            [
                build(false, CipherProfile::Default)?,
                build(false, CipherProfile::Modern)?,
                build(false, CipherProfile::Intermediate)?,
                build(false, CipherProfile::Insecure)?,
            ],
            [
                build(true, CipherProfile::Default)?,
                build(true, CipherProfile::Modern)?,
                build(true, CipherProfile::Intermediate)?,
                build(true, CipherProfile::Insecure)?,
            ],
        ];

        Ok(Self { configs })
    }

    /// Look up the client config for a trust policy.
    pub fn resolve(&self, verify: bool, profile: CipherProfile) -> ClientTlsConfig {
        Arc::clone(&self.configs[usize::from(verify)][profile.index()])
    }
}

static TLS12_AND_TLS13: [&SupportedProtocolVersion; 2] =
    [&rustls::version::TLS12, &rustls::version::TLS13];
static TLS13_ONLY: [&SupportedProtocolVersion; 1] = [&rustls::version::TLS13];

/// The cipher suites and minimum protocol floor for one profile.
fn profile_parameters(
    profile: CipherProfile,
) -> (Vec<SupportedCipherSuite>, &'static [&'static SupportedProtocolVersion]) {
    let tls13_suites: [SupportedCipherSuite; 3] = [
        cipher_suite::TLS13_AES_256_GCM_SHA384,
        cipher_suite::TLS13_AES_128_GCM_SHA256,
        cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
    ];
    let tls12_ecdhe_suites: [SupportedCipherSuite; 6] = [
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    ];

    match profile {
        CipherProfile::Default => (ring::DEFAULT_CIPHER_SUITES.to_vec(), &TLS12_AND_TLS13[..]),
        CipherProfile::Modern => (tls13_suites.to_vec(), &TLS13_ONLY[..]),
        CipherProfile::Intermediate => {
            let mut suites = tls13_suites.to_vec();
            suites.extend_from_slice(&tls12_ecdhe_suites);
            (suites, &TLS12_AND_TLS13[..])
        }
        CipherProfile::Insecure => (ring::ALL_CIPHER_SUITES.to_vec(), &TLS12_AND_TLS13[..]),
    }
}

fn build_config(
    verify: bool,
    profile: CipherProfile,
    roots: Arc<RootCertStore>,
) -> Result<ClientTlsConfig, TlsPolicyError> {
    let (cipher_suites, versions) = profile_parameters(profile);
    let provider = Arc::new(CryptoProvider {
        cipher_suites,
        ..ring::default_provider()
    });

    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(versions)
        .map_err(|source| TlsPolicyError::Build { profile, source })?;

    let config = if verify {
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification { provider }))
            .with_no_client_auth()
    };

    Ok(Arc::new(config))
}

/// Certificate verifier that accepts any upstream certificate.
///
/// Used only when the caller explicitly selected `verify == false` for a
/// trusted/local target; signature checks still run so the handshake shape
/// stays protocol-conformant.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

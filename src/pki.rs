// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! PKI bundle for embedded API servers.
//!
//! A control plane of type `k8s` gets its own certificate authority. From it we
//! derive:
//!
//! - the API server serving certificate (`kube-apiserver`)
//! - the kubelet client certificate (`apiserver-kubelet-client`)
//! - the front-proxy client certificate (`front-proxy-client`)
//! - the service-account signing key pair (no certificate)
//!
//! Kubeconfig client certificates are issued later from the same CA through
//! [`Certs::issue_client_cert`].
//!
//! All keys are 2048-bit RSA. Private keys are PEM `RSA PRIVATE KEY` (PKCS#1),
//! public keys `PUBLIC KEY` (SPKI), certificates `CERTIFICATE`.
//!
//! The CA subject key identifier is the SHA-1 of its PKCS#1 public key, and every
//! leaf carries it as authority key identifier.
//!
//! `front-proxy-ca.crt` is the main CA certificate; no separate front-proxy CA
//! is generated.

use crate::constants::{
    APISERVER_CERT_KEY, APISERVER_KEY_KEY, CA_CERT_KEY, CA_COMMON_NAME, CA_KEY_KEY,
    CERT_BACKDATE_HOURS, CERT_VALIDITY_DAYS, FRONT_PROXY_CA_CERT_KEY, FRONT_PROXY_CLIENT_CERT_KEY,
    FRONT_PROXY_CLIENT_KEY_KEY, KUBELET_CLIENT_CERT_KEY, KUBELET_CLIENT_KEY_KEY, RSA_KEY_BITS,
    SA_PRIVATE_KEY_KEY, SA_PUBLIC_KEY_KEY,
};
use crate::errors::{Error, Result};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose, SanType,
};
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// DNS aliases every API server certificate carries.
pub const STANDARD_APISERVER_DNS_NAMES: &[&str] = &[
    "kubernetes",
    "kubernetes.default",
    "kubernetes.default.svc",
    "kubernetes.default.svc.cluster.local",
    "localhost",
];

/// IP addresses every API server certificate carries.
pub const STANDARD_APISERVER_IPS: &[&str] = &["127.0.0.1", "10.96.0.1"];

/// An RSA key pair in the PEM forms stored in secrets and fed to rcgen.
struct RsaKeyMaterial {
    /// `RSA PRIVATE KEY`
    private_pkcs1_pem: String,
    /// `PRIVATE KEY`, the form rcgen loads
    private_pkcs8_pem: String,
    /// `PUBLIC KEY`
    public_pem: String,
    /// SHA-1 of the PKCS#1 public key
    key_id: Vec<u8>,
}

fn cert_err(what: &str, e: impl std::fmt::Display) -> Error {
    Error::Certificate(format!("{what}: {e}"))
}

fn generate_rsa_key() -> Result<RsaKeyMaterial> {
    let mut rng = rsa::rand_core::OsRng;
    let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| cert_err("RSA key generation failed", e))?;
    let public = RsaPublicKey::from(&private);

    let private_pkcs1_pem = private
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| cert_err("encoding private key", e))?
        .to_string();
    let private_pkcs8_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| cert_err("encoding private key", e))?
        .to_string();
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| cert_err("encoding public key", e))?;
    let public_der = public
        .to_pkcs1_der()
        .map_err(|e| cert_err("encoding public key", e))?;
    let key_id = Sha1::digest(public_der.as_bytes()).to_vec();

    Ok(RsaKeyMaterial {
        private_pkcs1_pem,
        private_pkcs8_pem,
        public_pem,
        key_id,
    })
}

fn signing_key(material: &RsaKeyMaterial) -> Result<KeyPair> {
    KeyPair::from_pem(&material.private_pkcs8_pem).map_err(|e| cert_err("loading RSA key", e))
}

fn validity() -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    (
        now - time::Duration::hours(CERT_BACKDATE_HOURS),
        now + time::Duration::days(CERT_VALIDITY_DAYS),
    )
}

fn distinguished_name(common_name: &str, organizations: &[&str]) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    for org in organizations {
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String((*org).to_string()),
        );
    }
    dn
}

fn subject_alt_names(dns_names: &[String]) -> Result<Vec<SanType>> {
    let mut sans = Vec::with_capacity(dns_names.len() + STANDARD_APISERVER_IPS.len());
    for name in dns_names {
        if let Ok(ip) = name.parse::<IpAddr>() {
            sans.push(SanType::IpAddress(ip));
            continue;
        }
        let dns = Ia5String::try_from(name.clone())
            .map_err(|e| cert_err(&format!("invalid DNS name '{name}'"), e))?;
        sans.push(SanType::DnsName(dns));
    }
    for ip in STANDARD_APISERVER_IPS {
        let ip: IpAddr = ip
            .parse()
            .map_err(|e| cert_err(&format!("invalid IP '{ip}'"), e))?;
        sans.push(SanType::IpAddress(ip));
    }
    Ok(sans)
}

fn ca_params(key_id: Vec<u8>) -> CertificateParams {
    let (not_before, not_after) = validity();
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(CA_COMMON_NAME, &[]);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.key_identifier_method = KeyIdMethod::PreSpecified(key_id);
    params.not_before = not_before;
    params.not_after = not_after;
    params
}

fn leaf_params(
    common_name: &str,
    organizations: &[&str],
    ext_key_usage: ExtendedKeyUsagePurpose,
    leaf_key_id: Vec<u8>,
) -> CertificateParams {
    let (not_before, not_after) = validity();
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(common_name, organizations);
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ext_key_usage];
    params.key_identifier_method = KeyIdMethod::PreSpecified(leaf_key_id);
    params.use_authority_key_identifier_extension = true;
    params.not_before = not_before;
    params.not_after = not_after;
    params
}

/// A PEM certificate and its PEM private key.
#[derive(Clone, Debug)]
pub struct CertKeyPair {
    pub cert_pem: String,
    pub key_pem: String,
}

/// In-memory PKI bundle of one control plane.
///
/// Generated once, persisted into the `k8s-certs` secret, never regenerated
/// while that secret exists.
pub struct Certs {
    pub ca: CertKeyPair,
    pub apiserver: CertKeyPair,
    pub kubelet_client: CertKeyPair,
    pub front_proxy_client: CertKeyPair,
    pub sa_public_pem: String,
    pub sa_private_pem: String,
    /// DNS names added to the API server certificate on top of the standard aliases
    pub extra_dns_names: Vec<String>,
    ca_key: RsaKeyMaterial,
    ca_params: CertificateParams,
}

impl std::fmt::Debug for Certs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certs")
            .field("extra_dns_names", &self.extra_dns_names)
            .finish_non_exhaustive()
    }
}

impl Certs {
    /// Generate a complete bundle.
    ///
    /// # Arguments
    ///
    /// * `extra_dns_names` - Names added to the API server SAN list
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] if any key or certificate cannot be
    /// produced. No partial bundle is returned.
    pub fn generate(extra_dns_names: &[String]) -> Result<Self> {
        let ca_key = generate_rsa_key()?;
        let ca_params = ca_params(ca_key.key_id.clone());
        let ca_signing_key = signing_key(&ca_key)?;
        let ca_cert = ca_params
            .clone()
            .self_signed(&ca_signing_key)
            .map_err(|e| cert_err("self-signing CA", e))?;
        let ca = CertKeyPair {
            cert_pem: ca_cert.pem(),
            key_pem: ca_key.private_pkcs1_pem.clone(),
        };

        let mut certs = Self {
            ca,
            apiserver: CertKeyPair {
                cert_pem: String::new(),
                key_pem: String::new(),
            },
            kubelet_client: CertKeyPair {
                cert_pem: String::new(),
                key_pem: String::new(),
            },
            front_proxy_client: CertKeyPair {
                cert_pem: String::new(),
                key_pem: String::new(),
            },
            sa_public_pem: String::new(),
            sa_private_pem: String::new(),
            extra_dns_names: extra_dns_names.to_vec(),
            ca_key,
            ca_params,
        };

        let mut apiserver_dns: Vec<String> = STANDARD_APISERVER_DNS_NAMES
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        apiserver_dns.extend(extra_dns_names.iter().cloned());
        certs.apiserver = certs.issue(
            "kube-apiserver",
            &[],
            ExtendedKeyUsagePurpose::ServerAuth,
            Some(&apiserver_dns),
        )?;
        certs.kubelet_client = certs.issue(
            "apiserver-kubelet-client",
            &["system:masters"],
            ExtendedKeyUsagePurpose::ClientAuth,
            None,
        )?;
        certs.front_proxy_client = certs.issue(
            "front-proxy-client",
            &[],
            ExtendedKeyUsagePurpose::ClientAuth,
            None,
        )?;

        let sa = generate_rsa_key()?;
        certs.sa_public_pem = sa.public_pem;
        certs.sa_private_pem = sa.private_pkcs1_pem;

        Ok(certs)
    }

    /// Issue a client certificate from this CA.
    ///
    /// # Arguments
    ///
    /// * `common_name` - Subject CN (the Kubernetes user name)
    /// * `organizations` - Subject O values (the Kubernetes groups)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] if key generation or signing fails.
    pub fn issue_client_cert(&self, common_name: &str, organizations: &[&str]) -> Result<CertKeyPair> {
        self.issue(
            common_name,
            organizations,
            ExtendedKeyUsagePurpose::ClientAuth,
            None,
        )
    }

    fn issue(
        &self,
        common_name: &str,
        organizations: &[&str],
        usage: ExtendedKeyUsagePurpose,
        dns_names: Option<&[String]>,
    ) -> Result<CertKeyPair> {
        let leaf_key = generate_rsa_key()?;
        let mut params = leaf_params(common_name, organizations, usage, leaf_key.key_id.clone());
        if let Some(names) = dns_names {
            params.subject_alt_names = subject_alt_names(names)?;
        }

        let issuer = Issuer::new(self.ca_params.clone(), signing_key(&self.ca_key)?);
        let cert = params
            .signed_by(&signing_key(&leaf_key)?, &issuer)
            .map_err(|e| cert_err(&format!("signing {common_name} certificate"), e))?;

        Ok(CertKeyPair {
            cert_pem: cert.pem(),
            key_pem: leaf_key.private_pkcs1_pem,
        })
    }

    /// Secret data of the `k8s-certs` secret.
    #[must_use]
    pub fn secret_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        data.insert(CA_CERT_KEY.to_string(), self.ca.cert_pem.clone());
        data.insert(CA_KEY_KEY.to_string(), self.ca.key_pem.clone());
        data.insert(APISERVER_CERT_KEY.to_string(), self.apiserver.cert_pem.clone());
        data.insert(APISERVER_KEY_KEY.to_string(), self.apiserver.key_pem.clone());
        data.insert(
            KUBELET_CLIENT_CERT_KEY.to_string(),
            self.kubelet_client.cert_pem.clone(),
        );
        data.insert(
            KUBELET_CLIENT_KEY_KEY.to_string(),
            self.kubelet_client.key_pem.clone(),
        );
        data.insert(FRONT_PROXY_CA_CERT_KEY.to_string(), self.ca.cert_pem.clone());
        data.insert(
            FRONT_PROXY_CLIENT_CERT_KEY.to_string(),
            self.front_proxy_client.cert_pem.clone(),
        );
        data.insert(
            FRONT_PROXY_CLIENT_KEY_KEY.to_string(),
            self.front_proxy_client.key_pem.clone(),
        );
        data.insert(SA_PUBLIC_KEY_KEY.to_string(), self.sa_public_pem.clone());
        data.insert(SA_PRIVATE_KEY_KEY.to_string(), self.sa_private_pem.clone());
        data
    }
}

#[cfg(test)]
#[path = "pki_tests.rs"]
mod pki_tests;

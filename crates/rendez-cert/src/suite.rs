//! Self-signed certificate suite generation
//!
//! Produces a CA and a matching server/client certificate pair for tests
//! and development. **DO NOT use in production** - issue real certificates
//! from an operator-controlled CA instead.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use time::{Duration, OffsetDateTime};

use crate::CertError;

/// A CA with one server and one client certificate signed by it, all PEM.
pub struct CertSuite {
    pub ca_cert_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
}

/// Generate a fresh suite valid for `dns_name`.
///
/// Both leaf certificates carry the server-auth and client-auth extended
/// key usages, so one suite covers either side of a mutually-authenticated
/// handshake in tests.
pub fn generate_cert_suite(dns_name: &str) -> Result<CertSuite, CertError> {
    let mut ca_params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Rendez Test CA");
    dn.push(DnType::OrganizationName, "Rendez");
    ca_params.distinguished_name = dn;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];
    set_validity(&mut ca_params);

    let ca_key = KeyPair::generate()?;
    let ca_cert = ca_params.self_signed(&ca_key)?;

    let (server_cert_pem, server_key_pem) = leaf(dns_name, "rendez server", &ca_cert, &ca_key)?;
    let (client_cert_pem, client_key_pem) = leaf(dns_name, "rendez client", &ca_cert, &ca_key)?;

    Ok(CertSuite {
        ca_cert_pem: ca_cert.pem(),
        server_cert_pem,
        server_key_pem,
        client_cert_pem,
        client_key_pem,
    })
}

fn set_validity(params: &mut CertificateParams) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::days(1);
    params.not_after = now + Duration::days(3650);
}

fn leaf(
    dns_name: &str,
    common_name: &str,
    ca_cert: &Certificate,
    ca_key: &KeyPair,
) -> Result<(String, String), CertError> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.subject_alt_names = vec![SanType::DnsName(Ia5String::try_from(dns_name)?)];
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.serial_number = Some(SerialNumber::from(rand::random::<u64>()));
    set_validity(&mut params);

    let key = KeyPair::generate()?;
    let cert = params.signed_by(&key, ca_cert, ca_key)?;
    Ok((cert.pem(), key.serialize_pem()))
}

//! Fixtures shared by the unit tests.

use crate::certificate::{Certificate, CertificateChain, PrivateKey};
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair};
use rustls::sign::CertifiedKey;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

pub(crate) fn ensure_provider() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(crate::crypto::ensure_crypto_provider_installed);
}

/// Unique common name so assertions on shared global state (logs) don't collide.
pub(crate) fn unique(prefix: &str) -> String {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    format!("{prefix}-{}", NEXT.fetch_add(1, Ordering::Relaxed))
}

pub(crate) struct TestIdentity {
    pub cert: Certificate,
    pub key: PrivateKey,
    pub chain: Vec<Certificate>,
}

impl TestIdentity {
    pub fn chain(&self) -> CertificateChain {
        CertificateChain::new(self.chain.clone()).unwrap()
    }

    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        ensure_provider();
        let provider = crate::crypto::default_provider();
        let signing_key = provider
            .key_provider
            .load_private_key(self.key.to_rustls())
            .unwrap();
        Arc::new(CertifiedKey::new(
            self.chain.iter().map(|c| c.der().clone()).collect(),
            signing_key,
        ))
    }
}

fn leaf_params(dn: &[(DnType, &str)]) -> CertificateParams {
    let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let mut name = DistinguishedName::new();
    for (ty, value) in dn {
        name.push(ty.clone(), *value);
    }
    params.distinguished_name = name;
    params
}

pub(crate) fn self_signed(cn: &str) -> TestIdentity {
    let key = KeyPair::generate().unwrap();
    let cert = leaf_params(&[(DnType::CommonName, cn)])
        .self_signed(&key)
        .unwrap();
    let cert = Certificate::from_der(cert.der().clone()).unwrap();
    TestIdentity {
        chain: vec![cert.clone()],
        cert,
        key: PrivateKey::try_from(key.serialize_der()).unwrap(),
    }
}

pub(crate) struct TestPki {
    pub ca: Certificate,
    issuer: Issuer<'static, KeyPair>,
}

impl TestPki {
    pub fn new() -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, unique("test ca"));
        let cert = params.self_signed(&key).unwrap();
        Self {
            ca: Certificate::from_der(cert.der().clone()).unwrap(),
            issuer: Issuer::new(params, key),
        }
    }

    pub fn leaf(&self, cn: &str) -> TestIdentity {
        self.leaf_with_dn(&[(DnType::CommonName, cn)])
    }

    pub fn leaf_with_dn(&self, dn: &[(DnType, &str)]) -> TestIdentity {
        let key = KeyPair::generate().unwrap();
        let cert = leaf_params(dn).signed_by(&key, &self.issuer).unwrap();
        let cert = Certificate::from_der(cert.der().clone()).unwrap();
        TestIdentity {
            chain: vec![cert.clone(), self.ca.clone()],
            cert,
            key: PrivateKey::try_from(key.serialize_der()).unwrap(),
        }
    }
}

#[cfg(all(feature = "logging", not(feature = "tracing")))]
pub(crate) mod logs {
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::sync::{Mutex, OnceLock};
    use std::thread::ThreadId;

    #[derive(Clone, Debug)]
    pub(crate) struct Captured {
        pub level: Level,
        pub message: String,
        pub thread: ThreadId,
    }

    struct Capture;

    static RECORDS: Mutex<Vec<Captured>> = Mutex::new(Vec::new());
    static CAPTURE: Capture = Capture;

    impl Log for Capture {
        fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &Record<'_>) {
            let captured = Captured {
                level: record.level(),
                message: record.args().to_string(),
                thread: std::thread::current().id(),
            };
            if let Ok(mut records) = RECORDS.lock() {
                records.push(captured);
            }
        }

        fn flush(&self) {}
    }

    pub(crate) fn install() {
        static ONCE: OnceLock<()> = OnceLock::new();
        ONCE.get_or_init(|| {
            let _ = log::set_logger(&CAPTURE);
            log::set_max_level(LevelFilter::Trace);
        });
    }

    pub(crate) fn containing(needle: &str) -> Vec<Captured> {
        RECORDS
            .lock()
            .map(|r| {
                r.iter()
                    .filter(|c| c.message.contains(needle))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn on_this_thread() -> Vec<Captured> {
        let me = std::thread::current().id();
        RECORDS
            .lock()
            .map(|r| r.iter().filter(|c| c.thread == me).cloned().collect())
            .unwrap_or_default()
    }
}

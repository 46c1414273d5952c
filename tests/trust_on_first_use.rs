mod common;

use common::{connect, serve, Pki};
use rustls_hotswap::{
    InflatableTrustEvaluator, InflationState, KeystorePassword, PemKeystoreAdapter,
    TlsContext, TrustEvaluator, TrustManagerParameters, PEM_STORE_TYPE,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn server(pki: &Pki) -> TlsContext {
    let leaf = pki.leaf("tofu server");
    TlsContext::builder()
        .with_identity("tofu server", leaf.chain, leaf.key)
        .build()
        .unwrap()
}

fn inflatable(
    location: &Path,
    approve: bool,
    calls: Arc<AtomicUsize>,
) -> Arc<InflatableTrustEvaluator> {
    let evaluator = InflatableTrustEvaluator::builder()
        .with_keystore(
            Arc::new(PemKeystoreAdapter),
            location,
            KeystorePassword::new(b"changeit".to_vec()),
            PEM_STORE_TYPE,
        )
        .with_predicate(move |params: &TrustManagerParameters| {
            calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(params.chain().leaf().subject(), "cn=tofu server");
            approve
        })
        .build()
        .unwrap();
    Arc::new(evaluator)
}

#[tokio::test]
async fn approved_server_is_trusted_and_remembered() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let location = dir.path().join("trusted").join("peers.pem");
    let pki = Pki::new("tofu issuer");
    let addr = serve(server(&pki)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let evaluator = inflatable(&location, true, Arc::clone(&calls));
    assert_eq!(evaluator.state(), InflationState::Empty);
    let client = TlsContext::builder()
        .with_inflatable_trust(Arc::clone(&evaluator))
        .build()?;

    let first = connect(&client, addr, "localhost").await?;
    assert_eq!(first.server, "cn=tofu server");
    connect(&client, addr, "localhost").await?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(evaluator.state(), InflationState::Populated);
    assert!(evaluator.accepted_issuers().contains(&pki.ca));
    assert!(location.exists());

    // A new process reading the same key store trusts the server without asking.
    let later_calls = Arc::new(AtomicUsize::new(0));
    let reloaded = inflatable(&location, false, Arc::clone(&later_calls));
    assert_eq!(reloaded.state(), InflationState::Populated);
    let client = TlsContext::builder()
        .with_inflatable_trust(reloaded)
        .build()?;
    connect(&client, addr, "localhost").await?;
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn declined_server_is_rejected_and_not_persisted() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let location = dir.path().join("peers.pem");
    let pki = Pki::new("tofu issuer");
    let addr = serve(server(&pki)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let evaluator = inflatable(&location, false, Arc::clone(&calls));
    let client = TlsContext::builder()
        .with_inflatable_trust(Arc::clone(&evaluator))
        .build()?;

    assert!(connect(&client, addr, "localhost").await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(evaluator.state(), InflationState::Empty);
    assert!(evaluator.accepted_issuers().is_empty());
    assert!(!location.exists());
    Ok(())
}

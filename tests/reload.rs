mod common;

use common::{connect, serve, Pki};
use rustls_hotswap::{ReloadCoordinator, SessionCacheInvalidator, TlsContext};

fn serving(pki: &Pki, cn: &str) -> TlsContext {
    let leaf = pki.leaf(cn);
    TlsContext::builder()
        .with_identity(cn, leaf.chain, leaf.key)
        .with_swappable_identity()
        .build()
        .unwrap()
}

fn trusting(pki: &Pki) -> TlsContext {
    TlsContext::builder()
        .with_trust_material([pki.ca.clone()])
        .build()
        .unwrap()
}

#[tokio::test]
async fn reload_with_invalidation_presents_new_identity() -> Result<(), Box<dyn std::error::Error>> {
    let a = Pki::new("issuer a");
    let b = Pki::new("issuer b");
    let server = serving(&a, "server a");
    let addr = serve(server.clone()).await;
    let trusts_a = trusting(&a);
    let trusts_b = trusting(&b);

    let first = connect(&trusts_a, addr, "localhost").await?;
    assert_eq!(first.server, "cn=server a");
    assert!(!first.resumed);
    let cached = connect(&trusts_a, addr, "localhost").await?;
    assert!(cached.resumed);

    ReloadCoordinator::new().reload(&server, &serving(&b, "server b"))?;

    assert!(connect(&trusts_a, addr, "localhost").await.is_err());
    let after = connect(&trusts_b, addr, "localhost").await?;
    assert_eq!(after.server, "cn=server b");
    assert!(!after.resumed);
    Ok(())
}

#[tokio::test]
async fn reload_without_invalidation_keeps_cached_sessions() -> Result<(), Box<dyn std::error::Error>> {
    let a = Pki::new("issuer a");
    let b = Pki::new("issuer b");
    let server = serving(&a, "server a");
    let addr = serve(server.clone()).await;
    let trusts_a = trusting(&a);
    let trusts_b = trusting(&b);

    let first = connect(&trusts_a, addr, "localhost").await?;
    assert!(!first.resumed);

    ReloadCoordinator::new()
        .with_session_invalidation(false)
        .reload(&server, &serving(&b, "server b"))?;

    let resumed = connect(&trusts_a, addr, "localhost").await?;
    assert!(resumed.resumed);
    assert_eq!(resumed.server, "cn=server a");

    // Full handshakes already use the new identity.
    let fresh = connect(&trusts_b, addr, "localhost").await?;
    assert_eq!(fresh.server, "cn=server b");

    SessionCacheInvalidator::new().invalidate(&server);

    assert!(connect(&trusts_a, addr, "localhost").await.is_err());
    let after = connect(&trusts_b, addr, "localhost").await?;
    assert_eq!(after.server, "cn=server b");
    Ok(())
}

#[tokio::test]
async fn trust_reload_applies_to_configs_already_handed_out() -> Result<(), Box<dyn std::error::Error>> {
    let a = Pki::new("issuer a");
    let b = Pki::new("issuer b");
    let addr_a = serve(serving(&a, "server a")).await;
    let addr_b = serve(serving(&b, "server b")).await;

    let client = TlsContext::builder()
        .with_trust_material([a.ca.clone()])
        .with_swappable_trust()
        .build()?;

    connect(&client, addr_a, "localhost").await?;
    assert!(connect(&client, addr_b, "localhost").await.is_err());

    ReloadCoordinator::new().reload(&client, &trusting(&b))?;

    assert!(connect(&client, addr_a, "localhost").await.is_err());
    let after = connect(&client, addr_b, "localhost").await?;
    assert_eq!(after.server, "cn=server b");
    Ok(())
}

#![allow(dead_code)]

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, Issuer, KeyPair};
use rustls::pki_types::ServerName;
use rustls::HandshakeKind;
use rustls_hotswap::{Certificate, CertificateChain, Destination, PrivateKey, TlsContext};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub struct Pki {
    pub ca: Certificate,
    issuer: Issuer<'static, KeyPair>,
}

pub struct Identity {
    pub chain: CertificateChain,
    pub key: PrivateKey,
}

impl Pki {
    pub fn new(name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        let cert = params.self_signed(&key).unwrap();
        Self {
            ca: Certificate::from_der(cert.der().clone()).unwrap(),
            issuer: Issuer::new(params, key),
        }
    }

    /// Leaf valid for `localhost` and `127.0.0.1`.
    pub fn leaf(&self, cn: &str) -> Identity {
        let key = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
                .unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        let cert = params.signed_by(&key, &self.issuer).unwrap();
        Identity {
            chain: CertificateChain::new(vec![
                Certificate::from_der(cert.der().clone()).unwrap(),
                self.ca.clone(),
            ])
            .unwrap(),
            key: PrivateKey::try_from(key.serialize_der()).unwrap(),
        }
    }
}

/// Accepts connections until the test ends.
///
/// Each connection gets a fresh server config from `context`, and the server
/// answers with the subject of the client's certificate (`-` if none).
pub async fn serve(context: TlsContext) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let Ok(config) = context.server_config() else {
                return;
            };
            let acceptor = TlsAcceptor::from(config);
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(tcp).await else {
                    return;
                };
                let client = tls
                    .get_ref()
                    .1
                    .peer_certificates()
                    .and_then(|certs| certs.first())
                    .map_or_else(
                        || "-".to_string(),
                        |der| Certificate::from_der(der.clone()).unwrap().subject().to_string(),
                    );
                let _ = tls.write_all(client.as_bytes()).await;
                let _ = tls.shutdown().await;
            });
        }
    });

    addr
}

#[derive(Debug)]
pub struct Handshake {
    /// Subject of the server's leaf certificate.
    pub server: String,
    /// Subject of the client certificate the server saw, or `-`.
    pub client_seen: String,
    pub resumed: bool,
}

/// Connects to `addr` as `host`, reads the server's answer to the end.
pub async fn connect(context: &TlsContext, addr: SocketAddr, host: &str) -> std::io::Result<Handshake> {
    let config = context
        .client_config(&Destination::with_port(host, addr.port()))
        .unwrap();
    let connector = TlsConnector::from(config);
    let tcp = TcpStream::connect(addr).await?;
    let server_name = ServerName::try_from(host.to_string()).unwrap();
    let mut tls = connector.connect(server_name, tcp).await?;

    let mut answer = String::new();
    tls.read_to_string(&mut answer).await?;

    let connection = tls.get_ref().1;
    let server = connection
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|der| Certificate::from_der(der.clone()).unwrap().subject().to_string())
        .unwrap_or_default();
    Ok(Handshake {
        server,
        client_seen: answer,
        resumed: connection.handshake_kind() == Some(HandshakeKind::Resumed),
    })
}

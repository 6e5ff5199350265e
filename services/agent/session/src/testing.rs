//! Throwaway PKI and a TLS HTTP/2 hub for session tests

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::AbortHandle;
use tokio_rustls::TlsAcceptor;

use crate::identity::{parse_certificates, parse_private_key};

/// PEM material of a mesh CA, one agent and one hub
pub(crate) struct TestPki {
    pub(crate) ca: String,
    pub(crate) agent_certificate: String,
    pub(crate) agent_key: String,
    hub_certificate: String,
    hub_key: String,
}

impl TestPki {
    pub(crate) fn new() -> Self {
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.distinguished_name.push(DnType::CommonName, "test mesh CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::DigitalSignature];
        let ca_key = KeyPair::generate().unwrap();
        let ca = ca_params.self_signed(&ca_key).unwrap().pem();
        let issuer = Issuer::from_ca_cert_pem(&ca, &ca_key).unwrap();

        let mut agent_params = CertificateParams::new(vec!["edge-agent".to_string()]).unwrap();
        agent_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let agent_key = KeyPair::generate().unwrap();
        let agent_certificate = agent_params.signed_by(&agent_key, &issuer).unwrap().pem();

        let mut hub_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        hub_params.subject_alt_names = vec![SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST))];
        hub_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let hub_key = KeyPair::generate().unwrap();
        let hub_certificate = hub_params.signed_by(&hub_key, &issuer).unwrap().pem();

        Self {
            ca,
            agent_certificate,
            agent_key: agent_key.serialize_pem(),
            hub_certificate,
            hub_key: hub_key.serialize_pem(),
        }
    }

    /// Hub side TLS configuration requiring a client certificate from the CA
    fn server_config(&self) -> Arc<ServerConfig> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut roots = RootCertStore::empty();
        for ca in parse_certificates(&self.ca).unwrap() {
            roots.add(ca).unwrap();
        }
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build().unwrap();

        let mut config = ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(
                parse_certificates(&self.hub_certificate).unwrap(),
                parse_private_key(&self.hub_key).unwrap(),
            )
            .unwrap();
        config.alpn_protocols = vec![b"h2".to_vec()];
        Arc::new(config)
    }
}

/// Hub answering every request with `200 {path}`, except `/hang` which never answers
pub(crate) struct TestHub {
    pub(crate) address: String,
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    authenticated: Arc<AtomicUsize>,
    hanging: Arc<AtomicUsize>,
    connections: Arc<Mutex<Vec<AbortHandle>>>,
}

impl TestHub {
    pub(crate) async fn start(pki: &TestPki) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hub = Self {
            address: listener.local_addr().unwrap().to_string(),
            accepted: Arc::default(),
            open: Arc::default(),
            authenticated: Arc::default(),
            hanging: Arc::default(),
            connections: Arc::default(),
        };

        let acceptor = TlsAcceptor::from(pki.server_config());
        let accepted = hub.accepted.clone();
        let open = hub.open.clone();
        let authenticated = hub.authenticated.clone();
        let hanging = hub.hanging.clone();
        let connections = hub.connections.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accepted.fetch_add(1, Ordering::SeqCst);

                let acceptor = acceptor.clone();
                let open = open.clone();
                let authenticated = authenticated.clone();
                let hanging = hanging.clone();
                let task = tokio::spawn(async move {
                    let Ok(tls) = acceptor.accept(stream).await else {
                        return;
                    };
                    if tls.get_ref().1.peer_certificates().is_some() {
                        authenticated.fetch_add(1, Ordering::SeqCst);
                    }

                    open.fetch_add(1, Ordering::SeqCst);
                    let service = service_fn(move |request: Request<Incoming>| {
                        let hanging = hanging.clone();
                        async move {
                            let path = request.uri().path().to_string();
                            if path == "/hang" {
                                hanging.fetch_add(1, Ordering::SeqCst);
                                std::future::pending::<()>().await;
                            }
                            Ok::<_, Infallible>(
                                Response::builder()
                                    .status(StatusCode::OK)
                                    .body(Full::new(Bytes::from(path)))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(tls), service)
                        .await;
                    open.fetch_sub(1, Ordering::SeqCst);
                });
                connections.lock().unwrap().push(task.abort_handle());
            }
        });

        hub
    }

    /// TCP connections accepted so far
    pub(crate) fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Connections whose client presented a certificate
    pub(crate) fn authenticated(&self) -> usize {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Connections currently being served
    pub(crate) fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Wait until `/hang` has been requested `n` times
    pub(crate) async fn wait_hanging(&self, n: usize) {
        eventually(|| self.hanging.load(Ordering::SeqCst) >= n).await;
    }

    /// Tear down every connection from the hub side
    pub(crate) fn drop_connections(&self) {
        for task in self.connections.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

/// Poll `condition` until it holds, failing after five seconds
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

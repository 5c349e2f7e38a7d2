use std::pin::Pin;

use boring2::pkey::PKey;
use boring2::ssl::{select_next_proto, AlpnError, Ssl, SslAcceptor, SslAcceptorBuilder, SslMethod};
use boring2::x509::X509;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_boring2::SslStream;

/// Self-signed certificate for 127.0.0.1/localhost. Returns the acceptor
/// builder and the certificate PEM, which doubles as its own CA.
pub fn cert_bundle() -> (SslAcceptorBuilder, Vec<u8>) {
    let cert = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string(), "localhost".to_string()])
        .expect("generate certificate");
    let cert_pem = cert.cert.pem();
    let key_pem = cert.key_pair.serialize_pem();

    let key = PKey::private_key_from_pem(key_pem.as_bytes()).expect("parse key");
    let x509 = X509::from_pem(cert_pem.as_bytes()).expect("parse certificate");

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).expect("acceptor builder");
    builder.set_private_key(&key).expect("set key");
    builder.set_certificate(&x509).expect("set certificate");
    (builder, cert_pem.into_bytes())
}

/// Acceptor selecting from `alpn`, a wire-format protocol list such as
/// `b"\x02h2\x08http/1.1"`.
pub fn acceptor(alpn: &'static [u8]) -> SslAcceptor {
    pinned_acceptor(alpn).0
}

/// Like [`acceptor`], also returning the `sha256/..` pin of the certificate
/// key.
pub fn pinned_acceptor(alpn: &'static [u8]) -> (SslAcceptor, String) {
    let (mut builder, pem) = cert_bundle();
    let spki = X509::from_pem(&pem)
        .expect("parse certificate")
        .public_key()
        .expect("public key")
        .public_key_to_der()
        .expect("spki der");
    builder.set_alpn_select_callback(move |_, client| select_next_proto(alpn, client).ok_or(AlpnError::NOACK));
    (builder.build(), masquerade::transport::connector::spki_pin(&spki))
}

/// Server side of a TLS handshake; `None` when the client gives up.
pub async fn accept<S>(acceptor: &SslAcceptor, stream: S) -> Option<SslStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ssl = Ssl::new(acceptor.context()).ok()?;
    let mut tls = SslStream::new(ssl, stream).ok()?;
    Pin::new(&mut tls).accept().await.ok()?;
    Some(tls)
}

use russh_keys::PublicKeyBase64;
use russh_keys::key::KeyPair;

use super::common::{
    TEST_PASSWORD, TEST_USER, TestServer, open_sftp, password_builder, test_builder,
    try_password, try_public_key,
};

fn ed25519() -> KeyPair {
    KeyPair::generate_ed25519()
}

#[tokio::test]
async fn test_password_auth_accepts_exact_credentials() {
    let server = TestServer::start(password_builder()).await;

    let (handle, accepted) = try_password(server.addr(), TEST_USER, TEST_PASSWORD).await;
    assert!(accepted, "exact credentials should be accepted");

    let sftp = open_sftp(&handle).await;
    let canonical = sftp.canonicalize(".").await.expect("realpath");
    assert_eq!(canonical, "/");

    server.stop().await;
}

#[tokio::test]
async fn test_password_auth_rejects_wrong_password_or_user() {
    let server = TestServer::start(password_builder()).await;

    let (_, accepted) = try_password(server.addr(), TEST_USER, "wrong").await;
    assert!(!accepted, "wrong password must be rejected");

    let (_, accepted) = try_password(server.addr(), "mallory", TEST_PASSWORD).await;
    assert!(!accepted, "wrong username must be rejected");

    let (_, accepted) = try_password(server.addr(), TEST_USER, "").await;
    assert!(!accepted, "empty password must be rejected");

    server.stop().await;
}

#[tokio::test]
async fn test_empty_configured_password_rejects_all_logins() {
    let server = TestServer::start(test_builder().username("admin").password("")).await;

    let (_, accepted) = try_password(server.addr(), "admin", "").await;
    assert!(!accepted, "an empty configured password must not enable login");

    let (_, accepted) = try_password(server.addr(), "admin", "anything").await;
    assert!(!accepted);

    server.stop().await;
}

#[tokio::test]
async fn test_alice_secret_scenario() {
    let server = TestServer::start(
        test_builder()
            .username("alice")
            .password("secret"),
    )
    .await;

    let (handle, accepted) = try_password(server.addr(), "alice", "secret").await;
    assert!(accepted);
    let sftp = open_sftp(&handle).await;
    sftp.read_dir("/").await.expect("list root");

    let (_, accepted) = try_password(server.addr(), "alice", "wrong").await;
    assert!(!accepted);

    server.stop().await;
}

#[tokio::test]
async fn test_public_key_auth_allow_list() {
    let authorized = ed25519();
    let public = authorized.clone_public_key().expect("public key");
    let server = TestServer::start(test_builder().authorized_key(&public)).await;

    let (handle, accepted) = try_public_key(server.addr(), "bob", authorized).await;
    assert!(accepted, "authorized key should be accepted");
    open_sftp(&handle).await;

    let (_, accepted) = try_public_key(server.addr(), "bob", ed25519()).await;
    assert!(!accepted, "valid but unlisted key must be rejected");

    server.stop().await;
}

#[tokio::test]
async fn test_public_key_auth_ignores_username() {
    let authorized = ed25519();
    let public = authorized.clone_public_key().expect("public key");
    let server = TestServer::start(
        password_builder().authorized_key(&public),
    )
    .await;

    // The key alone authenticates; the claimed user is not compared.
    let (_, accepted) = try_public_key(server.addr(), "not-alice", authorized).await;
    assert!(accepted);

    server.stop().await;
}

#[tokio::test]
async fn test_authorized_keys_file() {
    let authorized = ed25519();
    let public = authorized.clone_public_key().expect("public key");
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("authorized_keys");
    std::fs::write(
        &path,
        format!(
            "# test keys\nno-pty ssh-ed25519 {} test@sftpd\n",
            public.public_key_base64()
        ),
    )
    .expect("write authorized_keys");

    let server = TestServer::start(test_builder().authorized_keys_file(&path)).await;

    let (_, accepted) = try_public_key(server.addr(), "carol", authorized).await;
    assert!(accepted);

    server.stop().await;
}

#[tokio::test]
async fn test_no_auth_configured_rejects_everything() {
    let server = TestServer::start(test_builder().username(TEST_USER)).await;

    let (_, accepted) = try_password(server.addr(), TEST_USER, TEST_PASSWORD).await;
    assert!(!accepted);

    let (_, accepted) = try_password(server.addr(), TEST_USER, "").await;
    assert!(!accepted);

    let (_, accepted) = try_public_key(server.addr(), TEST_USER, ed25519()).await;
    assert!(!accepted);

    server.stop().await;
}

#[tokio::test]
async fn test_password_only_rejects_public_keys() {
    let server = TestServer::start(password_builder()).await;

    let (_, accepted) = try_public_key(server.addr(), TEST_USER, ed25519()).await;
    assert!(!accepted);

    server.stop().await;
}

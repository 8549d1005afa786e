//! First-run login and registration flow.
//!
//! Login is attempted first; a `PermissionDenied` from the coordinator
//! means the peer is not registered yet and flips the flow into
//! registration, which needs a setup key. The key comes from the command
//! line or, failing that, an interactive prompt that refuses empty input.

use std::io::{self, BufRead, Write};

use tracing::{debug, info};
use uuid::Uuid;
use weft_core::{error::CoreError, mgmt::ManagementClient};
use weft_proto::LoginResponse;

/// Log this peer in, registering it first if the coordinator does not know
/// it yet.
///
/// `prompt` is only invoked when registration is required and no setup key
/// was supplied.
///
/// # Errors
///
/// Propagates coordinator errors; a malformed setup key fails with
/// [`CoreError::Invalid`] before anything is sent.
pub async fn login_peer<C, P>(
    client: &C,
    setup_key: Option<&str>,
    prompt: P,
) -> Result<LoginResponse, CoreError>
where
    C: ManagementClient,
    P: FnOnce() -> io::Result<String>,
{
    let server_key = client.get_server_public_key().await?;

    match client.login(&server_key).await {
        Ok(response) => {
            info!("peer has successfully logged in");
            Ok(response)
        },
        Err(CoreError::PermissionDenied(_)) => {
            debug!("peer registration required");
            register_peer(client, &server_key, setup_key, prompt).await
        },
        Err(err) => Err(err),
    }
}

/// Register this peer using the supplied setup key, prompting for one when
/// absent.
async fn register_peer<C, P>(
    client: &C,
    server_key: &str,
    setup_key: Option<&str>,
    prompt: P,
) -> Result<LoginResponse, CoreError>
where
    C: ManagementClient,
    P: FnOnce() -> io::Result<String>,
{
    let raw = match setup_key {
        Some(key) => key.to_string(),
        None => prompt()
            .map_err(|err| CoreError::Invalid(format!("failed reading setup key: {err}")))?,
    };

    let key = Uuid::parse_str(raw.trim())
        .map_err(|_| CoreError::Invalid(format!("setup key {:?} is not a valid UUID", raw.trim())))?;

    debug!("sending peer registration request");
    let response = client.register(server_key, &key.to_string()).await?;
    info!("peer has been successfully registered");

    Ok(response)
}

/// Read a setup key interactively, re-prompting while the input is empty.
///
/// # Errors
///
/// Returns an error when the input stream ends before a non-empty line.
pub fn prompt_setup_key(input: &mut impl BufRead, output: &mut impl Write) -> io::Result<String> {
    write!(output, "Enter setup key: ")?;
    output.flush()?;

    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no setup key provided"));
        }

        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }

        writeln!(output, "Specified key is empty, try again:")?;
        output.flush()?;
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Cursor,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;

    const VALID_KEY: &str = "1b071a48-77f1-4db9-b694-0b2ecb0dbcd7";

    /// Coordinator double: unregistered until `register` is called with the
    /// expected key.
    struct FakeCoordinator {
        registered: std::sync::atomic::AtomicBool,
        register_calls: AtomicUsize,
    }

    impl FakeCoordinator {
        fn new(registered: bool) -> Self {
            Self {
                registered: std::sync::atomic::AtomicBool::new(registered),
                register_calls: AtomicUsize::new(0),
            }
        }

        fn response() -> LoginResponse {
            LoginResponse { address: "10.30.0.7/32".to_string(), network: "10.30.0.0/24".to_string() }
        }
    }

    #[async_trait]
    impl ManagementClient for FakeCoordinator {
        async fn get_server_public_key(&self) -> Result<String, CoreError> {
            Ok(format!("{}=", "S".repeat(43)))
        }

        async fn login(&self, _server_key: &str) -> Result<LoginResponse, CoreError> {
            if self.registered.load(Ordering::SeqCst) {
                Ok(Self::response())
            } else {
                Err(CoreError::PermissionDenied("peer is not registered".to_string()))
            }
        }

        async fn register(
            &self,
            _server_key: &str,
            setup_key: &str,
        ) -> Result<LoginResponse, CoreError> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(setup_key, VALID_KEY);
            self.registered.store(true, Ordering::SeqCst);
            Ok(Self::response())
        }
    }

    fn no_prompt() -> io::Result<String> {
        panic!("prompt should not be invoked");
    }

    #[tokio::test]
    async fn registered_peer_logs_straight_in() {
        let client = FakeCoordinator::new(true);
        let response = login_peer(&client, None, no_prompt).await.unwrap();
        assert_eq!(response.address, "10.30.0.7/32");
        assert_eq!(client.register_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unregistered_peer_falls_into_registration() {
        let client = FakeCoordinator::new(false);
        let response = login_peer(&client, Some(VALID_KEY), no_prompt).await.unwrap();
        assert_eq!(response.network, "10.30.0.0/24");
        assert_eq!(client.register_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_key_is_prompted_for() {
        let client = FakeCoordinator::new(false);
        let response =
            login_peer(&client, None, || Ok(VALID_KEY.to_string())).await.unwrap();
        assert_eq!(response.address, "10.30.0.7/32");
    }

    #[tokio::test]
    async fn malformed_setup_key_fails_before_sending() {
        let client = FakeCoordinator::new(false);
        let result = login_peer(&client, Some("not-a-uuid"), no_prompt).await;
        assert!(matches!(result, Err(CoreError::Invalid(_))));
        assert_eq!(client.register_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prompt_retries_on_empty_input() {
        let mut input = Cursor::new(format!("\n   \n{VALID_KEY}\n"));
        let mut output = Vec::new();

        let key = prompt_setup_key(&mut input, &mut output).unwrap();
        assert_eq!(key, VALID_KEY);

        let transcript = String::from_utf8(output).unwrap();
        assert_eq!(transcript.matches("try again").count(), 2);
    }

    #[test]
    fn prompt_fails_on_exhausted_input() {
        let mut input = Cursor::new("\n\n");
        let mut output = Vec::new();
        assert!(prompt_setup_key(&mut input, &mut output).is_err());
    }
}

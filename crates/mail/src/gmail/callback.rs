//! Loopback listener that receives the OAuth redirect
//!
//! The broker binds a local port, hands the authorization URL to the
//! operator, then waits for whichever comes first: an authorization code,
//! an explicit error from the provider, or the timeout. The listener runs on
//! a background thread and reports through a single-slot channel, so the
//! first outcome wins and anything after it is dropped.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use url::Url;

/// Settings for the local callback listener
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    /// Loopback port to bind (0 picks a free port)
    pub port: u16,
    /// Path the provider redirects to
    pub path: String,
    /// How long to wait for the operator to finish authorizing
    pub timeout: Duration,
    /// Upper bound on waiting for the listener to stop
    pub shutdown_grace: Duration,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            port: 9901,
            path: "/callback".to_string(),
            timeout: Duration::from_secs(5 * 60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// What the listener reported back to the waiting caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Code(String),
    Error(String),
}

/// Broker lifecycle
///
/// `Listening → {CodeReceived, ErrorReceived, TimedOut} → ShuttingDown → Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Listening,
    CodeReceived,
    ErrorReceived,
    TimedOut,
    ShuttingDown,
    Done,
}

/// Authorization failures; every variant is fatal for the run
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization error: {0}")]
    Denied(String),

    #[error("Authorization timeout: no response received within {} seconds", .0.as_secs())]
    TimedOut(Duration),

    #[error("Callback listener stopped before a response was received")]
    ListenerStopped,

    #[error("Authorization broker has already been used")]
    AlreadyUsed,

    #[error("Callback listener I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Opens the authorization URL for the operator
pub trait BrowserLauncher {
    fn open(&self, url: &str) -> io::Result<()>;
}

/// Launches the system default browser
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        open::that(url)
    }
}

impl<F> BrowserLauncher for F
where
    F: Fn(&str) -> io::Result<()>,
{
    fn open(&self, url: &str) -> io::Result<()> {
        self(url)
    }
}

/// One-shot authorization code receiver
pub struct AuthBroker {
    config: CallbackConfig,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    expected_state: Option<String>,
    state: BrokerState,
}

impl AuthBroker {
    /// Bind the loopback listener and enter the `Listening` state
    pub fn bind(config: CallbackConfig) -> Result<Self, AuthError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, config.port))?;
        let local_addr = listener.local_addr()?;
        debug!("OAuth callback listener bound to {}", local_addr);

        Ok(Self {
            config,
            listener: Some(listener),
            local_addr,
            expected_state: None,
            state: BrokerState::Listening,
        })
    }

    /// Require callbacks to echo this `state` value
    pub fn with_expected_state(mut self, state: impl Into<String>) -> Self {
        self.expected_state = Some(state.into());
        self
    }

    /// Redirect URI to register with the provider
    pub fn redirect_uri(&self) -> String {
        format!(
            "http://localhost:{}{}",
            self.local_addr.port(),
            self.config.path
        )
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> BrokerState {
        self.state
    }

    /// Present the authorization URL and wait for the provider's redirect
    ///
    /// The listener is shut down exactly once before this returns, whichever
    /// way the wait ended. A broker serves a single attempt; calling this
    /// again returns [`AuthError::AlreadyUsed`].
    pub fn obtain_authorization_code(
        &mut self,
        authorization_url: &str,
        launcher: &dyn BrowserLauncher,
    ) -> Result<String, AuthError> {
        let listener = self.listener.take().ok_or(AuthError::AlreadyUsed)?;
        listener.set_nonblocking(true)?;

        let (outcome_tx, outcome_rx) = mpsc::sync_channel(1);
        let (done_tx, done_rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let server = CallbackServer {
            listener,
            handler: RequestHandler {
                path: self.config.path.clone(),
                expected_state: self.expected_state.clone(),
                outcomes: outcome_tx,
            },
            shutdown: Arc::clone(&shutdown),
        };
        let handle = thread::Builder::new()
            .name("oauth-callback".to_string())
            .spawn(move || {
                server.serve();
                let _ = done_tx.send(());
            })?;

        println!("Opening browser for authorization...");
        println!(
            "If the browser doesn't open automatically, go to: {}",
            authorization_url
        );
        if let Err(e) = launcher.open(authorization_url) {
            warn!("Could not open browser: {}. Please open the URL manually.", e);
        }
        info!("Waiting for authorization on {}", self.redirect_uri());

        let result = match outcome_rx.recv_timeout(self.config.timeout) {
            Ok(CallbackOutcome::Code(code)) => {
                self.transition(BrokerState::CodeReceived);
                Ok(code)
            }
            Ok(CallbackOutcome::Error(error)) => {
                self.transition(BrokerState::ErrorReceived);
                Err(AuthError::Denied(error))
            }
            Err(RecvTimeoutError::Timeout) => {
                self.transition(BrokerState::TimedOut);
                Err(AuthError::TimedOut(self.config.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.transition(BrokerState::ErrorReceived);
                Err(AuthError::ListenerStopped)
            }
        };

        self.shut_down(&shutdown, done_rx, handle);
        result
    }

    fn shut_down(&mut self, shutdown: &AtomicBool, done: Receiver<()>, handle: JoinHandle<()>) {
        self.transition(BrokerState::ShuttingDown);
        shutdown.store(true, Ordering::SeqCst);

        match done.recv_timeout(self.config.shutdown_grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("OAuth callback listener panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "OAuth callback listener did not stop within {:?}",
                    self.config.shutdown_grace
                );
            }
        }

        self.transition(BrokerState::Done);
    }

    fn transition(&mut self, next: BrokerState) {
        debug!("Auth broker: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Background half of the broker; owns the socket until it stops
///
/// Only the accept loop touches the listener. Each connection is read on
/// its own thread, so a client that connects and stays silent cannot keep
/// the loop from seeing the shutdown flag.
struct CallbackServer {
    listener: TcpListener,
    handler: RequestHandler,
    shutdown: Arc<AtomicBool>,
}

impl CallbackServer {
    const POLL_INTERVAL: Duration = Duration::from_millis(25);

    fn serve(self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!("OAuth callback connection from {}", peer);
                    let handler = self.handler.clone();
                    let spawned = thread::Builder::new()
                        .name("oauth-callback-conn".to_string())
                        .spawn(move || {
                            if let Err(e) = handler.handle(stream) {
                                warn!("Failed to handle OAuth callback request: {}", e);
                            }
                        });
                    if let Err(e) = spawned {
                        warn!("Failed to start OAuth callback handler: {}", e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Self::POLL_INTERVAL);
                }
                Err(e) => {
                    self.handler
                        .report(CallbackOutcome::Error(format!("server error: {}", e)));
                    break;
                }
            }
        }
        drop(self.listener);
        debug!("OAuth callback listener closed");
    }
}

/// Reads one callback request and reports what it carried
#[derive(Clone)]
struct RequestHandler {
    path: String,
    expected_state: Option<String>,
    outcomes: SyncSender<CallbackOutcome>,
}

impl RequestHandler {
    const IO_TIMEOUT: Duration = Duration::from_secs(10);

    fn handle(&self, stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Self::IO_TIMEOUT))?;
        stream.set_write_timeout(Some(Self::IO_TIMEOUT))?;

        let mut reader = BufReader::new(&stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line)?;

        // Drain the request headers
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
                break;
            }
        }

        let target = request_line.split_whitespace().nth(1).unwrap_or_default();
        let reply = route(target, &self.path, self.expected_state.as_deref());
        if let Some(outcome) = reply.outcome {
            self.report(outcome);
        }

        let mut writer = &stream;
        write!(
            writer,
            "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            reply.status,
            reply.body.len(),
            reply.body
        )?;
        writer.flush()
    }

    fn report(&self, outcome: CallbackOutcome) {
        match self.outcomes.try_send(outcome) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                debug!("Ignoring OAuth callback after first outcome: {:?}", dropped);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("OAuth callback arrived after the broker stopped waiting");
            }
        }
    }
}

/// Response to one callback request plus what it means for the broker
#[derive(Debug, PartialEq, Eq)]
struct Reply {
    status: &'static str,
    body: &'static str,
    outcome: Option<CallbackOutcome>,
}

const SUCCESS_PAGE: &str = "<html>\
<head><title>Authorization Successful</title></head>\
<body><h1>Authorization Successful!</h1>\
<p>You can close this window and return to the application.</p></body>\
</html>";

const FAILURE_PAGE: &str = "<html>\
<head><title>Authorization Failed</title></head>\
<body><h1>Authorization Failed</h1>\
<p>No authorization code was received. Return to the application for details.</p></body>\
</html>";

const NOT_FOUND_PAGE: &str = "<html><body><h1>Not Found</h1></body></html>";

/// Interpret a request target such as `/callback?code=...`
fn route(target: &str, callback_path: &str, expected_state: Option<&str>) -> Reply {
    let failure = |message: String| Reply {
        status: "400 Bad Request",
        body: FAILURE_PAGE,
        outcome: Some(CallbackOutcome::Error(message)),
    };

    let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
        return Reply {
            status: "400 Bad Request",
            body: NOT_FOUND_PAGE,
            outcome: None,
        };
    };

    if url.path() != callback_path {
        return Reply {
            status: "404 Not Found",
            body: NOT_FOUND_PAGE,
            outcome: None,
        };
    }

    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        return failure(error.clone());
    }

    let Some(code) = params.get("code").filter(|c| !c.is_empty()) else {
        return failure("no authorization code in callback".to_string());
    };

    if let Some(expected) = expected_state
        && params.get("state").map(String::as_str) != Some(expected)
    {
        return failure("state mismatch in callback".to_string());
    }

    Reply {
        status: "200 OK",
        body: SUCCESS_PAGE,
        outcome: Some(CallbackOutcome::Code(code.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_code() {
        let reply = route("/callback?code=4%2F0Abc&scope=mail", "/callback", None);
        assert_eq!(reply.status, "200 OK");
        assert_eq!(
            reply.outcome,
            Some(CallbackOutcome::Code("4/0Abc".to_string()))
        );
    }

    #[test]
    fn test_route_error_param() {
        let reply = route("/callback?error=access_denied", "/callback", None);
        assert_eq!(reply.status, "400 Bad Request");
        assert_eq!(
            reply.outcome,
            Some(CallbackOutcome::Error("access_denied".to_string()))
        );
    }

    #[test]
    fn test_route_missing_code() {
        let reply = route("/callback", "/callback", None);
        assert!(matches!(reply.outcome, Some(CallbackOutcome::Error(_))));

        let reply = route("/callback?code=", "/callback", None);
        assert!(matches!(reply.outcome, Some(CallbackOutcome::Error(_))));
    }

    #[test]
    fn test_route_other_path_is_ignored() {
        let reply = route("/favicon.ico", "/callback", None);
        assert_eq!(reply.status, "404 Not Found");
        assert_eq!(reply.outcome, None);
    }

    #[test]
    fn test_route_state_checked() {
        let ok = route("/callback?code=abc&state=s1", "/callback", Some("s1"));
        assert_eq!(ok.outcome, Some(CallbackOutcome::Code("abc".to_string())));

        let wrong = route("/callback?code=abc&state=s2", "/callback", Some("s1"));
        assert!(matches!(wrong.outcome, Some(CallbackOutcome::Error(_))));

        let missing = route("/callback?code=abc", "/callback", Some("s1"));
        assert!(matches!(missing.outcome, Some(CallbackOutcome::Error(_))));
    }

    #[test]
    fn test_default_config() {
        let config = CallbackConfig::default();
        assert_eq!(config.port, 9901);
        assert_eq!(config.path, "/callback");
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_redirect_uri_uses_bound_port() {
        let broker = AuthBroker::bind(CallbackConfig {
            port: 0,
            ..CallbackConfig::default()
        })
        .unwrap();
        let port = broker.local_addr().port();
        assert_ne!(port, 0);
        assert_eq!(
            broker.redirect_uri(),
            format!("http://localhost:{}/callback", port)
        );
        assert_eq!(broker.state(), BrokerState::Listening);
    }
}

//! Chromium-backed WhatsApp Web client.
//!
//! One [`WebClient`] owns one headless Chromium instance whose profile
//! directory doubles as the persistent authentication store, so a relaunch
//! resumes an authenticated session without a fresh handshake. A watcher
//! task probes the hosted web client and translates what it sees into
//! [`ClientEvent`]s; the wire protocol underneath belongs entirely to
//! `chromiumoxide`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{ClientError, ClientEvent, ClientResult};
use crate::session::AccountIdentity;

/// Hosted web client entry point.
const WEB_APP_URL: &str = "https://web.whatsapp.com";

/// Desktop user agent; the web client refuses the headless default.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Flags matching what the hosted client tolerates in containers.
const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-extensions",
    "--disable-gpu",
];

/// Cadence of the login-state probe.
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive probe failures before the transport is declared lost.
const MAX_PROBE_FAILURES: u32 = 3;

/// Event channel capacity; the pump drains promptly, this only absorbs
/// bursts around QR rotation.
const EVENT_BUFFER: usize = 16;

/// Login-state probe evaluated in the page. The QR payload is exposed as a
/// `data-ref` attribute while unauthenticated; the side pane exists only
/// once authenticated.
const PROBE_JS: &str = r#"
(() => {
  const qrEl = document.querySelector('div[data-ref]');
  if (qrEl) {
    return { phase: 'qr', qr: qrEl.getAttribute('data-ref') };
  }
  if (document.querySelector('#side')) {
    return {
      phase: 'ready',
      wid: window.localStorage.getItem('last-wid-md') || window.localStorage.getItem('last-wid'),
      pushname: window.localStorage.getItem('push-name'),
    };
  }
  return { phase: 'loading' };
})()
"#;

/// Platform-side logout, falling back to wiping local credentials when the
/// internal store is not reachable.
const LOGOUT_JS: &str = r#"
(async () => {
  if (window.Store && window.Store.AppState && typeof window.Store.AppState.logout === 'function') {
    await window.Store.AppState.logout();
    return true;
  }
  window.localStorage.clear();
  return false;
})()
"#;

/// What the probe reports about the hosted client.
#[derive(Debug, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
enum ProbeState {
    Qr {
        qr: String,
    },
    Ready {
        wid: Option<String>,
        pushname: Option<String>,
    },
    Loading,
}

struct ClientInner {
    user_id: String,
    browser: Mutex<Browser>,
    page: Page,
    handler_loop: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

/// Handle to one user's browser session.
///
/// Internally reference-counted so the media pipeline can hold a
/// send-capable clone; lifecycle authority (teardown) stays with the
/// session record's owner.
#[derive(Clone)]
pub struct WebClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for WebClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebClient")
            .field("user_id", &self.inner.user_id)
            .finish_non_exhaustive()
    }
}

impl WebClient {
    /// Launch a browser bound to the user's authentication store and start
    /// watching the hosted client. Events arrive on the returned channel in
    /// observation order.
    pub async fn connect(
        user_id: &str,
        auth_dir: &Path,
        executable: Option<&Path>,
    ) -> ClientResult<(Self, mpsc::Receiver<ClientEvent>)> {
        tokio::fs::create_dir_all(auth_dir)
            .await
            .map_err(|err| ClientError::Launch(format!("cannot create auth store: {err}")))?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(auth_dir)
            .arg(format!("--user-agent={USER_AGENT}"));
        for arg in LAUNCH_ARGS {
            builder = builder.arg(*arg);
        }
        if let Some(path) = executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(ClientError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| ClientError::Launch(err.to_string()))?;

        // The handler loop drives the CDP connection; it ends when the
        // browser goes away.
        let handler_loop = tokio::spawn(async move {
            while let Some(item) = handler.next().await {
                if item.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page(WEB_APP_URL)
            .await
            .map_err(|err| ClientError::Launch(err.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let watcher = tokio::spawn(watch_login_state(
            user_id.to_string(),
            page.clone(),
            tx,
        ));

        let client = Self {
            inner: Arc::new(ClientInner {
                user_id: user_id.to_string(),
                browser: Mutex::new(browser),
                page,
                handler_loop,
                watcher,
            }),
        };
        Ok((client, rx))
    }

    /// Send a media file to a phone number, with an optional caption.
    pub async fn send_media(
        &self,
        number: &str,
        media_path: &Path,
        caption: Option<&str>,
    ) -> ClientResult<()> {
        let bytes = tokio::fs::read(media_path)
            .await
            .map_err(|err| ClientError::Send(format!("cannot read artifact: {err}")))?;
        let chat_id = format!("{}@c.us", number.trim_start_matches('+'));
        let expression = build_send_expression(&chat_id, &BASE64.encode(&bytes), caption);

        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(ClientError::Send)?;
        self.inner
            .page
            .evaluate(params)
            .await
            .map_err(|err| ClientError::Send(err.to_string()))?;

        tracing::debug!(user_id = %self.inner.user_id, %chat_id, "media handed to web client");
        Ok(())
    }

    /// Ask the platform to end the session gracefully. Teardown noise from
    /// the automation layer is logged and swallowed here; anything else
    /// propagates.
    pub async fn logout(&self) -> ClientResult<()> {
        let params = EvaluateParams::builder()
            .expression(LOGOUT_JS)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(ClientError::Protocol)?;
        match self.inner.page.evaluate(params).await {
            Ok(_) => Ok(()),
            Err(err) if is_teardown_noise(&err) => {
                tracing::warn!(
                    user_id = %self.inner.user_id,
                    error = %err,
                    "ignoring transport noise during logout"
                );
                Ok(())
            }
            Err(err) => Err(ClientError::Protocol(err.to_string())),
        }
    }

    /// Force-destroy the underlying browser. Never fails: teardown errors
    /// are classified, logged, and swallowed.
    pub async fn close(&self) {
        self.inner.watcher.abort();
        {
            let mut browser = self.inner.browser.lock().await;
            if let Err(err) = browser.close().await {
                if is_teardown_noise(&err) {
                    tracing::warn!(
                        user_id = %self.inner.user_id,
                        error = %err,
                        "ignoring transport noise during browser close"
                    );
                } else {
                    tracing::error!(
                        user_id = %self.inner.user_id,
                        error = %err,
                        "browser close failed"
                    );
                }
            }
        }
        self.inner.handler_loop.abort();
    }
}

/// Known-noisy automation-library failures seen during teardown: the
/// websocket drops, the command channel closes, or the browser stops
/// answering. These are expected when a browser is dying and must not
/// surface past the adapter.
fn is_teardown_noise(err: &CdpError) -> bool {
    matches!(
        err,
        CdpError::Ws(_)
            | CdpError::Io(_)
            | CdpError::ChannelSendError(_)
            | CdpError::NoResponse
            | CdpError::Timeout
    )
}

/// Probe the hosted client until the transport dies or the receiver goes
/// away, translating observations into events.
async fn watch_login_state(user_id: String, page: Page, tx: mpsc::Sender<ClientEvent>) {
    let mut last_qr: Option<String> = None;
    let mut authenticated = false;
    let mut failures = 0u32;

    loop {
        tokio::time::sleep(PROBE_INTERVAL).await;

        match probe(&page).await {
            Ok(state) => {
                failures = 0;
                match state {
                    ProbeState::Qr { qr } => {
                        if authenticated {
                            // Back on the QR screen after being logged in:
                            // the platform revoked the session.
                            authenticated = false;
                            let event =
                                ClientEvent::AuthFailure("platform revoked the session".into());
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        if last_qr.as_deref() != Some(qr.as_str()) {
                            last_qr = Some(qr.clone());
                            if tx.send(ClientEvent::Qr(qr)).await.is_err() {
                                return;
                            }
                        }
                    }
                    ProbeState::Ready { wid, pushname } => {
                        if !authenticated {
                            authenticated = true;
                            last_qr = None;
                            let identity = identity_from_wid(wid, pushname);
                            if tx.send(ClientEvent::Ready(identity)).await.is_err() {
                                return;
                            }
                        }
                    }
                    ProbeState::Loading => {}
                }
            }
            Err(err) => {
                failures += 1;
                if failures >= MAX_PROBE_FAILURES {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %err,
                        "login-state probe lost the browser transport"
                    );
                    let _ = tx
                        .send(ClientEvent::Disconnected(format!(
                            "browser transport lost: {err}"
                        )))
                        .await;
                    return;
                }
            }
        }
    }
}

async fn probe(page: &Page) -> ClientResult<ProbeState> {
    page.evaluate(PROBE_JS)
        .await
        .map_err(|err| ClientError::Protocol(err.to_string()))?
        .into_value()
        .map_err(|err| ClientError::Protocol(err.to_string()))
}

/// Build the identity from what the web client stores locally. The wid is
/// JSON-quoted in localStorage and may carry a `:device` suffix.
fn identity_from_wid(wid: Option<String>, pushname: Option<String>) -> AccountIdentity {
    let id = wid
        .map(|raw| raw.trim_matches('"').to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let phone_number = id
        .split(['@', ':'])
        .next()
        .filter(|part| !part.is_empty())
        .map(str::to_string);
    let name = pushname
        .map(|raw| raw.trim_matches('"').to_string())
        .filter(|value| !value.is_empty());
    AccountIdentity {
        id,
        name,
        phone_number,
    }
}

/// Hand the artifact to the hosted client's internal store. Inputs are
/// embedded JSON-escaped so arbitrary captions cannot break the script.
fn build_send_expression(chat_id: &str, payload_b64: &str, caption: Option<&str>) -> String {
    let chat = serde_json::json!(chat_id).to_string();
    let media = serde_json::json!(payload_b64).to_string();
    let caption = serde_json::json!(caption).to_string();
    format!(
        r#"
(async () => {{
  const chatId = {chat};
  const mediaB64 = {media};
  const caption = {caption};
  if (!window.Store || !window.Store.Chat) {{
    throw new Error('web client not ready');
  }}
  const chat = await window.Store.Chat.find(chatId);
  const bytes = Uint8Array.from(atob(mediaB64), (c) => c.charCodeAt(0));
  const file = new File([bytes], 'video.mp4', {{ type: 'video/mp4' }});
  await window.Store.SendMessage.sendMedia(chat, file, caption ? {{ caption }} : {{}});
  return true;
}})()
"#
    )
}

//! The authoritative resolved endpoint state and its transitions.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config;
use crate::location::{PageLocation, PageUrl, TokenStorage};
use crate::normalize::{absolutize, derive_realtime_url, is_realtime_url};
use crate::probe::{HandshakeProbe, WsProbe, find_first_valid_with, generate_candidates};
use crate::types::{ConfigError, EndpointState, Error, GraphQlConfig, Result, StoreEvent};

/// Storage key and page query parameter carrying the platform token.
pub const PLATFORM_TOKEN_KEY: &str = "platform-token";
const ENDPOINT_PARAM: &str = "endpoint";
const SUBSCRIPTION_ENDPOINT_PARAM: &str = "subscriptionEndpoint";
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Explicit construction inputs, highest precedence first within each group.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub endpoint: Option<String>,
    /// Alternate spelling of `endpoint`, consulted when `endpoint` is unset.
    pub endpoint_url: Option<String>,
    pub subscription_endpoint: Option<String>,
    pub config: Option<GraphQlConfig>,
    /// Raw configuration text as edited by the user.
    pub config_string: Option<String>,
    pub platform_token: Option<String>,
}

/// Collaborators the store talks to.
pub struct StoreContext {
    pub page: Arc<dyn PageLocation>,
    pub storage: Arc<dyn TokenStorage>,
    pub prober: Arc<dyn HandshakeProbe>,
}

impl StoreContext {
    /// Context probing over real WebSockets with the default timeout.
    pub fn new(page: Arc<dyn PageLocation>, storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            page,
            storage,
            prober: Arc::new(WsProbe::default()),
        }
    }

    pub fn with_prober(mut self, prober: Arc<dyn HandshakeProbe>) -> Self {
        self.prober = prober;
        self
    }
}

/// Receiving half of the store's change notifications.
pub struct StoreEvents {
    rx: mpsc::Receiver<StoreEvent>,
}

impl StoreEvents {
    /// Receive the next event. Returns `None` once the store is gone.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }

    /// Receive an already queued event without waiting.
    pub fn try_next(&mut self) -> Option<StoreEvent> {
        self.rx.try_recv().ok()
    }
}

/// Owns the current [`EndpointState`] snapshot.
///
/// Construction resolves the initial state synchronously and, when no usable
/// subscription endpoint results, starts discovery on the current tokio
/// runtime. Environment switches replace the snapshot atomically.
pub struct EndpointStateStore {
    config: Option<GraphQlConfig>,
    config_string: Option<String>,
    page: PageUrl,
    prober: Arc<dyn HandshakeProbe>,
    state: Arc<watch::Sender<Arc<EndpointState>>>,
    /// Set once the receiver is taken; events before that are not queued.
    events: Arc<OnceLock<mpsc::Sender<StoreEvent>>>,
    discovery: Option<JoinHandle<()>>,
}

impl EndpointStateStore {
    pub fn new(options: StoreOptions, context: StoreContext) -> Result<Self> {
        let page = PageUrl::parse(&context.page.href())?;

        // Read before the bootstrap may overwrite it.
        let stored_token = context.storage.get(PLATFORM_TOKEN_KEY);
        if let Err(e) = bootstrap_platform_token(&page, context.page.as_ref(), context.storage.as_ref()) {
            tracing::warn!("Platform token bootstrap failed: {e}");
        }

        let StoreOptions {
            endpoint,
            endpoint_url,
            subscription_endpoint,
            config,
            config_string,
            platform_token,
        } = options;

        let mut endpoint = non_empty(endpoint)
            .or_else(|| non_empty(endpoint_url))
            .or_else(|| page.query_param(ENDPOINT_PARAM))
            .unwrap_or_else(|| page.href().to_string());
        let mut hint = non_empty(subscription_endpoint)
            .or_else(|| page.query_param(SUBSCRIPTION_ENDPOINT_PARAM));
        let mut headers = HashMap::new();

        let selection = config
            .as_ref()
            .map(config::resolve_initial_selection)
            .unwrap_or_default();
        if let (Some(config), Some(env)) = (&config, &selection.env_name) {
            let declared = config::resolve_endpoints(config, env, selection.project_name.as_deref())?;
            endpoint = declared.endpoint;
            hint = declared.subscription_endpoint;
            headers = declared.headers.unwrap_or_default();
        }

        let endpoint = absolutize(&endpoint, &page.origin());
        let subscription_endpoint =
            realtime_or_none(derive_realtime_url(&endpoint, hint.as_deref(), &page));

        let state = EndpointState {
            endpoint,
            subscription_endpoint,
            headers,
            active_env: selection.env_name,
            active_project: selection.project_name,
            config_is_structured_format: config_string
                .as_deref()
                .is_some_and(config::is_structured_format),
            platform_token: non_empty(platform_token).or(stored_token),
        };
        tracing::info!(
            endpoint = %state.endpoint,
            subscription_endpoint = ?state.subscription_endpoint,
            active_env = ?state.active_env,
            "Resolved endpoints"
        );

        let needs_discovery = state.subscription_endpoint.is_none();
        let (state_tx, _) = watch::channel(Arc::new(state));
        let mut store = Self {
            config,
            config_string,
            page,
            prober: context.prober,
            state: Arc::new(state_tx),
            events: Arc::new(OnceLock::new()),
            discovery: None,
        };
        if needs_discovery {
            store.spawn_discovery();
        }
        Ok(store)
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<EndpointState> {
        Arc::clone(&self.state.borrow())
    }

    /// Watch whole-snapshot replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<EndpointState>> {
        self.state.subscribe()
    }

    /// Take the change-notification receiver. Only the first call returns
    /// `Some`. Transitions before the first call emit nothing.
    pub fn take_events(&mut self) -> Option<StoreEvents> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.events.set(tx).ok()?;
        Some(StoreEvents { rx })
    }

    /// The raw configuration text, for the collaborator's save action.
    pub fn config_string(&self) -> Option<&str> {
        self.config_string.as_deref()
    }

    /// Whether subscription discovery is still running.
    pub fn is_discovering(&self) -> bool {
        self.discovery.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Wait until a running discovery finishes and return the resulting
    /// snapshot.
    pub async fn wait_for_discovery(&mut self) -> Arc<EndpointState> {
        if let Some(handle) = self.discovery.take() {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::warn!("Subscription discovery task failed: {e}"),
            }
        }
        self.current()
    }

    /// Switch to another environment of the current configuration.
    ///
    /// Endpoint, subscription endpoint, headers and the active selection are
    /// replaced together. The subscription endpoint is re-derived from the
    /// environment, not probed. On error the previous snapshot stays.
    pub fn select_environment(
        &mut self,
        env_name: &str,
        project_name: Option<&str>,
    ) -> Result<Arc<EndpointState>> {
        let declared = match &self.config {
            Some(config) => config::resolve_endpoints(config, env_name, project_name)?,
            None => {
                return Err(ConfigError::EnvironmentNotFound {
                    env: env_name.to_string(),
                    project: project_name.map(str::to_string),
                }
                .into());
            }
        };

        let endpoint = absolutize(&declared.endpoint, &self.page.origin());
        let subscription_endpoint = realtime_or_none(derive_realtime_url(
            &endpoint,
            declared.subscription_endpoint.as_deref(),
            &self.page,
        ));

        self.cancel_discovery();
        let previous = self.current();
        let next = Arc::new(EndpointState {
            endpoint,
            subscription_endpoint,
            headers: declared.headers.unwrap_or_default(),
            active_env: Some(env_name.to_string()),
            active_project: project_name.map(str::to_string),
            ..(*previous).clone()
        });
        self.state.send_replace(Arc::clone(&next));

        tracing::info!(
            env = env_name,
            project = ?project_name,
            endpoint = %next.endpoint,
            "Environment selected"
        );
        self.emit(StoreEvent::EnvironmentSelected {
            env: env_name.to_string(),
            project: project_name.map(str::to_string),
        });
        if previous.endpoint != next.endpoint {
            self.emit(StoreEvent::EndpointChanged(next.endpoint.clone()));
        }
        if previous.subscription_endpoint != next.subscription_endpoint {
            self.emit(StoreEvent::SubscriptionEndpointChanged(
                next.subscription_endpoint.clone(),
            ));
        }
        Ok(next)
    }

    /// Manually edited endpoint. Root-relative URLs are absolutized.
    pub fn set_endpoint(&mut self, endpoint: &str) -> Arc<EndpointState> {
        let endpoint = absolutize(endpoint, &self.page.origin());
        let previous = self.current();
        if previous.endpoint == endpoint {
            return previous;
        }
        let next = Arc::new(EndpointState {
            endpoint: endpoint.clone(),
            ..(*previous).clone()
        });
        self.state.send_replace(Arc::clone(&next));
        self.emit(StoreEvent::EndpointChanged(endpoint));
        next
    }

    /// Manually edited subscription endpoint; must be a `ws`/`wss` URL.
    /// Stops a running discovery.
    pub fn set_subscription_endpoint(&mut self, url: Option<&str>) -> Result<Arc<EndpointState>> {
        if let Some(url) = url.filter(|u| !is_realtime_url(u)) {
            return Err(Error::NotRealtime(url.to_string()));
        }
        self.cancel_discovery();
        let previous = self.current();
        let subscription_endpoint = url.map(str::to_string);
        if previous.subscription_endpoint == subscription_endpoint {
            return Ok(previous);
        }
        let next = Arc::new(previous.with_subscription_endpoint(subscription_endpoint.clone()));
        self.state.send_replace(Arc::clone(&next));
        self.emit(StoreEvent::SubscriptionEndpointChanged(subscription_endpoint));
        Ok(next)
    }

    /// Replace the raw configuration text.
    ///
    /// Only the structured-format flag is revalidated (for non-empty text);
    /// the active environment is not re-resolved.
    pub fn replace_config_string(&mut self, text: String) {
        if self.config_string.as_deref() == Some(text.as_str()) {
            return;
        }
        let previous = self.current();
        let is_structured_format = if text.is_empty() {
            previous.config_is_structured_format
        } else {
            config::is_structured_format(&text)
        };
        self.config_string = Some(text);

        if previous.config_is_structured_format != is_structured_format {
            self.state.send_replace(Arc::new(EndpointState {
                config_is_structured_format: is_structured_format,
                ..(*previous).clone()
            }));
        }
        self.emit(StoreEvent::ConfigChanged {
            is_structured_format,
        });
    }

    fn spawn_discovery(&mut self) {
        let endpoint = self.current().endpoint.clone();
        let candidates = generate_candidates(&endpoint);
        if candidates.is_empty() {
            tracing::info!(%endpoint, "No subscription endpoint candidates");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%endpoint, "No async runtime, skipping subscription discovery");
            return;
        };

        tracing::info!(
            %endpoint,
            candidates = candidates.len(),
            "Discovering subscription endpoint"
        );
        let prober = Arc::clone(&self.prober);
        let state = Arc::clone(&self.state);
        let events = Arc::clone(&self.events);
        self.discovery = Some(runtime.spawn(async move {
            let Some(found) = find_first_valid_with(prober.as_ref(), &candidates).await else {
                return;
            };
            // Apply only to the snapshot the discovery was started for.
            let applied = state.send_if_modified(|current| {
                if current.endpoint != endpoint || current.subscription_endpoint.is_some() {
                    return false;
                }
                *current = Arc::new(current.with_subscription_endpoint(Some(found.clone())));
                true
            });
            if applied {
                emit(&events, StoreEvent::SubscriptionEndpointChanged(Some(found)));
            } else {
                tracing::debug!(url = %found, "Discarding discovered endpoint for a newer state");
            }
        }));
    }

    fn cancel_discovery(&mut self) {
        if let Some(handle) = self.discovery.take() {
            handle.abort();
        }
    }

    fn emit(&self, event: StoreEvent) {
        emit(&self.events, event);
    }
}

impl Drop for EndpointStateStore {
    fn drop(&mut self) {
        self.cancel_discovery();
    }
}

fn emit(events: &OnceLock<mpsc::Sender<StoreEvent>>, event: StoreEvent) {
    let Some(events) = events.get() else {
        return;
    };
    match events.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::warn!(?event, "event channel full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            // Nobody listens for events
        }
    }
}

/// Persist a `platform-token` query parameter and strip the query from the
/// page location. The page is only rewritten once the token is stored.
fn bootstrap_platform_token(
    page: &PageUrl,
    location: &dyn PageLocation,
    storage: &dyn TokenStorage,
) -> Result<()> {
    let Some(token) = page.query_param(PLATFORM_TOKEN_KEY) else {
        return Ok(());
    };
    storage
        .set(PLATFORM_TOKEN_KEY, &token)
        .map_err(Error::Storage)?;
    location
        .replace(&format!("{}{}", page.origin(), page.path()))
        .map_err(Error::Navigation)?;
    tracing::info!("Stored platform token from page URL");
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn realtime_or_none(url: String) -> Option<String> {
    if is_realtime_url(&url) {
        Some(url)
    } else {
        tracing::debug!(%url, "Derived subscription URL is not a realtime URL");
        None
    }
}

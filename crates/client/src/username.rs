// Username resolution: turns a user URI bound as a view into a display name.

use futures_util::future::BoxFuture;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Returned whenever a name cannot be determined.
pub const UNKNOWN_USER: &str = "unknown";

/// Resolves a user URI to a display name. Never fails: lookups that go
/// wrong yield [`UNKNOWN_USER`].
pub trait UsernameResolver: Send + Sync + 'static {
    fn resolve(&self, uri: String, session: Option<String>) -> BoxFuture<'static, String>;
}

/// Looks names up with `GET <uri>?session=<token>` on the resource API.
#[derive(Debug, Clone, Default)]
pub struct HttpUsernameResolver {
    client: Client,
}

impl HttpUsernameResolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsernameResolver for HttpUsernameResolver {
    fn resolve(&self, uri: String, session: Option<String>) -> BoxFuture<'static, String> {
        let client = self.client.clone();
        Box::pin(async move {
            let mut url = match Url::parse(&uri) {
                Ok(url) => url,
                Err(error) => {
                    debug!(%uri, %error, "view uri is not a valid url");
                    return UNKNOWN_USER.to_owned();
                }
            };
            if let Some(session) = session {
                url.query_pairs_mut().append_pair("session", &session);
            }

            let response = match client.get(url).send().await {
                Ok(response) if response.status().is_success() => response,
                Ok(response) => {
                    debug!(%uri, status = %response.status(), "username lookup rejected");
                    return UNKNOWN_USER.to_owned();
                }
                Err(error) => {
                    debug!(%uri, %error, "username lookup failed");
                    return UNKNOWN_USER.to_owned();
                }
            };
            match response.json::<Value>().await {
                Ok(body) => display_name(&body),
                Err(error) => {
                    debug!(%uri, %error, "username lookup returned invalid json");
                    UNKNOWN_USER.to_owned()
                }
            }
        })
    }
}

/// `result.description` when the body has a `result`, else top-level `name`.
pub fn display_name(body: &Value) -> String {
    let name = match body.get("result") {
        Some(result) => result.get("description"),
        None => body.get("name"),
    };
    name.and_then(Value::as_str).unwrap_or(UNKNOWN_USER).to_owned()
}

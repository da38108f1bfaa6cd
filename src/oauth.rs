use super::*;
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 unreserved characters stay as they are, everything else is escaped.
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const NONCE_LEN: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RequestToken {
    pub(crate) token: String,
    pub(crate) secret: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AccessToken {
    pub(crate) token: String,
    pub(crate) secret: String,
}

#[async_trait]
pub(crate) trait OAuthProvider: Send + Sync {
    async fn get_request_token(&self) -> Result<RequestToken, BotError>;

    fn authorize_url(&self, token: &RequestToken) -> String;

    /// Fails with `HandshakeRejected` when the provider refuses the request
    /// pair, e.g. because the user never granted access.
    async fn get_access_token(&self, request: &RequestToken) -> Result<AccessToken, BotError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum BeginOutcome {
    Pending { authorize_url: String },
    AlreadyAuthorized { remote_account_id: String },
}

/// Drives the three-legged flow:
/// no record -> request pair stored -> access triple stored.
pub(crate) struct HandshakeCoordinator {
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn OAuthProvider>,
    catalog: Arc<dyn CatalogApi>,
}

impl HandshakeCoordinator {
    pub(crate) fn new(
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn OAuthProvider>,
        catalog: Arc<dyn CatalogApi>,
    ) -> Self {
        HandshakeCoordinator {
            store,
            provider,
            catalog,
        }
    }

    pub(crate) async fn begin(&self, user_id: u64) -> Result<BeginOutcome, BotError> {
        if let Some(record) = self.store.get_tokens(user_id).await? {
            if let Some(access) = record.access {
                return Ok(BeginOutcome::AlreadyAuthorized {
                    remote_account_id: access.remote_account_id,
                });
            }
            info!("request token already stored for user_id {}", user_id);
            return Ok(BeginOutcome::Pending {
                authorize_url: self.provider.authorize_url(&record.request_token()),
            });
        }

        let fresh = self.provider.get_request_token().await?;
        if !self.store.upsert_request_token(user_id, &fresh).await? {
            info!("concurrent begin for user_id {}, keeping stored pair", user_id);
        }

        // The link has to carry whichever pair `confirm` will exchange.
        let stored = self
            .store
            .get_tokens(user_id)
            .await?
            .map(|record| record.request_token())
            .unwrap_or(fresh);
        Ok(BeginOutcome::Pending {
            authorize_url: self.provider.authorize_url(&stored),
        })
    }

    /// Returns the remote account id the user is now authorized as.
    pub(crate) async fn confirm(&self, user_id: u64) -> Result<String, BotError> {
        let record = self
            .store
            .get_tokens(user_id)
            .await?
            .ok_or(BotError::HandshakeNotStarted)?;
        if let Some(access) = record.access {
            return Ok(access.remote_account_id);
        }

        let access = self
            .provider
            .get_access_token(&record.request_token())
            .await?;
        let remote_account_id = match self.catalog.who_am_i(&access).await {
            Ok(id) => id,
            Err(BotError::Unauthorized) => {
                return Err(BotError::HandshakeRejected(
                    "access token refused by the catalog".to_string(),
                ))
            }
            Err(err) => return Err(err),
        };

        self.store
            .set_access_credentials(user_id, &access, &remote_account_id)
            .await?;
        info!(
            "success auth, user_id: {}, remote account: {}",
            user_id, remote_account_id
        );
        Ok(remote_account_id)
    }
}

pub(crate) fn oauth_encode(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ENCODE_SET).to_string()
}

pub(crate) fn nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

/// `url` must not carry a query string; its parameters belong in `params`.
pub(crate) fn signature_base_string(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(key, value)| (oauth_encode(key), oauth_encode(value)))
        .collect();
    encoded.sort();
    let normalized = encoded
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        oauth_encode(url),
        oauth_encode(&normalized)
    )
}

pub(crate) fn sign(base_string: &str, consumer_secret: &str, token_secret: &str) -> Result<String> {
    let key = format!(
        "{}&{}",
        oauth_encode(consumer_secret),
        oauth_encode(token_secret)
    );
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| anyhow!("init hmac: {}", e))?;
    mac.update(base_string.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Consumer credentials plus the token pair a request is signed with.
pub(crate) struct Signer<'a> {
    pub(crate) consumer_key: &'a str,
    pub(crate) consumer_secret: &'a str,
    pub(crate) token: Option<(&'a str, &'a str)>,
}

impl Signer<'_> {
    pub(crate) fn authorization_header(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        nonce: &str,
        timestamp: u64,
    ) -> Result<String> {
        let mut oauth_params = vec![
            ("oauth_consumer_key".to_string(), self.consumer_key.to_string()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];
        if let Some((token, _)) = self.token {
            oauth_params.push(("oauth_token".to_string(), token.to_string()));
        }

        let mut all_params = oauth_params.clone();
        all_params.extend_from_slice(params);
        let base = signature_base_string(method, url, &all_params);
        let token_secret = self.token.map(|(_, secret)| secret).unwrap_or("");
        let signature = sign(&base, self.consumer_secret, token_secret)?;
        oauth_params.push(("oauth_signature".to_string(), signature));

        let fields = oauth_params
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", oauth_encode(key), oauth_encode(value)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {}", fields))
    }
}

/// Parses an `oauth_token=..&oauth_token_secret=..` response body.
pub(crate) fn parse_token_response(body: &str) -> Option<(String, String)> {
    let mut token = None;
    let mut secret = None;
    for (key, value) in url::form_urlencoded::parse(body.trim().as_bytes()) {
        match key.as_ref() {
            "oauth_token" => token = Some(value.into_owned()),
            "oauth_token_secret" => secret = Some(value.into_owned()),
            _ => {}
        }
    }
    Some((token?, secret?))
}
